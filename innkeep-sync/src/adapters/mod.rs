pub mod http;
pub mod mock;

use innkeep_core::platform::{Platform, PlatformAdapter};
use std::collections::HashMap;
use std::sync::Arc;

pub use http::HttpPlatformAdapter;
pub use mock::MockPlatformAdapter;

/// One adapter per marketplace.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(&platform).cloned()
    }
}
