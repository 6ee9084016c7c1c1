use async_trait::async_trait;
use serde::Deserialize;

use crate::CoreResult;

pub const TOKEN_VERIFICATION: &str = "token_verification";
pub const GUEST_CANCELLATION: &str = "guest_cancellation";
pub const HTTP: &str = "http";

/// Fixed-window ceiling for one operation.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct RateLimitRule {
    pub limit: u64,
    pub window_seconds: u64,
}

impl RateLimitRule {
    pub const fn new(limit: u64, window_seconds: u64) -> Self {
        Self { limit, window_seconds }
    }

    /// Built-in ceilings for operations that have no configured rule.
    pub fn default_for(operation: &str) -> Self {
        match operation {
            TOKEN_VERIFICATION | GUEST_CANCELLATION => Self::new(10, 60),
            _ => Self::new(100, 60),
        }
    }
}

/// One limiter for every abuse-sensitive entry point, keyed by (operation, identifier).
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Count one request. `Ok(true)` means it is within the ceiling.
    async fn hit(&self, operation: &str, identifier: &str) -> CoreResult<bool>;
}
