use std::sync::Arc;
use innkeep_booking::{CancellationService, GuestAccessService, ReservationService};
use innkeep_core::rate_limit::RateLimiter;
use innkeep_core::repository::{OwnerInbox, SyncFailureStore};
use innkeep_sync::SyncDispatcher;

use crate::metrics::ApiMetrics;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<ReservationService>,
    pub cancellations: Arc<CancellationService>,
    pub guest_access: Arc<GuestAccessService>,
    pub dispatcher: Arc<SyncDispatcher>,
    pub inbox: Arc<dyn OwnerInbox>,
    pub sync_failures: Arc<dyn SyncFailureStore>,
    pub rate_limiter: Arc<dyn RateLimiter>,
    pub metrics: Arc<ApiMetrics>,
    pub auth: AuthConfig,
}
