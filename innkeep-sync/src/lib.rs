//! Outbound calendar synchronization to listing marketplaces.
//!
//! Committed reservation writes arrive as [`ReservationWritten`] events. The
//! [`SyncDispatcher`] blocks or unblocks the dates on every active connection, queues
//! transient failures (and writes the transport could not deliver, via
//! [`RetryQueuePublisher`]), and the [`RetryScheduler`] drains that queue with capped
//! exponential backoff until it succeeds or the owner is told it gave up.
//!
//! [`ReservationWritten`]: innkeep_core::events::ReservationWritten

pub mod adapters;
pub mod backoff;
pub mod channel;
pub mod credentials;
pub mod dispatcher;
pub mod fallback;
pub mod scheduler;

pub use adapters::{AdapterRegistry, HttpPlatformAdapter, MockPlatformAdapter};
pub use backoff::BackoffPolicy;
pub use channel::{run_dispatch_loop, ChannelPublisher};
pub use credentials::{CredentialError, CredentialManager, CredentialVault};
pub use dispatcher::{DispatchReport, SyncAction, SyncDispatcher};
pub use fallback::RetryQueuePublisher;
pub use scheduler::{RetryReport, RetryScheduler, RetrySettings};

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{Duration, Utc};
    use innkeep_core::events::ReservationWritten;
    use innkeep_core::platform::{ConnectionStatus, Credential, Platform, PlatformConnection};
    use innkeep_core::reservation::{
        GuestInfo, PaymentMethod, PaymentOption, PaymentStatus, Reservation, ReservationStatus,
        StayDates,
    };
    use innkeep_shared::Masked;
    use innkeep_store::memory::{
        InMemoryConnectionRegistry, InMemoryOwnerInbox, InMemoryReservationLedger,
        InMemorySyncFailureStore,
    };
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::adapters::{AdapterRegistry, MockPlatformAdapter};
    use crate::backoff::BackoffPolicy;
    use crate::credentials::{CredentialManager, CredentialVault};
    use crate::dispatcher::SyncDispatcher;
    use crate::scheduler::{RetryScheduler, RetrySettings};

    pub fn connection(platform: Platform, sealed: &str) -> PlatformConnection {
        PlatformConnection {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            unit_id: Uuid::new_v4(),
            platform,
            external_property_id: "ext-prop".to_string(),
            external_unit_id: "ext-unit".to_string(),
            sealed_credential: sealed.to_string(),
            credential_expires_at: None,
            status: ConnectionStatus::Active,
            last_synced_at: None,
        }
    }

    fn stay() -> StayDates {
        let check_in = Utc::now().date_naive() + Duration::days(30);
        StayDates {
            check_in,
            check_out: check_in + Duration::days(4),
        }
    }

    pub fn event(unit_id: Uuid, status: ReservationStatus) -> ReservationWritten {
        ReservationWritten {
            reservation_id: Uuid::new_v4(),
            unit_id,
            owner_id: Uuid::new_v4(),
            status,
            stay: stay(),
            written_at: Utc::now(),
        }
    }

    /// One unit with in-memory stores, mock Airbnb and Vrbo adapters (no Booking.com).
    pub struct Harness {
        pub owner_id: Uuid,
        pub unit_id: Uuid,
        pub vault: Arc<CredentialVault>,
        pub ledger: Arc<InMemoryReservationLedger>,
        pub connections: Arc<InMemoryConnectionRegistry>,
        pub failures: Arc<InMemorySyncFailureStore>,
        pub inbox: Arc<InMemoryOwnerInbox>,
        pub airbnb: Arc<MockPlatformAdapter>,
        pub vrbo: Arc<MockPlatformAdapter>,
        pub dispatcher: Arc<SyncDispatcher>,
        pub scheduler: Arc<RetryScheduler>,
    }

    impl Harness {
        pub async fn new() -> Self {
            let vault = Arc::new(CredentialVault::new(&[3u8; 32]).unwrap());
            let ledger = Arc::new(InMemoryReservationLedger::new());
            let connections = Arc::new(InMemoryConnectionRegistry::new());
            let failures = Arc::new(InMemorySyncFailureStore::new());
            let inbox = Arc::new(InMemoryOwnerInbox::new());
            let airbnb = Arc::new(MockPlatformAdapter::new(Platform::Airbnb));
            let vrbo = Arc::new(MockPlatformAdapter::new(Platform::Vrbo));

            let adapters = AdapterRegistry::new()
                .register(airbnb.clone())
                .register(vrbo.clone());
            let backoff = BackoffPolicy::default();
            let credentials = Arc::new(CredentialManager::new(vault.clone(), connections.clone(), 300));
            let dispatcher = Arc::new(SyncDispatcher::new(
                connections.clone(),
                adapters,
                credentials,
                failures.clone(),
                inbox.clone(),
                backoff,
            ));
            let scheduler = Arc::new(RetryScheduler::new(
                ledger.clone(),
                connections.clone(),
                failures.clone(),
                inbox.clone(),
                dispatcher.clone(),
                backoff,
                RetrySettings {
                    max_retries: 5,
                    batch_size: 50,
                    inter_item_delay: std::time::Duration::ZERO,
                    interval: std::time::Duration::from_secs(60),
                },
            ));

            Self {
                owner_id: Uuid::new_v4(),
                unit_id: Uuid::new_v4(),
                vault,
                ledger,
                connections,
                failures,
                inbox,
                airbnb,
                vrbo,
                dispatcher,
                scheduler,
            }
        }

        /// Registers an active connection for the harness unit with a sealed, non-expiring credential.
        pub async fn connect(&self, platform: Platform) -> PlatformConnection {
            let credential = Credential {
                access_token: Masked::from("access"),
                refresh_token: None,
            };
            let mut conn = connection(platform, &self.vault.seal(&credential).unwrap());
            conn.owner_id = self.owner_id;
            conn.unit_id = self.unit_id;
            self.connections.insert(conn.clone()).await;
            conn
        }

        pub async fn reservation(&self, status: ReservationStatus) -> Reservation {
            let now = Utc::now();
            let reservation = Reservation {
                id: Uuid::new_v4(),
                unit_id: self.unit_id,
                property_id: Uuid::new_v4(),
                owner_id: self.owner_id,
                guest: GuestInfo {
                    name: "Guest".to_string(),
                    email: Masked::from("guest@example.com"),
                    phone: Masked::from("+15550100"),
                },
                stay: stay(),
                guest_count: 2,
                total_price: 40_000,
                deposit_amount: 0,
                paid_amount: 0,
                payment_method: PaymentMethod::Cash,
                payment_option: PaymentOption::Later,
                payment_status: PaymentStatus::Pending,
                payment_reference: None,
                status,
                booking_reference: "BK-TEST".to_string(),
                access_token_hash: "0".repeat(64),
                token_expires_at: now + Duration::days(90),
                cancellation: None,
                created_at: now,
                updated_at: now,
            };
            self.ledger.put(reservation.clone()).await;
            reservation
        }
    }
}
