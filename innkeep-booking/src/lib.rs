pub mod access;
pub mod cancellation;
pub mod creation;
pub mod finance;
pub mod orchestrator;

pub use access::{GuestAccessService, TokenVerifier};
pub use cancellation::{CancellationService, GuestCancellation};
pub use creation::{CreateReservationRequest, CreatedReservation, ReservationService};
pub use orchestrator::RefundOrchestrator;

#[cfg(test)]
pub(crate) mod test_support {
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use innkeep_core::events::{ReservationEventPublisher, ReservationWritten};
    use innkeep_core::rate_limit::{RateLimitRule, TOKEN_VERIFICATION};
    use innkeep_core::reservation::{
        GuestInfo, PaymentMethod, PaymentOption, PaymentStatus, Reservation, ReservationStatus, StayDates,
    };
    use innkeep_core::unit::{CancellationPolicy, PaymentMethodSettings, UnitSettings};
    use innkeep_core::{CoreError, CoreResult};
    use innkeep_store::memory::InMemoryRateLimiter;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    use crate::creation::{generate_reference, CreateReservationRequest};

    #[derive(Default)]
    pub struct RecordingPublisher {
        events: Mutex<Vec<ReservationWritten>>,
        fail: bool,
    }

    impl RecordingPublisher {
        pub fn failing() -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                fail: true,
            }
        }

        pub fn published(&self) -> Vec<ReservationWritten> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ReservationEventPublisher for RecordingPublisher {
        async fn publish(&self, event: &ReservationWritten) -> CoreResult<()> {
            if self.fail {
                return Err(CoreError::internal("broker down"));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    /// Card, bank transfer and "none" enabled; cash switched off.
    pub fn unit_settings() -> UnitSettings {
        let mut payment_methods = HashMap::new();
        payment_methods.insert(PaymentMethod::Card, PaymentMethodSettings::default());
        payment_methods.insert(PaymentMethod::BankTransfer, PaymentMethodSettings::default());
        payment_methods.insert(PaymentMethod::None, PaymentMethodSettings::default());
        payment_methods.insert(
            PaymentMethod::Cash,
            PaymentMethodSettings {
                enabled: false,
                deposit_percentage: 20.0,
            },
        );
        UnitSettings {
            unit_id: Uuid::new_v4(),
            property_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            requires_owner_approval: false,
            payment_methods,
            cancellation: CancellationPolicy::default(),
        }
    }

    pub fn guest() -> GuestInfo {
        GuestInfo {
            name: "Grace Hopper".to_string(),
            email: "guest@example.com".into(),
            phone: "+1 202 555 0143".into(),
        }
    }

    /// Stay of `from..to` days counted from 30 days out.
    pub fn create_request(settings: &UnitSettings, from: i64, to: i64) -> CreateReservationRequest {
        let base = Utc::now().date_naive() + Duration::days(30);
        CreateReservationRequest {
            unit_id: settings.unit_id,
            property_id: settings.property_id,
            owner_id: settings.owner_id,
            guest: guest(),
            check_in: base + Duration::days(from),
            check_out: base + Duration::days(to),
            guest_count: 2,
            total_price: 50_000,
            payment_method: PaymentMethod::Card,
            payment_option: PaymentOption::Full,
        }
    }

    pub fn confirmed_reservation(unit_id: Uuid) -> Reservation {
        let now = Utc::now();
        let check_in = now.date_naive() + Duration::days(60);
        Reservation {
            id: Uuid::new_v4(),
            unit_id,
            property_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            guest: guest(),
            stay: StayDates {
                check_in,
                check_out: check_in + Duration::days(5),
            },
            guest_count: 2,
            total_price: 40_000,
            deposit_amount: 0,
            paid_amount: 0,
            payment_method: PaymentMethod::Cash,
            payment_option: PaymentOption::Later,
            payment_status: PaymentStatus::Pending,
            payment_reference: None,
            status: ReservationStatus::Confirmed,
            booking_reference: generate_reference(now),
            access_token_hash: "0".repeat(64),
            token_expires_at: now + Duration::days(90),
            cancellation: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn limiter(limit: u64) -> Arc<InMemoryRateLimiter> {
        let mut rules = HashMap::new();
        rules.insert(TOKEN_VERIFICATION.to_string(), RateLimitRule::new(limit, 60));
        Arc::new(InMemoryRateLimiter::new(rules))
    }
}
