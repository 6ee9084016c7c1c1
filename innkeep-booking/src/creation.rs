use chrono::{DateTime, NaiveDate, Utc};
use innkeep_core::events::{ReservationEventPublisher, ReservationWritten};
use innkeep_core::notify::{GuestNotification, NotificationSender};
use innkeep_core::repository::{ReservationLedger, UnitSettingsRepository};
use innkeep_core::reservation::{
    GuestInfo, PaymentMethod, PaymentOption, PaymentStatus, Reservation, ReservationStatus, StayDates,
};
use innkeep_core::unit::UnitSettings;
use innkeep_core::{CoreError, CoreResult};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::access::{compute_expiry, generate_token};
use crate::finance::deposit_amount;

pub const MAX_GUEST_COUNT: u32 = 100;

#[derive(Debug, Clone)]
pub struct CreateReservationRequest {
    pub unit_id: Uuid,
    pub property_id: Uuid,
    pub owner_id: Uuid,
    pub guest: GuestInfo,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest_count: u32,
    /// Quoted by the pricing service, in cents.
    pub total_price: i64,
    pub payment_method: PaymentMethod,
    pub payment_option: PaymentOption,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedReservation {
    pub reservation_id: Uuid,
    pub reference: String,
    pub deposit_amount: i64,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    /// Returned once; only its hash is kept.
    pub access_token: String,
    pub token_expires_at: DateTime<Utc>,
}

/// Display label only. Uniqueness is probabilistic and nothing looks reservations up by it.
pub fn generate_reference(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("BK-{}-{}", now.timestamp_millis(), suffix)
}

fn resolve_payment_status(settings: &UnitSettings, method: PaymentMethod) -> PaymentStatus {
    if settings.requires_owner_approval || method == PaymentMethod::None {
        PaymentStatus::NotRequired
    } else {
        PaymentStatus::Pending
    }
}

pub struct ReservationService {
    ledger: Arc<dyn ReservationLedger>,
    settings: Arc<dyn UnitSettingsRepository>,
    events: Arc<dyn ReservationEventPublisher>,
    notifier: Arc<dyn NotificationSender>,
}

impl ReservationService {
    pub fn new(
        ledger: Arc<dyn ReservationLedger>,
        settings: Arc<dyn UnitSettingsRepository>,
        events: Arc<dyn ReservationEventPublisher>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            ledger,
            settings,
            events,
            notifier,
        }
    }

    pub async fn create_reservation(&self, request: CreateReservationRequest) -> CoreResult<CreatedReservation> {
        self.create_reservation_at(request, Utc::now()).await
    }

    pub async fn create_reservation_at(
        &self,
        request: CreateReservationRequest,
        now: DateTime<Utc>,
    ) -> CoreResult<CreatedReservation> {
        let stay = validate_request(&request, now)?;

        let settings = self
            .settings
            .get_settings(request.unit_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("unit {}", request.unit_id)))?;
        if settings.property_id != request.property_id || settings.owner_id != request.owner_id {
            return Err(CoreError::ValidationError(
                "unit does not belong to the given property and owner".to_string(),
            ));
        }

        let method = settings.enabled_method(request.payment_method).ok_or_else(|| {
            CoreError::PermissionDenied(format!(
                "payment method '{}' is not enabled for this unit",
                request.payment_method
            ))
        })?;

        let deposit = deposit_amount(request.total_price, request.payment_option, method.deposit_percentage);
        let payment_status = resolve_payment_status(&settings, request.payment_method);
        let token = generate_token();

        let reservation = Reservation {
            id: Uuid::new_v4(),
            unit_id: request.unit_id,
            property_id: request.property_id,
            owner_id: request.owner_id,
            guest: request.guest,
            stay,
            guest_count: request.guest_count,
            total_price: request.total_price,
            deposit_amount: deposit,
            paid_amount: 0,
            payment_method: request.payment_method,
            payment_option: request.payment_option,
            payment_status,
            payment_reference: None,
            status: ReservationStatus::Pending,
            booking_reference: generate_reference(now),
            access_token_hash: token.hash,
            token_expires_at: compute_expiry(stay.check_out, now),
            cancellation: None,
            created_at: now,
            updated_at: now,
        };

        self.ledger.insert_if_available(&reservation).await?;
        info!(
            "Reservation {} ({}) created for unit {}: {} nights",
            reservation.id,
            reservation.booking_reference,
            reservation.unit_id,
            stay.nights()
        );

        self.after_commit(&reservation).await;
        self.notify_guest(
            &reservation,
            GuestNotification::ReservationCreated {
                reservation_id: reservation.id,
                booking_reference: reservation.booking_reference.clone(),
            },
        )
        .await;

        Ok(CreatedReservation {
            reservation_id: reservation.id,
            reference: reservation.booking_reference,
            deposit_amount: reservation.deposit_amount,
            status: reservation.status,
            payment_status: reservation.payment_status,
            access_token: token.plaintext,
            token_expires_at: reservation.token_expires_at,
        })
    }

    /// Owner marks a stay as finished. The resulting event reopens the dates on every
    /// connected marketplace.
    pub async fn complete_reservation(&self, reservation_id: Uuid, owner_id: Uuid) -> CoreResult<Reservation> {
        let existing = self
            .ledger
            .get(reservation_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("reservation {}", reservation_id)))?;
        if existing.owner_id != owner_id {
            return Err(CoreError::PermissionDenied(
                "reservation belongs to another owner".to_string(),
            ));
        }

        let completed = self.ledger.complete_in_tx(reservation_id, Utc::now()).await?;
        info!("Reservation {} completed", completed.id);
        self.after_commit(&completed).await;
        Ok(completed)
    }

    async fn after_commit(&self, reservation: &Reservation) {
        let event = ReservationWritten::from_reservation(reservation);
        if let Err(e) = self.events.publish(&event).await {
            warn!("Failed to publish write event for {}: {}", reservation.id, e);
        }
    }

    async fn notify_guest(&self, reservation: &Reservation, notification: GuestNotification) {
        if let Err(e) = self
            .notifier
            .send(reservation.guest.email.expose(), &notification)
            .await
        {
            warn!("Guest notification for {} not sent: {}", reservation.id, e);
        }
    }
}

fn validate_request(request: &CreateReservationRequest, now: DateTime<Utc>) -> CoreResult<StayDates> {
    if request.unit_id.is_nil() || request.property_id.is_nil() || request.owner_id.is_nil() {
        return Err(CoreError::ValidationError(
            "unit, property and owner ids are required".to_string(),
        ));
    }
    let stay = StayDates::new(request.check_in, request.check_out)?;
    if stay.check_in < now.date_naive() {
        return Err(CoreError::ValidationError("check-in cannot be in the past".to_string()));
    }
    request.guest.validate()?;
    if request.guest_count == 0 {
        return Err(CoreError::ValidationError("at least one guest is required".to_string()));
    }
    if request.guest_count > MAX_GUEST_COUNT {
        return Err(CoreError::ValidationError(format!(
            "at most {} guests per reservation",
            MAX_GUEST_COUNT
        )));
    }
    if request.total_price < 0 {
        return Err(CoreError::ValidationError("total price cannot be negative".to_string()));
    }
    Ok(stay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::hash_token;
    use crate::test_support::{create_request, unit_settings, RecordingPublisher};
    use chrono::Duration;
    use innkeep_core::notify::MockNotificationSender;
    use innkeep_store::memory::InMemoryReservationLedger;

    struct Fixture {
        ledger: Arc<InMemoryReservationLedger>,
        events: Arc<RecordingPublisher>,
        notifier: Arc<MockNotificationSender>,
        service: ReservationService,
        settings: UnitSettings,
    }

    async fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryReservationLedger::new());
        let settings = unit_settings();
        ledger.insert_settings(settings.clone()).await;
        let events = Arc::new(RecordingPublisher::default());
        let notifier = Arc::new(MockNotificationSender::default());
        let service = ReservationService::new(ledger.clone(), ledger.clone(), events.clone(), notifier.clone());
        Fixture {
            ledger,
            events,
            notifier,
            service,
            settings,
        }
    }

    #[test]
    fn test_reference_format() {
        let now = Utc::now();
        let reference = generate_reference(now);
        let parts: Vec<&str> = reference.split('-').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "BK");
        assert_eq!(parts[1], now.timestamp_millis().to_string());
        assert!(parts[2].parse::<u32>().unwrap() < 10_000);
    }

    #[tokio::test]
    async fn test_creates_pending_reservation_with_deposit_and_token() {
        let f = fixture().await;
        let mut request = create_request(&f.settings, 10, 15);
        request.payment_method = PaymentMethod::BankTransfer;
        request.payment_option = PaymentOption::Deposit;
        request.total_price = 50_000;

        let created = f.service.create_reservation(request).await.unwrap();
        assert_eq!(created.status, ReservationStatus::Pending);
        assert_eq!(created.payment_status, PaymentStatus::Pending);
        assert_eq!(created.deposit_amount, 10_000);
        assert!(created.reference.starts_with("BK-"));

        let stored = f.ledger.get(created.reservation_id).await.unwrap().unwrap();
        assert_eq!(stored.access_token_hash, hash_token(&created.access_token));
        assert_eq!(f.events.published().len(), 1);
        assert_eq!(f.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_owner_approval_and_no_payment_need_no_payment() {
        let f = fixture().await;
        let mut request = create_request(&f.settings, 10, 12);
        request.payment_method = PaymentMethod::None;
        let created = f.service.create_reservation(request).await.unwrap();
        assert_eq!(created.payment_status, PaymentStatus::NotRequired);

        let ledger = Arc::new(InMemoryReservationLedger::new());
        let mut settings = unit_settings();
        settings.requires_owner_approval = true;
        ledger.insert_settings(settings.clone()).await;
        let service = ReservationService::new(
            ledger.clone(),
            ledger,
            Arc::new(RecordingPublisher::default()),
            Arc::new(MockNotificationSender::default()),
        );
        let created = service.create_reservation(create_request(&settings, 10, 12)).await.unwrap();
        assert_eq!(created.status, ReservationStatus::Pending);
        assert_eq!(created.payment_status, PaymentStatus::NotRequired);
    }

    #[tokio::test]
    async fn test_disabled_payment_method_is_permission_denied() {
        let f = fixture().await;
        let mut request = create_request(&f.settings, 10, 12);
        request.payment_method = PaymentMethod::Cash;

        let err = f.service.create_reservation(request).await.unwrap_err();
        assert_eq!(
            err,
            CoreError::PermissionDenied("payment method 'cash' is not enabled for this unit".to_string())
        );
        assert!(f.events.published().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let f = fixture().await;

        let inverted = create_request(&f.settings, 15, 10);
        assert_eq!(f.service.create_reservation(inverted).await.unwrap_err().code(), "invalid-argument");

        let mut past = create_request(&f.settings, 10, 12);
        past.check_in = (Utc::now() - Duration::days(2)).date_naive();
        past.check_out = Utc::now().date_naive();
        assert_eq!(f.service.create_reservation(past).await.unwrap_err().code(), "invalid-argument");

        let mut no_guest = create_request(&f.settings, 10, 12);
        no_guest.guest_count = 0;
        assert_eq!(f.service.create_reservation(no_guest).await.unwrap_err().code(), "invalid-argument");

        let mut crowd = create_request(&f.settings, 10, 12);
        crowd.guest_count = u32::MAX;
        assert_eq!(f.service.create_reservation(crowd).await.unwrap_err().code(), "invalid-argument");

        let mut unknown = create_request(&f.settings, 10, 12);
        unknown.unit_id = Uuid::new_v4();
        assert_eq!(f.service.create_reservation(unknown).await.unwrap_err().code(), "not-found");
    }

    #[tokio::test]
    async fn test_same_day_turnover_conflicts_on_both_sides() {
        let f = fixture().await;
        f.service.create_reservation(create_request(&f.settings, 10, 15)).await.unwrap();

        let straddle = f.service.create_reservation(create_request(&f.settings, 14, 18)).await;
        assert_eq!(straddle.unwrap_err(), CoreError::Conflict("dates no longer available".to_string()));

        let turnover = f.service.create_reservation(create_request(&f.settings, 15, 20)).await;
        assert!(matches!(turnover, Err(CoreError::Conflict(_))));

        let ends_on_check_in = f.service.create_reservation(create_request(&f.settings, 5, 10)).await;
        assert!(matches!(ends_on_check_in, Err(CoreError::Conflict(_))));

        let before = f.service.create_reservation(create_request(&f.settings, 5, 9)).await;
        assert!(before.is_ok());
    }

    #[tokio::test]
    async fn test_storage_outage_is_retryable_and_leaves_nothing_behind() {
        let f = fixture().await;
        f.ledger.set_offline(true);
        let err = f.service.create_reservation(create_request(&f.settings, 10, 12)).await.unwrap_err();
        assert!(err.is_retryable());
        f.ledger.set_offline(false);

        assert!(f.ledger.active_for_unit(f.settings.unit_id).await.unwrap().is_empty());
        assert!(f.service.create_reservation(create_request(&f.settings, 10, 12)).await.is_ok());
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_creation() {
        let ledger = Arc::new(InMemoryReservationLedger::new());
        let settings = unit_settings();
        ledger.insert_settings(settings.clone()).await;
        let service = ReservationService::new(
            ledger.clone(),
            ledger,
            Arc::new(RecordingPublisher::failing()),
            Arc::new(MockNotificationSender::failing()),
        );
        assert!(service.create_reservation(create_request(&settings, 10, 12)).await.is_ok());
    }

    #[tokio::test]
    async fn test_complete_publishes_and_checks_owner() {
        let f = fixture().await;
        let created = f.service.create_reservation(create_request(&f.settings, 10, 12)).await.unwrap();

        let err = f
            .service
            .complete_reservation(created.reservation_id, Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "permission-denied");

        let done = f
            .service
            .complete_reservation(created.reservation_id, f.settings.owner_id)
            .await
            .unwrap();
        assert_eq!(done.status, ReservationStatus::Completed);
        let events = f.events.published();
        assert_eq!(events.last().map(|e| e.status), Some(ReservationStatus::Completed));

        let again = f.service.complete_reservation(created.reservation_id, f.settings.owner_id).await;
        assert_eq!(again.unwrap_err().code(), "failed-precondition");
    }
}
