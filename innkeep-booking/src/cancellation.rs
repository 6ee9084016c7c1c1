use chrono::{DateTime, Duration, Utc};
use innkeep_core::events::{ReservationEventPublisher, ReservationWritten};
use innkeep_core::notify::{GuestNotification, NotificationSender};
use innkeep_core::repository::ReservationLedger;
use innkeep_core::reservation::{
    CancellationActor, CancellationOutcome, CancellationRecord, Reservation, ReservationStatus,
};
use innkeep_core::unit::UnitSettings;
use innkeep_core::{CoreError, CoreResult};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::finance::{initial_refund_status, RefundPolicy};
use crate::orchestrator::RefundOrchestrator;

/// Knowledge-based guest authorization: the booking reference plus the guest's email.
#[derive(Debug, Clone)]
pub struct GuestCancellation {
    pub reservation_id: Uuid,
    pub reference: String,
    pub email: String,
    pub reason: Option<String>,
}

pub struct CancellationService {
    ledger: Arc<dyn ReservationLedger>,
    refunds: RefundOrchestrator,
    events: Arc<dyn ReservationEventPublisher>,
    notifier: Arc<dyn NotificationSender>,
    policy: RefundPolicy,
}

impl CancellationService {
    pub fn new(
        ledger: Arc<dyn ReservationLedger>,
        refunds: RefundOrchestrator,
        events: Arc<dyn ReservationEventPublisher>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            ledger,
            refunds,
            events,
            notifier,
            policy: RefundPolicy::Full,
        }
    }

    pub fn with_policy(mut self, policy: RefundPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn cancel_by_guest(&self, request: GuestCancellation) -> CoreResult<CancellationOutcome> {
        self.cancel_by_guest_at(request, Utc::now()).await
    }

    /// Safe to call again after a timeout. Every call, concurrent or later, returns the
    /// outcome the cancelling transaction recorded; the card refund that runs afterwards
    /// only reports into `refund_result`.
    pub async fn cancel_by_guest_at(
        &self,
        request: GuestCancellation,
        now: DateTime<Utc>,
    ) -> CoreResult<CancellationOutcome> {
        let reservation = self
            .ledger
            .get(request.reservation_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("reservation {}", request.reservation_id)))?;

        if reservation.booking_reference != request.reference || !reservation.guest.email_matches(&request.email) {
            return Err(CoreError::PermissionDenied(
                "reference and email do not match this reservation".to_string(),
            ));
        }
        if reservation.status == ReservationStatus::Completed {
            return Err(not_cancellable(reservation.status));
        }

        let policy = self.policy;
        let reason = request.reason.clone();
        let decide = move |settings: &UnitSettings, fresh: &Reservation| -> CoreResult<Option<CancellationRecord>> {
            decide_guest_cancellation(settings, fresh, policy, reason.clone(), now)
        };
        let commit = self.ledger.cancel_in_tx(request.reservation_id, &decide).await?;

        let outcome = commit.reservation.cancellation_outcome().ok_or_else(|| {
            CoreError::InternalError(format!(
                "reservation {} is cancelled without a cancellation record",
                commit.reservation.id
            ))
        })?;
        if !commit.transitioned {
            info!("Cancellation of {} replayed", commit.reservation.id);
            return Ok(outcome);
        }

        info!(
            "Reservation {} cancelled by guest, refund {} ({})",
            commit.reservation.id, outcome.refund_amount, outcome.refund_status
        );
        if let Some(result) = self.refunds.settle(&commit.reservation).await {
            info!("Refund for {} settled as {}", commit.reservation.id, result);
        }

        let event = ReservationWritten::from_reservation(&commit.reservation);
        if let Err(e) = self.events.publish(&event).await {
            warn!("Failed to publish write event for {}: {}", commit.reservation.id, e);
        }
        let notification = GuestNotification::ReservationCancelled {
            reservation_id: commit.reservation.id,
            booking_reference: commit.reservation.booking_reference.clone(),
            refund_amount: outcome.refund_amount,
        };
        if let Err(e) = self
            .notifier
            .send(commit.reservation.guest.email.expose(), &notification)
            .await
        {
            warn!("Guest notification for {} not sent: {}", commit.reservation.id, e);
        }

        Ok(outcome)
    }
}

fn not_cancellable(status: ReservationStatus) -> CoreError {
    CoreError::PreconditionFailed(format!("a {} reservation cannot be cancelled", status))
}

/// Runs inside the ledger transaction against freshly read state.
fn decide_guest_cancellation(
    settings: &UnitSettings,
    fresh: &Reservation,
    policy: RefundPolicy,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> CoreResult<Option<CancellationRecord>> {
    if fresh.status == ReservationStatus::Cancelled {
        return Ok(None);
    }
    if !fresh.is_active() {
        return Err(not_cancellable(fresh.status));
    }

    let rules = &settings.cancellation;
    if !rules.allow_guest_cancellation {
        return Err(CoreError::PreconditionFailed(
            "this unit does not accept guest cancellations".to_string(),
        ));
    }
    // Counted back from the fresh check-in date, not checkout, so a stay already under way
    // can never be cancelled by the guest.
    let deadline = fresh.stay.check_in_at() - Duration::hours(rules.deadline_hours);
    if now > deadline {
        return Err(CoreError::PreconditionFailed(format!(
            "guest cancellations close {} hours before check-in",
            rules.deadline_hours
        )));
    }

    let refund_amount = policy.refund_amount(fresh, now)?;
    Ok(Some(CancellationRecord {
        cancelled_at: now,
        cancelled_by: CancellationActor::Guest,
        reason,
        refund_amount,
        refund_status: initial_refund_status(refund_amount, fresh.payment_method),
        refund_result: None,
        refund_id: None,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{confirmed_reservation, unit_settings, RecordingPublisher};
    use async_trait::async_trait;
    use innkeep_core::notify::MockNotificationSender;
    use innkeep_core::payment::{MockPaymentProcessor, PaymentProcessor};
    use innkeep_core::reservation::{PaymentMethod, PaymentStatus, RefundStatus};
    use innkeep_store::memory::InMemoryReservationLedger;

    /// Holds every refund for a while so other calls can run in the meantime.
    struct SlowProcessor {
        inner: Arc<MockPaymentProcessor>,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl PaymentProcessor for SlowProcessor {
        async fn refund(
            &self,
            payment_reference: &str,
            amount: i64,
        ) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
            tokio::time::sleep(self.delay).await;
            self.inner.refund(payment_reference, amount).await
        }
    }

    struct Fixture {
        ledger: Arc<InMemoryReservationLedger>,
        payments: Arc<MockPaymentProcessor>,
        events: Arc<RecordingPublisher>,
        service: Arc<CancellationService>,
    }

    async fn fixture(settings: UnitSettings) -> Fixture {
        fixture_with_delay(settings, std::time::Duration::ZERO).await
    }

    async fn fixture_with_delay(settings: UnitSettings, delay: std::time::Duration) -> Fixture {
        let ledger = Arc::new(InMemoryReservationLedger::new());
        ledger.insert_settings(settings).await;
        let payments = Arc::new(MockPaymentProcessor::new());
        let processor: Arc<dyn PaymentProcessor> = if delay.is_zero() {
            payments.clone()
        } else {
            Arc::new(SlowProcessor {
                inner: payments.clone(),
                delay,
            })
        };
        let events = Arc::new(RecordingPublisher::default());
        let service = Arc::new(CancellationService::new(
            ledger.clone(),
            RefundOrchestrator::new(processor, ledger.clone()),
            events.clone(),
            Arc::new(MockNotificationSender::default()),
        ));
        Fixture {
            ledger,
            payments,
            events,
            service,
        }
    }

    fn paid_by_card(mut r: Reservation) -> Reservation {
        r.payment_method = PaymentMethod::Card;
        r.payment_status = PaymentStatus::Paid;
        r.paid_amount = 40_000;
        r.payment_reference = Some("pi_123".to_string());
        r
    }

    fn request(r: &Reservation) -> GuestCancellation {
        GuestCancellation {
            reservation_id: r.id,
            reference: r.booking_reference.clone(),
            email: "GUEST@example.com".to_string(),
            reason: Some("change of plans".to_string()),
        }
    }

    #[tokio::test]
    async fn test_card_refund_runs_once_across_replays() {
        let settings = unit_settings();
        let f = fixture(settings.clone()).await;
        let r = paid_by_card(confirmed_reservation(settings.unit_id));
        f.ledger.put(r.clone()).await;

        let first = f.service.cancel_by_guest(request(&r)).await.unwrap();
        assert_eq!(first.refund_amount, 40_000);
        assert_eq!(first.refund_status, RefundStatus::PendingExternalRefund);

        let second = f.service.cancel_by_guest(request(&r)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.payments.refunds(), vec![("pi_123".to_string(), 40_000)]);
        assert_eq!(f.events.published().len(), 1);

        let stored = f.ledger.get(r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
        let record = stored.cancellation.unwrap();
        assert_eq!(record.refund_status, RefundStatus::PendingExternalRefund);
        assert_eq!(record.refund_result, Some(RefundStatus::Refunded));
        assert_eq!(record.refund_id.as_deref(), Some("mock_re_1"));
    }

    #[tokio::test]
    async fn test_concurrent_cancels_converge_on_one_refund() {
        let settings = unit_settings();
        let f = fixture_with_delay(settings.clone(), std::time::Duration::from_millis(200)).await;
        let r = paid_by_card(confirmed_reservation(settings.unit_id));
        f.ledger.put(r.clone()).await;

        let first = {
            let service = f.service.clone();
            let req = request(&r);
            tokio::spawn(async move { service.cancel_by_guest(req).await })
        };
        // Later calls land while the card refund is still in flight.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let mut handles = vec![first];
        for _ in 0..5 {
            let service = f.service.clone();
            let req = request(&r);
            handles.push(tokio::spawn(async move { service.cancel_by_guest(req).await }));
        }

        let mut outcomes = Vec::new();
        for h in handles {
            outcomes.push(h.await.unwrap().unwrap());
        }
        assert!(outcomes.iter().all(|o| *o == outcomes[0]), "{:?}", outcomes);
        assert_eq!(outcomes[0].refund_amount, 40_000);
        assert_eq!(outcomes[0].refund_status, RefundStatus::PendingExternalRefund);
        assert_eq!(f.payments.refunds().len(), 1);

        let replay = f.service.cancel_by_guest(request(&r)).await.unwrap();
        assert_eq!(replay, outcomes[0]);
    }

    #[tokio::test]
    async fn test_refund_failure_keeps_cancellation() {
        let settings = unit_settings();
        let f = fixture(settings.clone()).await;
        f.payments.set_failing(true);
        let r = paid_by_card(confirmed_reservation(settings.unit_id));
        f.ledger.put(r.clone()).await;

        let outcome = f.service.cancel_by_guest(request(&r)).await.unwrap();
        assert_eq!(outcome.refund_status, RefundStatus::PendingExternalRefund);

        let stored = f.ledger.get(r.id).await.unwrap().unwrap();
        assert_eq!(stored.status, ReservationStatus::Cancelled);
        assert_eq!(stored.cancellation.as_ref().unwrap().refund_result, Some(RefundStatus::Failed));
        assert!(f.ledger.active_for_unit(settings.unit_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unpaid_and_manual_refund_statuses() {
        let settings = unit_settings();
        let f = fixture(settings.clone()).await;

        let unpaid = confirmed_reservation(settings.unit_id);
        f.ledger.put(unpaid.clone()).await;
        let outcome = f.service.cancel_by_guest(request(&unpaid)).await.unwrap();
        assert_eq!(outcome.refund_amount, 0);
        assert_eq!(outcome.refund_status, RefundStatus::NotRequired);

        let mut transfer = confirmed_reservation(settings.unit_id);
        transfer.payment_method = PaymentMethod::BankTransfer;
        transfer.payment_status = PaymentStatus::Paid;
        transfer.paid_amount = 9_900;
        f.ledger.put(transfer.clone()).await;
        let outcome = f.service.cancel_by_guest(request(&transfer)).await.unwrap();
        assert_eq!(outcome.refund_status, RefundStatus::PendingManualRefund);
        assert!(f.payments.refunds().is_empty());
    }

    #[tokio::test]
    async fn test_authorization_and_status_errors() {
        let settings = unit_settings();
        let f = fixture(settings.clone()).await;
        let r = confirmed_reservation(settings.unit_id);
        f.ledger.put(r.clone()).await;

        let mut wrong_ref = request(&r);
        wrong_ref.reference = "BK-0-0".to_string();
        assert_eq!(f.service.cancel_by_guest(wrong_ref).await.unwrap_err().code(), "permission-denied");

        let mut wrong_email = request(&r);
        wrong_email.email = "someone@else.com".to_string();
        assert_eq!(f.service.cancel_by_guest(wrong_email).await.unwrap_err().code(), "permission-denied");

        let mut missing = request(&r);
        missing.reservation_id = Uuid::new_v4();
        assert_eq!(f.service.cancel_by_guest(missing).await.unwrap_err().code(), "not-found");

        let mut completed = confirmed_reservation(settings.unit_id);
        completed.status = ReservationStatus::Completed;
        f.ledger.put(completed.clone()).await;
        assert_eq!(
            f.service.cancel_by_guest(request(&completed)).await.unwrap_err().code(),
            "failed-precondition"
        );
    }

    #[tokio::test]
    async fn test_deadline_and_disabled_guest_cancellation() {
        let settings = unit_settings();
        let f = fixture(settings.clone()).await;
        let r = confirmed_reservation(settings.unit_id);
        f.ledger.put(r.clone()).await;

        let too_late = r.stay.check_in_at() - Duration::hours(47);
        let err = f.service.cancel_by_guest_at(request(&r), too_late).await.unwrap_err();
        assert_eq!(
            err,
            CoreError::PreconditionFailed("guest cancellations close 48 hours before check-in".to_string())
        );

        let just_in_time = r.stay.check_in_at() - Duration::hours(48);
        assert!(f.service.cancel_by_guest_at(request(&r), just_in_time).await.is_ok());

        let mut locked = unit_settings();
        locked.cancellation.allow_guest_cancellation = false;
        let f = fixture(locked.clone()).await;
        let r = confirmed_reservation(locked.unit_id);
        f.ledger.put(r.clone()).await;
        assert_eq!(f.service.cancel_by_guest(request(&r)).await.unwrap_err().code(), "failed-precondition");
    }
}
