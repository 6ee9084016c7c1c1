use innkeep_core::payment::PaymentProcessor;
use innkeep_core::repository::ReservationLedger;
use innkeep_core::reservation::{RefundStatus, Reservation};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runs the card refund after a cancellation has committed and records how it went in
/// `refund_result`. Nothing here can undo the cancellation or change its `refund_status`.
pub struct RefundOrchestrator {
    processor: Arc<dyn PaymentProcessor>,
    ledger: Arc<dyn ReservationLedger>,
}

impl RefundOrchestrator {
    pub fn new(processor: Arc<dyn PaymentProcessor>, ledger: Arc<dyn ReservationLedger>) -> Self {
        Self { processor, ledger }
    }

    /// Returns the refund result that was recorded, or `None` when there was nothing to
    /// run or the result could not be stored.
    pub async fn settle(&self, reservation: &Reservation) -> Option<RefundStatus> {
        let cancellation = reservation.cancellation.as_ref()?;
        if cancellation.refund_status != RefundStatus::PendingExternalRefund {
            return None;
        }

        let outcome = match reservation.payment_reference.as_deref() {
            Some(payment_ref) => self.processor.refund(payment_ref, cancellation.refund_amount).await,
            None => Err("no captured payment to refund".into()),
        };

        let (status, refund_id) = match outcome {
            Ok(refund_id) => {
                info!(
                    "Refunded {} for reservation {} ({})",
                    cancellation.refund_amount, reservation.id, refund_id
                );
                (RefundStatus::Refunded, Some(refund_id))
            }
            Err(e) => {
                warn!(
                    "Refund for reservation {} failed, flagged for manual follow-up: {}",
                    reservation.id, e
                );
                (RefundStatus::Failed, None)
            }
        };

        match self.ledger.record_refund(reservation.id, status, refund_id).await {
            Ok(()) => Some(status),
            Err(e) => {
                error!("Could not record refund outcome for {}: {}", reservation.id, e);
                None
            }
        }
    }
}
