use chrono::{DateTime, Utc};
use innkeep_core::reservation::{PaymentMethod, PaymentOption, PaymentStatus, RefundStatus, Reservation};
use innkeep_core::{CoreError, CoreResult};

/// Upfront amount owed for a stay, in cents.
pub fn deposit_amount(total_price: i64, option: PaymentOption, deposit_percentage: f64) -> i64 {
    match option {
        PaymentOption::Full => total_price,
        PaymentOption::Deposit => ((total_price as f64) * deposit_percentage / 100.0).round() as i64,
        PaymentOption::Later => 0,
    }
}

/// How much of the captured amount a cancelling guest gets back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefundPolicy {
    /// Everything paid so far.
    #[default]
    Full,
    /// Sliding refund by notice given. Not offered yet.
    ByNotice,
}

impl RefundPolicy {
    pub fn refund_amount(&self, reservation: &Reservation, _now: DateTime<Utc>) -> CoreResult<i64> {
        match self {
            RefundPolicy::Full => Ok(match reservation.payment_status {
                PaymentStatus::Paid => reservation.paid_amount,
                PaymentStatus::Pending | PaymentStatus::NotRequired => 0,
            }),
            RefundPolicy::ByNotice => Err(CoreError::InternalError(
                "notice-based refund policy is not configured".to_string(),
            )),
        }
    }
}

/// Where the refund goes next: card payments are refunded through the processor,
/// everything else is settled by the owner.
pub fn initial_refund_status(refund_amount: i64, method: PaymentMethod) -> RefundStatus {
    if refund_amount == 0 {
        return RefundStatus::NotRequired;
    }
    match method {
        PaymentMethod::Card => RefundStatus::PendingExternalRefund,
        PaymentMethod::BankTransfer | PaymentMethod::Cash | PaymentMethod::None => {
            RefundStatus::PendingManualRefund
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::confirmed_reservation;
    use uuid::Uuid;

    #[test]
    fn test_deposit_math() {
        assert_eq!(deposit_amount(50_000, PaymentOption::Deposit, 20.0), 10_000);
        assert_eq!(deposit_amount(50_000, PaymentOption::Full, 20.0), 50_000);
        assert_eq!(deposit_amount(50_000, PaymentOption::Later, 20.0), 0);
        // 33.3% of 100.01 rounds to the nearest cent.
        assert_eq!(deposit_amount(10_001, PaymentOption::Deposit, 33.3), 3_330);
    }

    #[test]
    fn test_full_policy_refunds_only_captured_money() {
        let mut r = confirmed_reservation(Uuid::new_v4());
        r.paid_amount = 12_500;
        r.payment_status = PaymentStatus::Paid;
        assert_eq!(RefundPolicy::Full.refund_amount(&r, Utc::now()).unwrap(), 12_500);

        r.payment_status = PaymentStatus::Pending;
        assert_eq!(RefundPolicy::Full.refund_amount(&r, Utc::now()).unwrap(), 0);
        assert!(RefundPolicy::ByNotice.refund_amount(&r, Utc::now()).is_err());
    }

    #[test]
    fn test_refund_routing() {
        assert_eq!(initial_refund_status(0, PaymentMethod::Card), RefundStatus::NotRequired);
        assert_eq!(initial_refund_status(100, PaymentMethod::Card), RefundStatus::PendingExternalRefund);
        assert_eq!(
            initial_refund_status(100, PaymentMethod::BankTransfer),
            RefundStatus::PendingManualRefund
        );
        assert_eq!(initial_refund_status(100, PaymentMethod::Cash), RefundStatus::PendingManualRefund);
    }
}
