use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use innkeep_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// Reservation lifecycle. Only `Pending` and `Confirmed` hold the unit's dates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

string_enum!(ReservationStatus {
    Pending => "pending",
    Confirmed => "confirmed",
    Cancelled => "cancelled",
    Completed => "completed",
});

impl ReservationStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Cash,
    None,
}

string_enum!(PaymentMethod {
    Card => "card",
    BankTransfer => "bank_transfer",
    Cash => "cash",
    None => "none",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOption {
    Full,
    Deposit,
    Later,
}

string_enum!(PaymentOption {
    Full => "full",
    Deposit => "deposit",
    Later => "later",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    NotRequired,
    Pending,
    Paid,
}

string_enum!(PaymentStatus {
    NotRequired => "not_required",
    Pending => "pending",
    Paid => "paid",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    NotRequired,
    PendingExternalRefund,
    PendingManualRefund,
    Refunded,
    Failed,
}

string_enum!(RefundStatus {
    NotRequired => "not_required",
    PendingExternalRefund => "pending_external_refund",
    PendingManualRefund => "pending_manual_refund",
    Refunded => "refunded",
    Failed => "failed",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancellationActor {
    Guest,
    Owner,
}

string_enum!(CancellationActor {
    Guest => "guest",
    Owner => "owner",
});

/// Check-in / check-out pair for one stay. Dates are calendar days in the unit's calendar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StayDates {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl StayDates {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> CoreResult<Self> {
        let stay = Self { check_in, check_out };
        stay.validate()?;
        Ok(stay)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.check_in >= self.check_out {
            return Err(CoreError::ValidationError(
                "check-in must be before check-out".to_string(),
            ));
        }
        Ok(())
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    /// Overlap test between two stays on the same unit. `A.check_in < B.check_out &&
    /// A.check_out >= B.check_in` is evaluated with each stay in the `A` position, so the
    /// result does not depend on which stay was booked first.
    ///
    /// The second comparison is inclusive: two stays that meet on a turnover day conflict
    /// whichever side of that day they fall on.
    pub fn conflicts_with(&self, other: &StayDates) -> bool {
        overlaps_one_way(self, other) || overlaps_one_way(other, self)
    }

    pub fn check_in_at(&self) -> DateTime<Utc> {
        start_of_day(self.check_in)
    }

    pub fn check_out_at(&self) -> DateTime<Utc> {
        start_of_day(self.check_out)
    }
}

fn overlaps_one_way(a: &StayDates, b: &StayDates) -> bool {
    a.check_in < b.check_out && a.check_out >= b.check_in
}

pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuestInfo {
    pub name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
}

impl GuestInfo {
    pub fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::ValidationError("guest name is required".to_string()));
        }
        let email = self.email.expose().trim();
        if email.is_empty() || !email.contains('@') {
            return Err(CoreError::ValidationError("a valid guest email is required".to_string()));
        }
        if self.phone.expose().trim().is_empty() {
            return Err(CoreError::ValidationError("guest phone is required".to_string()));
        }
        Ok(())
    }

    pub fn email_matches(&self, claimed: &str) -> bool {
        self.email.expose().trim().eq_ignore_ascii_case(claimed.trim())
    }
}

/// Recorded when a reservation moves to `Cancelled`; never cleared afterwards.
///
/// `refund_status` is fixed by the cancelling transaction. The post-commit card refund
/// reports into `refund_result` and `refund_id` only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancellationRecord {
    pub cancelled_at: DateTime<Utc>,
    pub cancelled_by: CancellationActor,
    pub reason: Option<String>,
    pub refund_amount: i64,
    pub refund_status: RefundStatus,
    #[serde(default)]
    pub refund_result: Option<RefundStatus>,
    pub refund_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CancellationOutcome {
    pub refund_amount: i64,
    pub refund_status: RefundStatus,
}

/// A guest's claim on a unit for a date range. Amounts are in minor units (cents).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reservation {
    pub id: Uuid,
    pub unit_id: Uuid,
    pub property_id: Uuid,
    pub owner_id: Uuid,
    pub guest: GuestInfo,
    pub stay: StayDates,
    pub guest_count: u32,
    pub total_price: i64,
    pub deposit_amount: i64,
    pub paid_amount: i64,
    pub payment_method: PaymentMethod,
    pub payment_option: PaymentOption,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub status: ReservationStatus,
    pub booking_reference: String,
    pub access_token_hash: String,
    pub token_expires_at: DateTime<Utc>,
    pub cancellation: Option<CancellationRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn cancellation_outcome(&self) -> Option<CancellationOutcome> {
        self.cancellation.as_ref().map(|c| CancellationOutcome {
            refund_amount: c.refund_amount,
            refund_status: c.refund_status,
        })
    }

    /// Applies a cancellation record, moving the reservation to `Cancelled`.
    pub fn apply_cancellation(&mut self, record: CancellationRecord) {
        self.status = ReservationStatus::Cancelled;
        self.updated_at = record.cancelled_at;
        self.cancellation = Some(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn stay(a: NaiveDate, b: NaiveDate) -> StayDates {
        StayDates::new(a, b).unwrap()
    }

    #[test]
    fn test_rejects_inverted_or_empty_range() {
        assert!(StayDates::new(d(2025, 7, 15), d(2025, 7, 10)).is_err());
        assert!(StayDates::new(d(2025, 7, 10), d(2025, 7, 10)).is_err());
        assert_eq!(stay(d(2025, 7, 10), d(2025, 7, 15)).nights(), 5);
    }

    #[test]
    fn test_overlap_scenario_against_confirmed_stay() {
        let existing = stay(d(2025, 7, 10), d(2025, 7, 15));

        // Straddles the existing checkout.
        assert!(existing.conflicts_with(&stay(d(2025, 7, 14), d(2025, 7, 18))));
        // Arrives on the existing checkout day: same-day turnover is a conflict.
        assert!(existing.conflicts_with(&stay(d(2025, 7, 15), d(2025, 7, 20))));
        // Fully inside and fully covering.
        assert!(existing.conflicts_with(&stay(d(2025, 7, 11), d(2025, 7, 12))));
        assert!(existing.conflicts_with(&stay(d(2025, 7, 1), d(2025, 7, 30))));
        // Starts the day after checkout.
        assert!(!existing.conflicts_with(&stay(d(2025, 7, 16), d(2025, 7, 20))));
    }

    #[test]
    fn test_leaving_on_existing_check_in_day_is_a_conflict() {
        let existing = stay(d(2025, 7, 10), d(2025, 7, 15));
        assert!(existing.conflicts_with(&stay(d(2025, 7, 5), d(2025, 7, 10))));
        assert!(!existing.conflicts_with(&stay(d(2025, 7, 5), d(2025, 7, 9))));
    }

    #[test]
    fn test_conflict_does_not_depend_on_booking_order() {
        let stays = [
            stay(d(2025, 7, 5), d(2025, 7, 9)),
            stay(d(2025, 7, 1), d(2025, 7, 5)),
            stay(d(2025, 7, 9), d(2025, 7, 12)),
            stay(d(2025, 7, 13), d(2025, 7, 20)),
            stay(d(2025, 7, 6), d(2025, 7, 7)),
        ];
        for a in &stays {
            for b in &stays {
                assert_eq!(a.conflicts_with(b), b.conflicts_with(a), "{:?} vs {:?}", a, b);
            }
        }
        assert!(stays[0].conflicts_with(&stays[1]));
        assert!(!stays[2].conflicts_with(&stays[3]));
    }

    #[test]
    fn test_status_strings_round_trip() {
        for status in [
            ReservationStatus::Pending,
            ReservationStatus::Confirmed,
            ReservationStatus::Cancelled,
            ReservationStatus::Completed,
        ] {
            assert_eq!(status.as_str().parse::<ReservationStatus>().unwrap(), status);
        }
        assert!("archived".parse::<ReservationStatus>().is_err());
        assert_eq!(RefundStatus::PendingExternalRefund.to_string(), "pending_external_refund");
    }

    #[test]
    fn test_email_match_is_case_insensitive() {
        let guest = GuestInfo {
            name: "Ada Lovelace".to_string(),
            email: Masked::from("Ada@Example.com"),
            phone: Masked::from("+44 20 7946 0000"),
        };
        assert!(guest.email_matches("ada@example.COM"));
        assert!(!guest.email_matches("ada@example.org"));
        assert!(guest.validate().is_ok());
    }
}
