use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::notify::OwnerNotification;
use crate::platform::PlatformConnection;
use crate::reservation::{CancellationRecord, Reservation, RefundStatus};
use crate::sync_failure::SyncFailureRecord;
use crate::unit::UnitSettings;
use crate::CoreResult;

/// Decision made inside the cancellation transaction from the freshly read unit settings
/// and reservation. `Ok(None)` means nothing is written (the reservation is already cancelled).
pub type CancelDecision<'a> =
    &'a (dyn Fn(&UnitSettings, &Reservation) -> CoreResult<Option<CancellationRecord>> + Send + Sync);

/// Result of [`ReservationLedger::cancel_in_tx`].
#[derive(Debug, Clone)]
pub struct CancelCommit {
    pub reservation: Reservation,
    /// True only for the call whose transaction performed the status change.
    pub transitioned: bool,
}

/// Authoritative transactional store of reservations.
///
/// Implementations must run every check-then-write below as a single serializable unit
/// against the unit's reservation set. That isolation is the only concurrency control.
#[async_trait]
pub trait ReservationLedger: Send + Sync {
    /// Reads the unit's active reservations that conflict with `reservation.stay` and, when
    /// there are none, inserts `reservation`, all in one transaction.
    /// Returns `CoreError::Conflict` when another active stay holds any of the dates.
    async fn insert_if_available(&self, reservation: &Reservation) -> CoreResult<()>;

    async fn get(&self, id: Uuid) -> CoreResult<Option<Reservation>>;

    /// Active reservations for a unit, ordered by check-in.
    async fn active_for_unit(&self, unit_id: Uuid) -> CoreResult<Vec<Reservation>>;

    /// Re-reads the unit settings and the reservation inside one transaction, asks `decide`
    /// what to write, and writes it in that same transaction.
    async fn cancel_in_tx(&self, id: Uuid, decide: CancelDecision<'_>) -> CoreResult<CancelCommit>;

    /// Records the outcome of the post-commit refund into `refund_result`. Never touches the
    /// reservation status or the refund status decided at cancellation.
    async fn record_refund(
        &self,
        id: Uuid,
        refund_result: RefundStatus,
        refund_id: Option<String>,
    ) -> CoreResult<()>;

    /// Moves an active reservation to `Completed` in one transaction.
    /// Returns `CoreError::PreconditionFailed` when it is no longer active.
    async fn complete_in_tx(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<Reservation>;
}

#[async_trait]
pub trait UnitSettingsRepository: Send + Sync {
    async fn get_settings(&self, unit_id: Uuid) -> CoreResult<Option<UnitSettings>>;
}

/// Per-unit marketplace connections.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    async fn active_for_unit(&self, unit_id: Uuid) -> CoreResult<Vec<PlatformConnection>>;

    async fn get(&self, id: Uuid) -> CoreResult<Option<PlatformConnection>>;

    async fn update_credential(
        &self,
        id: Uuid,
        sealed_credential: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()>;

    async fn mark_synced(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<()>;

    async fn mark_error(&self, id: Uuid, reason: &str) -> CoreResult<()>;
}

/// Durable retry queue of failed outbound syncs.
#[async_trait]
pub trait SyncFailureStore: Send + Sync {
    /// Inserts the record, or refreshes the error text when the same
    /// (reservation, connection) pair is already queued.
    async fn record(&self, failure: &SyncFailureRecord) -> CoreResult<()>;

    /// Records with `next_retry_at <= now` and `retry_count < max_retries`, oldest due first.
    async fn due(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        limit: usize,
    ) -> CoreResult<Vec<SyncFailureRecord>>;

    async fn reschedule(
        &self,
        id: Uuid,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> CoreResult<()>;

    async fn delete(&self, id: Uuid) -> CoreResult<()>;

    async fn list_for_owner(&self, owner_id: Uuid) -> CoreResult<Vec<SyncFailureRecord>>;
}

/// Append-only owner inbox.
#[async_trait]
pub trait OwnerInbox: Send + Sync {
    async fn append(&self, notification: &OwnerNotification) -> CoreResult<()>;

    /// Newest first.
    async fn list(&self, owner_id: Uuid) -> CoreResult<Vec<OwnerNotification>>;
}
