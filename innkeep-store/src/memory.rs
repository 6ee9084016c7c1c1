//! Process-local implementations of the storage traits.
//!
//! Backing for the service and HTTP test suites. Every check-then-write runs under one
//! lock, which gives the same all-or-nothing behaviour as the serializable Postgres
//! transactions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use innkeep_core::notify::OwnerNotification;
use innkeep_core::platform::{ConnectionStatus, PlatformConnection};
use innkeep_core::rate_limit::{RateLimitRule, RateLimiter};
use innkeep_core::repository::{
    CancelCommit, CancelDecision, ConnectionRegistry, OwnerInbox, ReservationLedger,
    SyncFailureStore, UnitSettingsRepository,
};
use innkeep_core::reservation::{RefundStatus, Reservation, ReservationStatus};
use innkeep_core::sync_failure::SyncFailureRecord;
use innkeep_core::unit::UnitSettings;
use innkeep_core::{CoreError, CoreResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

fn unavailable() -> CoreError {
    CoreError::InternalError("storage unavailable".to_string())
}

#[derive(Default)]
struct LedgerState {
    reservations: HashMap<Uuid, Reservation>,
    settings: HashMap<Uuid, UnitSettings>,
}

/// Reservations and unit settings behind a single lock.
#[derive(Default)]
pub struct InMemoryReservationLedger {
    state: Mutex<LedgerState>,
    offline: AtomicBool,
}

impl InMemoryReservationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_settings(&self, settings: UnitSettings) {
        self.state.lock().await.settings.insert(settings.unit_id, settings);
    }

    /// Stores a reservation as is, skipping the availability check. Seeds fixtures.
    pub async fn put(&self, reservation: Reservation) {
        self.state.lock().await.reservations.insert(reservation.id, reservation);
    }

    /// While set, every call fails with a retryable internal error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> CoreResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(unavailable());
        }
        Ok(())
    }
}

#[async_trait]
impl UnitSettingsRepository for InMemoryReservationLedger {
    async fn get_settings(&self, unit_id: Uuid) -> CoreResult<Option<UnitSettings>> {
        self.check_online()?;
        Ok(self.state.lock().await.settings.get(&unit_id).cloned())
    }
}

#[async_trait]
impl ReservationLedger for InMemoryReservationLedger {
    async fn insert_if_available(&self, reservation: &Reservation) -> CoreResult<()> {
        self.check_online()?;
        let mut state = self.state.lock().await;

        let taken = state.reservations.values().any(|existing| {
            existing.unit_id == reservation.unit_id
                && existing.is_active()
                && existing.stay.conflicts_with(&reservation.stay)
        });
        if taken {
            return Err(CoreError::Conflict("dates no longer available".to_string()));
        }

        state.reservations.insert(reservation.id, reservation.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        self.check_online()?;
        Ok(self.state.lock().await.reservations.get(&id).cloned())
    }

    async fn active_for_unit(&self, unit_id: Uuid) -> CoreResult<Vec<Reservation>> {
        self.check_online()?;
        let state = self.state.lock().await;
        let mut active: Vec<Reservation> = state
            .reservations
            .values()
            .filter(|r| r.unit_id == unit_id && r.is_active())
            .cloned()
            .collect();
        active.sort_by_key(|r| r.stay.check_in);
        Ok(active)
    }

    async fn cancel_in_tx(&self, id: Uuid, decide: CancelDecision<'_>) -> CoreResult<CancelCommit> {
        self.check_online()?;
        let mut state = self.state.lock().await;

        let reservation = state
            .reservations
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("reservation {}", id)))?;
        let settings = state
            .settings
            .get(&reservation.unit_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("settings for unit {}", reservation.unit_id)))?;

        let Some(record) = decide(&settings, &reservation)? else {
            return Ok(CancelCommit { reservation, transitioned: false });
        };

        let mut reservation = reservation;
        reservation.apply_cancellation(record);
        state.reservations.insert(id, reservation.clone());
        Ok(CancelCommit { reservation, transitioned: true })
    }

    async fn record_refund(
        &self,
        id: Uuid,
        refund_result: RefundStatus,
        refund_id: Option<String>,
    ) -> CoreResult<()> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        if let Some(cancellation) = state
            .reservations
            .get_mut(&id)
            .and_then(|r| r.cancellation.as_mut())
        {
            cancellation.refund_result = Some(refund_result);
            cancellation.refund_id = refund_id;
        }
        Ok(())
    }

    async fn complete_in_tx(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<Reservation> {
        self.check_online()?;
        let mut state = self.state.lock().await;
        let reservation = state
            .reservations
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("reservation {}", id)))?;
        if !reservation.is_active() {
            return Err(CoreError::PreconditionFailed(format!(
                "reservation is {}, only pending or confirmed stays can be completed",
                reservation.status
            )));
        }
        reservation.status = ReservationStatus::Completed;
        reservation.updated_at = at;
        Ok(reservation.clone())
    }
}

#[derive(Default)]
pub struct InMemoryConnectionRegistry {
    connections: Mutex<HashMap<Uuid, PlatformConnection>>,
}

impl InMemoryConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, connection: PlatformConnection) {
        self.connections.lock().await.insert(connection.id, connection);
    }
}

#[async_trait]
impl ConnectionRegistry for InMemoryConnectionRegistry {
    async fn active_for_unit(&self, unit_id: Uuid) -> CoreResult<Vec<PlatformConnection>> {
        let connections = self.connections.lock().await;
        Ok(connections
            .values()
            .filter(|c| c.unit_id == unit_id && c.is_active())
            .cloned()
            .collect())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<PlatformConnection>> {
        Ok(self.connections.lock().await.get(&id).cloned())
    }

    async fn update_credential(
        &self,
        id: Uuid,
        sealed_credential: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        if let Some(c) = self.connections.lock().await.get_mut(&id) {
            c.sealed_credential = sealed_credential.to_string();
            c.credential_expires_at = expires_at;
        }
        Ok(())
    }

    async fn mark_synced(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<()> {
        if let Some(c) = self.connections.lock().await.get_mut(&id) {
            c.last_synced_at = Some(at);
        }
        Ok(())
    }

    async fn mark_error(&self, id: Uuid, _reason: &str) -> CoreResult<()> {
        if let Some(c) = self.connections.lock().await.get_mut(&id) {
            c.status = ConnectionStatus::Error;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySyncFailureStore {
    records: Mutex<HashMap<Uuid, SyncFailureRecord>>,
}

impl InMemorySyncFailureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<SyncFailureRecord> {
        self.records.lock().await.values().cloned().collect()
    }
}

#[async_trait]
impl SyncFailureStore for InMemorySyncFailureStore {
    async fn record(&self, failure: &SyncFailureRecord) -> CoreResult<()> {
        let mut records = self.records.lock().await;
        let queued = records.values_mut().find(|r| {
            r.reservation_id == failure.reservation_id && r.connection_id == failure.connection_id
        });
        match queued {
            Some(existing) => existing.error = failure.error.clone(),
            None => {
                records.insert(failure.id, failure.clone());
            }
        }
        Ok(())
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        limit: usize,
    ) -> CoreResult<Vec<SyncFailureRecord>> {
        let records = self.records.lock().await;
        let mut due: Vec<SyncFailureRecord> = records
            .values()
            .filter(|r| r.is_due(now, max_retries))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_retry_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn reschedule(
        &self,
        id: Uuid,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> CoreResult<()> {
        if let Some(r) = self.records.lock().await.get_mut(&id) {
            r.retry_count = retry_count;
            r.next_retry_at = next_retry_at;
            r.error = error.to_string();
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> CoreResult<()> {
        self.records.lock().await.remove(&id);
        Ok(())
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> CoreResult<Vec<SyncFailureRecord>> {
        let records = self.records.lock().await;
        let mut owned: Vec<SyncFailureRecord> = records
            .values()
            .filter(|r| r.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by_key(|r| r.next_retry_at);
        Ok(owned)
    }
}

#[derive(Default)]
pub struct InMemoryOwnerInbox {
    notifications: Mutex<Vec<OwnerNotification>>,
}

impl InMemoryOwnerInbox {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OwnerInbox for InMemoryOwnerInbox {
    async fn append(&self, notification: &OwnerNotification) -> CoreResult<()> {
        self.notifications.lock().await.push(notification.clone());
        Ok(())
    }

    async fn list(&self, owner_id: Uuid) -> CoreResult<Vec<OwnerNotification>> {
        let notifications = self.notifications.lock().await;
        Ok(notifications
            .iter()
            .rev()
            .filter(|n| n.owner_id == owner_id)
            .cloned()
            .collect())
    }
}

struct Window {
    started: Instant,
    length: Duration,
    count: u64,
}

/// Fixed-window counters keyed by (operation, identifier). Single instance only.
/// Expired windows are pruned on every hit.
#[derive(Default)]
pub struct InMemoryRateLimiter {
    rules: HashMap<String, RateLimitRule>,
    windows: Mutex<HashMap<String, Window>>,
    offline: AtomicBool,
}

impl InMemoryRateLimiter {
    pub fn new(rules: HashMap<String, RateLimitRule>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    /// While set, every hit errors, as an unreachable shared store would.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of (operation, identifier) windows currently held.
    pub async fn tracked_windows(&self) -> usize {
        self.windows.lock().await.len()
    }
}

#[async_trait]
impl RateLimiter for InMemoryRateLimiter {
    async fn hit(&self, operation: &str, identifier: &str) -> CoreResult<bool> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(CoreError::internal("rate limiter unavailable"));
        }
        let rule = self
            .rules
            .get(operation)
            .copied()
            .unwrap_or_else(|| RateLimitRule::default_for(operation));
        let length = Duration::from_secs(rule.window_seconds);
        let key = format!("{}:{}", operation, identifier);
        let now = Instant::now();

        let mut windows = self.windows.lock().await;
        windows.retain(|_, w| now.duration_since(w.started) < w.length);
        let window = windows.entry(key).or_insert(Window {
            started: now,
            length,
            count: 0,
        });
        window.count += 1;
        Ok(window.count <= rule.limit)
    }
}
