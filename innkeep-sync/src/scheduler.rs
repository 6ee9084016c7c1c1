use chrono::{DateTime, Utc};
use innkeep_core::notify::{NotificationKind, OwnerNotification};
use innkeep_core::platform::AdapterError;
use innkeep_core::repository::{ConnectionRegistry, OwnerInbox, ReservationLedger, SyncFailureStore};
use innkeep_core::sync_failure::SyncFailureRecord;
use innkeep_core::CoreResult;
use innkeep_store::app_config::SyncConfig;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;
use crate::dispatcher::{SyncAction, SyncDispatcher};

#[derive(Debug, Clone, Copy)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub batch_size: usize,
    pub inter_item_delay: Duration,
    pub interval: Duration,
}

impl RetrySettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            batch_size: config.batch_size,
            inter_item_delay: Duration::from_millis(config.inter_item_delay_ms),
            interval: Duration::from_secs(config.retry_interval_seconds.max(1)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub succeeded: usize,
    pub rescheduled: usize,
    pub exhausted: usize,
    pub dropped: usize,
    pub needs_reauthorization: usize,
    /// Records left untouched because a store call failed; they stay due for the next pass.
    pub failed: usize,
}

enum Outcome {
    Succeeded,
    Rescheduled,
    Exhausted,
    Dropped,
    Reauthorize,
}

/// Drains the sync failure queue on a fixed interval.
pub struct RetryScheduler {
    ledger: Arc<dyn ReservationLedger>,
    connections: Arc<dyn ConnectionRegistry>,
    failures: Arc<dyn SyncFailureStore>,
    inbox: Arc<dyn OwnerInbox>,
    dispatcher: Arc<SyncDispatcher>,
    backoff: BackoffPolicy,
    settings: RetrySettings,
}

impl RetryScheduler {
    pub fn new(
        ledger: Arc<dyn ReservationLedger>,
        connections: Arc<dyn ConnectionRegistry>,
        failures: Arc<dyn SyncFailureStore>,
        inbox: Arc<dyn OwnerInbox>,
        dispatcher: Arc<SyncDispatcher>,
        backoff: BackoffPolicy,
        settings: RetrySettings,
    ) -> Self {
        Self {
            ledger,
            connections,
            failures,
            inbox,
            dispatcher,
            backoff,
            settings,
        }
    }

    /// Processes one due batch, one record at a time. A store error on one record is
    /// logged and the batch moves on.
    pub async fn run_once(&self, now: DateTime<Utc>) -> CoreResult<RetryReport> {
        let due = self
            .failures
            .due(now, self.settings.max_retries, self.settings.batch_size)
            .await?;
        let mut report = RetryReport::default();
        if due.is_empty() {
            return Ok(report);
        }
        debug!("Retrying {} queued sync failure(s)", due.len());

        for (i, record) in due.iter().enumerate() {
            if i > 0 && !self.settings.inter_item_delay.is_zero() {
                sleep(self.settings.inter_item_delay).await;
            }
            match self.retry(record, now).await {
                Ok(Outcome::Succeeded) => report.succeeded += 1,
                Ok(Outcome::Rescheduled) => report.rescheduled += 1,
                Ok(Outcome::Exhausted) => report.exhausted += 1,
                Ok(Outcome::Dropped) => report.dropped += 1,
                Ok(Outcome::Reauthorize) => report.needs_reauthorization += 1,
                Err(e) => {
                    error!("Sync retry {} for reservation {} failed: {}", record.id, record.reservation_id, e);
                    report.failed += 1;
                }
            }
        }
        info!("Sync retry pass: {:?}", report);
        Ok(report)
    }

    async fn retry(&self, record: &SyncFailureRecord, now: DateTime<Utc>) -> CoreResult<Outcome> {
        let reservation = self
            .ledger
            .get(record.reservation_id)
            .await?
            .filter(|r| SyncAction::for_status(r.status) == Some(SyncAction::Block));
        let connection = self
            .connections
            .get(record.connection_id)
            .await?
            .filter(|c| c.is_active());

        let (Some(reservation), Some(connection)) = (reservation, connection) else {
            debug!(
                "Dropping sync retry {}: reservation or connection no longer applies",
                record.id
            );
            self.failures.delete(record.id).await?;
            return Ok(Outcome::Dropped);
        };

        match self
            .dispatcher
            .sync_connection(&connection, SyncAction::Block, reservation.stay, now)
            .await
        {
            Ok(()) => {
                info!(
                    "Retry {} synced reservation {} to {}",
                    record.retry_count + 1,
                    reservation.id,
                    connection.platform
                );
                self.failures.delete(record.id).await?;
                self.dispatcher.mark_synced(&connection, now).await;
                Ok(Outcome::Succeeded)
            }
            Err(AdapterError::Terminal(reason)) => {
                self.dispatcher
                    .report_terminal(&connection, Some(reservation.id), &reason, now)
                    .await;
                self.failures.delete(record.id).await?;
                Ok(Outcome::Reauthorize)
            }
            Err(AdapterError::Transient(reason)) => {
                let attempts = record.retry_count.saturating_add(1);
                if attempts >= self.settings.max_retries {
                    self.exhaust(record, attempts, &reason, now).await?;
                    return Ok(Outcome::Exhausted);
                }
                let next = self.backoff.next_retry_at(now, attempts);
                warn!(
                    "Sync retry {} for reservation {} on {} failed, next attempt at {}: {}",
                    attempts, reservation.id, connection.platform, next, reason
                );
                self.failures.reschedule(record.id, attempts, next, &reason).await?;
                Ok(Outcome::Rescheduled)
            }
        }
    }

    /// The final count is persisted before the owner is told; `due` never selects the record again.
    async fn exhaust(
        &self,
        record: &SyncFailureRecord,
        attempts: u32,
        reason: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        self.failures
            .reschedule(record.id, attempts, record.next_retry_at, reason)
            .await?;
        warn!(
            "Giving up on syncing reservation {} to {} after {} attempts",
            record.reservation_id, record.platform, attempts
        );
        let notification = OwnerNotification {
            id: Uuid::new_v4(),
            owner_id: record.owner_id,
            unit_id: record.unit_id,
            reservation_id: Some(record.reservation_id),
            platform: Some(record.platform),
            kind: NotificationKind::SyncRetriesExhausted,
            message: format!(
                "We could not block these dates on {} after {} attempts ({}). Block them there manually to avoid a double booking.",
                record.platform, attempts, reason
            ),
            created_at: now,
        };
        if let Err(e) = self.inbox.append(&notification).await {
            error!("Could not notify owner {} of exhausted sync: {}", record.owner_id, e);
        }
        self.failures.delete(record.id).await
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        info!("Sync retry scheduler started, every {:?}", self.settings.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once(Utc::now()).await {
                        error!("Sync retry pass failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Sync retry scheduler stopping");
                        return;
                    }
                }
            }
        }
    }
}
