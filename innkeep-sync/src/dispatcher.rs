use chrono::{DateTime, Utc};
use innkeep_core::events::ReservationWritten;
use innkeep_core::notify::{NotificationKind, OwnerNotification};
use innkeep_core::platform::{AdapterError, ExternalReservation, PlatformConnection};
use innkeep_core::repository::{ConnectionRegistry, OwnerInbox, SyncFailureStore};
use innkeep_core::reservation::{ReservationStatus, StayDates};
use innkeep_core::sync_failure::SyncFailureRecord;
use innkeep_core::{CoreError, CoreResult};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::adapters::AdapterRegistry;
use crate::backoff::BackoffPolicy;
use crate::credentials::CredentialManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    Block,
    Unblock,
}

impl SyncAction {
    /// Cancellation never reopens dates on its own; only a completed stay does.
    pub fn for_status(status: ReservationStatus) -> Option<Self> {
        match status {
            ReservationStatus::Pending | ReservationStatus::Confirmed => Some(SyncAction::Block),
            ReservationStatus::Completed => Some(SyncAction::Unblock),
            ReservationStatus::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub synced: usize,
    pub queued_for_retry: usize,
    pub needs_reauthorization: usize,
}

/// Pushes committed reservation writes out to every connected marketplace.
/// Adapter failures are recorded here and never reach the booking caller.
pub struct SyncDispatcher {
    connections: Arc<dyn ConnectionRegistry>,
    adapters: AdapterRegistry,
    credentials: Arc<CredentialManager>,
    failures: Arc<dyn SyncFailureStore>,
    inbox: Arc<dyn OwnerInbox>,
    backoff: BackoffPolicy,
}

impl SyncDispatcher {
    pub fn new(
        connections: Arc<dyn ConnectionRegistry>,
        adapters: AdapterRegistry,
        credentials: Arc<CredentialManager>,
        failures: Arc<dyn SyncFailureStore>,
        inbox: Arc<dyn OwnerInbox>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            connections,
            adapters,
            credentials,
            failures,
            inbox,
            backoff,
        }
    }

    pub async fn handle(&self, event: &ReservationWritten) -> DispatchReport {
        self.handle_at(event, Utc::now()).await
    }

    pub async fn handle_at(&self, event: &ReservationWritten, now: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport::default();
        let Some(action) = SyncAction::for_status(event.status) else {
            info!(
                "Reservation {} is {}, external calendars left as they are",
                event.reservation_id, event.status
            );
            return report;
        };

        let connections = match self.connections.active_for_unit(event.unit_id).await {
            Ok(c) => c,
            Err(e) => {
                error!("Could not load connections for unit {}: {}", event.unit_id, e);
                return report;
            }
        };

        for connection in connections {
            match self.sync_connection(&connection, action, event.stay, now).await {
                Ok(()) => {
                    report.synced += 1;
                    self.mark_synced(&connection, now).await;
                }
                Err(AdapterError::Terminal(reason)) => {
                    report.needs_reauthorization += 1;
                    self.report_terminal(&connection, Some(event.reservation_id), &reason, now)
                        .await;
                }
                Err(AdapterError::Transient(reason)) => {
                    warn!(
                        "{:?} of reservation {} on {} failed, queued for retry: {}",
                        action, event.reservation_id, connection.platform, reason
                    );
                    match self.queue_retry(&connection, event.reservation_id, reason, now).await {
                        Ok(()) => report.queued_for_retry += 1,
                        Err(e) => error!("Could not queue sync retry for {}: {}", event.reservation_id, e),
                    }
                }
            }
        }
        report
    }

    /// Puts a write that never reached the dispatcher straight into the retry queue, one
    /// record per active connection. Only blocks are queued; the scheduler never replays
    /// an unblock. Returns the number of records written.
    pub async fn queue_undelivered(
        &self,
        event: &ReservationWritten,
        reason: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<usize> {
        if SyncAction::for_status(event.status) != Some(SyncAction::Block) {
            warn!(
                "Undelivered {} write for reservation {} not queued: {}",
                event.status, event.reservation_id, reason
            );
            return Ok(0);
        }

        let connections = self.connections.active_for_unit(event.unit_id).await?;
        for connection in &connections {
            self.queue_retry(connection, event.reservation_id, reason.to_string(), now)
                .await?;
        }
        info!(
            "Reservation {} queued for retry on {} connection(s) after delivery failure",
            event.reservation_id,
            connections.len()
        );
        Ok(connections.len())
    }

    async fn queue_retry(
        &self,
        connection: &PlatformConnection,
        reservation_id: Uuid,
        reason: String,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let record = SyncFailureRecord::new(
            connection.owner_id,
            connection.unit_id,
            connection.platform,
            connection.id,
            reservation_id,
            reason,
            self.backoff.first_retry_at(now),
            now,
        );
        self.failures.record(&record).await
    }

    /// One adapter call for one connection, with credential refresh first.
    pub async fn sync_connection(
        &self,
        connection: &PlatformConnection,
        action: SyncAction,
        stay: StayDates,
        now: DateTime<Utc>,
    ) -> Result<(), AdapterError> {
        let adapter = self.adapters.get(connection.platform).ok_or_else(|| {
            AdapterError::Transient(format!("no adapter registered for {}", connection.platform))
        })?;
        let credential = self.credentials.authorize(connection, adapter.as_ref(), now).await?;
        let ranges = [stay];
        match action {
            SyncAction::Block => adapter.block(connection, &credential, &ranges).await,
            SyncAction::Unblock => adapter.unblock(connection, &credential, &ranges).await,
        }
    }

    pub async fn mark_synced(&self, connection: &PlatformConnection, now: DateTime<Utc>) {
        if let Err(e) = self.connections.mark_synced(connection.id, now).await {
            warn!("Could not stamp sync time on connection {}: {}", connection.id, e);
        }
    }

    /// Retrying cannot fix this one: park the connection and ask the owner to reconnect.
    pub async fn report_terminal(
        &self,
        connection: &PlatformConnection,
        reservation_id: Option<Uuid>,
        reason: &str,
        now: DateTime<Utc>,
    ) {
        warn!(
            "{} connection {} needs re-authorization: {}",
            connection.platform, connection.id, reason
        );
        if let Err(e) = self.connections.mark_error(connection.id, reason).await {
            error!("Could not mark connection {} as failed: {}", connection.id, e);
        }
        let notification = OwnerNotification {
            id: Uuid::new_v4(),
            owner_id: connection.owner_id,
            unit_id: connection.unit_id,
            reservation_id,
            platform: Some(connection.platform),
            kind: NotificationKind::ReauthorizationRequired,
            message: format!(
                "Your {} connection stopped accepting calendar updates ({}). Reconnect it to resume syncing.",
                connection.platform, reason
            ),
            created_at: now,
        };
        if let Err(e) = self.inbox.append(&notification).await {
            error!("Could not notify owner {}: {}", connection.owner_id, e);
        }
    }

    /// Reservations the marketplace itself holds for a connection's listing.
    pub async fn external_reservations(
        &self,
        connection_id: Uuid,
        owner_id: Uuid,
    ) -> CoreResult<Vec<ExternalReservation>> {
        let connection = self
            .connections
            .get(connection_id)
            .await?
            .filter(|c| c.owner_id == owner_id)
            .ok_or_else(|| CoreError::NotFound(format!("connection {}", connection_id)))?;
        if !connection.is_active() {
            return Err(CoreError::PreconditionFailed(
                "connection needs re-authorization".to_string(),
            ));
        }
        let adapter = self.adapters.get(connection.platform).ok_or_else(|| {
            CoreError::InternalError(format!("no adapter registered for {}", connection.platform))
        })?;

        let fetched = match self.credentials.authorize(&connection, adapter.as_ref(), Utc::now()).await {
            Ok(credential) => adapter.list_reservations(&connection, &credential).await,
            Err(e) => Err(e),
        };
        fetched.map_err(|e| match e {
            AdapterError::Transient(reason) => CoreError::InternalError(reason),
            AdapterError::Terminal(reason) => CoreError::PreconditionFailed(reason),
        })
    }
}
