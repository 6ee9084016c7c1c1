use async_trait::async_trait;
use chrono::Utc;
use innkeep_core::events::{ReservationEventPublisher, ReservationWritten};
use innkeep_core::CoreResult;
use std::sync::Arc;
use tracing::warn;

use crate::dispatcher::SyncDispatcher;

/// Wraps the event transport so a committed write is never lost to a publish failure:
/// when the transport refuses an event, its blocks go straight into the retry queue.
pub struct RetryQueuePublisher {
    inner: Arc<dyn ReservationEventPublisher>,
    dispatcher: Arc<SyncDispatcher>,
}

impl RetryQueuePublisher {
    pub fn new(inner: Arc<dyn ReservationEventPublisher>, dispatcher: Arc<SyncDispatcher>) -> Self {
        Self { inner, dispatcher }
    }
}

#[async_trait]
impl ReservationEventPublisher for RetryQueuePublisher {
    async fn publish(&self, event: &ReservationWritten) -> CoreResult<()> {
        let Err(e) = self.inner.publish(event).await else {
            return Ok(());
        };
        warn!(
            "Publishing write for reservation {} failed, falling back to the retry queue: {}",
            event.reservation_id, e
        );
        self.dispatcher
            .queue_undelivered(event, &e.to_string(), Utc::now())
            .await
            .map(|_| ())
    }
}
