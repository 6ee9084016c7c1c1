use async_trait::async_trait;
use innkeep_core::events::{ReservationEventPublisher, ReservationWritten};
use innkeep_core::{CoreError, CoreResult};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::dispatcher::SyncDispatcher;

/// In-process transport from the booking services to the dispatcher.
#[derive(Clone)]
pub struct ChannelPublisher {
    sender: mpsc::Sender<ReservationWritten>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ReservationWritten>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ReservationEventPublisher for ChannelPublisher {
    async fn publish(&self, event: &ReservationWritten) -> CoreResult<()> {
        self.sender
            .send(event.clone())
            .await
            .map_err(|_| CoreError::InternalError("sync dispatcher is not running".to_string()))
    }
}

/// Feeds channel events to the dispatcher until every publisher is dropped. On shutdown the
/// channel is closed to new sends and whatever is already buffered is still dispatched.
pub async fn run_dispatch_loop(
    dispatcher: Arc<SyncDispatcher>,
    mut events: mpsc::Receiver<ReservationWritten>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("Sync dispatcher listening for reservation writes");
    loop {
        tokio::select! {
            received = events.recv() => {
                let Some(event) = received else {
                    info!("Reservation event channel closed");
                    return;
                };
                let report = dispatcher.handle(&event).await;
                debug!("Dispatched reservation {}: {:?}", event.reservation_id, report);
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    events.close();
                    let mut drained = 0;
                    while let Some(event) = events.recv().await {
                        dispatcher.handle(&event).await;
                        drained += 1;
                    }
                    info!("Sync dispatcher stopped after draining {} buffered event(s)", drained);
                    return;
                }
            }
        }
    }
}
