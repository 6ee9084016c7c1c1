use std::sync::Arc;
use innkeep_core::events::{ReservationWritten, RESERVATION_WRITTEN_TOPIC};
use innkeep_sync::SyncDispatcher;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::Message;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// Consumes `reservation.written` and hands each event to the sync dispatcher.
pub async fn start_sync_worker(
    brokers: String,
    group_id: String,
    dispatcher: Arc<SyncDispatcher>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), KafkaError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &brokers)
        .set("group.id", &group_id)
        .set("enable.auto.commit", "true")
        .set("auto.offset.reset", "earliest")
        .create()?;

    consumer.subscribe(&[RESERVATION_WRITTEN_TOPIC])?;

    info!("Sync worker started, listening to {}...", RESERVATION_WRITTEN_TOPIC);

    loop {
        tokio::select! {
            received = consumer.recv() => match received {
                Err(e) => error!("Kafka error: {}", e),
                Ok(m) => match m.payload_view::<str>() {
                    Some(Ok(payload)) => match serde_json::from_str::<ReservationWritten>(payload) {
                        Ok(event) => {
                            let report = dispatcher.handle(&event).await;
                            debug!("Dispatched reservation {}: {:?}", event.reservation_id, report);
                        }
                        Err(e) => error!("Unreadable reservation event: {}", e),
                    },
                    Some(Err(e)) => error!("Error reading payload: {}", e),
                    None => debug!("Skipping empty message"),
                },
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Sync worker stopping");
                    return Ok(());
                }
            }
        }
    }
}
