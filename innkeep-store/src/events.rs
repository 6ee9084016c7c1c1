use async_trait::async_trait;
use innkeep_core::events::{ReservationEventPublisher, ReservationWritten, RESERVATION_WRITTEN_TOPIC};
use innkeep_core::{CoreError, CoreResult};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use tracing::{error, info};

#[derive(Clone)]
pub struct KafkaEventPublisher {
    producer: FutureProducer,
}

impl KafkaEventPublisher {
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        Ok(Self { producer })
    }
}

#[async_trait]
impl ReservationEventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: &ReservationWritten) -> CoreResult<()> {
        let payload = serde_json::to_string(event).map_err(CoreError::internal)?;
        // Keyed by unit so one unit's writes stay ordered within a partition.
        let key = event.unit_id.to_string();
        let record = FutureRecord::to(RESERVATION_WRITTEN_TOPIC)
            .key(&key)
            .payload(&payload);

        match self.producer.send(record, Timeout::After(Duration::from_secs(0))).await {
            Ok(delivery) => {
                info!(
                    "Sent reservation {} to {}: partition {} offset {}",
                    event.reservation_id, RESERVATION_WRITTEN_TOPIC, delivery.partition, delivery.offset
                );
                Ok(())
            }
            Err((e, _msg)) => {
                error!("Failed to send message to {}: {}", RESERVATION_WRITTEN_TOPIC, e);
                Err(CoreError::internal(e))
            }
        }
    }
}
