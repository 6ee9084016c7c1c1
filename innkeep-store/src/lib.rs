pub mod app_config;
pub mod connection_repo;
pub mod database;
#[cfg(feature = "kafka")]
pub mod events;
pub mod inbox_repo;
pub mod memory;
pub mod redis_repo;
pub mod reservation_repo;
pub mod sync_failure_repo;

pub use connection_repo::PostgresConnectionRegistry;
pub use database::DbClient;
#[cfg(feature = "kafka")]
pub use events::KafkaEventPublisher;
pub use inbox_repo::PostgresOwnerInbox;
pub use redis_repo::{RedisClient, RedisRateLimiter};
pub use reservation_repo::PostgresReservationLedger;
pub use sync_failure_repo::PostgresSyncFailureStore;

pub(crate) fn db_error(err: sqlx::Error) -> innkeep_core::CoreError {
    tracing::error!("Database error: {}", err);
    innkeep_core::CoreError::internal(err)
}
