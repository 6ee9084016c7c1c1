use async_trait::async_trait;
use innkeep_core::repository::UnitSettingsRepository;
use innkeep_core::unit::UnitSettings;
use innkeep_core::{CoreError, CoreResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::db_error;

/// Process-wide Postgres pool. Built once in `main` and handed to every repository.
#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn fetch_unit_settings(&self, unit_id: Uuid) -> Result<Option<UnitSettings>, sqlx::Error> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT settings FROM unit_settings WHERE unit_id = $1")
                .bind(unit_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(settings,)| decode_settings(settings))
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))
    }
}

/// Settings are stored as one JSONB document per unit:
/// `{"unit_id": .., "property_id": .., "owner_id": .., "payment_methods": {"card": {"enabled": true}}, ...}`
pub(crate) fn decode_settings(value: serde_json::Value) -> Result<UnitSettings, serde_json::Error> {
    serde_json::from_value(value)
}

#[async_trait]
impl UnitSettingsRepository for DbClient {
    async fn get_settings(&self, unit_id: Uuid) -> CoreResult<Option<UnitSettings>> {
        self.fetch_unit_settings(unit_id).await.map_err(db_error)
    }
}

pub(crate) fn is_serialization_failure(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|e| e.code())
        .map(|code| code == "40001" || code == "40P01")
        .unwrap_or(false)
}

pub(crate) fn contention_error() -> CoreError {
    CoreError::InternalError("reservation ledger is busy, please retry".to_string())
}
