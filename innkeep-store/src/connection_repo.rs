use async_trait::async_trait;
use chrono::{DateTime, Utc};
use innkeep_core::platform::PlatformConnection;
use innkeep_core::repository::ConnectionRegistry;
use innkeep_core::{CoreError, CoreResult};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

use crate::db_error;

pub struct PostgresConnectionRegistry {
    pool: PgPool,
}

impl PostgresConnectionRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ConnectionRow {
    id: Uuid,
    owner_id: Uuid,
    unit_id: Uuid,
    platform: String,
    external_property_id: String,
    external_unit_id: String,
    sealed_credential: String,
    credential_expires_at: Option<DateTime<Utc>>,
    status: String,
    last_synced_at: Option<DateTime<Utc>>,
}

impl TryFrom<ConnectionRow> for PlatformConnection {
    type Error = CoreError;

    fn try_from(row: ConnectionRow) -> Result<Self, Self::Error> {
        Ok(PlatformConnection {
            id: row.id,
            owner_id: row.owner_id,
            unit_id: row.unit_id,
            platform: row.platform.parse()?,
            external_property_id: row.external_property_id,
            external_unit_id: row.external_unit_id,
            sealed_credential: row.sealed_credential,
            credential_expires_at: row.credential_expires_at,
            status: row.status.parse()?,
            last_synced_at: row.last_synced_at,
        })
    }
}

const CONNECTION_COLUMNS: &str = "id, owner_id, unit_id, platform, external_property_id, external_unit_id, \
     sealed_credential, credential_expires_at, status, last_synced_at";

#[async_trait]
impl ConnectionRegistry for PostgresConnectionRegistry {
    async fn active_for_unit(&self, unit_id: Uuid) -> CoreResult<Vec<PlatformConnection>> {
        let sql = format!(
            "SELECT {} FROM platform_connections WHERE unit_id = $1 AND status = 'active'",
            CONNECTION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(unit_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.into_iter().map(PlatformConnection::try_from).collect()
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<PlatformConnection>> {
        let sql = format!("SELECT {} FROM platform_connections WHERE id = $1", CONNECTION_COLUMNS);
        let row = sqlx::query_as::<_, ConnectionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(PlatformConnection::try_from).transpose()
    }

    async fn update_credential(
        &self,
        id: Uuid,
        sealed_credential: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> CoreResult<()> {
        sqlx::query(
            r#"
            UPDATE platform_connections
            SET sealed_credential = $2, credential_expires_at = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(sealed_credential)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn mark_synced(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<()> {
        sqlx::query("UPDATE platform_connections SET last_synced_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn mark_error(&self, id: Uuid, reason: &str) -> CoreResult<()> {
        warn!("Platform connection {} moved to error: {}", id, reason);
        sqlx::query(
            "UPDATE platform_connections SET status = 'error', status_reason = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}
