use async_trait::async_trait;
use chrono::{DateTime, Utc};
use innkeep_core::repository::SyncFailureStore;
use innkeep_core::sync_failure::SyncFailureRecord;
use innkeep_core::{CoreError, CoreResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db_error;

/// Retry queue as a polled table. Durable across restarts; the scheduler is the only reader.
pub struct PostgresSyncFailureStore {
    pool: PgPool,
}

impl PostgresSyncFailureStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SyncFailureRow {
    id: Uuid,
    owner_id: Uuid,
    unit_id: Uuid,
    platform: String,
    connection_id: Uuid,
    reservation_id: Uuid,
    error: String,
    retry_count: i32,
    next_retry_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SyncFailureRow> for SyncFailureRecord {
    type Error = CoreError;

    fn try_from(row: SyncFailureRow) -> Result<Self, Self::Error> {
        Ok(SyncFailureRecord {
            id: row.id,
            owner_id: row.owner_id,
            unit_id: row.unit_id,
            platform: row.platform.parse()?,
            connection_id: row.connection_id,
            reservation_id: row.reservation_id,
            error: row.error,
            retry_count: u32::try_from(row.retry_count).unwrap_or(0),
            next_retry_at: row.next_retry_at,
            created_at: row.created_at,
        })
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[async_trait]
impl SyncFailureStore for PostgresSyncFailureStore {
    async fn record(&self, failure: &SyncFailureRecord) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_failures
                (id, owner_id, unit_id, platform, connection_id, reservation_id, error, retry_count, next_retry_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (reservation_id, connection_id) DO UPDATE SET error = EXCLUDED.error
            "#,
        )
        .bind(failure.id)
        .bind(failure.owner_id)
        .bind(failure.unit_id)
        .bind(failure.platform.as_str())
        .bind(failure.connection_id)
        .bind(failure.reservation_id)
        .bind(&failure.error)
        .bind(to_i32(failure.retry_count))
        .bind(failure.next_retry_at)
        .bind(failure.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn due(
        &self,
        now: DateTime<Utc>,
        max_retries: u32,
        limit: usize,
    ) -> CoreResult<Vec<SyncFailureRecord>> {
        let rows = sqlx::query_as::<_, SyncFailureRow>(
            r#"
            SELECT id, owner_id, unit_id, platform, connection_id, reservation_id, error, retry_count, next_retry_at, created_at
            FROM sync_failures
            WHERE next_retry_at <= $1 AND retry_count < $2
            ORDER BY next_retry_at
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(to_i32(max_retries))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(SyncFailureRecord::try_from).collect()
    }

    async fn reschedule(
        &self,
        id: Uuid,
        retry_count: u32,
        next_retry_at: DateTime<Utc>,
        error: &str,
    ) -> CoreResult<()> {
        sqlx::query(
            "UPDATE sync_failures SET retry_count = $2, next_retry_at = $3, error = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(to_i32(retry_count))
        .bind(next_retry_at)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> CoreResult<()> {
        sqlx::query("DELETE FROM sync_failures WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> CoreResult<Vec<SyncFailureRecord>> {
        let rows = sqlx::query_as::<_, SyncFailureRow>(
            r#"
            SELECT id, owner_id, unit_id, platform, connection_id, reservation_id, error, retry_count, next_retry_at, created_at
            FROM sync_failures
            WHERE owner_id = $1
            ORDER BY next_retry_at
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(SyncFailureRecord::try_from).collect()
    }
}
