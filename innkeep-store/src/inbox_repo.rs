use async_trait::async_trait;
use chrono::{DateTime, Utc};
use innkeep_core::notify::OwnerNotification;
use innkeep_core::platform::Platform;
use innkeep_core::repository::OwnerInbox;
use innkeep_core::{CoreError, CoreResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db_error;

pub struct PostgresOwnerInbox {
    pool: PgPool,
}

impl PostgresOwnerInbox {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    owner_id: Uuid,
    unit_id: Uuid,
    reservation_id: Option<Uuid>,
    platform: Option<String>,
    kind: String,
    message: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for OwnerNotification {
    type Error = CoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(OwnerNotification {
            id: row.id,
            owner_id: row.owner_id,
            unit_id: row.unit_id,
            reservation_id: row.reservation_id,
            platform: row.platform.as_deref().map(str::parse::<Platform>).transpose()?,
            kind: row.kind.parse()?,
            message: row.message,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl OwnerInbox for PostgresOwnerInbox {
    async fn append(&self, notification: &OwnerNotification) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO owner_notifications (id, owner_id, unit_id, reservation_id, platform, kind, message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(notification.id)
        .bind(notification.owner_id)
        .bind(notification.unit_id)
        .bind(notification.reservation_id)
        .bind(notification.platform.map(|p| p.as_str()))
        .bind(notification.kind.as_str())
        .bind(&notification.message)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn list(&self, owner_id: Uuid) -> CoreResult<Vec<OwnerNotification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            SELECT id, owner_id, unit_id, reservation_id, platform, kind, message, created_at
            FROM owner_notifications
            WHERE owner_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(OwnerNotification::try_from).collect()
    }
}
