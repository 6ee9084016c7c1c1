use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::platform::Platform;

/// A failed outbound sync waiting in the retry queue.
///
/// One record per (reservation, connection). Removed on success, when the reservation or
/// connection no longer applies, or after the owner has been told retries ran out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncFailureRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub unit_id: Uuid,
    pub platform: Platform,
    pub connection_id: Uuid,
    pub reservation_id: Uuid,
    pub error: String,
    pub retry_count: u32,
    pub next_retry_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SyncFailureRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner_id: Uuid,
        unit_id: Uuid,
        platform: Platform,
        connection_id: Uuid,
        reservation_id: Uuid,
        error: String,
        next_retry_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            unit_id,
            platform,
            connection_id,
            reservation_id,
            error,
            retry_count: 0,
            next_retry_at,
            created_at: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>, max_retries: u32) -> bool {
        self.next_retry_at <= now && self.retry_count < max_retries
    }
}
