use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use uuid::Uuid;

use crate::platform::Platform;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    SyncRetriesExhausted,
    ReauthorizationRequired,
}

string_enum!(NotificationKind {
    SyncRetriesExhausted => "sync_retries_exhausted",
    ReauthorizationRequired => "reauthorization_required",
});

/// Entry in a property owner's inbox. Guests never see these.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerNotification {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub unit_id: Uuid,
    pub reservation_id: Option<Uuid>,
    pub platform: Option<Platform>,
    pub kind: NotificationKind,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Guest-facing messages. Rendering and delivery live outside this system.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuestNotification {
    ReservationCreated {
        reservation_id: Uuid,
        booking_reference: String,
    },
    ReservationCancelled {
        reservation_id: Uuid,
        booking_reference: String,
        refund_amount: i64,
    },
}

/// Fire-and-forget delivery. Callers log failures and carry on.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        recipient: &str,
        notification: &GuestNotification,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub struct LoggingNotificationSender;

#[async_trait]
impl NotificationSender for LoggingNotificationSender {
    async fn send(
        &self,
        _recipient: &str,
        notification: &GuestNotification,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        tracing::info!("Guest notification queued: {:?}", notification);
        Ok(())
    }
}

/// Records everything it is asked to send; optionally fails every call.
#[derive(Default)]
pub struct MockNotificationSender {
    pub sent: Mutex<Vec<(String, GuestNotification)>>,
    pub fail: bool,
}

impl MockNotificationSender {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<(String, GuestNotification)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSender for MockNotificationSender {
    async fn send(
        &self,
        recipient: &str,
        notification: &GuestNotification,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if self.fail {
            return Err("Simulated mail gateway failure".into());
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((recipient.to_string(), notification.clone()));
        }
        Ok(())
    }
}
