use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reservation::{Reservation, ReservationStatus, StayDates};
use crate::CoreResult;

pub const RESERVATION_WRITTEN_TOPIC: &str = "reservation.written";

/// Emitted after every committed reservation write. Consumed by the sync dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReservationWritten {
    pub reservation_id: Uuid,
    pub unit_id: Uuid,
    pub owner_id: Uuid,
    pub status: ReservationStatus,
    pub stay: StayDates,
    pub written_at: DateTime<Utc>,
}

impl ReservationWritten {
    pub fn from_reservation(reservation: &Reservation) -> Self {
        Self {
            reservation_id: reservation.id,
            unit_id: reservation.unit_id,
            owner_id: reservation.owner_id,
            status: reservation.status,
            stay: reservation.stay,
            written_at: reservation.updated_at,
        }
    }
}

#[async_trait]
pub trait ReservationEventPublisher: Send + Sync {
    async fn publish(&self, event: &ReservationWritten) -> CoreResult<()>;
}
