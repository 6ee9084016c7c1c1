use axum::{
    extract::{Path, State},
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use innkeep_core::notify::OwnerNotification;
use innkeep_core::platform::ExternalReservation;
use innkeep_core::reservation::{Reservation, ReservationStatus};
use innkeep_core::sync_failure::SyncFailureRecord;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::OwnerClaims;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CompletedReservationResponse {
    pub reservation_id: Uuid,
    pub status: ReservationStatus,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

impl From<Reservation> for CompletedReservationResponse {
    fn from(r: Reservation) -> Self {
        Self {
            reservation_id: r.id,
            status: r.status,
            check_in: r.stay.check_in,
            check_out: r.stay.check_out,
            updated_at: r.updated_at,
        }
    }
}

/// Mounted behind `owner_auth_middleware`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/owner/notifications", get(list_notifications))
        .route("/v1/owner/sync-failures", get(list_sync_failures))
        .route("/v1/owner/reservations/{id}/complete", post(complete_reservation))
        .route(
            "/v1/owner/connections/{id}/external-reservations",
            get(list_external_reservations),
        )
}

/// GET /v1/owner/notifications
pub async fn list_notifications(
    State(state): State<AppState>,
    Extension(claims): Extension<OwnerClaims>,
) -> Result<Json<Vec<OwnerNotification>>, AppError> {
    let owner_id = claims.owner_id()?;
    Ok(Json(state.inbox.list(owner_id).await?))
}

/// GET /v1/owner/sync-failures
pub async fn list_sync_failures(
    State(state): State<AppState>,
    Extension(claims): Extension<OwnerClaims>,
) -> Result<Json<Vec<SyncFailureRecord>>, AppError> {
    let owner_id = claims.owner_id()?;
    Ok(Json(state.sync_failures.list_for_owner(owner_id).await?))
}

/// POST /v1/owner/reservations/{id}/complete
pub async fn complete_reservation(
    State(state): State<AppState>,
    Extension(claims): Extension<OwnerClaims>,
    Path(reservation_id): Path<Uuid>,
) -> Result<Json<CompletedReservationResponse>, AppError> {
    let owner_id = claims.owner_id()?;
    let completed = state
        .reservations
        .complete_reservation(reservation_id, owner_id)
        .await?;
    Ok(Json(completed.into()))
}

/// GET /v1/owner/connections/{id}/external-reservations
pub async fn list_external_reservations(
    State(state): State<AppState>,
    Extension(claims): Extension<OwnerClaims>,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<Vec<ExternalReservation>>, AppError> {
    let owner_id = claims.owner_id()?;
    Ok(Json(
        state
            .dispatcher
            .external_reservations(connection_id, owner_id)
            .await?,
    ))
}
