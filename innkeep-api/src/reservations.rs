use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use innkeep_booking::{CreateReservationRequest, CreatedReservation, GuestCancellation};
use innkeep_core::rate_limit::GUEST_CANCELLATION;
use innkeep_core::reservation::{
    CancellationOutcome, GuestInfo, PaymentMethod, PaymentOption, PaymentStatus, RefundStatus,
    Reservation, ReservationStatus,
};
use innkeep_core::CoreError;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::ClientId;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateReservationBody {
    pub unit_id: Uuid,
    pub property_id: Uuid,
    pub owner_id: Uuid,
    pub guest: GuestInfo,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub guest_count: u32,
    pub total_price: i64,
    pub payment_method: PaymentMethod,
    pub payment_option: PaymentOption,
}

impl From<CreateReservationBody> for CreateReservationRequest {
    fn from(body: CreateReservationBody) -> Self {
        Self {
            unit_id: body.unit_id,
            property_id: body.property_id,
            owner_id: body.owner_id,
            guest: body.guest,
            check_in: body.check_in,
            check_out: body.check_out,
            guest_count: body.guest_count,
            total_price: body.total_price,
            payment_method: body.payment_method,
            payment_option: body.payment_option,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelReservationBody {
    pub reference: String,
    pub email: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    #[serde(default)]
    pub token: String,
}

/// What a guest holding the access token may see. No token hash, no payment reference.
#[derive(Debug, Serialize)]
pub struct GuestReservationView {
    pub reservation_id: Uuid,
    pub reference: String,
    pub unit_id: Uuid,
    pub property_id: Uuid,
    pub status: ReservationStatus,
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
    pub nights: i64,
    pub guest_name: String,
    pub guest_count: u32,
    pub total_price: i64,
    pub deposit_amount: i64,
    pub paid_amount: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub cancellation: Option<CancellationOutcome>,
    /// How the post-cancellation card refund went, once it has run.
    pub refund_result: Option<RefundStatus>,
    pub created_at: DateTime<Utc>,
}

impl From<Reservation> for GuestReservationView {
    fn from(r: Reservation) -> Self {
        let cancellation = r.cancellation_outcome();
        let refund_result = r.cancellation.as_ref().and_then(|c| c.refund_result);
        Self {
            reservation_id: r.id,
            reference: r.booking_reference,
            unit_id: r.unit_id,
            property_id: r.property_id,
            status: r.status,
            check_in: r.stay.check_in,
            check_out: r.stay.check_out,
            nights: r.stay.nights(),
            guest_name: r.guest.name,
            guest_count: r.guest_count,
            total_price: r.total_price,
            deposit_amount: r.deposit_amount,
            paid_amount: r.paid_amount,
            payment_method: r.payment_method,
            payment_status: r.payment_status,
            cancellation,
            refund_result,
            created_at: r.created_at,
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/reservations", post(create_reservation))
        .route("/v1/reservations/{id}", get(get_reservation))
        .route("/v1/reservations/{id}/cancel", post(cancel_reservation))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/reservations
pub async fn create_reservation(
    State(state): State<AppState>,
    Json(body): Json<CreateReservationBody>,
) -> Result<(StatusCode, Json<CreatedReservation>), AppError> {
    match state.reservations.create_reservation(body.into()).await {
        Ok(created) => {
            state.metrics.reservations_created.inc();
            Ok((StatusCode::CREATED, Json(created)))
        }
        Err(err) => {
            if matches!(err, CoreError::Conflict(_)) {
                state.metrics.reservation_conflicts.inc();
            }
            Err(err.into())
        }
    }
}

/// GET /v1/reservations/{id}?token=
pub async fn get_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
    Query(query): Query<AccessQuery>,
    ClientId(client): ClientId,
) -> Result<Json<GuestReservationView>, AppError> {
    match state.guest_access.view(reservation_id, &query.token, &client).await {
        Ok(reservation) => Ok(Json(reservation.into())),
        Err(err) => {
            state.metrics.token_verification_failures.inc();
            Err(err.into())
        }
    }
}

/// POST /v1/reservations/{id}/cancel
pub async fn cancel_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<Uuid>,
    ClientId(client): ClientId,
    Json(body): Json<CancelReservationBody>,
) -> Result<Json<CancellationOutcome>, AppError> {
    // Fails closed when the limiter is unavailable.
    let allowed = state.rate_limiter.hit(GUEST_CANCELLATION, &client).await.unwrap_or_else(|e| {
        warn!("Cancellation rate limiter unavailable: {}", e);
        false
    });
    if !allowed {
        return Err(CoreError::RateLimited("too many cancellation attempts".to_string()).into());
    }

    let outcome = state
        .cancellations
        .cancel_by_guest(GuestCancellation {
            reservation_id,
            reference: body.reference,
            email: body.email,
            reason: body.reason,
        })
        .await?;
    state.metrics.cancellations.inc();
    Ok(Json(outcome))
}
