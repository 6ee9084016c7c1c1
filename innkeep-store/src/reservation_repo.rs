use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use innkeep_core::repository::{CancelCommit, CancelDecision, ReservationLedger};
use innkeep_core::reservation::{
    CancellationActor, CancellationRecord, GuestInfo, RefundStatus, Reservation, ReservationStatus,
    StayDates,
};
use innkeep_core::{CoreError, CoreResult};
use innkeep_shared::Masked;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::database::{contention_error, decode_settings, is_serialization_failure};
use crate::db_error;

/// A serialization failure means a concurrent transaction touched the same unit.
/// Re-running lets the loser observe the winner's row and report a real conflict.
const MAX_SERIALIZATION_ATTEMPTS: u32 = 3;

macro_rules! reservation_columns {
    () => {
        "id, unit_id, property_id, owner_id, guest_name, guest_email, guest_phone, \
         check_in, check_out, guest_count, total_price, deposit_amount, paid_amount, \
         payment_method, payment_option, payment_status, payment_reference, status, \
         booking_reference, access_token_hash, token_expires_at, cancelled_at, cancelled_by, \
         cancellation_reason, refund_amount, refund_status, refund_result, refund_id, created_at, \
         updated_at"
    };
}

pub struct PostgresReservationLedger {
    pool: PgPool,
}

impl PostgresReservationLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ReservationRow {
    id: Uuid,
    unit_id: Uuid,
    property_id: Uuid,
    owner_id: Uuid,
    guest_name: String,
    guest_email: String,
    guest_phone: String,
    check_in: NaiveDate,
    check_out: NaiveDate,
    guest_count: i32,
    total_price: i64,
    deposit_amount: i64,
    paid_amount: i64,
    payment_method: String,
    payment_option: String,
    payment_status: String,
    payment_reference: Option<String>,
    status: String,
    booking_reference: String,
    access_token_hash: String,
    token_expires_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
    cancelled_by: Option<String>,
    cancellation_reason: Option<String>,
    refund_amount: Option<i64>,
    refund_status: Option<String>,
    refund_result: Option<String>,
    refund_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ReservationRow> for Reservation {
    type Error = CoreError;

    fn try_from(row: ReservationRow) -> Result<Self, Self::Error> {
        let cancellation = match row.cancelled_at {
            Some(cancelled_at) => Some(CancellationRecord {
                cancelled_at,
                cancelled_by: row
                    .cancelled_by
                    .as_deref()
                    .map(str::parse::<CancellationActor>)
                    .transpose()?
                    .unwrap_or(CancellationActor::Guest),
                reason: row.cancellation_reason,
                refund_amount: row.refund_amount.unwrap_or(0),
                refund_status: row
                    .refund_status
                    .as_deref()
                    .map(str::parse::<RefundStatus>)
                    .transpose()?
                    .unwrap_or(RefundStatus::NotRequired),
                refund_result: row
                    .refund_result
                    .as_deref()
                    .map(str::parse::<RefundStatus>)
                    .transpose()?,
                refund_id: row.refund_id,
            }),
            None => None,
        };

        Ok(Reservation {
            id: row.id,
            unit_id: row.unit_id,
            property_id: row.property_id,
            owner_id: row.owner_id,
            guest: GuestInfo {
                name: row.guest_name,
                email: Masked(row.guest_email),
                phone: Masked(row.guest_phone),
            },
            stay: StayDates {
                check_in: row.check_in,
                check_out: row.check_out,
            },
            guest_count: u32::try_from(row.guest_count).map_err(CoreError::internal)?,
            total_price: row.total_price,
            deposit_amount: row.deposit_amount,
            paid_amount: row.paid_amount,
            payment_method: row.payment_method.parse()?,
            payment_option: row.payment_option.parse()?,
            payment_status: row.payment_status.parse()?,
            payment_reference: row.payment_reference,
            status: row.status.parse()?,
            booking_reference: row.booking_reference,
            access_token_hash: row.access_token_hash,
            token_expires_at: row.token_expires_at,
            cancellation,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

async fn begin_serializable(pool: &PgPool) -> Result<Transaction<'static, Postgres>, sqlx::Error> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

async fn lock_reservation(
    tx: &mut Transaction<'static, Postgres>,
    id: Uuid,
) -> Result<Option<ReservationRow>, sqlx::Error> {
    sqlx::query_as::<_, ReservationRow>(concat!(
        "SELECT ",
        reservation_columns!(),
        " FROM reservations WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await
}

impl PostgresReservationLedger {
    /// `Ok(false)` when an active stay on the unit conflicts with the requested dates.
    async fn try_insert(&self, r: &Reservation) -> Result<bool, sqlx::Error> {
        let mut tx = begin_serializable(&self.pool).await?;

        // The overlap rule applied in both directions, matching `StayDates::conflicts_with`.
        let conflicting: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM reservations
            WHERE unit_id = $1
              AND status IN ('pending', 'confirmed')
              AND (
                (check_in < $2 AND check_out >= $3)
                OR ($3 < check_out AND $2 >= check_in)
              )
            LIMIT 1
            "#,
        )
        .bind(r.unit_id)
        .bind(r.stay.check_out)
        .bind(r.stay.check_in)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some((existing_id,)) = conflicting {
            tx.rollback().await?;
            debug!("Unit {} dates held by reservation {}", r.unit_id, existing_id);
            return Ok(false);
        }

        let guest_count = i32::try_from(r.guest_count).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

        sqlx::query(concat!(
            "INSERT INTO reservations (",
            reservation_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, \
             $16, $17, $18, $19, $20, $21, NULL, NULL, NULL, NULL, NULL, NULL, NULL, $22, $23)"
        ))
        .bind(r.id)
        .bind(r.unit_id)
        .bind(r.property_id)
        .bind(r.owner_id)
        .bind(&r.guest.name)
        .bind(r.guest.email.expose())
        .bind(r.guest.phone.expose())
        .bind(r.stay.check_in)
        .bind(r.stay.check_out)
        .bind(guest_count)
        .bind(r.total_price)
        .bind(r.deposit_amount)
        .bind(r.paid_amount)
        .bind(r.payment_method.as_str())
        .bind(r.payment_option.as_str())
        .bind(r.payment_status.as_str())
        .bind(r.payment_reference.as_deref())
        .bind(r.status.as_str())
        .bind(&r.booking_reference)
        .bind(&r.access_token_hash)
        .bind(r.token_expires_at)
        .bind(r.created_at)
        .bind(r.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn try_cancel(
        &self,
        id: Uuid,
        decide: CancelDecision<'_>,
    ) -> Result<CoreResult<CancelCommit>, sqlx::Error> {
        let mut tx = begin_serializable(&self.pool).await?;

        let Some(row) = lock_reservation(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(Err(CoreError::NotFound(format!("reservation {}", id))));
        };
        let reservation = match Reservation::try_from(row) {
            Ok(r) => r,
            Err(e) => {
                tx.rollback().await?;
                return Ok(Err(e));
            }
        };

        let settings_row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT settings FROM unit_settings WHERE unit_id = $1")
                .bind(reservation.unit_id)
                .fetch_optional(&mut *tx)
                .await?;
        let settings = match settings_row.map(|(v,)| decode_settings(v)) {
            Some(Ok(s)) => s,
            Some(Err(e)) => {
                tx.rollback().await?;
                return Ok(Err(CoreError::internal(e)));
            }
            None => {
                tx.rollback().await?;
                return Ok(Err(CoreError::NotFound(format!("settings for unit {}", reservation.unit_id))));
            }
        };

        let record = match decide(&settings, &reservation) {
            Ok(Some(record)) => record,
            Ok(None) => {
                tx.commit().await?;
                return Ok(Ok(CancelCommit { reservation, transitioned: false }));
            }
            Err(e) => {
                tx.rollback().await?;
                return Ok(Err(e));
            }
        };

        sqlx::query(
            r#"
            UPDATE reservations
            SET status = 'cancelled', cancelled_at = $2, cancelled_by = $3, cancellation_reason = $4,
                refund_amount = $5, refund_status = $6, refund_result = $7, refund_id = $8,
                updated_at = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(record.cancelled_at)
        .bind(record.cancelled_by.as_str())
        .bind(record.reason.as_deref())
        .bind(record.refund_amount)
        .bind(record.refund_status.as_str())
        .bind(record.refund_result.map(|s| s.as_str()))
        .bind(record.refund_id.as_deref())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut reservation = reservation;
        reservation.apply_cancellation(record);
        Ok(Ok(CancelCommit { reservation, transitioned: true }))
    }

    async fn try_complete(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<CoreResult<Reservation>, sqlx::Error> {
        let mut tx = begin_serializable(&self.pool).await?;

        let Some(row) = lock_reservation(&mut tx, id).await? else {
            tx.rollback().await?;
            return Ok(Err(CoreError::NotFound(format!("reservation {}", id))));
        };
        let mut reservation = match Reservation::try_from(row) {
            Ok(r) => r,
            Err(e) => {
                tx.rollback().await?;
                return Ok(Err(e));
            }
        };
        if !reservation.is_active() {
            tx.rollback().await?;
            return Ok(Err(CoreError::PreconditionFailed(format!(
                "reservation is {}, only pending or confirmed stays can be completed",
                reservation.status
            ))));
        }

        sqlx::query("UPDATE reservations SET status = 'completed', updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        reservation.status = ReservationStatus::Completed;
        reservation.updated_at = at;
        Ok(Ok(reservation))
    }
}

#[async_trait]
impl ReservationLedger for PostgresReservationLedger {
    async fn insert_if_available(&self, reservation: &Reservation) -> CoreResult<()> {
        for attempt in 1..=MAX_SERIALIZATION_ATTEMPTS {
            match self.try_insert(reservation).await {
                Ok(true) => {
                    info!("Reservation {} committed for unit {}", reservation.id, reservation.unit_id);
                    return Ok(());
                }
                Ok(false) => {
                    return Err(CoreError::Conflict("dates no longer available".to_string()));
                }
                Err(e) if is_serialization_failure(&e) => {
                    warn!("Serialization failure creating reservation (attempt {}): {}", attempt, e);
                }
                Err(e) => return Err(db_error(e)),
            }
        }
        Err(contention_error())
    }

    async fn get(&self, id: Uuid) -> CoreResult<Option<Reservation>> {
        let row = sqlx::query_as::<_, ReservationRow>(concat!(
            "SELECT ",
            reservation_columns!(),
            " FROM reservations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.map(Reservation::try_from).transpose()
    }

    async fn active_for_unit(&self, unit_id: Uuid) -> CoreResult<Vec<Reservation>> {
        let rows = sqlx::query_as::<_, ReservationRow>(concat!(
            "SELECT ",
            reservation_columns!(),
            " FROM reservations WHERE unit_id = $1 AND status IN ('pending', 'confirmed') ORDER BY check_in"
        ))
        .bind(unit_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter().map(Reservation::try_from).collect()
    }

    async fn cancel_in_tx(&self, id: Uuid, decide: CancelDecision<'_>) -> CoreResult<CancelCommit> {
        for attempt in 1..=MAX_SERIALIZATION_ATTEMPTS {
            match self.try_cancel(id, decide).await {
                Ok(result) => return result,
                Err(e) if is_serialization_failure(&e) => {
                    warn!("Serialization failure cancelling {} (attempt {}): {}", id, attempt, e);
                }
                Err(e) => return Err(db_error(e)),
            }
        }
        Err(contention_error())
    }

    async fn record_refund(
        &self,
        id: Uuid,
        refund_result: RefundStatus,
        refund_id: Option<String>,
    ) -> CoreResult<()> {
        sqlx::query(
            "UPDATE reservations SET refund_result = $2, refund_id = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(refund_result.as_str())
        .bind(refund_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn complete_in_tx(&self, id: Uuid, at: DateTime<Utc>) -> CoreResult<Reservation> {
        for attempt in 1..=MAX_SERIALIZATION_ATTEMPTS {
            match self.try_complete(id, at).await {
                Ok(result) => return result,
                Err(e) if is_serialization_failure(&e) => {
                    warn!("Serialization failure completing {} (attempt {}): {}", id, attempt, e);
                }
                Err(e) => return Err(db_error(e)),
            }
        }
        Err(contention_error())
    }
}
