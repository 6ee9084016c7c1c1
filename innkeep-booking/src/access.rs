//! Per-reservation access tokens for guests without an account.
//!
//! The plaintext is handed to the guest once at creation; only its SHA-256 is stored.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use innkeep_core::rate_limit::{RateLimiter, TOKEN_VERIFICATION};
use innkeep_core::repository::ReservationLedger;
use innkeep_core::reservation::{start_of_day, Reservation};
use innkeep_core::{CoreError, CoreResult};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// 32 random bytes, base64url without padding.
pub const TOKEN_LENGTH: usize = 43;
/// Lowercase hex SHA-256.
pub const TOKEN_HASH_LENGTH: usize = 64;

const FUTURE_STAY_VALIDITY_DAYS: i64 = 30;
const PAST_STAY_VALIDITY_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub plaintext: String,
    pub hash: String,
}

pub fn generate_token() -> IssuedToken {
    let mut rng = rand::thread_rng();
    let mut random_bytes = [0u8; 32];
    rng.fill_bytes(&mut random_bytes);
    let plaintext = URL_SAFE_NO_PAD.encode(random_bytes);
    let hash = hash_token(&plaintext);
    IssuedToken { plaintext, hash }
}

pub fn hash_token(plaintext: &str) -> String {
    hex::encode(Sha256::digest(plaintext.as_bytes()))
}

/// Token lifetime runs from the checkout date (midnight UTC). Stays already over at
/// issuance keep a long-lived token so historical bookings stay reachable.
pub fn compute_expiry(check_out: NaiveDate, now: DateTime<Utc>) -> DateTime<Utc> {
    let check_out_at = start_of_day(check_out);
    if check_out_at > now {
        check_out_at + Duration::days(FUTURE_STAY_VALIDITY_DAYS)
    } else {
        check_out_at + Duration::days(PAST_STAY_VALIDITY_DAYS)
    }
}

fn is_well_formed_token(token: &str) -> bool {
    token.len() == TOKEN_LENGTH
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

fn is_well_formed_hash(hash: &str) -> bool {
    hash.len() == TOKEN_HASH_LENGTH
        && hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

pub struct TokenVerifier {
    limiter: Arc<dyn RateLimiter>,
}

impl TokenVerifier {
    pub fn new(limiter: Arc<dyn RateLimiter>) -> Self {
        Self { limiter }
    }

    /// True only when `provided` hashes to `stored_hash` and `client_id` is under its
    /// verification ceiling. Every rejection logs the same line.
    pub async fn verify(&self, provided: &str, stored_hash: &str, client_id: &str) -> bool {
        let accepted = self.check(provided, stored_hash, client_id).await;
        if !accepted {
            warn!("access token verification failed");
        }
        accepted
    }

    async fn check(&self, provided: &str, stored_hash: &str, client_id: &str) -> bool {
        // Limiter errors count as over the limit.
        if !matches!(self.limiter.hit(TOKEN_VERIFICATION, client_id).await, Ok(true)) {
            return false;
        }
        if !is_well_formed_token(provided) || !is_well_formed_hash(stored_hash) {
            return false;
        }
        let computed = hash_token(provided);
        constant_time_eq::constant_time_eq(computed.as_bytes(), stored_hash.as_bytes())
    }
}

/// Token-gated read of one reservation.
pub struct GuestAccessService {
    ledger: Arc<dyn ReservationLedger>,
    verifier: Arc<TokenVerifier>,
}

impl GuestAccessService {
    pub fn new(ledger: Arc<dyn ReservationLedger>, verifier: Arc<TokenVerifier>) -> Self {
        Self { ledger, verifier }
    }

    pub async fn view(&self, reservation_id: Uuid, token: &str, client_id: &str) -> CoreResult<Reservation> {
        self.view_at(reservation_id, token, client_id, Utc::now()).await
    }

    /// Unknown reservation, bad token and expired token all produce the same error.
    pub async fn view_at(
        &self,
        reservation_id: Uuid,
        token: &str,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> CoreResult<Reservation> {
        let reservation = self.ledger.get(reservation_id).await?;
        // An unknown id still runs through the verifier so it is counted and logged alike.
        let stored_hash = reservation
            .as_ref()
            .map(|r| r.access_token_hash.as_str())
            .unwrap_or_default();

        let verified = self.verifier.verify(token, stored_hash, client_id).await;
        match reservation {
            Some(r) if verified && now < r.token_expires_at => Ok(r),
            _ => Err(denied()),
        }
    }
}

fn denied() -> CoreError {
    CoreError::PermissionDenied("invalid or expired access token".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{confirmed_reservation, limiter};
    use innkeep_store::memory::{InMemoryRateLimiter, InMemoryReservationLedger};
    use std::collections::HashMap;

    fn verifier() -> TokenVerifier {
        TokenVerifier::new(limiter(1000))
    }

    #[test]
    fn test_generated_token_shape() {
        let token = generate_token();
        assert_eq!(token.plaintext.len(), TOKEN_LENGTH);
        assert!(is_well_formed_token(&token.plaintext));
        assert_eq!(token.hash.len(), TOKEN_HASH_LENGTH);
        assert!(is_well_formed_hash(&token.hash));
        assert_eq!(token.hash, hash_token(&token.plaintext));
        assert_ne!(generate_token().plaintext, token.plaintext);
    }

    #[test]
    fn test_expiry_depends_on_whether_checkout_is_ahead() {
        let now = Utc::now();
        let ahead = (now + Duration::days(5)).date_naive();
        let behind = (now - Duration::days(5)).date_naive();

        assert_eq!(compute_expiry(ahead, now), start_of_day(ahead) + Duration::days(30));
        assert_eq!(compute_expiry(behind, now), start_of_day(behind) + Duration::days(3650));
    }

    #[tokio::test]
    async fn test_round_trip_and_tampering() {
        let v = verifier();
        let token = generate_token();

        assert!(v.verify(&token.plaintext, &token.hash, "client").await);
        assert!(!v.verify(&format!("{}x", token.plaintext), &token.hash, "client").await);
        assert!(!v.verify("short", &token.hash, "client").await);
        assert!(!v.verify("", &token.hash, "client").await);
    }

    #[tokio::test]
    async fn test_rejects_wrong_charset_and_bad_stored_hash() {
        let v = verifier();
        let token = generate_token();

        let mut bad_charset = token.plaintext.clone();
        bad_charset.replace_range(0..1, "+");
        assert!(!v.verify(&bad_charset, &hash_token(&bad_charset), "client").await);

        assert!(!v.verify(&token.plaintext, &token.hash.to_uppercase(), "client").await);
        assert!(!v.verify(&token.plaintext, &token.hash[..63], "client").await);
    }

    #[tokio::test]
    async fn test_fails_closed_over_limit_and_on_limiter_error() {
        let v = TokenVerifier::new(limiter(2));
        let token = generate_token();

        assert!(v.verify(&token.plaintext, &token.hash, "10.0.0.1").await);
        assert!(v.verify(&token.plaintext, &token.hash, "10.0.0.1").await);
        assert!(!v.verify(&token.plaintext, &token.hash, "10.0.0.1").await);
        assert!(v.verify(&token.plaintext, &token.hash, "10.0.0.2").await);

        let offline = Arc::new(InMemoryRateLimiter::new(HashMap::new()));
        offline.set_offline(true);
        let v = TokenVerifier::new(offline);
        assert!(!v.verify(&token.plaintext, &token.hash, "10.0.0.3").await);
    }

    #[tokio::test]
    async fn test_guest_view_hides_every_failure_behind_one_error() {
        let ledger = Arc::new(InMemoryReservationLedger::new());
        let token = generate_token();
        let mut reservation = confirmed_reservation(Uuid::new_v4());
        reservation.access_token_hash = token.hash.clone();
        reservation.token_expires_at = Utc::now() + Duration::days(1);
        let id = reservation.id;
        ledger.put(reservation).await;

        let service = GuestAccessService::new(ledger, Arc::new(verifier()));
        assert_eq!(service.view(id, &token.plaintext, "c").await.unwrap().id, id);

        let wrong = service.view(id, &generate_token().plaintext, "c").await.unwrap_err();
        let unknown = service.view(Uuid::new_v4(), &token.plaintext, "c").await.unwrap_err();
        let expired = service
            .view_at(id, &token.plaintext, "c", Utc::now() + Duration::days(2))
            .await
            .unwrap_err();
        assert_eq!(wrong, unknown);
        assert_eq!(wrong, expired);
        assert_eq!(wrong.code(), "permission-denied");
    }
}
