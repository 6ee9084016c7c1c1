use async_trait::async_trait;
use chrono::{DateTime, Utc};
use innkeep_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::reservation::StayDates;

/// External listing marketplaces a unit can be connected to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Airbnb,
    BookingCom,
    Vrbo,
}

string_enum!(Platform {
    Airbnb => "airbnb",
    BookingCom => "booking_com",
    Vrbo => "vrbo",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Error,
}

string_enum!(ConnectionStatus {
    Active => "active",
    Error => "error",
});

/// A unit's link to one marketplace listing. Created by the OAuth onboarding flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlatformConnection {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub unit_id: Uuid,
    pub platform: Platform,
    pub external_property_id: String,
    pub external_unit_id: String,
    /// AES-256-GCM sealed credential, see `innkeep_sync::credentials::CredentialVault`.
    pub sealed_credential: String,
    pub credential_expires_at: Option<DateTime<Utc>>,
    pub status: ConnectionStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl PlatformConnection {
    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active
    }
}

/// Decrypted marketplace credential. Only ever held in memory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub access_token: Masked<String>,
    pub refresh_token: Option<Masked<String>>,
}

#[derive(Debug, Clone)]
pub struct RefreshedCredential {
    pub credential: Credential,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A reservation as reported by the marketplace itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalReservation {
    pub external_id: String,
    pub stay: StayDates,
    pub guest_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// Network trouble, throttling, 5xx: worth another attempt later.
    #[error("transient platform failure: {0}")]
    Transient(String),
    /// Revoked or expired authorization, rejected request: needs the owner.
    #[error("terminal platform failure: {0}")]
    Terminal(String),
}

impl AdapterError {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AdapterError::Terminal(_))
    }
}

/// Integration boundary to one marketplace calendar.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Mark the ranges unavailable on the marketplace listing.
    async fn block(
        &self,
        connection: &PlatformConnection,
        credential: &Credential,
        ranges: &[StayDates],
    ) -> Result<(), AdapterError>;

    /// Reopen the ranges on the marketplace listing.
    async fn unblock(
        &self,
        connection: &PlatformConnection,
        credential: &Credential,
        ranges: &[StayDates],
    ) -> Result<(), AdapterError>;

    async fn list_reservations(
        &self,
        connection: &PlatformConnection,
        credential: &Credential,
    ) -> Result<Vec<ExternalReservation>, AdapterError>;

    /// Exchange a refresh token for a new access credential.
    async fn refresh_credential(
        &self,
        connection: &PlatformConnection,
        refresh_token: &str,
    ) -> Result<RefreshedCredential, AdapterError>;
}
