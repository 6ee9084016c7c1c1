//! Marketplace credentials at rest and their refresh.
//!
//! Sealed format: base64(nonce[12] || AES-256-GCM ciphertext of the JSON credential).

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use innkeep_core::platform::{AdapterError, Credential, PlatformAdapter, PlatformConnection};
use innkeep_core::repository::ConnectionRegistry;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential key must be 32 bytes of base64")]
    InvalidKey,
    #[error("sealed credential is malformed: {0}")]
    Malformed(String),
    #[error("credential could not be decrypted")]
    Decrypt,
    #[error("credential could not be encrypted")]
    Encrypt,
}

pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    pub fn new(key: &[u8]) -> Result<Self, CredentialError> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CredentialError::InvalidKey)?;
        Ok(Self { cipher })
    }

    pub fn from_base64(key: &str) -> Result<Self, CredentialError> {
        let bytes = STANDARD.decode(key.trim()).map_err(|_| CredentialError::InvalidKey)?;
        if bytes.len() != 32 {
            return Err(CredentialError::InvalidKey);
        }
        Self::new(&bytes)
    }

    pub fn seal(&self, credential: &Credential) -> Result<String, CredentialError> {
        let plaintext = serde_json::to_vec(credential).map_err(|e| CredentialError::Malformed(e.to_string()))?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| CredentialError::Encrypt)?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(sealed))
    }

    pub fn open(&self, sealed: &str) -> Result<Credential, CredentialError> {
        let bytes = STANDARD
            .decode(sealed)
            .map_err(|e| CredentialError::Malformed(e.to_string()))?;
        if bytes.len() <= NONCE_LEN {
            return Err(CredentialError::Malformed("too short".to_string()));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CredentialError::Decrypt)?;
        serde_json::from_slice(&plaintext).map_err(|e| CredentialError::Malformed(e.to_string()))
    }
}

/// Hands adapters a usable credential, refreshing it first when it is about to expire.
pub struct CredentialManager {
    vault: Arc<CredentialVault>,
    connections: Arc<dyn ConnectionRegistry>,
    refresh_window: Duration,
}

impl CredentialManager {
    pub fn new(
        vault: Arc<CredentialVault>,
        connections: Arc<dyn ConnectionRegistry>,
        refresh_window_seconds: u64,
    ) -> Self {
        Self {
            vault,
            connections,
            refresh_window: Duration::seconds(i64::try_from(refresh_window_seconds).unwrap_or(0)),
        }
    }

    pub fn vault(&self) -> &CredentialVault {
        &self.vault
    }

    pub async fn authorize(
        &self,
        connection: &PlatformConnection,
        adapter: &dyn PlatformAdapter,
        now: DateTime<Utc>,
    ) -> Result<Credential, AdapterError> {
        let current = self.vault.open(&connection.sealed_credential).map_err(|e| {
            error!("Connection {} credential unreadable: {}", connection.id, e);
            AdapterError::Terminal("stored credential cannot be read".to_string())
        })?;

        let Some(expires_at) = connection.credential_expires_at else {
            return Ok(current);
        };
        if expires_at - now > self.refresh_window {
            return Ok(current);
        }
        let expired = expires_at <= now;

        let Some(refresh_token) = current.refresh_token.as_ref() else {
            if expired {
                return Err(AdapterError::Terminal(
                    "credential expired and no refresh token is stored".to_string(),
                ));
            }
            debug!("Connection {} credential near expiry, nothing to refresh with", connection.id);
            return Ok(current);
        };

        match adapter.refresh_credential(connection, refresh_token.expose()).await {
            Ok(refreshed) => {
                info!("Refreshed {} credential for connection {}", connection.platform, connection.id);
                let mut credential = refreshed.credential;
                // Some platforms only rotate the access token.
                if credential.refresh_token.is_none() {
                    credential.refresh_token = current.refresh_token.clone();
                }
                self.persist(connection, &credential, refreshed.expires_at).await;
                Ok(credential)
            }
            Err(AdapterError::Transient(msg)) if !expired => {
                warn!(
                    "Credential refresh for connection {} failed, using current credential: {}",
                    connection.id, msg
                );
                Ok(current)
            }
            Err(e) => Err(e),
        }
    }

    async fn persist(&self, connection: &PlatformConnection, credential: &Credential, expires_at: Option<DateTime<Utc>>) {
        let sealed = match self.vault.seal(credential) {
            Ok(sealed) => sealed,
            Err(e) => {
                error!("Could not seal refreshed credential for {}: {}", connection.id, e);
                return;
            }
        };
        if let Err(e) = self.connections.update_credential(connection.id, &sealed, expires_at).await {
            error!("Could not store refreshed credential for {}: {}", connection.id, e);
        }
    }
}
