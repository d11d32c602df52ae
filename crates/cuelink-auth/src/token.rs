//! Device token issuance, rotation, and validation
//!
//! The raw bearer token is returned to the extension exactly once, at
//! issuance; the server keeps only its SHA-256 hash. Rotation is a move, not
//! a copy: the old row is deleted in the same operation that inserts its
//! successor, so a stale token never works alongside a fresh one.

use crate::store::{StorageError, TokenStore};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Duration, Utc};
use cuelink_core::{DeviceId, DeviceIdentity};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Device name recorded when the extension does not supply one
pub const DEFAULT_DEVICE_NAME: &str = "Browser extension";

/// Token errors
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid or expired device token")]
    InvalidToken,
    #[error("Device not found: {0}")]
    UnknownDevice(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type TokenResult<T> = Result<T, TokenError>;

/// A persisted device token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceToken {
    /// SHA-256 hash of the bearer token, base64-encoded
    pub token_hash: String,
    /// Device the token was issued to
    pub device_id: DeviceId,
    /// Owning user
    pub user_id: String,
    /// Owning user's email
    pub user_email: String,
    /// Label shown in the dashboard's device list
    pub device_name: String,
    /// When this token was issued
    pub issued_at: DateTime<Utc>,
    /// When this token stops being accepted
    pub expires_at: DateTime<Utc>,
    /// Last time the token authenticated a request
    pub last_used_at: DateTime<Utc>,
}

impl DeviceToken {
    /// Create a new token row
    pub fn new(
        token_hash: String,
        device_id: DeviceId,
        user_id: String,
        user_email: String,
        device_name: String,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            token_hash,
            device_id,
            user_id,
            user_email,
            device_name,
            issued_at: now,
            expires_at: now + ttl,
            last_used_at: now,
        }
    }

    /// Whether the token has outlived its lifetime
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Record that the token just authenticated a request
    pub fn touch(&mut self) {
        self.last_used_at = Utc::now();
    }

    /// Successor row for rotation, keeping the device and owner
    pub fn rotated(&self, token_hash: String, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            token_hash,
            device_id: self.device_id,
            user_id: self.user_id.clone(),
            user_email: self.user_email.clone(),
            device_name: self.device_name.clone(),
            issued_at: now,
            expires_at: now + ttl,
            last_used_at: now,
        }
    }

    /// The identity this token proves
    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity {
            device_id: self.device_id,
            user_id: self.user_id.clone(),
            email: self.user_email.clone(),
        }
    }
}

/// A freshly minted bearer token with its expiry
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Raw bearer token; this is the only time the caller sees it
    pub token: String,
    /// When the token stops being accepted
    pub expires_at: DateTime<Utc>,
}

/// Validates, rotates, and revokes device tokens
#[derive(Clone)]
pub struct TokenService {
    /// Issued device tokens
    store: Arc<TokenStore>,
    /// Lifetime granted to new and rotated tokens
    ttl: Duration,
}

impl TokenService {
    /// Create a new token service
    pub fn new(store: Arc<TokenStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Resolve a presented bearer token to the device identity it proves
    ///
    /// Touches `last_used_at` on success. Expired rows are removed lazily
    /// and report as invalid.
    pub async fn resolve(&self, token: &str) -> TokenResult<DeviceIdentity> {
        let row = self
            .store
            .resolve(&hash_token(token))
            .await?
            .ok_or(TokenError::InvalidToken)?;
        Ok(row.identity())
    }

    /// Replace a live token with a fresh one
    ///
    /// The presented token stops working the moment the swap commits; of two
    /// racing rotations with the same token, exactly one wins.
    pub async fn rotate(&self, token: &str) -> TokenResult<IssuedToken> {
        let new_token = generate_token();
        let row = self
            .store
            .rotate(&hash_token(token), hash_token(&new_token), self.ttl)
            .await?;

        match row {
            Some(row) => {
                info!("Rotated device token for device {}", row.device_id);
                Ok(IssuedToken {
                    token: new_token,
                    expires_at: row.expires_at,
                })
            }
            None => {
                warn!("Rotation attempted with an invalid or expired token");
                Err(TokenError::InvalidToken)
            }
        }
    }

    /// Remove the token for one of the user's devices
    pub async fn revoke(&self, device_id: &str, user_id: &str) -> TokenResult<()> {
        let id = DeviceId::parse(device_id)
            .map_err(|_| TokenError::UnknownDevice(device_id.to_string()))?;
        if self.store.revoke(&id, user_id).await? {
            info!("Revoked device {}", device_id);
            Ok(())
        } else {
            Err(TokenError::UnknownDevice(device_id.to_string()))
        }
    }

    /// Live tokens owned by a user, for the dashboard device list
    pub async fn devices_for_user(&self, user_id: &str) -> Vec<DeviceToken> {
        self.store.devices_for_user(user_id).await
    }

    /// Drop expired token rows
    pub async fn sweep_expired(&self) -> TokenResult<usize> {
        Ok(self.store.sweep_expired().await?)
    }
}

/// Generate a secure random bearer token
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    BASE64.encode(bytes)
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    BASE64.encode(result)
}
