//! Local credential persistence for the extension
//!
//! One JSON file holds whatever the extension currently owns: a pairing still
//! waiting on the user, a device token, or nothing. The file sits in the user
//! config directory and is written with owner-only permissions, since the
//! token inside it is a live bearer credential.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Credential storage errors
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Configuration directory not found")]
    NoConfigDir,
}

pub type CredentialResult<T> = Result<T, CredentialError>;

/// A registration the user has not confirmed yet
///
/// Kept on disk so a reopened popup resumes polling the same code instead of
/// registering again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingPairing {
    /// Device identifier echoed back at exchange
    pub device_id: String,
    /// Pairing code the user confirms in the dashboard
    pub code: String,
    /// When the code stops being usable
    pub expires_at: DateTime<Utc>,
}

impl PendingPairing {
    /// Whether the pairing window has closed
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// A device token the extension authenticates with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCredentials {
    /// Raw bearer token
    pub token: String,
    /// When the token stops being accepted
    pub expires_at: DateTime<Utc>,
}

impl DeviceCredentials {
    /// Whether the token has outlived its lifetime
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Whether the token expires within `margin` from now
    ///
    /// The extension rotates when this turns true rather than waiting for a
    /// 401 in the middle of a request.
    pub fn expires_within(&self, margin: Duration) -> bool {
        Utc::now() + margin >= self.expires_at
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CredentialData {
    /// Registration waiting on user confirmation, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending: Option<PendingPairing>,
    /// Issued device token, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credentials: Option<DeviceCredentials>,
}

/// File-backed store for the extension's pairing state and device token
pub struct CredentialStore {
    /// Path to the storage file
    path: PathBuf,
    /// In-memory cache of the file contents
    data: Arc<RwLock<CredentialData>>,
}

impl CredentialStore {
    /// Open the store at the default location
    pub async fn new() -> CredentialResult<Self> {
        Self::with_path(Self::default_path()?).await
    }

    /// Open the store at a specific path
    ///
    /// Loads existing data from disk if present.
    pub async fn with_path(path: PathBuf) -> CredentialResult<Self> {
        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            match serde_json::from_str(&contents) {
                Ok(data) => {
                    info!("Loaded credentials from {:?}", path);
                    data
                }
                Err(e) => {
                    warn!("Failed to parse credential file, starting fresh: {}", e);
                    CredentialData::default()
                }
            }
        } else {
            debug!("No existing credential file, creating new");
            CredentialData::default()
        };

        Ok(Self {
            path,
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Default storage path (~/.config/cuelink/credentials.json)
    fn default_path() -> CredentialResult<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(CredentialError::NoConfigDir)?;
        Ok(config_dir.join("cuelink").join("credentials.json"))
    }

    /// Save current state to disk with owner-only permissions
    async fn save(&self) -> CredentialResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = self.data.read().await;
        let json = serde_json::to_string_pretty(&*data)?;
        std::fs::write(&self.path, json)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        debug!("Saved credentials to {:?}", self.path);
        Ok(())
    }

    /// The registration currently waiting on user confirmation, if any
    pub async fn pending(&self) -> Option<PendingPairing> {
        let data = self.data.read().await;
        data.pending.clone()
    }

    /// Record a registration so a reopened popup can resume polling it
    pub async fn save_pending(&self, pending: PendingPairing) -> CredentialResult<()> {
        {
            let mut data = self.data.write().await;
            data.pending = Some(pending);
        }
        self.save().await
    }

    /// Drop the pending registration without touching any stored token
    pub async fn clear_pending(&self) -> CredentialResult<()> {
        {
            let mut data = self.data.write().await;
            data.pending = None;
        }
        self.save().await
    }

    /// The device token the extension holds, if any
    pub async fn credentials(&self) -> Option<DeviceCredentials> {
        let data = self.data.read().await;
        data.credentials.clone()
    }

    /// Store a freshly issued token, retiring any pending registration
    ///
    /// Issuance consumes the pairing code server-side, so the pending record
    /// is dropped in the same write.
    pub async fn save_credentials(&self, credentials: DeviceCredentials) -> CredentialResult<()> {
        {
            let mut data = self.data.write().await;
            data.credentials = Some(credentials);
            data.pending = None;
        }
        self.save().await
    }

    /// Forget everything; the extension returns to its signed-out state
    pub async fn clear(&self) -> CredentialResult<()> {
        {
            let mut data = self.data.write().await;
            *data = CredentialData::default();
        }
        self.save().await
    }
}
