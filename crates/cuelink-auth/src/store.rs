//! Persistent storage for pairing records and device tokens
//!
//! Both stores keep their state in memory behind a `tokio::sync::RwLock` and
//! mirror it to a JSON file after every mutation. Conditional updates (link,
//! exchange, rotate) run entirely under one write guard so that racing
//! requests observe each other's effects.

use crate::pairing::{LinkedPairing, PairingPhase, PairingRecord};
use crate::token::DeviceToken;
use cuelink_core::{DeviceId, SessionUser};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of attempting to attach a user to a pairing code
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    /// The code was open and is now attached to the user
    Linked { device_id: DeviceId },
    /// The same user had already confirmed this code; nothing changed
    Relinked { device_id: DeviceId },
    /// A different account confirmed the code first
    OtherAccount,
    /// No record under this code
    NotFound,
    /// The record existed but its window had closed; it has been removed
    Expired,
}

/// Outcome of attempting to consume a pairing code for token issuance
#[derive(Debug)]
pub enum ExchangeTake {
    /// No record under this code
    NotFound,
    /// The record existed but its window had closed; it has been removed
    Expired,
    /// The code belongs to a different device; the record is untouched
    Mismatch,
    /// No user has confirmed the code yet; the record is untouched
    Pending,
    /// The record was linked and has been deleted; the caller owes a token
    Consumed(LinkedPairing),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PairingData {
    /// Open pairing records indexed by code
    records: HashMap<String, PairingRecord>,
}

/// Pairing record storage with file persistence
pub struct PairingStore {
    /// Path to the storage file
    path: PathBuf,
    /// In-memory cache of records
    data: Arc<RwLock<PairingData>>,
}

impl PairingStore {
    /// Create storage at a specific path
    ///
    /// Loads existing data from disk if present.
    pub async fn with_path(path: PathBuf) -> StorageResult<Self> {
        let data = load_or_default(&path, "pairing")?;
        Ok(Self {
            path,
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Save current state to disk
    async fn save(&self) -> StorageResult<()> {
        let data = self.data.read().await;
        let json = serde_json::to_string_pretty(&*data)?;
        std::fs::write(&self.path, json)?;
        debug!("Saved pairing storage to {:?}", self.path);
        Ok(())
    }

    /// Insert a freshly registered record unless its code is already taken
    ///
    /// Returns `false` on a code collision so the caller can generate a new
    /// code and try again. Expired records are pruned first and do not block
    /// their codes.
    pub async fn try_insert(&self, record: PairingRecord) -> StorageResult<bool> {
        {
            let mut data = self.data.write().await;
            data.records.retain(|_, r| !r.is_expired());
            if data.records.contains_key(&record.code) {
                return Ok(false);
            }
            data.records.insert(record.code.clone(), record);
        }
        self.save().await?;
        Ok(true)
    }

    /// Get a record by code
    pub async fn get(&self, code: &str) -> Option<PairingRecord> {
        let data = self.data.read().await;
        data.records.get(code).cloned()
    }

    /// Attach a user to an open pairing code
    ///
    /// The phase transition happens under the write guard, so of two racing
    /// links exactly one observes `Created` and wins.
    pub async fn link(&self, code: &str, user: &SessionUser) -> StorageResult<LinkOutcome> {
        let mut data = self.data.write().await;

        let Some(record) = data.records.get(code) else {
            return Ok(LinkOutcome::NotFound);
        };

        if record.is_expired() {
            data.records.remove(code);
            drop(data);
            self.save().await?;
            return Ok(LinkOutcome::Expired);
        }

        if let PairingPhase::Linked { user_id, .. } = &record.phase {
            if *user_id == user.user_id {
                return Ok(LinkOutcome::Relinked {
                    device_id: record.device_id,
                });
            }
            return Ok(LinkOutcome::OtherAccount);
        }

        let device_id = record.device_id;
        if let Some(record) = data.records.get_mut(code) {
            record.phase = PairingPhase::Linked {
                user_id: user.user_id.clone(),
                user_email: user.email.clone(),
            };
        }
        drop(data);
        self.save().await?;
        Ok(LinkOutcome::Linked { device_id })
    }

    /// Consume a linked record so the caller can issue a token for it
    ///
    /// The record is deleted before this returns; a crash after deletion
    /// leaves the code dead rather than reusable.
    pub async fn take_for_exchange(
        &self,
        code: &str,
        device_id: &DeviceId,
    ) -> StorageResult<ExchangeTake> {
        let mut data = self.data.write().await;

        let Some(record) = data.records.get(code) else {
            return Ok(ExchangeTake::NotFound);
        };

        if record.is_expired() {
            data.records.remove(code);
            drop(data);
            self.save().await?;
            return Ok(ExchangeTake::Expired);
        }

        if record.device_id != *device_id {
            return Ok(ExchangeTake::Mismatch);
        }

        let linked = match &record.phase {
            PairingPhase::Created => return Ok(ExchangeTake::Pending),
            PairingPhase::Linked { user_id, user_email } => LinkedPairing {
                device_id: record.device_id,
                device_name: record.device_name.clone(),
                user_id: user_id.clone(),
                user_email: user_email.clone(),
            },
        };

        data.records.remove(code);
        drop(data);
        self.save().await?;
        Ok(ExchangeTake::Consumed(linked))
    }

    /// Drop expired records, returning how many were removed
    pub async fn sweep_expired(&self) -> StorageResult<usize> {
        let removed = {
            let mut data = self.data.write().await;
            let before = data.records.len();
            data.records.retain(|_, r| !r.is_expired());
            before - data.records.len()
        };
        if removed > 0 {
            self.save().await?;
            info!("Swept {} expired pairing records", removed);
        }
        Ok(removed)
    }

    /// Number of open pairing records
    pub async fn count(&self) -> usize {
        let data = self.data.read().await;
        data.records.len()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TokenData {
    /// Device tokens indexed by token hash
    tokens: HashMap<String, DeviceToken>,
}

/// Device token storage with file persistence
pub struct TokenStore {
    /// Path to the storage file
    path: PathBuf,
    /// In-memory cache of tokens
    data: Arc<RwLock<TokenData>>,
}

impl TokenStore {
    /// Create storage at a specific path
    ///
    /// Loads existing data from disk if present.
    pub async fn with_path(path: PathBuf) -> StorageResult<Self> {
        let data = load_or_default(&path, "token")?;
        Ok(Self {
            path,
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// Save current state to disk
    async fn save(&self) -> StorageResult<()> {
        let data = self.data.read().await;
        let json = serde_json::to_string_pretty(&*data)?;
        std::fs::write(&self.path, json)?;
        debug!("Saved token storage to {:?}", self.path);
        Ok(())
    }

    /// Add a freshly issued token
    pub async fn insert(&self, token: DeviceToken) -> StorageResult<()> {
        {
            let mut data = self.data.write().await;
            data.tokens.insert(token.token_hash.clone(), token);
        }
        self.save().await?;
        Ok(())
    }

    /// Look up a token by hash, touching its `last_used_at`
    ///
    /// Expired rows are removed on the way out and report as absent.
    pub async fn resolve(&self, token_hash: &str) -> StorageResult<Option<DeviceToken>> {
        let mut data = self.data.write().await;

        let expired = match data.tokens.get(token_hash) {
            None => return Ok(None),
            Some(row) => row.is_expired(),
        };

        if expired {
            data.tokens.remove(token_hash);
            drop(data);
            self.save().await?;
            return Ok(None);
        }

        let resolved = data.tokens.get_mut(token_hash).map(|row| {
            row.touch();
            row.clone()
        });
        drop(data);
        self.save().await?;
        Ok(resolved)
    }

    /// Atomically replace a live token with its successor
    ///
    /// The old row is removed and the new one inserted under a single write
    /// guard, so there is no moment where both (or neither, short of a crash)
    /// can authenticate. Returns the successor row, or `None` when the old
    /// token was unknown or expired; either way it is gone.
    pub async fn rotate(
        &self,
        old_hash: &str,
        new_hash: String,
        ttl: chrono::Duration,
    ) -> StorageResult<Option<DeviceToken>> {
        let successor = {
            let mut data = self.data.write().await;
            let Some(old) = data.tokens.remove(old_hash) else {
                return Ok(None);
            };
            if old.is_expired() {
                None
            } else {
                let successor = old.rotated(new_hash, ttl);
                data.tokens
                    .insert(successor.token_hash.clone(), successor.clone());
                Some(successor)
            }
        };
        self.save().await?;
        Ok(successor)
    }

    /// Remove a device's token, scoped to its owning user
    ///
    /// Returns `true` if a row was removed.
    pub async fn revoke(&self, device_id: &DeviceId, user_id: &str) -> StorageResult<bool> {
        let removed = {
            let mut data = self.data.write().await;
            let before = data.tokens.len();
            data.tokens
                .retain(|_, row| row.device_id != *device_id || row.user_id != user_id);
            before != data.tokens.len()
        };
        if removed {
            self.save().await?;
        }
        Ok(removed)
    }

    /// Live tokens owned by a user, oldest first
    pub async fn devices_for_user(&self, user_id: &str) -> Vec<DeviceToken> {
        let data = self.data.read().await;
        let mut rows: Vec<DeviceToken> = data
            .tokens
            .values()
            .filter(|row| row.user_id == user_id && !row.is_expired())
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.issued_at);
        rows
    }

    /// Drop expired rows, returning how many were removed
    pub async fn sweep_expired(&self) -> StorageResult<usize> {
        let removed = {
            let mut data = self.data.write().await;
            let before = data.tokens.len();
            data.tokens.retain(|_, row| !row.is_expired());
            before - data.tokens.len()
        };
        if removed > 0 {
            self.save().await?;
            info!("Swept {} expired device tokens", removed);
        }
        Ok(removed)
    }

    /// Number of stored tokens, including expired rows not yet swept
    pub async fn count(&self) -> usize {
        let data = self.data.read().await;
        data.tokens.len()
    }
}

/// Load a JSON state file, falling back to empty state when absent or unreadable
fn load_or_default<T: Default + for<'de> Deserialize<'de>>(
    path: &Path,
    kind: &str,
) -> StorageResult<T> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if path.exists() {
        let contents = std::fs::read_to_string(path)?;
        match serde_json::from_str(&contents) {
            Ok(data) => {
                info!("Loaded {} storage from {:?}", kind, path);
                Ok(data)
            }
            Err(e) => {
                warn!("Failed to parse {} storage, starting fresh: {}", kind, e);
                Ok(T::default())
            }
        }
    } else {
        debug!("No existing {} storage, creating new", kind);
        Ok(T::default())
    }
}
