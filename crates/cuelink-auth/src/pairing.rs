//! Device pairing between the extension and a dashboard account
//!
//! Implements the pairing handshake:
//! 1. The extension registers anonymously and receives a device ID plus a
//!    short pairing code with a five-minute window
//! 2. The extension opens a dashboard tab carrying the code; the signed-in
//!    user confirms it, attaching the code to their account
//! 3. The extension polls the exchange endpoint; once the code is linked,
//!    the exchange consumes it and issues a bearer token
//!
//! Codes are single-use: the exchange deletes the record before the token is
//! persisted, so a crash in between fails closed instead of leaving a
//! replayable code.

use crate::store::{ExchangeTake, LinkOutcome, PairingStore, TokenStore};
use crate::token::{generate_token, hash_token, DeviceToken, IssuedToken, DEFAULT_DEVICE_NAME};
use chrono::{DateTime, Duration, Utc};
use cuelink_core::{DeviceId, SessionUser};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Length of a pairing code
pub const CODE_LENGTH: usize = 6;

/// Characters allowed in pairing codes. Lookalike glyphs (0/O, 1/I/L, U/V)
/// are excluded so the code survives being read off a screen or said aloud.
const CODE_CHARSET: &[u8] = b"23456789ABCDEFGHJKMNPQRSTVWXYZ";

/// How many code collisions to tolerate before giving up
const MAX_CODE_ATTEMPTS: usize = 8;

/// Longest device name accepted at registration
const MAX_DEVICE_NAME_LEN: usize = 64;

/// Pairing errors
#[derive(Debug, Error)]
pub enum PairingError {
    #[error("Pairing code not found")]
    CodeNotFound,
    #[error("Pairing code has expired")]
    CodeExpired,
    #[error("Pairing code was already confirmed by another account")]
    AlreadyLinked,
    #[error("Device does not match this pairing code")]
    DeviceMismatch,
    #[error("Pairing code has not been confirmed yet")]
    NotLinked,
    #[error("Could not allocate a unique pairing code")]
    CodeAllocation,
    #[error("Storage error: {0}")]
    Storage(#[from] crate::store::StorageError),
}

pub type PairingResult<T> = Result<T, PairingError>;

/// Lifecycle phase of a pairing record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum PairingPhase {
    /// Registered by the extension, waiting for a user to confirm the code
    Created,
    /// Confirmed by a signed-in user, waiting for the extension to exchange
    Linked { user_id: String, user_email: String },
}

/// A pairing record awaiting confirmation or exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingRecord {
    /// Device the code was issued to
    pub device_id: DeviceId,
    /// The short pairing code
    pub code: String,
    /// Optional label supplied at registration
    pub device_name: Option<String>,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// When the code stops being usable
    pub expires_at: DateTime<Utc>,
    /// Where the record is in its lifecycle
    pub phase: PairingPhase,
}

impl PairingRecord {
    /// Create a fresh record with a new device ID and code
    pub fn new(device_name: Option<String>, window: Duration) -> Self {
        let now = Utc::now();
        Self {
            device_id: DeviceId::new(),
            code: generate_code(),
            device_name,
            created_at: now,
            expires_at: now + window,
            phase: PairingPhase::Created,
        }
    }

    /// Whether the pairing window has closed
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }
}

/// A confirmed pairing consumed from the store, ready for token issuance
#[derive(Debug, Clone)]
pub struct LinkedPairing {
    pub device_id: DeviceId,
    pub device_name: Option<String>,
    pub user_id: String,
    pub user_email: String,
}

/// What the extension gets back from registration
#[derive(Debug, Clone)]
pub struct RegisteredDevice {
    /// Server-assigned device identifier
    pub device_id: DeviceId,
    /// Code for the user to confirm in the dashboard
    pub code: String,
    /// When the code stops being usable
    pub expires_at: DateTime<Utc>,
}

/// Runs the pairing handshake against the two stores
#[derive(Clone)]
pub struct PairingService {
    /// Open pairing records
    pairings: Arc<PairingStore>,
    /// Issued device tokens
    tokens: Arc<TokenStore>,
    /// How long a pairing code stays valid
    window: Duration,
    /// How long an issued token stays valid
    token_ttl: Duration,
}

impl PairingService {
    /// Create a new pairing service
    pub fn new(
        pairings: Arc<PairingStore>,
        tokens: Arc<TokenStore>,
        window: Duration,
        token_ttl: Duration,
    ) -> Self {
        Self {
            pairings,
            tokens,
            window,
            token_ttl,
        }
    }

    /// Register an anonymous device and hand out a pairing code
    pub async fn register(&self, device_name: Option<String>) -> PairingResult<RegisteredDevice> {
        let device_name = normalize_device_name(device_name);

        for _ in 0..MAX_CODE_ATTEMPTS {
            let record = PairingRecord::new(device_name.clone(), self.window);
            let registered = RegisteredDevice {
                device_id: record.device_id,
                code: record.code.clone(),
                expires_at: record.expires_at,
            };
            if self.pairings.try_insert(record).await? {
                info!("Registered device {} for pairing", registered.device_id);
                return Ok(registered);
            }
        }

        warn!("Exhausted pairing code attempts; store is saturated");
        Err(PairingError::CodeAllocation)
    }

    /// Attach the signed-in user to a pairing code
    ///
    /// Confirming the same code twice from the same account is a no-op
    /// success; a second account gets a conflict.
    pub async fn link(&self, code: &str, user: &SessionUser) -> PairingResult<DeviceId> {
        let code = normalize_code(code);
        match self.pairings.link(&code, user).await? {
            LinkOutcome::Linked { device_id } => {
                info!("User {} linked device {}", user.user_id, device_id);
                Ok(device_id)
            }
            LinkOutcome::Relinked { device_id } => Ok(device_id),
            LinkOutcome::OtherAccount => Err(PairingError::AlreadyLinked),
            LinkOutcome::NotFound => Err(PairingError::CodeNotFound),
            LinkOutcome::Expired => Err(PairingError::CodeExpired),
        }
    }

    /// Redeem a linked code for a device token
    ///
    /// Single-use: the pairing record is deleted before the token is
    /// persisted. An unconfirmed code reports `NotLinked` and stays put so
    /// the extension can poll again.
    pub async fn exchange(&self, device_id: &str, code: &str) -> PairingResult<IssuedToken> {
        let device_id =
            DeviceId::parse(device_id).map_err(|_| PairingError::DeviceMismatch)?;
        let code = normalize_code(code);

        match self.pairings.take_for_exchange(&code, &device_id).await? {
            ExchangeTake::NotFound | ExchangeTake::Expired => Err(PairingError::CodeNotFound),
            ExchangeTake::Mismatch => {
                warn!("Exchange device mismatch for device {}", device_id);
                Err(PairingError::DeviceMismatch)
            }
            ExchangeTake::Pending => Err(PairingError::NotLinked),
            ExchangeTake::Consumed(linked) => {
                let token = generate_token();
                let row = DeviceToken::new(
                    hash_token(&token),
                    linked.device_id,
                    linked.user_id,
                    linked.user_email,
                    linked
                        .device_name
                        .unwrap_or_else(|| DEFAULT_DEVICE_NAME.to_string()),
                    self.token_ttl,
                );
                let expires_at = row.expires_at;

                // The pairing record is already gone. If this write fails the
                // code cannot be replayed; the extension starts pairing over.
                self.tokens.insert(row).await?;

                info!("Issued device token for device {}", linked.device_id);
                Ok(IssuedToken { token, expires_at })
            }
        }
    }

    /// Drop expired pairing records
    pub async fn sweep_expired(&self) -> PairingResult<usize> {
        Ok(self.pairings.sweep_expired().await?)
    }
}

/// Generate a random pairing code
fn generate_code() -> String {
    use rand::Rng;
    let mut rng = rand::rngs::OsRng;
    (0..CODE_LENGTH)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// Uppercase and trim a user-supplied code
fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Trim, bound, and blank-check a user-supplied device name
fn normalize_device_name(name: Option<String>) -> Option<String> {
    let name = name?;
    let trimmed: String = name.trim().chars().take(MAX_DEVICE_NAME_LEN).collect();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::TokenService;
    use tempfile::{tempdir, TempDir};

    async fn create_test_services() -> (PairingService, TokenService, TempDir) {
        let dir = tempdir().unwrap();
        let pairings = Arc::new(
            PairingStore::with_path(dir.path().join("pairings.json"))
                .await
                .unwrap(),
        );
        let tokens = Arc::new(
            TokenStore::with_path(dir.path().join("tokens.json"))
                .await
                .unwrap(),
        );
        let pairing = PairingService::new(
            pairings,
            tokens.clone(),
            Duration::seconds(60),
            Duration::hours(1),
        );
        let token = TokenService::new(tokens, Duration::hours(1));
        (pairing, token, dir)
    }

    fn test_user() -> SessionUser {
        SessionUser {
            user_id: "user-1".to_string(),
            email: "presenter@school.example".to_string(),
        }
    }

    #[tokio::test]
    async fn test_full_pairing_flow() {
        let (pairing, token, _dir) = create_test_services().await;

        let registered = pairing
            .register(Some("Staff laptop".to_string()))
            .await
            .unwrap();
        assert_eq!(registered.code.len(), CODE_LENGTH);
        assert!(registered.expires_at > Utc::now());

        let linked = pairing.link(&registered.code, &test_user()).await.unwrap();
        assert_eq!(linked, registered.device_id);

        let issued = pairing
            .exchange(&registered.device_id.to_string(), &registered.code)
            .await
            .unwrap();
        assert!(!issued.token.is_empty());

        let identity = token.resolve(&issued.token).await.unwrap();
        assert_eq!(identity.device_id, registered.device_id);
        assert_eq!(identity.user_id, "user-1");
        assert_eq!(identity.email, "presenter@school.example");
    }

    #[tokio::test]
    async fn test_exchange_before_link_reports_pending() {
        let (pairing, _token, _dir) = create_test_services().await;

        let registered = pairing.register(None).await.unwrap();
        let result = pairing
            .exchange(&registered.device_id.to_string(), &registered.code)
            .await;
        assert!(matches!(result, Err(PairingError::NotLinked)));

        // The record survives; linking afterwards still works
        pairing.link(&registered.code, &test_user()).await.unwrap();
        pairing
            .exchange(&registered.device_id.to_string(), &registered.code)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_exchange_is_single_use() {
        let (pairing, _token, _dir) = create_test_services().await;

        let registered = pairing.register(None).await.unwrap();
        pairing.link(&registered.code, &test_user()).await.unwrap();

        pairing
            .exchange(&registered.device_id.to_string(), &registered.code)
            .await
            .unwrap();

        let replay = pairing
            .exchange(&registered.device_id.to_string(), &registered.code)
            .await;
        assert!(matches!(replay, Err(PairingError::CodeNotFound)));
    }

    #[tokio::test]
    async fn test_exchange_rejects_wrong_device() {
        let (pairing, _token, _dir) = create_test_services().await;

        let registered = pairing.register(None).await.unwrap();
        pairing.link(&registered.code, &test_user()).await.unwrap();

        let intruder = DeviceId::new();
        let result = pairing
            .exchange(&intruder.to_string(), &registered.code)
            .await;
        assert!(matches!(result, Err(PairingError::DeviceMismatch)));

        // A mismatch does not burn the code for the real device
        pairing
            .exchange(&registered.device_id.to_string(), &registered.code)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_exchange_rejects_malformed_device_id() {
        let (pairing, _token, _dir) = create_test_services().await;

        let registered = pairing.register(None).await.unwrap();
        let result = pairing.exchange("not-a-uuid", &registered.code).await;
        assert!(matches!(result, Err(PairingError::DeviceMismatch)));
    }

    #[tokio::test]
    async fn test_link_unknown_code() {
        let (pairing, _token, _dir) = create_test_services().await;

        let result = pairing.link("ZZZZZZ", &test_user()).await;
        assert!(matches!(result, Err(PairingError::CodeNotFound)));
    }

    #[tokio::test]
    async fn test_link_expired_code() {
        let dir = tempdir().unwrap();
        let pairings = Arc::new(
            PairingStore::with_path(dir.path().join("pairings.json"))
                .await
                .unwrap(),
        );
        let tokens = Arc::new(
            TokenStore::with_path(dir.path().join("tokens.json"))
                .await
                .unwrap(),
        );
        let pairing = PairingService::new(
            pairings.clone(),
            tokens,
            Duration::milliseconds(1),
            Duration::hours(1),
        );

        let registered = pairing.register(None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let result = pairing.link(&registered.code, &test_user()).await;
        assert!(matches!(result, Err(PairingError::CodeExpired)));

        // Touching an expired record removes it
        assert_eq!(pairings.count().await, 0);
    }

    #[tokio::test]
    async fn test_relink_same_user_is_idempotent() {
        let (pairing, _token, _dir) = create_test_services().await;

        let registered = pairing.register(None).await.unwrap();
        let first = pairing.link(&registered.code, &test_user()).await.unwrap();
        let second = pairing.link(&registered.code, &test_user()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_link_conflict_for_second_account() {
        let (pairing, _token, _dir) = create_test_services().await;

        let registered = pairing.register(None).await.unwrap();
        pairing.link(&registered.code, &test_user()).await.unwrap();

        let other = SessionUser {
            user_id: "user-2".to_string(),
            email: "other@school.example".to_string(),
        };
        let result = pairing.link(&registered.code, &other).await;
        assert!(matches!(result, Err(PairingError::AlreadyLinked)));

        // The original link is untouched; the exchange still succeeds for user-1
        let issued = pairing
            .exchange(&registered.device_id.to_string(), &registered.code)
            .await
            .unwrap();
        assert!(!issued.token.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_link_has_single_winner() {
        let (pairing, _token, _dir) = create_test_services().await;

        let registered = pairing.register(None).await.unwrap();

        let users: Vec<SessionUser> = (0..4)
            .map(|i| SessionUser {
                user_id: format!("user-{}", i),
                email: format!("user-{}@school.example", i),
            })
            .collect();

        let mut handles = Vec::new();
        for user in users {
            let pairing = pairing.clone();
            let code = registered.code.clone();
            handles.push(tokio::spawn(
                async move { pairing.link(&code, &user).await },
            ));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(PairingError::AlreadyLinked) => conflicts += 1,
                Err(e) => panic!("unexpected link error: {}", e),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 3);
    }

    #[tokio::test]
    async fn test_pairing_survives_restart() {
        let dir = tempdir().unwrap();
        let pairings_path = dir.path().join("pairings.json");
        let tokens_path = dir.path().join("tokens.json");

        let registered = {
            let pairings = Arc::new(PairingStore::with_path(pairings_path.clone()).await.unwrap());
            let tokens = Arc::new(TokenStore::with_path(tokens_path.clone()).await.unwrap());
            let pairing = PairingService::new(
                pairings,
                tokens,
                Duration::seconds(60),
                Duration::hours(1),
            );
            let registered = pairing.register(None).await.unwrap();
            pairing.link(&registered.code, &test_user()).await.unwrap();
            registered
        };

        // Reload both stores from disk
        let pairings = Arc::new(PairingStore::with_path(pairings_path).await.unwrap());
        let tokens = Arc::new(TokenStore::with_path(tokens_path).await.unwrap());
        let pairing = PairingService::new(
            pairings,
            tokens.clone(),
            Duration::seconds(60),
            Duration::hours(1),
        );
        let token = TokenService::new(tokens, Duration::hours(1));

        let issued = pairing
            .exchange(&registered.device_id.to_string(), &registered.code)
            .await
            .unwrap();
        let identity = token.resolve(&issued.token).await.unwrap();
        assert_eq!(identity.device_id, registered.device_id);
    }

    #[tokio::test]
    async fn test_codes_are_unique_and_well_formed() {
        let (pairing, _token, _dir) = create_test_services().await;

        let mut codes = std::collections::HashSet::new();
        for _ in 0..50 {
            let registered = pairing.register(None).await.unwrap();
            assert_eq!(registered.code.len(), CODE_LENGTH);
            assert!(registered
                .code
                .bytes()
                .all(|b| CODE_CHARSET.contains(&b)));
            assert!(codes.insert(registered.code));
        }
    }

    #[tokio::test]
    async fn test_code_input_is_normalized() {
        let (pairing, _token, _dir) = create_test_services().await;

        let registered = pairing.register(None).await.unwrap();
        let sloppy = format!("  {}  ", registered.code.to_ascii_lowercase());
        pairing.link(&sloppy, &test_user()).await.unwrap();
    }

    #[tokio::test]
    async fn test_device_name_is_bounded() {
        let (pairing, token, _dir) = create_test_services().await;

        let long_name = "x".repeat(500);
        let registered = pairing.register(Some(long_name)).await.unwrap();
        pairing.link(&registered.code, &test_user()).await.unwrap();
        pairing
            .exchange(&registered.device_id.to_string(), &registered.code)
            .await
            .unwrap();

        let devices = token.devices_for_user("user-1").await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_name.len(), MAX_DEVICE_NAME_LEN);

        // A blank name falls back to the default label
        assert_eq!(normalize_device_name(Some("   ".to_string())), None);
    }
}
