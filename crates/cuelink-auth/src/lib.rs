//! CueLink Auth - Device pairing and token exchange
//!
//! Pairs a browser extension with a dashboard account and manages the device
//! tokens that come out of that handshake.
//!
//! # Pairing Flow
//!
//! 1. The extension calls `PairingService::register()` and receives a device
//!    ID plus a short pairing code
//! 2. The extension opens a dashboard tab carrying the code; the signed-in
//!    user confirms it via `PairingService::link()`
//! 3. The extension polls `PairingService::exchange()`; once the code is
//!    linked the exchange consumes it and returns a bearer token
//! 4. The extension authenticates with the token and rotates it through
//!    `TokenService::rotate()` before it expires
//!
//! # Example
//!
//! ```no_run
//! use cuelink_auth::{PairingService, PairingStore, TokenService, TokenStore};
//! use cuelink_core::SessionUser;
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let pairings = Arc::new(PairingStore::with_path("pairings.json".into()).await.unwrap());
//!     let tokens = Arc::new(TokenStore::with_path("tokens.json".into()).await.unwrap());
//!     let pairing = PairingService::new(
//!         pairings,
//!         tokens.clone(),
//!         chrono::Duration::minutes(5),
//!         chrono::Duration::hours(24),
//!     );
//!
//!     // Extension side: register and show the code to the user
//!     let registered = pairing.register(Some("Staff laptop".to_string())).await.unwrap();
//!     println!("Confirm code {} in the dashboard", registered.code);
//!
//!     // Dashboard side: the signed-in user confirms the code
//!     let user = SessionUser {
//!         user_id: "user-1".to_string(),
//!         email: "presenter@school.example".to_string(),
//!     };
//!     pairing.link(&registered.code, &user).await.unwrap();
//!
//!     // Extension side: redeem the code for a bearer token
//!     let issued = pairing
//!         .exchange(&registered.device_id.to_string(), &registered.code)
//!         .await
//!         .unwrap();
//!     println!("Token expires at {}", issued.expires_at);
//! }
//! ```

pub mod pairing;
pub mod session;
pub mod store;
pub mod token;

pub use pairing::{
    PairingError, PairingPhase, PairingRecord, PairingResult, PairingService, RegisteredDevice,
    CODE_LENGTH,
};
pub use session::{JwtSessionVerifier, SessionVerifier, StaticSessionVerifier};
pub use store::{PairingStore, StorageError, StorageResult, TokenStore};
pub use token::{
    hash_token, DeviceToken, IssuedToken, TokenError, TokenResult, TokenService,
    DEFAULT_DEVICE_NAME,
};
