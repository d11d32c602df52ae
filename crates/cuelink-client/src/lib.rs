//! CueLink Client - Extension-side pairing and credential handling
//!
//! Everything the browser extension's native side needs to become and stay
//! paired: an HTTP client for the pairing API, the polling state machine that
//! drives the handshake, and on-disk storage for the resulting token.
//!
//! # Pairing from the extension
//!
//! ```no_run
//! use cuelink_client::{ApiClient, CredentialStore, DevicePoller, PairingStatus, PollerConfig};
//! use std::sync::Arc;
//!
//! async fn example() {
//!     let api = ApiClient::new("https://pair.cuelink.example").unwrap();
//!     let store = Arc::new(CredentialStore::new().await.unwrap());
//!     let config = PollerConfig::new()
//!         .with_dashboard_url("https://app.cuelink.example")
//!         .with_device_name("Staff laptop");
//!
//!     let poller = DevicePoller::new(api, store.clone(), config);
//!     let mut status = poller.subscribe();
//!     let cancel = poller.cancel_handle();
//!
//!     // The popup UI watches `status` (and calls `cancel.cancel()` when
//!     // closed); once `Registered` appears it opens the pairing URL in a
//!     // new tab
//!     drop(cancel);
//!     tokio::spawn(async move {
//!         while status.changed().await.is_ok() {
//!             println!("pairing: {:?}", *status.borrow());
//!         }
//!     });
//!
//!     match poller.run().await {
//!         PairingStatus::Authenticated { .. } => {
//!             let token = store.credentials().await.unwrap().token;
//!             println!("paired, token ends in ...{}", &token[token.len() - 4..]);
//!         }
//!         other => println!("pairing did not complete: {:?}", other),
//!     }
//! }
//! ```

pub mod api;
pub mod credentials;
pub mod poller;

pub use api::{pairing_url, ApiClient, ClientError, ClientResult, ExchangeStatus};
pub use credentials::{
    CredentialError, CredentialResult, CredentialStore, DeviceCredentials, PendingPairing,
};
pub use poller::{CancelHandle, DevicePoller, PairingStatus, PollerConfig};
