//! Pairing loop the extension runs to obtain its first device token
//!
//! Drives the handshake end to end: register, hand the user a dashboard URL
//! carrying the code, then poll the exchange endpoint until the user confirms
//! or the window closes. Progress is published on a `watch` channel so the
//! popup UI can render each state; a [`CancelHandle`] stops the loop promptly
//! when the user closes it.
//!
//! Polls never overlap: each exchange attempt is awaited before the next one
//! is issued. A network blip costs one tick, not the whole attempt.

use crate::api::{pairing_url, ApiClient, ClientError, ExchangeStatus};
use crate::credentials::{CredentialStore, DeviceCredentials, PendingPairing};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Poller settings
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Dashboard base URL; the pairing page lives under it
    pub dashboard_url: String,
    /// Label sent at registration, shown in the dashboard's device list
    pub device_name: Option<String>,
    /// Delay between exchange attempts
    pub poll_interval: Duration,
    /// Longest the poller waits before giving up
    ///
    /// The server's pairing window caps this: polling a code the server has
    /// already expired is wasted work.
    pub max_wait: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            dashboard_url: "http://localhost:3000".to_string(),
            device_name: None,
            poll_interval: Duration::from_millis(2500),
            max_wait: Duration::from_secs(300),
        }
    }
}

impl PollerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set the dashboard base URL
    pub fn with_dashboard_url(mut self, url: impl Into<String>) -> Self {
        self.dashboard_url = url.into();
        self
    }

    /// Builder pattern: set the device label
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    /// Builder pattern: set the delay between exchange attempts
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder pattern: set the overall wait bound
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

/// Where the pairing attempt currently stands
///
/// The popup renders these directly: `Polling` is "waiting for you to sign
/// in", `Errored` is "something went wrong, please retry", `TimedOut` is its
/// own message so the user knows nothing is broken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingStatus {
    /// No pairing attempt underway
    Idle,
    /// Registered with the server; the pairing page should be opened now
    Registered {
        code: String,
        pairing_url: String,
        expires_at: DateTime<Utc>,
    },
    /// Polling the exchange endpoint until the user confirms the code
    Polling {
        code: String,
        pairing_url: String,
        expires_at: DateTime<Utc>,
    },
    /// The exchange succeeded; the token is in the credential store
    Authenticated { expires_at: DateTime<Utc> },
    /// The wait bound elapsed without a confirmation
    TimedOut,
    /// A terminal failure; the user must start pairing over
    Errored { reason: String },
    /// Stopped by a [`CancelHandle`] before reaching any other terminal state
    Cancelled,
}

impl PairingStatus {
    /// Whether the pairing attempt has finished, one way or another
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PairingStatus::Authenticated { .. }
                | PairingStatus::TimedOut
                | PairingStatus::Errored { .. }
                | PairingStatus::Cancelled
        )
    }
}

/// Stops a running [`DevicePoller`]
///
/// Cloneable so the UI can hang it off several buttons. Cancelling twice is
/// harmless.
#[derive(Clone)]
pub struct CancelHandle {
    tx: broadcast::Sender<()>,
}

impl CancelHandle {
    /// Stop the poller; no further requests are made after this
    pub fn cancel(&self) {
        let _ = self.tx.send(());
    }
}

/// Runs the pairing handshake against a CueLink server
pub struct DevicePoller {
    api: ApiClient,
    store: Arc<CredentialStore>,
    config: PollerConfig,
    status: watch::Sender<PairingStatus>,
    cancel_tx: broadcast::Sender<()>,
    cancel_rx: broadcast::Receiver<()>,
}

impl DevicePoller {
    /// Create a poller; nothing happens until [`run`](Self::run) is called
    pub fn new(api: ApiClient, store: Arc<CredentialStore>, config: PollerConfig) -> Self {
        let (status, _) = watch::channel(PairingStatus::Idle);
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        Self {
            api,
            store,
            config,
            status,
            cancel_tx,
            cancel_rx,
        }
    }

    /// Watch the pairing attempt progress
    pub fn subscribe(&self) -> watch::Receiver<PairingStatus> {
        self.status.subscribe()
    }

    /// Handle that stops the poller from another task
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Run the handshake to a terminal status
    ///
    /// Resumes a locally persisted registration when its window is still
    /// open; otherwise registers fresh. The returned status is also the last
    /// value published on the watch channel.
    pub async fn run(self) -> PairingStatus {
        let Self {
            api,
            store,
            config,
            status,
            cancel_tx: _cancel_tx,
            cancel_rx: mut cancel,
        } = self;

        let outcome = tokio::select! {
            outcome = pair(&api, &store, &config, &status) => outcome,
            _ = cancel.recv() => {
                debug!("Pairing cancelled");
                PairingStatus::Cancelled
            }
        };

        status.send_replace(outcome.clone());
        outcome
    }
}

/// The handshake itself, cancellation handled by the caller's select
async fn pair(
    api: &ApiClient,
    store: &CredentialStore,
    config: &PollerConfig,
    status: &watch::Sender<PairingStatus>,
) -> PairingStatus {
    let pending = match store.pending().await {
        Some(pending) if !pending.is_expired() => {
            info!("Resuming pairing with code {}", pending.code);
            pending
        }
        _ => {
            let registered = match api.register(config.device_name.clone()).await {
                Ok(registered) => registered,
                Err(e) => {
                    error!("Device registration failed: {}", e);
                    return PairingStatus::Errored {
                        reason: "could not reach the pairing server".to_string(),
                    };
                }
            };
            let pending = PendingPairing {
                device_id: registered.device_id,
                code: registered.code,
                expires_at: registered.expires_at,
            };
            // Persisting lets a reopened popup resume this code; losing the
            // write only costs that nicety
            if let Err(e) = store.save_pending(pending.clone()).await {
                warn!("Could not persist pending pairing: {}", e);
            }
            info!("Registered for pairing with code {}", pending.code);
            pending
        }
    };

    let url = pairing_url(&config.dashboard_url, &pending.code);
    status.send_replace(PairingStatus::Registered {
        code: pending.code.clone(),
        pairing_url: url.clone(),
        expires_at: pending.expires_at,
    });

    // Polling past the server-side window is pointless, so the deadline is
    // whichever bound closes first
    let until_server_expiry = (pending.expires_at - Utc::now())
        .to_std()
        .unwrap_or(Duration::ZERO);
    let deadline = Instant::now() + config.max_wait.min(until_server_expiry);

    status.send_replace(PairingStatus::Polling {
        code: pending.code.clone(),
        pairing_url: url,
        expires_at: pending.expires_at,
    });

    loop {
        if Instant::now() >= deadline {
            info!("Pairing timed out waiting for confirmation");
            return PairingStatus::TimedOut;
        }

        tokio::time::sleep(config.poll_interval).await;

        match api.exchange(&pending.device_id, &pending.code).await {
            Ok(ExchangeStatus::Issued(issued)) => {
                let credentials = DeviceCredentials {
                    token: issued.token,
                    expires_at: issued.expires_at,
                };
                // The raw token exists only here until this write lands
                if let Err(e) = store.save_credentials(credentials).await {
                    error!("Failed to persist device token: {}", e);
                    return PairingStatus::Errored {
                        reason: "could not save the device token".to_string(),
                    };
                }
                info!("Device paired; token expires at {}", issued.expires_at);
                return PairingStatus::Authenticated {
                    expires_at: issued.expires_at,
                };
            }
            Ok(ExchangeStatus::Pending) => {
                debug!("Pairing code not confirmed yet");
            }
            Ok(ExchangeStatus::NotFound) => {
                warn!("Pairing code no longer exists");
                forget_pending(store).await;
                return PairingStatus::Errored {
                    reason: "pairing code expired or was not found".to_string(),
                };
            }
            Ok(ExchangeStatus::Mismatch) => {
                warn!("Pairing code belongs to a different device");
                forget_pending(store).await;
                return PairingStatus::Errored {
                    reason: "pairing code belongs to a different device".to_string(),
                };
            }
            Err(ClientError::Transport(e)) => {
                warn!("Exchange attempt failed, will retry: {}", e);
            }
            Err(ClientError::Api {
                status, message, ..
            }) if status.is_server_error() => {
                warn!("Server error during exchange, will retry: {}", message);
            }
            Err(e) => {
                error!("Exchange failed: {}", e);
                return PairingStatus::Errored {
                    reason: e.to_string(),
                };
            }
        }
    }
}

/// A dead code must not be resumed by the next popup
async fn forget_pending(store: &CredentialStore) {
    if let Err(e) = store.clear_pending().await {
        warn!("Could not clear pending pairing: {}", e);
    }
}
