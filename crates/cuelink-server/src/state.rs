//! Shared application state

use crate::ratelimit::RateLimiter;
use cuelink_auth::{PairingService, SessionVerifier, TokenService};
use cuelink_core::Config;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state
pub struct AppState {
    /// Configuration
    pub config: Config,
    /// Pairing handshake (register / link / exchange)
    pub pairing: PairingService,
    /// Device token lifecycle (resolve / rotate / revoke)
    pub tokens: TokenService,
    /// Verifies dashboard session credentials
    pub verifier: Arc<dyn SessionVerifier>,
    /// Limits anonymous device registrations per client
    pub register_limiter: RateLimiter,
}

impl AppState {
    /// Create a new application state
    pub fn new(
        config: Config,
        pairing: PairingService,
        tokens: TokenService,
        verifier: Arc<dyn SessionVerifier>,
    ) -> Self {
        let register_limiter =
            RateLimiter::new(config.register_rate_limit, Duration::from_secs(60));
        Self {
            config,
            pairing,
            tokens,
            verifier,
            register_limiter,
        }
    }
}
