//! Configuration types for CueLink

use serde::{Deserialize, Serialize};

/// Main configuration for the CueLink pairing service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server port
    pub port: u16,
    /// How long a pairing code stays valid, in seconds
    pub pairing_window_secs: u64,
    /// How long an issued device token stays valid, in seconds
    pub token_ttl_secs: u64,
    /// Maximum device registrations per client per minute
    pub register_rate_limit: u32,
    /// Interval between expired-record sweeps, in seconds
    pub sweep_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8443,
            pairing_window_secs: 300,
            token_ttl_secs: 86_400,
            register_rate_limit: 10,
            sweep_interval_secs: 600,
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: set port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Builder pattern: set the pairing window in seconds
    pub fn with_pairing_window_secs(mut self, secs: u64) -> Self {
        self.pairing_window_secs = secs;
        self
    }

    /// Builder pattern: set the device token lifetime in seconds
    pub fn with_token_ttl_secs(mut self, secs: u64) -> Self {
        self.token_ttl_secs = secs;
        self
    }

    /// Builder pattern: set the registration rate limit per minute
    pub fn with_register_rate_limit(mut self, per_minute: u32) -> Self {
        self.register_rate_limit = per_minute;
        self
    }

    /// Builder pattern: set the sweep interval in seconds
    pub fn with_sweep_interval_secs(mut self, secs: u64) -> Self {
        self.sweep_interval_secs = secs;
        self
    }

    /// Pairing window as a [`chrono::Duration`]
    pub fn pairing_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.pairing_window_secs as i64)
    }

    /// Device token lifetime as a [`chrono::Duration`]
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.token_ttl_secs as i64)
    }
}
