//! Caller identity types
//!
//! Every authenticated request resolves to exactly one [`Identity`]: either a
//! dashboard user carrying a web session, or a paired extension acting on a
//! user's behalf through a device token.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a paired device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub Uuid);

impl DeviceId {
    /// Generate a new random device ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A dashboard user authenticated through the web session layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    /// Stable user identifier from the account system
    pub user_id: String,
    /// Email address shown in the dashboard
    pub email: String,
}

/// A paired extension authenticated through a device token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceIdentity {
    /// The device the token was issued to
    pub device_id: DeviceId,
    /// Owner of the device
    pub user_id: String,
    /// Owner's email address
    pub email: String,
}

/// The resolved identity of an authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Identity {
    /// A user browsing the dashboard
    Session(SessionUser),
    /// An extension holding a device token
    Device(DeviceIdentity),
}

impl Identity {
    /// The user this identity ultimately belongs to
    pub fn user_id(&self) -> &str {
        match self {
            Identity::Session(user) => &user.user_id,
            Identity::Device(device) => &device.user_id,
        }
    }

    /// Email address of the owning user
    pub fn email(&self) -> &str {
        match self {
            Identity::Session(user) => &user.email,
            Identity::Device(device) => &device.email,
        }
    }

    /// Device ID when the caller is a paired extension
    pub fn device_id(&self) -> Option<DeviceId> {
        match self {
            Identity::Session(_) => None,
            Identity::Device(device) => Some(device.device_id),
        }
    }
}
