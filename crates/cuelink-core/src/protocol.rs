//! HTTP API request and response types
//!
//! All bodies are JSON with camelCase field names, matching what the
//! extension and the dashboard frontend put on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Header carrying the dashboard session token when a cookie cannot be set
pub const SESSION_HEADER: &str = "x-cuelink-session";

/// Body of `POST /api/pair/register`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceRequest {
    /// Optional label shown in the dashboard's device list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,
}

/// Response to a successful device registration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDeviceResponse {
    /// Server-assigned device identifier
    pub device_id: String,
    /// Short pairing code the user confirms in the dashboard
    pub code: String,
    /// When the pairing code stops being usable
    pub expires_at: DateTime<Utc>,
}

/// Body of `POST /api/pair/link`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDeviceRequest {
    /// The pairing code the user is confirming
    pub code: String,
}

/// Response to a successful link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkDeviceResponse {
    /// The device now attached to the confirming user's account
    pub device_id: String,
}

/// Body of `POST /api/pair/exchange`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeCodeRequest {
    /// Device identifier returned at registration
    pub device_id: String,
    /// The pairing code being redeemed
    pub code: String,
}

/// A freshly issued device token, returned by exchange and rotate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTokenResponse {
    /// Raw bearer token; the server only keeps a hash of it
    pub token: String,
    /// When the token stops being accepted
    pub expires_at: DateTime<Utc>,
}

/// One paired device in `GET /api/devices`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSummary {
    /// Device identifier
    pub device_id: String,
    /// Label shown in the dashboard
    pub device_name: String,
    /// When the current token was issued
    pub issued_at: DateTime<Utc>,
    /// When the current token expires
    pub expires_at: DateTime<Utc>,
    /// Last time the device made an authenticated request
    pub last_used_at: DateTime<Utc>,
}

/// Machine-readable error codes carried in every error response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Pairing code does not exist or has already been consumed
    CodeNotFound,
    /// Pairing code existed but its window has closed
    CodeExpired,
    /// Pairing code was already confirmed by a different account
    AlreadyLinked,
    /// Device ID does not match the one the code was issued to
    DeviceMismatch,
    /// Pairing code has not been confirmed by a user yet
    PairingPending,
    /// Request lacked valid credentials
    Unauthenticated,
    /// Referenced device does not exist for this account
    DeviceNotFound,
    /// Request body was missing or malformed
    InvalidRequest,
    /// Client exceeded the registration rate limit
    RateLimited,
    /// Persistent store could not be read or written
    Unavailable,
}

/// Standard error body returned with every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Stable machine-readable code
    pub error: ErrorCode,
    /// Human-readable description, safe to show in the extension popup
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_response_uses_camel_case() {
        let response = RegisterDeviceResponse {
            device_id: "d-1".to_string(),
            code: "ABC234".to_string(),
            expires_at: Utc::now(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert!(json.get("deviceId").is_some());
        assert!(json.get("expiresAt").is_some());
        assert!(json.get("device_id").is_none());
    }

    #[test]
    fn test_register_request_tolerates_empty_object() {
        let request: RegisterDeviceRequest = serde_json::from_str("{}").unwrap();
        assert!(request.device_name.is_none());
    }

    #[test]
    fn test_error_code_wire_names() {
        let body = ErrorBody {
            error: ErrorCode::PairingPending,
            message: "waiting for confirmation".to_string(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"], "pairing_pending");
    }

    #[test]
    fn test_exchange_request_round_trip() {
        let json = r#"{"deviceId":"abc","code":"XYZ789"}"#;
        let request: ExchangeCodeRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.device_id, "abc");
        assert_eq!(request.code, "XYZ789");
    }
}
