//! HTTP client for the CueLink pairing API
//!
//! Thin wrapper over `reqwest` that turns wire statuses back into the
//! protocol states the extension acts on. Expected pairing states
//! (`Pending`, `NotFound`, `Mismatch`) come back as values, not errors, so
//! the poller can branch on them; transport failures stay errors and are
//! retried by the caller.

use cuelink_core::protocol::{
    DeviceTokenResponse, ErrorBody, ErrorCode, ExchangeCodeRequest, RegisterDeviceRequest,
    RegisterDeviceResponse,
};
use cuelink_core::Identity;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Per-request timeout; a hung request must not stall the poll loop
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request never completed; safe to retry
    #[error("HTTP error: {0}")]
    Transport(#[from] reqwest::Error),
    /// Server refused the credential; the extension must rotate or re-pair
    #[error("Not authenticated")]
    Unauthenticated,
    /// Server answered outside the expected protocol states
    #[error("API error ({status}): {message}")]
    Api {
        status: StatusCode,
        code: Option<ErrorCode>,
        message: String,
    },
}

pub type ClientResult<T> = Result<T, ClientError>;

/// Outcome of one exchange attempt
#[derive(Debug, Clone)]
pub enum ExchangeStatus {
    /// The code was confirmed and consumed; here is the token
    Issued(DeviceTokenResponse),
    /// The user has not confirmed the code yet; poll again
    Pending,
    /// The code does not exist or has expired; pairing must restart
    NotFound,
    /// The code belongs to a different device; pairing must restart
    Mismatch,
}

/// Client for the CueLink pairing and token API
#[derive(Clone)]
pub struct ApiClient {
    /// Server base URL without a trailing slash
    base_url: String,
    http: reqwest::Client,
}

impl ApiClient {
    /// Create a client for the server at `base_url`
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { base_url, http })
    }

    /// Register this device and receive a pairing code
    pub async fn register(
        &self,
        device_name: Option<String>,
    ) -> ClientResult<RegisterDeviceResponse> {
        let response = self
            .http
            .post(format!("{}/api/pair/register", self.base_url))
            .json(&RegisterDeviceRequest { device_name })
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response.json().await?);
        }
        Err(unexpected(response).await)
    }

    /// Try to redeem a pairing code for a device token
    pub async fn exchange(&self, device_id: &str, code: &str) -> ClientResult<ExchangeStatus> {
        let response = self
            .http
            .post(format!("{}/api/pair/exchange", self.base_url))
            .json(&ExchangeCodeRequest {
                device_id: device_id.to_string(),
                code: code.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(ExchangeStatus::Issued(response.json().await?));
        }

        match status {
            StatusCode::TOO_EARLY => Ok(ExchangeStatus::Pending),
            StatusCode::NOT_FOUND => Ok(ExchangeStatus::NotFound),
            StatusCode::BAD_REQUEST => {
                // A 400 is a device mismatch unless the body says the request
                // itself was malformed
                let body = error_body(response).await;
                match body {
                    Some(ErrorBody {
                        error: ErrorCode::DeviceMismatch,
                        ..
                    }) => Ok(ExchangeStatus::Mismatch),
                    Some(body) => Err(ClientError::Api {
                        status,
                        code: Some(body.error),
                        message: body.message,
                    }),
                    None => Ok(ExchangeStatus::Mismatch),
                }
            }
            _ => Err(api_error(status, error_body(response).await)),
        }
    }

    /// Swap the current token for a fresh one
    ///
    /// The presented token is dead once this returns `Ok`; a 401 means it was
    /// already dead and the extension must pair again.
    pub async fn rotate(&self, token: &str) -> ClientResult<DeviceTokenResponse> {
        let response = self
            .http
            .post(format!("{}/api/token/rotate", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthenticated);
        }
        Err(api_error(status, error_body(response).await))
    }

    /// Ask the server who this token belongs to
    ///
    /// The extension calls this on startup to check whether its stored token
    /// is still good.
    pub async fn me(&self, token: &str) -> ClientResult<Identity> {
        let response = self
            .http
            .get(format!("{}/api/me", self.base_url))
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthenticated);
        }
        Err(api_error(status, error_body(response).await))
    }
}

/// Dashboard page the user confirms the pairing code on
///
/// Only the code rides in the URL; the device ID stays with the extension,
/// which is the binding check at exchange time.
pub fn pairing_url(dashboard_url: &str, code: &str) -> String {
    format!(
        "{}/pair?code={}",
        dashboard_url.trim_end_matches('/'),
        urlencode(code)
    )
}

/// Parse an [`ErrorBody`] out of a failed response, if there is one
async fn error_body(response: reqwest::Response) -> Option<ErrorBody> {
    let status = response.status();
    let body = response.json::<ErrorBody>().await.ok();
    if let Some(ref body) = body {
        debug!("API error ({}): {}", status, body.message);
    }
    body
}

/// Build the catch-all error for a status outside the protocol
fn api_error(status: StatusCode, body: Option<ErrorBody>) -> ClientError {
    match body {
        Some(body) => ClientError::Api {
            status,
            code: Some(body.error),
            message: body.message,
        },
        None => ClientError::Api {
            status,
            code: None,
            message: format!("unexpected response: {}", status),
        },
    }
}

/// Consume an unexpected response into an error
async fn unexpected(response: reqwest::Response) -> ClientError {
    let status = response.status();
    api_error(status, error_body(response).await)
}

/// Percent-encode a query value
fn urlencode(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => c.to_string(),
            _ => format!("%{:02X}", c as u8),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_is_normalized() {
        let client = ApiClient::new("https://pair.example/").unwrap();
        assert_eq!(client.base_url, "https://pair.example");
    }

    #[test]
    fn test_pairing_url_embeds_only_the_code() {
        let url = pairing_url("https://app.example/", "ABC234");
        assert_eq!(url, "https://app.example/pair?code=ABC234");
        assert!(!url.contains("deviceId"));
    }

    #[test]
    fn test_pairing_url_escapes_unexpected_characters() {
        let url = pairing_url("https://app.example", "A C&D");
        assert_eq!(url, "https://app.example/pair?code=A%20C%26D");
    }
}
