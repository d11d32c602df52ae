//! Request authentication
//!
//! Two credential shapes arrive at the API: bearer device tokens from paired
//! extensions and session tokens from a signed-in dashboard tab. The
//! extractors here resolve either to a caller identity once, so handlers
//! never look at raw headers.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use cuelink_auth::TokenError;
use cuelink_core::protocol::SESSION_HEADER;
use cuelink_core::{Identity, SessionUser};
use std::sync::Arc;
use tracing::error;

use crate::http::ApiError;
use crate::state::AppState;

/// Cookie the dashboard attaches to its own API calls
const SESSION_COOKIE: &str = "cuelink_session";

/// Extractor for any authenticated caller
///
/// Tries the bearer device token first, then the dashboard session. Every
/// credential failure collapses into the same opaque 401, so a probing
/// client cannot tell an expired token from a fabricated one.
pub struct AuthenticatedCaller(pub Identity);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedCaller {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(token) = bearer_token(&parts.headers) {
            match state.tokens.resolve(token).await {
                Ok(device) => return Ok(Self(Identity::Device(device))),
                Err(TokenError::Storage(e)) => {
                    error!("Token lookup failed: {}", e);
                    return Err(ApiError::unavailable());
                }
                Err(_) => {}
            }
        }

        if let Some(credential) = session_credential(&parts.headers) {
            if let Some(user) = state.verifier.verify(&credential) {
                return Ok(Self(Identity::Session(user)));
            }
        }

        Err(ApiError::unauthenticated())
    }
}

/// Extractor for a signed-in dashboard user
///
/// Session-only. The link endpoint must not accept device tokens: a device
/// confirming its own pairing code would defeat the handshake.
pub struct WebSession(pub SessionUser);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for WebSession {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let credential =
            session_credential(&parts.headers).ok_or_else(ApiError::unauthenticated)?;
        let user = state
            .verifier
            .verify(&credential)
            .ok_or_else(ApiError::unauthenticated)?;
        Ok(Self(user))
    }
}

/// Bearer token from the Authorization header
pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Session credential from the dedicated header or the dashboard cookie
fn session_credential(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(SESSION_HEADER) {
        if let Ok(credential) = value.to_str() {
            return Some(credential.to_string());
        }
    }

    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == SESSION_COOKIE).then(|| value.to_string())
    })
}
