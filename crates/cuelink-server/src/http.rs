//! HTTP request handlers
//!
//! The wire contract the extension and the dashboard agree on: pairing
//! handshake, token rotation, and device management. Every error response
//! carries an [`ErrorBody`] with a machine-readable code; store and identity
//! failures are logged in full here and leave the process as a bare
//! `unavailable`.

use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path as AxumPath, State},
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use cuelink_auth::{DeviceToken, PairingError, TokenError};
use cuelink_core::protocol::{
    DeviceSummary, DeviceTokenResponse, ErrorBody, ErrorCode, ExchangeCodeRequest,
    LinkDeviceRequest, LinkDeviceResponse, RegisterDeviceRequest, RegisterDeviceResponse,
    SESSION_HEADER,
};
use cuelink_core::Identity;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, warn};

use crate::auth::{bearer_token, AuthenticatedCaller, WebSession};
use crate::ratelimit::client_key;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    // The extension calls from its own origin; credentials ride in headers,
    // never cookies, so a wildcard origin is safe here.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(SESSION_HEADER),
        ]);

    Router::new()
        // Pairing API
        .route("/api/pair/register", post(register_device_handler))
        .route("/api/pair/link", post(link_device_handler))
        .route("/api/pair/exchange", post(exchange_code_handler))
        // Token lifecycle
        .route("/api/token/rotate", post(rotate_token_handler))
        // Caller identity and device management
        .route("/api/me", get(me_handler))
        .route("/api/devices", get(list_devices_handler))
        .route("/api/devices/:id", delete(revoke_device_handler))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Error responses
// ============================================================================

/// An error response with its HTTP status and wire code
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: ErrorCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    /// 400 for a request body that fails validation before any store access
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::InvalidRequest, message)
    }

    /// The one 401 every credential failure collapses into
    pub fn unauthenticated() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            ErrorCode::Unauthenticated,
            "authentication required",
        )
    }

    /// 429 for a client that spent its registration window
    pub fn rate_limited() -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::RateLimited,
            "too many registration attempts; try again shortly",
        )
    }

    /// 500 hiding every infrastructure detail from the client
    pub fn unavailable() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCode::Unavailable,
            "service temporarily unavailable",
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<PairingError> for ApiError {
    fn from(err: PairingError) -> Self {
        match err {
            PairingError::CodeNotFound => Self::new(
                StatusCode::NOT_FOUND,
                ErrorCode::CodeNotFound,
                "pairing code not found",
            ),
            PairingError::CodeExpired => Self::new(
                StatusCode::GONE,
                ErrorCode::CodeExpired,
                "pairing code has expired",
            ),
            PairingError::AlreadyLinked => Self::new(
                StatusCode::CONFLICT,
                ErrorCode::AlreadyLinked,
                "pairing code was already confirmed by another account",
            ),
            PairingError::DeviceMismatch => Self::new(
                StatusCode::BAD_REQUEST,
                ErrorCode::DeviceMismatch,
                "device does not match this pairing code",
            ),
            PairingError::NotLinked => Self::new(
                StatusCode::TOO_EARLY,
                ErrorCode::PairingPending,
                "pairing code has not been confirmed yet",
            ),
            PairingError::CodeAllocation => {
                error!("Could not allocate a unique pairing code");
                Self::unavailable()
            }
            PairingError::Storage(e) => {
                error!("Pairing store failure: {}", e);
                Self::unavailable()
            }
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidToken => Self::unauthenticated(),
            TokenError::UnknownDevice(_) => Self::new(
                StatusCode::NOT_FOUND,
                ErrorCode::DeviceNotFound,
                "device not found",
            ),
            TokenError::Storage(e) => {
                error!("Token store failure: {}", e);
                Self::unavailable()
            }
        }
    }
}

// ============================================================================
// Pairing API Handlers
// ============================================================================

/// Register an anonymous device and hand out a pairing code
///
/// The body is optional; an extension that has a label to offer sends
/// `{"deviceName": "..."}`. Anonymous, so the per-client limiter runs before
/// anything else.
async fn register_device_handler(
    State(state): State<Arc<AppState>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Option<Json<RegisterDeviceRequest>>,
) -> Result<Json<RegisterDeviceResponse>, ApiError> {
    let key = client_key(&headers, peer.map(|ConnectInfo(addr)| addr));
    if !state.register_limiter.check(&key).await {
        warn!("Rate limited device registration from {}", key);
        return Err(ApiError::rate_limited());
    }

    let request = body.map(|Json(request)| request).unwrap_or_default();
    let registered = state.pairing.register(request.device_name).await?;

    Ok(Json(RegisterDeviceResponse {
        device_id: registered.device_id.to_string(),
        code: registered.code,
        expires_at: registered.expires_at,
    }))
}

/// Attach the signed-in dashboard user to a pairing code
async fn link_device_handler(
    State(state): State<Arc<AppState>>,
    WebSession(user): WebSession,
    body: Result<Json<LinkDeviceRequest>, JsonRejection>,
) -> Result<Json<LinkDeviceResponse>, ApiError> {
    let Json(request) = body.map_err(|_| ApiError::invalid_request("code is required"))?;
    if request.code.trim().is_empty() {
        return Err(ApiError::invalid_request("code is required"));
    }

    let device_id = state.pairing.link(&request.code, &user).await?;
    Ok(Json(LinkDeviceResponse {
        device_id: device_id.to_string(),
    }))
}

/// Redeem a confirmed pairing code for a bearer token
///
/// Answers 425 while the code is still waiting on the user, which the
/// extension's poller treats as "keep polling".
async fn exchange_code_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ExchangeCodeRequest>, JsonRejection>,
) -> Result<Json<DeviceTokenResponse>, ApiError> {
    let Json(request) =
        body.map_err(|_| ApiError::invalid_request("deviceId and code are required"))?;
    if request.device_id.trim().is_empty() || request.code.trim().is_empty() {
        return Err(ApiError::invalid_request("deviceId and code are required"));
    }

    let issued = state
        .pairing
        .exchange(&request.device_id, &request.code)
        .await?;
    Ok(Json(DeviceTokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

// ============================================================================
// Token Lifecycle Handlers
// ============================================================================

/// Swap the presented bearer token for a fresh one
///
/// The old token stops working the moment this returns 200.
async fn rotate_token_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<DeviceTokenResponse>, ApiError> {
    let token = bearer_token(&headers).ok_or_else(ApiError::unauthenticated)?;
    let issued = state.tokens.rotate(token).await?;

    Ok(Json(DeviceTokenResponse {
        token: issued.token,
        expires_at: issued.expires_at,
    }))
}

// ============================================================================
// Identity and Device Management Handlers
// ============================================================================

/// Report who the caller is
///
/// The extension hits this on startup to check whether its stored token is
/// still good.
async fn me_handler(AuthenticatedCaller(identity): AuthenticatedCaller) -> Json<Identity> {
    Json(identity)
}

/// List the calling user's paired devices
async fn list_devices_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedCaller(identity): AuthenticatedCaller,
) -> Json<Vec<DeviceSummary>> {
    let devices = state.tokens.devices_for_user(identity.user_id()).await;
    Json(devices.iter().map(summarize).collect())
}

/// Revoke (unpair) one of the calling user's devices
async fn revoke_device_handler(
    State(state): State<Arc<AppState>>,
    AuthenticatedCaller(identity): AuthenticatedCaller,
    AxumPath(id): AxumPath<String>,
) -> Result<StatusCode, ApiError> {
    state.tokens.revoke(&id, identity.user_id()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Wire view of a stored device token
fn summarize(row: &DeviceToken) -> DeviceSummary {
    DeviceSummary {
        device_id: row.device_id.to_string(),
        device_name: row.device_name.clone(),
        issued_at: row.issued_at,
        expires_at: row.expires_at,
        last_used_at: row.last_used_at,
    }
}
