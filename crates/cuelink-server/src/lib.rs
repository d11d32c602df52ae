//! CueLink Server - Axum-based HTTP API server
//!
//! Exposes the pairing handshake, token rotation, and device management over
//! HTTP/JSON, with dual-credential authentication on every protected route.

pub mod auth;
pub mod http;
pub mod ratelimit;
pub mod state;
pub mod tls;

pub use auth::{AuthenticatedCaller, WebSession};
pub use http::{create_router, ApiError};
pub use ratelimit::RateLimiter;
pub use state::AppState;
pub use tls::{generate_self_signed_cert, rustls_config_from_files, rustls_config_self_signed};
