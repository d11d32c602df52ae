//! CueLink Core - Shared types and protocol definitions
//!
//! This crate provides the foundational types used across all CueLink components.

pub mod config;
pub mod identity;
pub mod protocol;

pub use config::Config;
pub use identity::{DeviceId, DeviceIdentity, Identity, SessionUser};
pub use protocol::{ErrorBody, ErrorCode};
