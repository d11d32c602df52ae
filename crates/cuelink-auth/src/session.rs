//! Dashboard session verification
//!
//! The dashboard fronts CueLink with its own account system; requests coming
//! out of a signed-in browser carry a compact session token minted by that
//! system. This module only verifies those tokens, it never mints them.

use cuelink_core::SessionUser;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;

/// Resolves a presented session credential to a dashboard user
pub trait SessionVerifier: Send + Sync {
    /// Returns the user the credential belongs to, or `None` when it is
    /// missing, malformed, expired, or signed with the wrong key.
    fn verify(&self, credential: &str) -> Option<SessionUser>;
}

/// Claims carried in a dashboard session token
#[derive(Debug, Deserialize)]
struct SessionClaims {
    /// User identifier
    sub: String,
    /// Email shown in the dashboard
    email: String,
}

/// Verifies dashboard sessions as HS256 JWTs signed with a shared secret
pub struct JwtSessionVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtSessionVerifier {
    /// Create a verifier for tokens signed with `secret`
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

impl SessionVerifier for JwtSessionVerifier {
    fn verify(&self, credential: &str) -> Option<SessionUser> {
        let data = decode::<SessionClaims>(credential, &self.decoding_key, &self.validation).ok()?;
        Some(SessionUser {
            user_id: data.claims.sub,
            email: data.claims.email,
        })
    }
}

/// Fixed credential-to-user map, for tests and local development
#[derive(Debug, Default)]
pub struct StaticSessionVerifier {
    sessions: HashMap<String, SessionUser>,
}

impl StaticSessionVerifier {
    /// Create an empty verifier that rejects everything
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: accept `credential` as `user`
    pub fn with_session(mut self, credential: impl Into<String>, user: SessionUser) -> Self {
        self.sessions.insert(credential.into(), user);
        self
    }
}

impl SessionVerifier for StaticSessionVerifier {
    fn verify(&self, credential: &str) -> Option<SessionUser> {
        self.sessions.get(credential).cloned()
    }
}
