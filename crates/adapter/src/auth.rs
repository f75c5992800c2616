//! Identity collaborator
//!
//! The server never checks passwords itself; it hands the hello token to an
//! [`Authorizer`] and gets back a stable identity. Seat entitlement (which
//! color a player may move) is decided by the match session.

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;

use crate::registry::PlayerId;

/// Longest token accepted by [`GuestAuthorizer`]
pub const MAX_TOKEN_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub player: PlayerId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,
    #[error("token rejected: {reason}")]
    Rejected { reason: String },
}

pub trait Authorizer: Send + Sync {
    /// Resolve a hello token to an identity
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Trusts any well-formed token; the same token always maps to the same player.
#[derive(Debug, Default)]
pub struct GuestAuthorizer {
    known: Mutex<HashMap<String, Identity>>,
}

impl GuestAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Authorizer for GuestAuthorizer {
    fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        if token.len() > MAX_TOKEN_LEN || token.chars().any(char::is_control) {
            return Err(AuthError::Rejected {
                reason: "malformed token".to_string(),
            });
        }
        let mut known = self.known.lock();
        let identity = known
            .entry(token.to_string())
            .or_insert_with(|| Identity {
                player: PlayerId::new(),
                name: token.to_string(),
            });
        Ok(identity.clone())
    }
}
