//! Bearer-token authentication.
//!
//! Token issuance lives elsewhere; the daemon only maps a presented token
//! to the user id it was issued for.

use std::collections::HashMap;

use crate::error::AuthError;

pub trait Authenticator: Send + Sync {
    /// Resolves a bearer token to a user id.
    fn authenticate(&self, token: &str) -> Result<String, AuthError>;
}

/// Fixed token table loaded from the `[auth]` config section.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, String>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, token: &str) -> Result<String, AuthError> {
        self.tokens
            .get(token)
            .filter(|user_id| !user_id.trim().is_empty())
            .cloned()
            .ok_or(AuthError::InvalidToken)
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header value.
pub fn parse_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    let value = header.map(str::trim).ok_or(AuthError::MissingToken)?;
    let (scheme, token) = value.split_once(' ').ok_or(AuthError::MissingToken)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::MissingToken);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }
    Ok(token)
}
