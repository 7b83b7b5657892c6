//! Domain service for the authentication and token-issuance workflows.
//!
//! Covers sign-up, sign-in, refresh, and password change. Token issuance
//! always supersedes: issuing a new access token revokes every token the
//! user previously held.

use serde::Serialize;
use thiserror::Error;

use crate::token::TokenError;

/// Errors specific to authentication operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Duplicate username or email on sign-up
    #[error("{0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Bad credentials or wrong current password. Deliberately generic:
    /// callers cannot tell an unknown username from a wrong password.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The token subject no longer resolves to a user
    #[error("User {0} not found")]
    UserNotFound(String),

    #[error("Invalid token")]
    InvalidToken,

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sea_orm::DbErr> for AuthError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::InvalidToken(_) => Self::InvalidToken,
            TokenError::InvalidKey(msg) => Self::Internal(msg),
        }
    }
}

/// Token pair handed to the client. Field names match the wire contract.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// The caller identity resolved by the boundary layer from a verified
/// access token. Passed explicitly instead of downcasting an opaque
/// principal object.
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity {
    pub user_id: i32,
    pub username: String,
}

/// Input for the sign-up workflow; field-shape validation happens at the
/// boundary, business invariants (uniqueness, confirmation) here.
#[derive(Debug, Clone)]
pub struct SignUpData {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

/// Domain service trait for authentication.
#[async_trait::async_trait]
pub trait AuthService: Send + Sync {
    /// Registers a new user and issues its first token pair.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Conflict`] when the username or email is taken,
    /// [`AuthError::Validation`] when the password confirmation mismatches.
    async fn sign_up(&self, data: SignUpData) -> Result<AuthTokens, AuthError>;

    /// Verifies credentials, revokes the user's previously valid tokens,
    /// and issues a fresh pair.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for an unknown username or
    /// a wrong password, without distinguishing the two.
    async fn sign_in(&self, username: &str, password: &str) -> Result<AuthTokens, AuthError>;

    /// Exchanges a refresh token (from a raw `Authorization` header value)
    /// for a new access token. The refresh token itself is not rotated.
    ///
    /// Returns `Ok(None)` for malformed headers, undecodable tokens, and
    /// expired refresh tokens: those requests are silently ignored per the
    /// wire contract, not answered with an error.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UserNotFound`] when the token subject no
    /// longer resolves to a user.
    async fn refresh_token(
        &self,
        authorization: Option<&str>,
    ) -> Result<Option<AuthTokens>, AuthError>;

    /// Changes the caller's password after re-verifying the current one.
    /// Whether existing tokens survive the change is configuration-driven.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] if the current password is
    /// wrong, [`AuthError::Validation`] if the confirmation mismatches.
    async fn change_password(
        &self,
        identity: &AuthenticatedIdentity,
        current_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<(), AuthError>;
}
