use thiserror::Error;

use crate::auth::repository::StoreError;

pub type AuthResult<T> = Result<T, AuthError>;

/// Closed set of failures the session core can report.
///
/// Transport mapping (status codes, wire messages) lives with the caller; see
/// [`crate::error::ApiError`].
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("credential missing")]
    MissingCredential,
    #[error("malformed token")]
    MalformedToken,
    #[error("unsupported token algorithm")]
    UnsupportedAlgorithm,
    #[error("bad token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
    #[error("refresh token revoked")]
    Revoked,
    #[error("refresh token not found")]
    NotFound,
    #[error("invalid session")]
    InvalidSession,
    #[error("invalid api key")]
    InvalidApiKey,
    #[error("forbidden")]
    Forbidden,
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
    #[error("jwt error: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),
    #[error("entropy source failure: {0}")]
    Entropy(#[from] rand::Error),
    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Folds the refresh-token lookup outcomes into one opaque kind so callers
    /// cannot tell an unknown token from an expired or revoked one.
    pub fn into_session_error(self) -> Self {
        match self {
            AuthError::NotFound | AuthError::Expired | AuthError::Revoked => {
                AuthError::InvalidSession
            }
            other => other,
        }
    }

    /// True for failures caused by this service rather than by the caller.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            AuthError::Persistence(_)
                | AuthError::PasswordHash(_)
                | AuthError::Signing(_)
                | AuthError::Entropy(_)
                | AuthError::Task(_)
                | AuthError::Config(_)
        )
    }
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}
