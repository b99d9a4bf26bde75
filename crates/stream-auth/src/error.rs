//! Authentication error types.

use thiserror::Error;

/// Error type for the authenticated stream session.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or malformed credential.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The auth endpoint rejected the long-lived credentials (401/403).
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The auth endpoint answered with an unexpected status.
    #[error("Authentication rejected: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// The refresh endpoint did not answer 200.
    #[error("Token refresh failed: {status} - {message}")]
    Refresh { status: u16, message: String },

    /// Still forbidden after refreshing and replaying the request once.
    #[error("Request forbidden after token refresh: {0}")]
    Forbidden(String),

    /// Network or transport-level HTTP error from reqwest.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthError {
    /// Whether retrying later without operator action is pointless.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AuthError::Http(_))
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
