//! Error types for the outbox.

use stream_auth::AuthError;
use stream_config_and_utils::CoreError;
use thiserror::Error;

/// Outbox errors.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// The caller handed in something the outbox refuses to queue.
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Auth(#[from] AuthError),

    /// `/stream/data` answered with a non-200 status.
    #[error("delivery failed with status {status}: {message}")]
    Delivery { status: u16, message: String },

    /// Any other endpoint answered with a non-200 status.
    #[error("request to {path} failed with status {status}: {message}")]
    Request {
        path: String,
        status: u16,
        message: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] CoreError),

    #[error("batch processor is already running")]
    AlreadyRunning,
}

/// Coarse classification published on error events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Authentication,
    Refresh,
    Delivery,
    Io,
    Other,
}

impl OutboxError {
    pub fn class(&self) -> ErrorClass {
        match self {
            OutboxError::Validation(_) => ErrorClass::Validation,
            OutboxError::Auth(AuthError::Refresh { .. }) => ErrorClass::Refresh,
            OutboxError::Auth(AuthError::Http(_)) => ErrorClass::Delivery,
            OutboxError::Auth(_) => ErrorClass::Authentication,
            OutboxError::Delivery { .. } | OutboxError::Request { .. } => ErrorClass::Delivery,
            OutboxError::Io(_) => ErrorClass::Io,
            OutboxError::Json(_) | OutboxError::Config(_) | OutboxError::AlreadyRunning => {
                ErrorClass::Other
            }
        }
    }

    /// Whether the next tick can be expected to clear the error without
    /// caller intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            OutboxError::Auth(err) => !err.is_fatal(),
            OutboxError::Delivery { status, .. } | OutboxError::Request { status, .. } => {
                *status >= 500 || *status == 429
            }
            OutboxError::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        assert_eq!(
            OutboxError::Validation("missing id".into()).class(),
            ErrorClass::Validation
        );
        assert_eq!(
            OutboxError::Auth(AuthError::InvalidCredentials).class(),
            ErrorClass::Authentication
        );
        assert_eq!(
            OutboxError::Auth(AuthError::Refresh {
                status: 401,
                message: String::new()
            })
            .class(),
            ErrorClass::Refresh
        );
        assert_eq!(
            OutboxError::Delivery {
                status: 500,
                message: String::new()
            }
            .class(),
            ErrorClass::Delivery
        );
    }

    #[test]
    fn server_errors_are_retryable() {
        let err = OutboxError::Delivery {
            status: 503,
            message: "unavailable".into(),
        };
        assert!(err.is_retryable());

        let err = OutboxError::Delivery {
            status: 400,
            message: "bad batch".into(),
        };
        assert!(!err.is_retryable());

        assert!(!OutboxError::Validation("x".into()).is_retryable());
        assert!(!OutboxError::Auth(AuthError::Forbidden("/stream/data".into())).is_retryable());
    }

    #[test]
    fn delivery_display_includes_status() {
        let err = OutboxError::Delivery {
            status: 500,
            message: "internal".into(),
        };
        assert_eq!(err.to_string(), "delivery failed with status 500: internal");
    }
}
