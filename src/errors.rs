//! Crate-wide error type.
//!
//! Flow-local failures (a poll tick that errors, one device that refuses to
//! disconnect) are handled inside the owning component. `TetherError` is what
//! crosses a public API boundary.

use thiserror::Error;

use crate::client::errors::ApiError;

#[derive(Debug, Error)]
pub enum TetherError {
    /// No authenticated identity is available for an operation that needs one.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// Transport-level failure talking to the backend.
    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status or an unparseable body.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// The backend answered 2xx but reported an application-level failure.
    #[error("server error: {0}")]
    ServerError(String),

    /// A pairing request was cancelled before the server answered.
    #[error("pairing request was cancelled")]
    PairingCancelled,

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("failed to render QR code: {0}")]
    QrError(String),

    #[error("storage error: {0}")]
    StorageError(#[from] std::io::Error),
}

impl TetherError {
    /// Whether retrying the same request later could plausibly succeed.
    ///
    /// Transport errors always qualify; API errors defer to their status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            TetherError::NetworkError(_) => true,
            TetherError::Api(err) => err.is_retryable(),
            _ => false,
        }
    }
}

pub type TetherResult<T> = Result<T, TetherError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_defer_retry_decision_to_status() {
        let server_down: TetherError = ApiError::new(Some(503), "unavailable").into();
        let rejected: TetherError = ApiError::new(Some(400), "bad request").into();

        assert!(server_down.is_retryable());
        assert!(!rejected.is_retryable());
    }

    #[test]
    fn auth_required_is_not_retryable() {
        let err = TetherError::AuthRequired("no identity token".to_string());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("no identity token"));
    }
}
