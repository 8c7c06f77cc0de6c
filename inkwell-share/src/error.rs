//! Sharing error types.

use inkwell_crypto::CryptoError;
use inkwell_session::SessionError;
use thiserror::Error;

/// Result type for sharing operations.
pub type ShareResult<T> = Result<T, ShareError>;

/// Errors that can occur in sharing, tag and sync operations.
#[derive(Debug, Error)]
pub enum ShareError {
    /// Includes `SessionError::Locked` for calls made while not unlocked.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("backend request failed: {0}")]
    Backend(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
