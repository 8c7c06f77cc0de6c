//! Session error types.

use inkwell_crypto::CryptoError;
use thiserror::Error;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur in session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Deliberately vague: an unknown account and a wrong password look the
    /// same to the caller.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("session is locked")]
    Locked,

    #[error("an account already exists on this device")]
    AccountExists,

    #[error("password too short (min {min} characters)")]
    PasswordTooShort { min: usize },

    #[error("biometric unlock unavailable: {0}")]
    BiometricUnavailable(String),

    #[error("biometric authentication rejected")]
    BiometricRejected,

    #[error("key storage error: {0}")]
    Storage(String),

    #[error("session state lock poisoned")]
    Poisoned,

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
