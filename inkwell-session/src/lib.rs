//! Session lifecycle for Inkwell key material.
//!
//! [`SessionManager`] is the only place an unwrapped secret key lives. It
//! loads the wrapped record from a [`KeyStore`], unlocks it with the user's
//! password (or a biometric-sealed copy of it), and gates every entry
//! encryption operation behind the unlocked state.

mod biometric;
mod config;
mod error;
mod manager;
mod store;

pub use biometric::{BiometricAuthenticator, CredentialHandle};
pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use manager::{SessionEvent, SessionManager, SessionState};
pub use store::{FileKeyStore, KeyStore, MemoryKeyStore, StoredUserKeys};
