//! Session configuration.

use inkwell_crypto::KdfParams;
use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::SessionManager`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Argon2id cost used when wrapping the secret key. Existing records keep
    /// the parameters they were written with.
    pub kdf: KdfParams,

    /// Minimum accepted password length in bytes.
    pub min_password_len: usize,

    /// Capacity of the session event channel.
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            min_password_len: 8,
            event_capacity: 32,
        }
    }
}

impl SessionConfig {
    /// Cheap KDF settings for tests and benchmarks. Never ship these.
    pub fn insecure_fast() -> Self {
        Self {
            kdf: KdfParams {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
            ..Self::default()
        }
    }
}
