//! Symmetric keys and password-based key derivation (Argon2id).

use crate::error::{CryptoError, CryptoResult};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of every symmetric key in bytes.
pub const KEY_SIZE: usize = 32;

/// Size of an Argon2id salt in bytes.
pub const SALT_SIZE: usize = 16;

/// Largest Argon2id memory cost accepted from a stored blob (1 GiB).
pub const MAX_KDF_MEMORY_KIB: u32 = 1 << 20;

/// Largest Argon2id pass count accepted from a stored blob.
pub const MAX_KDF_ITERATIONS: u32 = 16;

/// Largest Argon2id lane count accepted from a stored blob.
pub const MAX_KDF_PARALLELISM: u32 = 16;

/// A 256-bit symmetric key. Used both for per-entry keys and for keys
/// derived from passwords.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Builds a key from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> CryptoResult<Self> {
        let array: [u8; KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_SIZE,
                    actual: bytes.len(),
                })?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// Generates a random symmetric key from the OS RNG.
pub fn generate_random_key() -> SymmetricKey {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    let key = SymmetricKey(bytes);
    bytes.zeroize();
    key
}

/// Random salt for Argon2id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// Argon2id cost parameters.
///
/// Stored next to every password-wrapped blob so a blob created under older
/// parameters still opens after the defaults change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl KdfParams {
    /// Fails when any cost exceeds what a client is willing to spend.
    ///
    /// Parameters travel with the wrapped blob, so they are untrusted input.
    pub fn check_limits(&self) -> CryptoResult<()> {
        if self.memory_kib > MAX_KDF_MEMORY_KIB
            || self.iterations > MAX_KDF_ITERATIONS
            || self.parallelism > MAX_KDF_PARALLELISM
        {
            return Err(CryptoError::KeyDerivation(format!(
                "Argon2 parameters exceed limits: m={} t={} p={}",
                self.memory_kib, self.iterations, self.parallelism
            )));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 3,
            parallelism: 1,
        }
    }
}

/// Derives a key from a password with Argon2id.
pub fn derive_key(password: &[u8], salt: &Salt, params: &KdfParams) -> CryptoResult<SymmetricKey> {
    params.check_limits()?;
    let argon_params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(format!("invalid Argon2 parameters: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);

    let mut output = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password, salt.as_bytes(), &mut output)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    let key = SymmetricKey(output);
    output.zeroize();
    Ok(key)
}
