//! ChaCha20-Poly1305 authenticated encryption with random nonces.

use crate::error::{CryptoError, CryptoResult};
use crate::key::SymmetricKey;
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// ChaCha20-Poly1305 nonce size in bytes.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Ciphertext plus the nonce it was sealed under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the Poly1305 tag appended.
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    /// Total encrypted size in bytes (nonce + ciphertext).
    pub fn len(&self) -> usize {
        NONCE_SIZE + self.ciphertext.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ciphertext.is_empty()
    }
}

/// Encrypts `plaintext` under `key` with a fresh random nonce.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    encrypt_with_nonce(key, &nonce, plaintext)
}

/// Encrypts `plaintext` under a caller-chosen nonce. The caller owns nonce
/// uniqueness.
pub(crate) fn encrypt_with_nonce(
    key: &SymmetricKey,
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> CryptoResult<EncryptedData> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedData {
        nonce: *nonce,
        ciphertext,
    })
}

/// Decrypts and authenticates `data`. The plaintext is wiped when dropped.
pub fn decrypt(key: &SymmetricKey, data: &EncryptedData) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if data.ciphertext.len() < TAG_SIZE {
        return Err(CryptoError::Decryption(format!(
            "ciphertext shorter than tag ({} bytes)",
            data.ciphertext.len()
        )));
    }

    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(&data.nonce), data.ciphertext.as_ref())
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decryption("wrong key or tampered data".to_string()))
}
