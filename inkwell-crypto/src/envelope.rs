//! Authenticated public-key boxes for wrapping entry keys.
//!
//! Uses X25519 key agreement + XSalsa20-Poly1305 (NaCl `crypto_box`). Unlike
//! an anonymous sealed box, the sender's long-term secret participates in the
//! key agreement, so the recipient needs the author's public key to open a
//! box and a successful open proves who wrapped it.

use crate::error::{CryptoError, CryptoResult};
use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// X25519 public key size in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// X25519 secret key size in bytes.
pub const SECRET_KEY_SIZE: usize = 32;

/// XSalsa20 nonce size in bytes.
pub const BOX_NONCE_SIZE: usize = 24;

/// A user's long-term X25519 key pair.
///
/// Deliberately not `Clone`: an unlocked secret lives in exactly one place.
/// The secret half is wiped on drop and by [`crate::keys::clear_key_pair`].
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct UserKeyPair {
    #[zeroize(skip)]
    public_key: [u8; PUBLIC_KEY_SIZE],
    secret_key: [u8; SECRET_KEY_SIZE],
}

impl UserKeyPair {
    /// Generates a fresh key pair from the OS RNG.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public = secret.public_key();
        Self {
            public_key: *public.as_bytes(),
            secret_key: secret.to_bytes(),
        }
    }

    /// Reconstructs a pair from secret bytes, deriving the public half.
    pub fn from_secret_bytes(bytes: &[u8]) -> CryptoResult<Self> {
        let secret_key: [u8; SECRET_KEY_SIZE] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: SECRET_KEY_SIZE,
                    actual: bytes.len(),
                })?;
        let public = SecretKey::from(secret_key).public_key();
        Ok(Self {
            public_key: *public.as_bytes(),
            secret_key,
        })
    }

    /// Assembles a pair from both halves without checking consistency.
    /// Pair it with [`crate::keys::validate_key_pair`] before trusting it.
    pub fn from_parts(public_key: [u8; PUBLIC_KEY_SIZE], secret: &[u8]) -> CryptoResult<Self> {
        let secret_key: [u8; SECRET_KEY_SIZE] =
            secret
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: SECRET_KEY_SIZE,
                    actual: secret.len(),
                })?;
        Ok(Self {
            public_key,
            secret_key,
        })
    }

    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.public_key
    }

    /// Borrows the raw secret. Never persist this unwrapped.
    pub fn secret_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        &self.secret_key
    }

    pub(crate) fn secret(&self) -> SecretKey {
        SecretKey::from(self.secret_key)
    }
}

impl fmt::Debug for UserKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserKeyPair")
            .field("public_key", &hex::encode(self.public_key))
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

/// Payload boxed from a sender to a recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoxedPayload {
    pub nonce: [u8; BOX_NONCE_SIZE],
    /// XSalsa20-Poly1305 ciphertext with tag.
    pub ciphertext: Vec<u8>,
}

/// Boxes `payload` from `sender` to `recipient_pk` under a fresh nonce.
pub fn seal_for(
    payload: &[u8],
    sender: &UserKeyPair,
    recipient_pk: &[u8; PUBLIC_KEY_SIZE],
) -> CryptoResult<BoxedPayload> {
    let salsa_box = SalsaBox::new(&PublicKey::from(*recipient_pk), &sender.secret());

    let mut nonce = [0u8; BOX_NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = salsa_box
        .encrypt(crypto_box::Nonce::from_slice(&nonce), payload)
        .map_err(|e| CryptoError::Encryption(format!("box seal failed: {e}")))?;

    Ok(BoxedPayload { nonce, ciphertext })
}

/// Opens a box that `sender_pk` sealed for `recipient`.
pub fn open_from(
    boxed: &BoxedPayload,
    sender_pk: &[u8; PUBLIC_KEY_SIZE],
    recipient: &UserKeyPair,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let salsa_box = SalsaBox::new(&PublicKey::from(*sender_pk), &recipient.secret());

    salsa_box
        .decrypt(
            crypto_box::Nonce::from_slice(&boxed.nonce),
            boxed.ciphertext.as_ref(),
        )
        .map(Zeroizing::new)
        .map_err(|_| {
            CryptoError::Decryption("box open failed (wrong key or tampered data)".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_secret_bytes_derives_same_public_key() {
        let pair = UserKeyPair::generate();
        let restored = UserKeyPair::from_secret_bytes(pair.secret_bytes()).unwrap();
        assert_eq!(pair.public_bytes(), restored.public_bytes());
    }

    #[test]
    fn from_secret_bytes_rejects_short_input() {
        assert!(matches!(
            UserKeyPair::from_secret_bytes(&[0u8; 31]),
            Err(CryptoError::InvalidKeyLength { .. })
        ));
    }

    #[test]
    fn box_round_trip_between_two_users() {
        let alice = UserKeyPair::generate();
        let bob = UserKeyPair::generate();

        let boxed = seal_for(b"entry-key", &alice, &bob.public_bytes()).unwrap();
        let opened = open_from(&boxed, &alice.public_bytes(), &bob).unwrap();
        assert_eq!(&opened[..], b"entry-key");
    }

    #[test]
    fn box_requires_the_right_sender() {
        let alice = UserKeyPair::generate();
        let bob = UserKeyPair::generate();
        let mallory = UserKeyPair::generate();

        let boxed = seal_for(b"entry-key", &alice, &bob.public_bytes()).unwrap();
        assert!(open_from(&boxed, &mallory.public_bytes(), &bob).is_err());
    }

    #[test]
    fn debug_hides_secret() {
        let pair = UserKeyPair::generate();
        let printed = format!("{pair:?}");
        assert!(printed.contains("REDACTED"));
        assert!(!printed.contains(&hex::encode(pair.secret_bytes())));
    }
}
