//! Long-term user key management.
//!
//! A user owns exactly one X25519 key pair. The secret half is persisted only
//! inside a [`WrappedSecretKey`]: Argon2id stretches the password into a
//! wrapping key and ChaCha20-Poly1305 seals the secret under it.

use crate::cipher::{self, EncryptedData};
use crate::envelope::{self, PUBLIC_KEY_SIZE, SECRET_KEY_SIZE, UserKeyPair};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{KdfParams, SALT_SIZE, Salt, derive_key};
use crate::secret::SecretBytes;
use base64::{Engine, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroize;

/// Current layout version of [`WrappedSecretKey`].
pub const WRAPPED_KEY_VERSION: u8 = 1;

const VALIDATION_SENTINEL: &[u8] = b"inkwell-keypair-validation-v1";

/// Password-protected secret key.
///
/// Carries everything except the password: the KDF parameters, the salt and
/// the sealed secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedSecretKey {
    pub version: u8,
    pub kdf: KdfParams,
    pub salt: [u8; SALT_SIZE],
    pub encrypted: EncryptedData,
}

impl WrappedSecretKey {
    /// Encodes the blob as Base64 of its JSON form.
    pub fn to_b64(&self) -> CryptoResult<String> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }

    /// Parses a blob produced by [`WrappedSecretKey::to_b64`].
    pub fn from_b64(encoded: &str) -> CryptoResult<Self> {
        let bytes = STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Generates a fresh key pair for a new account.
pub fn generate_user_key_pair() -> UserKeyPair {
    UserKeyPair::generate()
}

/// Wraps `secret_key` under a key derived from `password`.
///
/// Every call draws a new salt and nonce, so wrapping the same secret twice
/// produces unrelated blobs.
pub fn encrypt_secret_key(
    secret_key: &[u8],
    password: &[u8],
    params: &KdfParams,
) -> CryptoResult<WrappedSecretKey> {
    if secret_key.len() != SECRET_KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: SECRET_KEY_SIZE,
            actual: secret_key.len(),
        });
    }

    let salt = Salt::random();
    let wrapping_key = derive_key(password, &salt, params)?;
    let encrypted = cipher::encrypt(&wrapping_key, secret_key)?;

    Ok(WrappedSecretKey {
        version: WRAPPED_KEY_VERSION,
        kdf: *params,
        salt: *salt.as_bytes(),
        encrypted,
    })
}

/// Unwraps a secret key.
///
/// Returns `Ok(None)` when the password is wrong or the blob was corrupted;
/// both surface as a tag mismatch and are an expected outcome, not an error.
/// `Err` is reserved for blobs that cannot be processed at all.
pub fn decrypt_secret_key(
    wrapped: &WrappedSecretKey,
    password: &[u8],
) -> CryptoResult<Option<SecretBytes>> {
    if wrapped.version != WRAPPED_KEY_VERSION {
        return Err(CryptoError::UnsupportedVersion(wrapped.version));
    }

    wrapped.kdf.check_limits()?;

    let salt = Salt::from_bytes(wrapped.salt);
    let wrapping_key = derive_key(password, &salt, &wrapped.kdf)?;

    let plaintext = match cipher::decrypt(&wrapping_key, &wrapped.encrypted) {
        Ok(plaintext) => plaintext,
        Err(_) => {
            debug!(target: "inkwell::auth", "secret key unwrap rejected");
            return Ok(None);
        }
    };

    if plaintext.len() != SECRET_KEY_SIZE {
        debug!(
            target: "inkwell::integrity",
            len = plaintext.len(),
            "unwrapped secret key has wrong length"
        );
        return Ok(None);
    }

    Ok(Some(SecretBytes::from_slice(&plaintext)))
}

/// Checks that both halves of `pair` belong together.
///
/// The public key must be the one derived from the secret, and a sentinel
/// boxed from the pair to itself must open again.
pub fn validate_key_pair(pair: &UserKeyPair) -> bool {
    let derived = match UserKeyPair::from_secret_bytes(pair.secret_bytes()) {
        Ok(derived) => derived,
        Err(_) => return false,
    };
    if derived.public_bytes() != pair.public_bytes() {
        return false;
    }

    let own_pk = pair.public_bytes();
    envelope::seal_for(VALIDATION_SENTINEL, pair, &own_pk)
        .and_then(|boxed| envelope::open_from(&boxed, &own_pk, pair))
        .is_ok_and(|opened| opened.as_slice() == VALIDATION_SENTINEL)
}

/// Decodes a Base64 public key, checking its length.
pub fn decode_public_key(encoded: &str) -> CryptoResult<[u8; PUBLIC_KEY_SIZE]> {
    let bytes = STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: PUBLIC_KEY_SIZE,
            actual: bytes.len(),
        })
}

/// Overwrites a key buffer with zeros in place.
pub fn clear_key(buf: &mut [u8]) {
    buf.zeroize();
}

/// Wipes the secret half of `pair` in place.
pub fn clear_key_pair(pair: &mut UserKeyPair) {
    pair.zeroize();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> KdfParams {
        KdfParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn wrap_unwrap_round_trip() {
        let pair = generate_user_key_pair();
        let wrapped = encrypt_secret_key(pair.secret_bytes(), b"correct horse", &fast()).unwrap();
        let secret = decrypt_secret_key(&wrapped, b"correct horse")
            .unwrap()
            .expect("password is correct");
        assert_eq!(secret.expose(), pair.secret_bytes());
    }

    #[test]
    fn wrong_password_is_none_not_error() {
        let pair = generate_user_key_pair();
        let wrapped = encrypt_secret_key(pair.secret_bytes(), b"correct horse", &fast()).unwrap();
        assert!(decrypt_secret_key(&wrapped, b"battery staple").unwrap().is_none());
    }

    #[test]
    fn inflated_kdf_params_fail_fast() {
        let pair = generate_user_key_pair();
        let mut wrapped =
            encrypt_secret_key(pair.secret_bytes(), b"correct horse", &fast()).unwrap();
        wrapped.kdf.memory_kib = u32::MAX;
        wrapped.kdf.iterations = u32::MAX;

        let err = decrypt_secret_key(&wrapped, b"correct horse").unwrap_err();
        assert!(matches!(err, CryptoError::KeyDerivation(_)));
    }

    #[test]
    fn corrupted_blob_is_none() {
        let pair = generate_user_key_pair();
        let mut wrapped =
            encrypt_secret_key(pair.secret_bytes(), b"correct horse", &fast()).unwrap();
        wrapped.encrypted.ciphertext[3] ^= 0x40;
        assert!(decrypt_secret_key(&wrapped, b"correct horse").unwrap().is_none());
    }

    #[test]
    fn unknown_version_is_error() {
        let pair = generate_user_key_pair();
        let mut wrapped =
            encrypt_secret_key(pair.secret_bytes(), b"correct horse", &fast()).unwrap();
        wrapped.version = 9;
        assert!(matches!(
            decrypt_secret_key(&wrapped, b"correct horse"),
            Err(CryptoError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn each_wrap_uses_fresh_salt_and_nonce() {
        let pair = generate_user_key_pair();
        let a = encrypt_secret_key(pair.secret_bytes(), b"pw-pw-pw-pw", &fast()).unwrap();
        let b = encrypt_secret_key(pair.secret_bytes(), b"pw-pw-pw-pw", &fast()).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.encrypted, b.encrypted);
    }

    #[test]
    fn b64_round_trip_preserves_blob() {
        let pair = generate_user_key_pair();
        let wrapped = encrypt_secret_key(pair.secret_bytes(), b"pw-pw-pw-pw", &fast()).unwrap();
        let decoded = WrappedSecretKey::from_b64(&wrapped.to_b64().unwrap()).unwrap();
        assert_eq!(decoded, wrapped);
        assert!(WrappedSecretKey::from_b64("not base64!").is_err());
    }

    #[test]
    fn validate_accepts_real_pair_and_rejects_mismatch() {
        let pair = generate_user_key_pair();
        assert!(validate_key_pair(&pair));

        let other = generate_user_key_pair();
        let franken = UserKeyPair::from_parts(other.public_bytes(), pair.secret_bytes()).unwrap();
        assert!(!validate_key_pair(&franken));
    }

    #[test]
    fn clear_key_pair_wipes_secret() {
        let mut pair = generate_user_key_pair();
        let public = pair.public_bytes();
        clear_key_pair(&mut pair);
        assert_eq!(pair.secret_bytes(), &[0u8; SECRET_KEY_SIZE]);
        assert_eq!(pair.public_bytes(), public);
        assert!(!validate_key_pair(&pair));
    }

    #[test]
    fn clear_key_wipes_buffer() {
        let mut buf = [7u8; 32];
        clear_key(&mut buf);
        assert_eq!(buf, [0u8; 32]);
    }

    #[test]
    fn decode_public_key_checks_length() {
        let pair = generate_user_key_pair();
        let encoded = STANDARD.encode(pair.public_bytes());
        assert_eq!(decode_public_key(&encoded).unwrap(), pair.public_bytes());
        assert!(decode_public_key(&STANDARD.encode([1u8; 16])).is_err());
    }
}
