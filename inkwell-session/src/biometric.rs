//! Biometric unlock contract and password sealing.
//!
//! The platform authenticator only gates access to the password. Its proof
//! bytes are hashed into a key that seals the password; the Argon2id-wrapped
//! secret key stays the root of trust, so an unlock still goes through the
//! ordinary password path.

use crate::error::{SessionError, SessionResult};
use base64::{Engine, engine::general_purpose::STANDARD};
use inkwell_crypto::{EncryptedData, SALT_SIZE, SecretBytes, SymmetricKey, decrypt, encrypt};
use inkwell_types::UserId;
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Opaque handle to a platform credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialHandle(pub String);

/// Platform biometric authenticator.
pub trait BiometricAuthenticator: Send + Sync {
    fn is_supported(&self) -> bool;

    /// Registers a credential bound to `user_id`.
    fn create_credential(&self, user_id: UserId) -> SessionResult<CredentialHandle>;

    /// Prompts the user. Returns stable proof bytes for the registered
    /// credential, or `BiometricRejected`.
    fn authenticate(&self) -> SessionResult<SecretBytes>;
}

const BIOMETRIC_DOMAIN: &[u8] = b"inkwell-biometric-password-v1";

/// Password sealed under a key derived from biometric proof bytes.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct SealedPassword {
    salt: [u8; SALT_SIZE],
    encrypted: EncryptedData,
}

fn proof_key(proof: &SecretBytes, salt: &[u8; SALT_SIZE]) -> SymmetricKey {
    let mut hasher = Sha256::new();
    hasher.update(BIOMETRIC_DOMAIN);
    hasher.update(salt);
    hasher.update(proof.expose());
    SymmetricKey::from_bytes(hasher.finalize().into())
}

/// Seals `password` and returns the Base64 blob stored in the key record.
pub(crate) fn seal_password(password: &[u8], proof: &SecretBytes) -> SessionResult<String> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    let encrypted = encrypt(&proof_key(proof, &salt), password)?;
    let sealed = SealedPassword { salt, encrypted };
    Ok(STANDARD.encode(serde_json::to_vec(&sealed)?))
}

/// Opens a blob produced by [`seal_password`].
pub(crate) fn open_password(blob_b64: &str, proof: &SecretBytes) -> SessionResult<SecretBytes> {
    let bytes = STANDARD
        .decode(blob_b64.as_bytes())
        .map_err(|e| SessionError::Storage(format!("invalid biometric blob: {e}")))?;
    let sealed: SealedPassword = serde_json::from_slice(&bytes)?;
    let password = decrypt(&proof_key(proof, &sealed.salt), &sealed.encrypted)
        .map_err(|_| SessionError::BiometricRejected)?;
    Ok(SecretBytes::from_slice(&password))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let proof = SecretBytes::from_slice(b"platform-proof");
        let blob = seal_password(b"correct horse", &proof).unwrap();
        let password = open_password(&blob, &proof).unwrap();
        assert_eq!(password.expose(), b"correct horse");
    }

    #[test]
    fn different_proof_is_rejected() {
        let blob = seal_password(b"correct horse", &SecretBytes::from_slice(b"proof-a")).unwrap();
        let err = open_password(&blob, &SecretBytes::from_slice(b"proof-b")).unwrap_err();
        assert!(matches!(err, SessionError::BiometricRejected));
    }

    #[test]
    fn blob_does_not_contain_password() {
        let blob = seal_password(b"correct horse", &SecretBytes::from_slice(b"p")).unwrap();
        let raw = STANDARD.decode(blob).unwrap();
        assert!(!raw.windows(13).any(|w| w == b"correct horse"));
    }
}
