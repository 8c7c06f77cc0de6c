//! Per-entry encryption with multi-recipient key wrapping.
//!
//! Each entry gets one random symmetric key for its whole life. Content is
//! sealed under that key with ChaCha20-Poly1305; the key itself is boxed to
//! each reader. The author's own copy is boxed to the author's own public key,
//! so the owner is just another recipient and sharing is a matter of
//! re-boxing the same key bytes for someone else.

use crate::cipher::{self, EncryptedData, NONCE_SIZE, TAG_SIZE};
use crate::envelope::{self, BOX_NONCE_SIZE, BoxedPayload, PUBLIC_KEY_SIZE, UserKeyPair};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{KEY_SIZE, SymmetricKey, generate_random_key};
use base64::{Engine, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use inkwell_types::{JournalEntry, serde_b64};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Current entry encryption format version.
pub const ENTRY_FORMAT_VERSION: u8 = 1;

/// Length of a boxed entry key: the key plus the Poly1305 tag.
pub const WRAPPED_KEY_LEN: usize = KEY_SIZE + TAG_SIZE;

/// An entry key boxed for one recipient.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WrappedEntryKey {
    #[serde(rename = "encryptedEntryKeyB64", with = "serde_b64")]
    pub encrypted_entry_key: Vec<u8>,
    #[serde(rename = "keyNonceB64", with = "serde_b64")]
    pub key_nonce: [u8; BOX_NONCE_SIZE],
}

impl WrappedEntryKey {
    fn as_boxed(&self) -> BoxedPayload {
        BoxedPayload {
            nonce: self.key_nonce,
            ciphertext: self.encrypted_entry_key.clone(),
        }
    }
}

impl From<BoxedPayload> for WrappedEntryKey {
    fn from(boxed: BoxedPayload) -> Self {
        Self {
            encrypted_entry_key: boxed.ciphertext,
            key_nonce: boxed.nonce,
        }
    }
}

/// Encrypted entry content plus one recipient's wrapping of the entry key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedEntryData {
    pub encrypted_content: Vec<u8>,
    pub content_nonce: [u8; NONCE_SIZE],
    pub encrypted_entry_key: Vec<u8>,
    pub key_nonce: [u8; BOX_NONCE_SIZE],
}

impl EncryptedEntryData {
    /// The wrapped key carried by this record.
    pub fn wrapped_key(&self) -> WrappedEntryKey {
        WrappedEntryKey {
            encrypted_entry_key: self.encrypted_entry_key.clone(),
            key_nonce: self.key_nonce,
        }
    }

    /// Same content, different recipient wrapping.
    pub fn with_wrapped_key(mut self, wrapped: WrappedEntryKey) -> Self {
        self.encrypted_entry_key = wrapped.encrypted_entry_key;
        self.key_nonce = wrapped.key_nonce;
        self
    }

    fn content(&self) -> EncryptedData {
        EncryptedData {
            nonce: self.content_nonce,
            ciphertext: self.encrypted_content.clone(),
        }
    }

    pub fn to_wire(&self) -> EncryptedEntryWire {
        EncryptedEntryWire {
            encrypted_content_b64: STANDARD.encode(&self.encrypted_content),
            content_nonce_b64: STANDARD.encode(self.content_nonce),
            encrypted_entry_key_b64: STANDARD.encode(&self.encrypted_entry_key),
            key_nonce_b64: STANDARD.encode(self.key_nonce),
        }
    }

    /// Decodes and shape-checks a wire record.
    pub fn from_wire(wire: &EncryptedEntryWire) -> CryptoResult<Self> {
        let encrypted_content = decode_field("encryptedContentB64", &wire.encrypted_content_b64)?;
        let content_nonce = decode_array("contentNonceB64", &wire.content_nonce_b64)?;
        let encrypted_entry_key =
            decode_field("encryptedEntryKeyB64", &wire.encrypted_entry_key_b64)?;
        let key_nonce = decode_array("keyNonceB64", &wire.key_nonce_b64)?;

        if encrypted_content.len() < TAG_SIZE {
            return Err(CryptoError::Encoding(
                "encryptedContentB64 shorter than an authentication tag".to_string(),
            ));
        }
        if encrypted_entry_key.len() != WRAPPED_KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: WRAPPED_KEY_LEN,
                actual: encrypted_entry_key.len(),
            });
        }

        Ok(Self {
            encrypted_content,
            content_nonce,
            encrypted_entry_key,
            key_nonce,
        })
    }
}

/// Wire form of [`EncryptedEntryData`], field names fixed by the storage
/// collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedEntryWire {
    #[serde(rename = "encryptedContentB64")]
    pub encrypted_content_b64: String,
    #[serde(rename = "contentNonceB64")]
    pub content_nonce_b64: String,
    #[serde(rename = "encryptedEntryKeyB64")]
    pub encrypted_entry_key_b64: String,
    #[serde(rename = "keyNonceB64")]
    pub key_nonce_b64: String,
}

fn decode_field(name: &str, value: &str) -> CryptoResult<Vec<u8>> {
    STANDARD
        .decode(value.as_bytes())
        .map_err(|e| CryptoError::Encoding(format!("{name}: {e}")))
}

fn decode_array<const N: usize>(name: &str, value: &str) -> CryptoResult<[u8; N]> {
    let bytes = decode_field(name, value)?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| CryptoError::Encoding(format!("{name}: expected {N} bytes, got {len}")))
}

/// Structural check run before attempting decryption.
pub fn validate_encrypted_entry_data(wire: &EncryptedEntryWire) -> bool {
    EncryptedEntryData::from_wire(wire).is_ok()
}

/// Why a decrypt attempt failed. Callers of [`decrypt_entry`] only see
/// `None`; this split exists for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecryptFailure {
    /// The wrapped key did not open: wrong recipient or wrong author key.
    KeyUnwrap,
    /// The key opened but the content failed authentication.
    ContentIntegrity,
    /// The content authenticated but is not a valid entry.
    Malformed,
}

/// Encrypts a new entry under a fresh entry key, self-boxed to the owner.
pub fn encrypt_entry(entry: &JournalEntry, owner: &UserKeyPair) -> CryptoResult<EncryptedEntryData> {
    let entry_key = generate_random_key();
    let content = seal_content(entry, &entry_key)?;
    let wrapped = wrap_entry_key(&entry_key, owner, &owner.public_bytes())?;

    Ok(EncryptedEntryData {
        encrypted_content: content.ciphertext,
        content_nonce: content.nonce,
        encrypted_entry_key: wrapped.encrypted_entry_key,
        key_nonce: wrapped.key_nonce,
    })
}

/// Re-encrypts an edited entry under its existing key.
///
/// Only the content and its nonce change. The wrapped key is carried over
/// byte for byte, so every recipient's access key stays valid.
pub fn encrypt_entry_with_existing_key(
    entry: &JournalEntry,
    previous: &EncryptedEntryData,
    owner: &UserKeyPair,
) -> CryptoResult<EncryptedEntryData> {
    let entry_key = unwrap_entry_key(&previous.wrapped_key(), &owner.public_bytes(), owner)
        .ok_or_else(|| {
            CryptoError::Decryption("existing entry key does not open for owner".to_string())
        })?;
    let content = seal_content(entry, &entry_key)?;

    Ok(EncryptedEntryData {
        encrypted_content: content.ciphertext,
        content_nonce: content.nonce,
        encrypted_entry_key: previous.encrypted_entry_key.clone(),
        key_nonce: previous.key_nonce,
    })
}

fn seal_content(entry: &JournalEntry, entry_key: &SymmetricKey) -> CryptoResult<EncryptedData> {
    let plaintext = Zeroizing::new(serde_json::to_vec(entry)?);
    cipher::encrypt(entry_key, &plaintext)
}

/// Decrypts an entry, or `None` if anything about it fails.
pub fn decrypt_entry(
    data: &EncryptedEntryData,
    recipient: &UserKeyPair,
    author_pk: &[u8; PUBLIC_KEY_SIZE],
) -> Option<JournalEntry> {
    match try_decrypt_entry(data, recipient, author_pk) {
        Ok(entry) => Some(entry),
        Err(DecryptFailure::KeyUnwrap) => {
            debug!(target: "inkwell::auth", "entry key did not open for recipient");
            None
        }
        Err(failure) => {
            warn!(target: "inkwell::integrity", ?failure, "entry content rejected");
            None
        }
    }
}

/// Like [`decrypt_entry`] but reports which stage failed.
pub fn try_decrypt_entry(
    data: &EncryptedEntryData,
    recipient: &UserKeyPair,
    author_pk: &[u8; PUBLIC_KEY_SIZE],
) -> Result<JournalEntry, DecryptFailure> {
    let entry_key =
        unwrap_entry_key(&data.wrapped_key(), author_pk, recipient).ok_or(DecryptFailure::KeyUnwrap)?;
    let plaintext =
        cipher::decrypt(&entry_key, &data.content()).map_err(|_| DecryptFailure::ContentIntegrity)?;
    serde_json::from_slice(&plaintext).map_err(|_| DecryptFailure::Malformed)
}

/// Boxes an entry key from `sender` to `recipient_pk`.
pub fn wrap_entry_key(
    entry_key: &SymmetricKey,
    sender: &UserKeyPair,
    recipient_pk: &[u8; PUBLIC_KEY_SIZE],
) -> CryptoResult<WrappedEntryKey> {
    envelope::seal_for(entry_key.as_bytes(), sender, recipient_pk).map(WrappedEntryKey::from)
}

/// Opens a wrapped entry key boxed by `author_pk` for `recipient`.
pub fn unwrap_entry_key(
    wrapped: &WrappedEntryKey,
    author_pk: &[u8; PUBLIC_KEY_SIZE],
    recipient: &UserKeyPair,
) -> Option<SymmetricKey> {
    let opened = envelope::open_from(&wrapped.as_boxed(), author_pk, recipient).ok()?;
    SymmetricKey::from_slice(&opened).ok()
}

/// Re-boxes the owner's self-wrapped entry key for another recipient.
///
/// The key bytes are unchanged; only the wrapping and its nonce are new.
pub fn rewrap_entry_key(
    owner_wrapped: &WrappedEntryKey,
    owner: &UserKeyPair,
    recipient_pk: &[u8; PUBLIC_KEY_SIZE],
) -> Option<WrappedEntryKey> {
    let Some(entry_key) = unwrap_entry_key(owner_wrapped, &owner.public_bytes(), owner) else {
        debug!(target: "inkwell::auth", "owner copy of entry key did not open");
        return None;
    };

    match wrap_entry_key(&entry_key, owner, recipient_pk) {
        Ok(wrapped) => Some(wrapped),
        Err(e) => {
            warn!("rewrap failed: {e}");
            None
        }
    }
}

/// Algorithm identifiers stored next to encrypted entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionMetadata {
    pub version: u8,
    pub content_cipher: String,
    pub key_wrap: String,
    pub kdf: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// Describes the current entry encryption format.
pub fn create_encryption_metadata() -> EncryptionMetadata {
    EncryptionMetadata {
        version: ENTRY_FORMAT_VERSION,
        content_cipher: "chacha20-poly1305".to_string(),
        key_wrap: "x25519-xsalsa20-poly1305".to_string(),
        kdf: "argon2id".to_string(),
        hash: "sha-256".to_string(),
        created_at: Utc::now(),
    }
}
