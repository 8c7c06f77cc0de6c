//! Encryption layer for Inkwell.
//!
//! Provides end-to-end encryption for journal entries using:
//! - Argon2id for deriving a wrapping key from the user's password
//! - ChaCha20-Poly1305 for entry content and the password-wrapped secret key
//! - X25519 + XSalsa20-Poly1305 boxes for wrapping entry keys per reader
//! - Zeroize-on-drop buffers for every piece of secret material
//!
//! # Architecture
//!
//! Keys form three tiers:
//!
//! 1. **Password key**: derived from the password with Argon2id each time the
//!    user unlocks. Never stored.
//!
//! 2. **User key pair**: one long-term X25519 pair per user. The secret half is
//!    persisted only wrapped under the password key.
//!
//! 3. **Entry key**: a random key per entry, generated once. It is boxed to
//!    every reader's public key, starting with the author's own.
//!
//! This allows:
//! - Changing the password without touching any entry
//! - Sharing an entry by boxing its key for one more public key
//! - Editing an entry without invalidating anyone's access

mod cipher;
pub mod digest;
pub mod entry;
pub mod envelope;
mod error;
mod key;
pub mod keys;
mod secret;

pub use cipher::{EncryptedData, NONCE_SIZE, TAG_SIZE, decrypt, encrypt};
pub use digest::{generate_content_hash, generate_preview_hash, generate_title_hash};
pub use entry::{
    DecryptFailure, EncryptedEntryData, EncryptedEntryWire, EncryptionMetadata, WrappedEntryKey,
    create_encryption_metadata, decrypt_entry, encrypt_entry, encrypt_entry_with_existing_key,
    rewrap_entry_key, try_decrypt_entry, unwrap_entry_key, validate_encrypted_entry_data,
    wrap_entry_key,
};
pub use envelope::{BOX_NONCE_SIZE, PUBLIC_KEY_SIZE, UserKeyPair};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    KEY_SIZE, KdfParams, MAX_KDF_ITERATIONS, MAX_KDF_MEMORY_KIB, MAX_KDF_PARALLELISM, SALT_SIZE,
    Salt, SymmetricKey, derive_key, generate_random_key,
};
pub use keys::{
    WrappedSecretKey, clear_key, clear_key_pair, decode_public_key, decrypt_secret_key,
    encrypt_secret_key, generate_user_key_pair, validate_key_pair,
};
pub use secret::SecretBytes;
