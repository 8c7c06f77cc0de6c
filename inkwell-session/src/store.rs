//! Persisted key record and the stores that hold it.
//!
//! The record is the single source of truth for a user's key material on a
//! device. Writers always replace it as a whole; there is no field-level
//! update path, so a crash can never leave a half-written record behind.

use crate::error::{SessionError, SessionResult};
use inkwell_types::UserId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Locally persisted key record. The secret key only ever appears wrapped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredUserKeys {
    pub encrypted_secret_key_b64: String,
    pub public_key_b64: String,
    pub user_id: UserId,
    #[serde(default)]
    pub biometric_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_password_b64: Option<String>,
}

/// Storage for the single key record of this device.
pub trait KeyStore: Send + Sync {
    /// Reads the record, if one has been written.
    fn load(&self) -> SessionResult<Option<StoredUserKeys>>;

    /// Replaces the whole record.
    fn save(&self, record: &StoredUserKeys) -> SessionResult<()>;

    /// Deletes the record. Only the account-deletion flow calls this.
    fn clear(&self) -> SessionResult<()>;
}

/// In-memory store for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryKeyStore {
    record: RwLock<Option<StoredUserKeys>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyStore for MemoryKeyStore {
    fn load(&self) -> SessionResult<Option<StoredUserKeys>> {
        Ok(self
            .record
            .read()
            .map_err(|_| SessionError::Poisoned)?
            .clone())
    }

    fn save(&self, record: &StoredUserKeys) -> SessionResult<()> {
        *self.record.write().map_err(|_| SessionError::Poisoned)? = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> SessionResult<()> {
        *self.record.write().map_err(|_| SessionError::Poisoned)? = None;
        Ok(())
    }
}

/// JSON file store. Saves go through a sibling temp file and a rename.
pub struct FileKeyStore {
    path: PathBuf,
}

impl FileKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl KeyStore for FileKeyStore {
    fn load(&self) -> SessionResult<Option<StoredUserKeys>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, record: &StoredUserKeys) -> SessionResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!("persisted key record to {}", self.path.display());
        Ok(())
    }

    fn clear(&self) -> SessionResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn record() -> StoredUserKeys {
        StoredUserKeys {
            encrypted_secret_key_b64: "c2VjcmV0".into(),
            public_key_b64: "cHVibGlj".into(),
            user_id: UserId::new(),
            biometric_enabled: false,
            encrypted_password_b64: None,
        }
    }

    #[test]
    fn record_uses_wire_field_names() {
        let json = serde_json::to_value(record()).unwrap();
        assert!(json.get("encryptedSecretKeyB64").is_some());
        assert!(json.get("publicKeyB64").is_some());
        assert!(json.get("userId").is_some());
        assert!(json.get("biometricEnabled").is_some());
        assert!(json.get("encryptedPasswordB64").is_none());
    }

    #[test]
    fn optional_fields_default_when_missing() {
        let json = serde_json::json!({
            "encryptedSecretKeyB64": "a",
            "publicKeyB64": "b",
            "userId": UserId::new(),
        });
        let parsed: StoredUserKeys = serde_json::from_value(json).unwrap();
        assert!(!parsed.biometric_enabled);
        assert_eq!(parsed.encrypted_password_b64, None);
    }

    #[test]
    fn file_store_round_trip_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileKeyStore::new(dir.path().join("keys").join("user.json"));
        assert_eq!(store.load().unwrap(), None);

        let rec = record();
        store.save(&rec).unwrap();
        assert_eq!(store.load().unwrap(), Some(rec.clone()));
        assert!(!store.temp_path().exists());

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        store.clear().unwrap();
    }

    #[test]
    fn memory_store_replaces_whole_record() {
        let store = MemoryKeyStore::new();
        let first = record();
        let second = record();
        store.save(&first).unwrap();
        store.save(&second).unwrap();
        assert_eq!(store.load().unwrap(), Some(second));
    }
}
