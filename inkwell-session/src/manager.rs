//! Session state machine.
//!
//! A session moves between `LoggedOut`, `Locked` and `Unlocked`. Only an
//! `Unlocked` session holds the user's secret key, and only in this object;
//! every operation that needs it goes through [`SessionManager`] and fails
//! with [`SessionError::Locked`] otherwise.

use crate::biometric::{self, BiometricAuthenticator};
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::store::{KeyStore, StoredUserKeys};
use base64::{Engine, engine::general_purpose::STANDARD};
use inkwell_crypto::{
    CryptoError, CryptoResult, EncryptedEntryData, PUBLIC_KEY_SIZE, SymmetricKey, UserKeyPair,
    WrappedEntryKey, WrappedSecretKey, clear_key_pair, decode_public_key, decrypt_secret_key,
    encrypt_secret_key, generate_user_key_pair, validate_key_pair,
};
use inkwell_types::{JournalEntry, UserId};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    LoggedOut,
    Locked,
    Unlocked,
}

/// Notifications published to [`SessionManager::subscribe`] receivers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged { from: SessionState, to: SessionState },
    UnlockFailed,
    PasswordChanged,
    BiometricChanged { enabled: bool },
}

struct SessionInner {
    state: SessionState,
    user_id: Option<UserId>,
    public_key: Option<[u8; PUBLIC_KEY_SIZE]>,
    key_pair: Option<UserKeyPair>,
}

impl SessionInner {
    fn logged_out() -> Self {
        Self {
            state: SessionState::LoggedOut,
            user_id: None,
            public_key: None,
            key_pair: None,
        }
    }

    fn wipe_key_pair(&mut self) {
        if let Some(mut pair) = self.key_pair.take() {
            clear_key_pair(&mut pair);
        }
    }
}

/// Owns one user's key material on this device.
///
/// Sessions are plain values: construct one per user and share it with
/// `Arc`. Two managers never see each other's keys.
pub struct SessionManager {
    config: SessionConfig,
    store: Arc<dyn KeyStore>,
    biometric: Option<Arc<dyn BiometricAuthenticator>>,
    inner: RwLock<SessionInner>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, store: Arc<dyn KeyStore>) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            config,
            store,
            biometric: None,
            inner: RwLock::new(SessionInner::logged_out()),
            events,
        }
    }

    /// Attaches a platform authenticator for biometric unlock.
    pub fn with_biometric(mut self, authenticator: Arc<dyn BiometricAuthenticator>) -> Self {
        self.biometric = Some(authenticator);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // ── State ──

    pub fn state(&self) -> SessionState {
        self.read()
            .map(|inner| inner.state)
            .unwrap_or(SessionState::LoggedOut)
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == SessionState::Unlocked
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.read().ok().and_then(|inner| inner.user_id)
    }

    pub fn public_key(&self) -> Option<[u8; PUBLIC_KEY_SIZE]> {
        self.read().ok().and_then(|inner| inner.public_key)
    }

    /// The persisted key record, as stored. Contains no cleartext secrets.
    pub fn stored_keys(&self) -> SessionResult<Option<StoredUserKeys>> {
        self.store.load()
    }

    /// Returns the user id, or `Locked` unless the session is unlocked.
    pub fn require_unlocked(&self) -> SessionResult<UserId> {
        let inner = self.read()?;
        match (inner.state, inner.user_id) {
            (SessionState::Unlocked, Some(user_id)) => Ok(user_id),
            _ => Err(SessionError::Locked),
        }
    }

    // ── Account lifecycle ──

    /// Creates the account on this device and leaves the session unlocked.
    pub fn sign_up(&self, user_id: UserId, password: &[u8]) -> SessionResult<()> {
        self.check_password_len(password)?;
        if self.store.load()?.is_some() {
            return Err(SessionError::AccountExists);
        }

        let pair = generate_user_key_pair();
        let wrapped = encrypt_secret_key(pair.secret_bytes(), password, &self.config.kdf)?;
        let record = StoredUserKeys {
            encrypted_secret_key_b64: wrapped.to_b64()?,
            public_key_b64: STANDARD.encode(pair.public_bytes()),
            user_id,
            biometric_enabled: false,
            encrypted_password_b64: None,
        };
        self.store.save(&record)?;

        info!(target: "inkwell::auth", %user_id, "account created");
        self.activate(user_id, pair)
    }

    /// Moves a logged-out session to `Locked` if a key record exists.
    ///
    /// Returns whether a record was found. The user id and public key become
    /// readable; the secret stays wrapped.
    pub fn load_from_storage(&self) -> SessionResult<bool> {
        let Some(record) = self.store.load()? else {
            return Ok(false);
        };
        let public_key = decode_public_key(&record.public_key_b64)?;

        let mut inner = self.write()?;
        if inner.state != SessionState::LoggedOut {
            return Ok(true);
        }
        inner.user_id = Some(record.user_id);
        inner.public_key = Some(public_key);
        let from = self.transition(&mut inner, SessionState::Locked);
        drop(inner);
        self.emit_state(from, SessionState::Locked);
        Ok(true)
    }

    /// Unlocks with the account password.
    ///
    /// Any failure leaves the state untouched and reports the same
    /// `InvalidCredentials` whether the account or the password was wrong.
    pub fn login(&self, password: &[u8]) -> SessionResult<()> {
        if self.state() == SessionState::LoggedOut {
            match self.load_from_storage() {
                Ok(true) => {}
                Ok(false) => return Err(self.unlock_failed("no key record on this device")),
                Err(SessionError::Crypto(e)) => return Err(self.corrupted_record(&e)),
                Err(e) => return Err(e),
            }
        }
        let Some(record) = self.store.load()? else {
            return Err(self.unlock_failed("key record disappeared"));
        };

        let pair = match open_key_record(&record, password) {
            Ok(Some(pair)) => pair,
            Ok(None) => return Err(self.unlock_failed("password rejected")),
            Err(e) => return Err(self.corrupted_record(&e)),
        };
        if !validate_key_pair(&pair) {
            warn!(
                target: "inkwell::integrity",
                user_id = %record.user_id,
                "stored public key does not match unwrapped secret"
            );
            return Err(self.unlock_failed("key pair validation failed"));
        }

        info!(target: "inkwell::auth", user_id = %record.user_id, "session unlocked");
        self.activate(record.user_id, pair)
    }

    /// Zeroes the in-memory secret and returns to `Locked`.
    pub fn lock(&self) -> SessionResult<()> {
        let mut inner = self.write()?;
        if inner.state != SessionState::Unlocked {
            return Ok(());
        }
        inner.wipe_key_pair();
        let from = self.transition(&mut inner, SessionState::Locked);
        drop(inner);

        debug!(target: "inkwell::auth", "session locked");
        self.emit_state(from, SessionState::Locked);
        Ok(())
    }

    /// Forgets everything in memory. The persisted record stays.
    pub fn logout(&self) -> SessionResult<()> {
        let mut inner = self.write()?;
        if inner.state == SessionState::LoggedOut {
            return Ok(());
        }
        inner.wipe_key_pair();
        inner.user_id = None;
        inner.public_key = None;
        let from = self.transition(&mut inner, SessionState::LoggedOut);
        drop(inner);

        debug!(target: "inkwell::auth", "session logged out");
        self.emit_state(from, SessionState::LoggedOut);
        Ok(())
    }

    /// Logs out and deletes the persisted key record.
    pub fn delete_account(&self) -> SessionResult<()> {
        self.logout()?;
        self.store.clear()?;
        info!(target: "inkwell::auth", "key record deleted");
        Ok(())
    }

    /// Re-wraps the secret key under a new password.
    ///
    /// The record is replaced as a whole only after the old password has
    /// opened it. Biometric unlock is switched off because the sealed copy
    /// would still hold the old password.
    pub fn change_password(&self, old_password: &[u8], new_password: &[u8]) -> SessionResult<()> {
        self.check_password_len(new_password)?;
        let record = self.store.load()?.ok_or(SessionError::InvalidCredentials)?;

        let wrapped = WrappedSecretKey::from_b64(&record.encrypted_secret_key_b64)?;
        let Some(secret) = decrypt_secret_key(&wrapped, old_password)? else {
            info!(target: "inkwell::auth", "password change rejected");
            return Err(SessionError::InvalidCredentials);
        };
        let pair = UserKeyPair::from_parts(decode_public_key(&record.public_key_b64)?, secret.expose())?;
        if !validate_key_pair(&pair) {
            warn!(target: "inkwell::integrity", "refusing to re-wrap inconsistent key pair");
            return Err(SessionError::InvalidCredentials);
        }

        let rewrapped = encrypt_secret_key(pair.secret_bytes(), new_password, &self.config.kdf)?;
        let had_biometric = record.biometric_enabled;
        self.store.save(&StoredUserKeys {
            encrypted_secret_key_b64: rewrapped.to_b64()?,
            biometric_enabled: false,
            encrypted_password_b64: None,
            ..record
        })?;

        info!(target: "inkwell::auth", "password changed");
        self.emit(SessionEvent::PasswordChanged);
        if had_biometric {
            self.emit(SessionEvent::BiometricChanged { enabled: false });
        }
        Ok(())
    }

    // ── Biometric unlock ──

    /// Seals the password behind the platform authenticator.
    pub fn enable_biometric(&self, password: &[u8]) -> SessionResult<()> {
        let authenticator = self.authenticator()?;
        let record = self.store.load()?.ok_or(SessionError::InvalidCredentials)?;

        let wrapped = WrappedSecretKey::from_b64(&record.encrypted_secret_key_b64)?;
        if decrypt_secret_key(&wrapped, password)?.is_none() {
            info!(target: "inkwell::auth", "biometric enrolment rejected");
            return Err(SessionError::InvalidCredentials);
        }

        authenticator.create_credential(record.user_id)?;
        let proof = authenticator.authenticate()?;
        let sealed = biometric::seal_password(password, &proof)?;
        self.store.save(&StoredUserKeys {
            biometric_enabled: true,
            encrypted_password_b64: Some(sealed),
            ..record
        })?;

        info!(target: "inkwell::auth", "biometric unlock enabled");
        self.emit(SessionEvent::BiometricChanged { enabled: true });
        Ok(())
    }

    pub fn disable_biometric(&self) -> SessionResult<()> {
        let Some(record) = self.store.load()? else {
            return Ok(());
        };
        if !record.biometric_enabled && record.encrypted_password_b64.is_none() {
            return Ok(());
        }
        self.store.save(&StoredUserKeys {
            biometric_enabled: false,
            encrypted_password_b64: None,
            ..record
        })?;

        info!(target: "inkwell::auth", "biometric unlock disabled");
        self.emit(SessionEvent::BiometricChanged { enabled: false });
        Ok(())
    }

    /// Unlocks through the platform authenticator, then the password path.
    pub fn login_with_biometric(&self) -> SessionResult<()> {
        let authenticator = self.authenticator()?;
        let record = self.store.load()?.ok_or(SessionError::InvalidCredentials)?;
        let sealed = match (record.biometric_enabled, record.encrypted_password_b64.as_deref()) {
            (true, Some(sealed)) => sealed,
            _ => {
                return Err(SessionError::BiometricUnavailable(
                    "biometric unlock is not enabled".to_string(),
                ));
            }
        };

        let proof = match authenticator.authenticate() {
            Ok(proof) => proof,
            Err(e) => {
                self.emit(SessionEvent::UnlockFailed);
                return Err(e);
            }
        };
        let password = match biometric::open_password(sealed, &proof) {
            Ok(password) => password,
            Err(e) => {
                info!(target: "inkwell::auth", "biometric proof did not open sealed password");
                self.emit(SessionEvent::UnlockFailed);
                return Err(e);
            }
        };
        self.login(password.expose())
    }

    // ── Gated entry crypto ──

    pub fn encrypt_entry(&self, entry: &JournalEntry) -> SessionResult<EncryptedEntryData> {
        Ok(self.with_key_pair(|pair| inkwell_crypto::encrypt_entry(entry, pair))??)
    }

    pub fn encrypt_entry_with_existing_key(
        &self,
        entry: &JournalEntry,
        previous: &EncryptedEntryData,
    ) -> SessionResult<EncryptedEntryData> {
        Ok(self.with_key_pair(|pair| {
            inkwell_crypto::encrypt_entry_with_existing_key(entry, previous, pair)
        })??)
    }

    /// Opens an entry boxed by `author_pk`. `Ok(None)` if it does not open.
    pub fn decrypt_entry(
        &self,
        data: &EncryptedEntryData,
        author_pk: &[u8; PUBLIC_KEY_SIZE],
    ) -> SessionResult<Option<JournalEntry>> {
        self.with_key_pair(|pair| inkwell_crypto::decrypt_entry(data, pair, author_pk))
    }

    /// Re-boxes this user's own wrapped entry key for `recipient_pk`.
    pub fn rewrap_entry_key(
        &self,
        owner_wrapped: &WrappedEntryKey,
        recipient_pk: &[u8; PUBLIC_KEY_SIZE],
    ) -> SessionResult<Option<WrappedEntryKey>> {
        self.with_key_pair(|pair| inkwell_crypto::rewrap_entry_key(owner_wrapped, pair, recipient_pk))
    }

    pub fn unwrap_entry_key(
        &self,
        wrapped: &WrappedEntryKey,
        author_pk: &[u8; PUBLIC_KEY_SIZE],
    ) -> SessionResult<Option<SymmetricKey>> {
        self.with_key_pair(|pair| inkwell_crypto::unwrap_entry_key(wrapped, author_pk, pair))
    }

    // ── Internals ──

    fn with_key_pair<T>(&self, f: impl FnOnce(&UserKeyPair) -> T) -> SessionResult<T> {
        let inner = self.read()?;
        match (&inner.state, inner.key_pair.as_ref()) {
            (SessionState::Unlocked, Some(pair)) => Ok(f(pair)),
            _ => Err(SessionError::Locked),
        }
    }

    fn activate(&self, user_id: UserId, pair: UserKeyPair) -> SessionResult<()> {
        let mut inner = self.write()?;
        inner.wipe_key_pair();
        inner.user_id = Some(user_id);
        inner.public_key = Some(pair.public_bytes());
        inner.key_pair = Some(pair);
        let from = self.transition(&mut inner, SessionState::Unlocked);
        drop(inner);
        self.emit_state(from, SessionState::Unlocked);
        Ok(())
    }

    fn transition(&self, inner: &mut SessionInner, to: SessionState) -> SessionState {
        std::mem::replace(&mut inner.state, to)
    }

    fn unlock_failed(&self, reason: &str) -> SessionError {
        info!(target: "inkwell::auth", reason, "unlock rejected");
        self.emit(SessionEvent::UnlockFailed);
        SessionError::InvalidCredentials
    }

    fn corrupted_record(&self, error: &CryptoError) -> SessionError {
        warn!(target: "inkwell::integrity", %error, "stored key record is unreadable");
        self.unlock_failed("key record is corrupted")
    }

    fn check_password_len(&self, password: &[u8]) -> SessionResult<()> {
        if password.len() < self.config.min_password_len {
            return Err(SessionError::PasswordTooShort {
                min: self.config.min_password_len,
            });
        }
        Ok(())
    }

    fn authenticator(&self) -> SessionResult<&Arc<dyn BiometricAuthenticator>> {
        let authenticator = self.biometric.as_ref().ok_or_else(|| {
            SessionError::BiometricUnavailable("no authenticator configured".to_string())
        })?;
        if !authenticator.is_supported() {
            return Err(SessionError::BiometricUnavailable(
                "platform does not support biometrics".to_string(),
            ));
        }
        Ok(authenticator)
    }

    fn emit_state(&self, from: SessionState, to: SessionState) {
        if from != to {
            self.emit(SessionEvent::StateChanged { from, to });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn read(&self) -> SessionResult<RwLockReadGuard<'_, SessionInner>> {
        self.inner.read().map_err(|_| SessionError::Poisoned)
    }

    fn write(&self) -> SessionResult<RwLockWriteGuard<'_, SessionInner>> {
        self.inner.write().map_err(|_| SessionError::Poisoned)
    }
}

/// Opens a stored record. `None` means the password was wrong.
fn open_key_record(record: &StoredUserKeys, password: &[u8]) -> CryptoResult<Option<UserKeyPair>> {
    let wrapped = WrappedSecretKey::from_b64(&record.encrypted_secret_key_b64)?;
    let Some(secret) = decrypt_secret_key(&wrapped, password)? else {
        return Ok(None);
    };
    let public_key = decode_public_key(&record.public_key_b64)?;
    Ok(Some(UserKeyPair::from_parts(public_key, secret.expose())?))
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("user_id", &self.user_id())
            .finish_non_exhaustive()
    }
}
