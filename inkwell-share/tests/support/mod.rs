//! Shared helpers for sharing integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use inkwell_crypto::{EncryptedEntryData, PUBLIC_KEY_SIZE};
use inkwell_session::{MemoryKeyStore, SessionConfig, SessionManager};
use inkwell_share::{
    EntryAccessKey, KeyBackup, MemoryBackend, ShareConfig, ShareError, ShareResult,
    SharingBackend, SharingCoordinator, Tag, TagAccessService, UserTag,
};
use inkwell_types::{EntryId, JournalEntry, TagId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const PASSWORD: &[u8] = b"correct horse battery";

/// Routes test logs through the test writer. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with a short per-call timeout.
pub fn fast_config() -> ShareConfig {
    ShareConfig {
        request_timeout_secs: 1,
        ..ShareConfig::default()
    }
}

// ── Recording backend ──

#[derive(Default)]
struct Faults {
    slow_public_keys: HashSet<UserId>,
    delay: Duration,
    slow_calls: HashMap<&'static str, Duration>,
    fail_snapshots: bool,
}

/// [`MemoryBackend`] that records every call by name and can inject faults.
#[derive(Default)]
pub struct RecordingBackend {
    inner: MemoryBackend,
    calls: Mutex<Vec<&'static str>>,
    faults: Mutex<Faults>,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == name).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    /// Position of the first call named `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.calls.lock().unwrap().iter().position(|c| *c == name)
    }

    /// Public key lookups for `user_id` stall for `delay` first.
    pub fn slow_public_key(&self, user_id: UserId, delay: Duration) {
        let mut faults = self.faults.lock().unwrap();
        faults.slow_public_keys.insert(user_id);
        faults.delay = delay;
    }

    pub fn clear_slow_public_keys(&self) {
        self.faults.lock().unwrap().slow_public_keys.clear();
    }

    /// Every call named `name` stalls for `delay` first.
    pub fn slow_call(&self, name: &'static str, delay: Duration) {
        self.faults.lock().unwrap().slow_calls.insert(name, delay);
    }

    pub fn fail_snapshots(&self, fail: bool) {
        self.faults.lock().unwrap().fail_snapshots = fail;
    }

    pub async fn access_key_count(&self) -> usize {
        self.inner.access_key_count().await
    }

    async fn enter(&self, name: &'static str) {
        self.calls.lock().unwrap().push(name);
        let delay = self.faults.lock().unwrap().slow_calls.get(name).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl SharingBackend for RecordingBackend {
    async fn get_public_key(&self, user_id: UserId) -> ShareResult<Option<[u8; PUBLIC_KEY_SIZE]>> {
        self.enter("get_public_key").await;
        let delay = {
            let faults = self.faults.lock().unwrap();
            faults
                .slow_public_keys
                .contains(&user_id)
                .then_some(faults.delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get_public_key(user_id).await
    }

    async fn publish_keys(&self, backup: &KeyBackup) -> ShareResult<()> {
        self.enter("publish_keys").await;
        self.inner.publish_keys(backup).await
    }

    async fn get_key_backup(&self, user_id: UserId) -> ShareResult<Option<KeyBackup>> {
        self.enter("get_key_backup").await;
        self.inner.get_key_backup(user_id).await
    }

    async fn get_access_key(
        &self,
        entry_id: EntryId,
        user_id: UserId,
    ) -> ShareResult<Option<EntryAccessKey>> {
        self.enter("get_access_key").await;
        self.inner.get_access_key(entry_id, user_id).await
    }

    async fn list_access_user_ids(&self, entry_id: EntryId) -> ShareResult<Vec<UserId>> {
        self.enter("list_access_user_ids").await;
        self.inner.list_access_user_ids(entry_id).await
    }

    async fn upsert_access_keys(&self, keys: &[EntryAccessKey]) -> ShareResult<()> {
        self.enter("upsert_access_keys").await;
        self.inner.upsert_access_keys(keys).await
    }

    async fn delete_access_keys(&self, entry_id: EntryId, user_ids: &[UserId]) -> ShareResult<usize> {
        self.enter("delete_access_keys").await;
        self.inner.delete_access_keys(entry_id, user_ids).await
    }

    async fn link_entry_tags(&self, entry_id: EntryId, tag_ids: &[TagId]) -> ShareResult<()> {
        self.enter("link_entry_tags").await;
        self.inner.link_entry_tags(entry_id, tag_ids).await
    }

    async fn tags_for_entry(&self, entry_id: EntryId) -> ShareResult<Vec<TagId>> {
        self.enter("tags_for_entry").await;
        self.inner.tags_for_entry(entry_id).await
    }

    async fn shared_entries_for_member(
        &self,
        tag_id: TagId,
        user_id: UserId,
    ) -> ShareResult<Vec<EntryId>> {
        self.enter("shared_entries_for_member").await;
        if self.faults.lock().unwrap().fail_snapshots {
            return Err(ShareError::Backend("injected snapshot failure".to_string()));
        }
        self.inner.shared_entries_for_member(tag_id, user_id).await
    }

    async fn create_tag(&self, tag: &Tag) -> ShareResult<Tag> {
        self.enter("create_tag").await;
        self.inner.create_tag(tag).await
    }

    async fn update_tag(&self, tag: &Tag) -> ShareResult<Tag> {
        self.enter("update_tag").await;
        self.inner.update_tag(tag).await
    }

    async fn delete_tag(&self, tag_id: TagId) -> ShareResult<()> {
        self.enter("delete_tag").await;
        self.inner.delete_tag(tag_id).await
    }

    async fn get_tag(&self, tag_id: TagId) -> ShareResult<Option<Tag>> {
        self.enter("get_tag").await;
        self.inner.get_tag(tag_id).await
    }

    async fn list_tags(&self, owner_id: UserId) -> ShareResult<Vec<Tag>> {
        self.enter("list_tags").await;
        self.inner.list_tags(owner_id).await
    }

    async fn add_user_tag(&self, user_tag: &UserTag) -> ShareResult<UserTag> {
        self.enter("add_user_tag").await;
        self.inner.add_user_tag(user_tag).await
    }

    async fn remove_user_tag(&self, tag_id: TagId, user_id: UserId) -> ShareResult<Option<UserTag>> {
        self.enter("remove_user_tag").await;
        self.inner.remove_user_tag(tag_id, user_id).await
    }

    async fn tag_members(&self, tag_id: TagId) -> ShareResult<Vec<UserTag>> {
        self.enter("tag_members").await;
        self.inner.tag_members(tag_id).await
    }

    async fn tags_for_user(&self, user_id: UserId) -> ShareResult<Vec<UserTag>> {
        self.enter("tags_for_user").await;
        self.inner.tags_for_user(user_id).await
    }
}

// ── Users ──

/// One signed-up user with their own session on a shared backend.
pub struct TestUser {
    pub id: UserId,
    pub session: Arc<SessionManager>,
    pub coordinator: Arc<SharingCoordinator>,
    pub tags: Arc<TagAccessService>,
}

impl TestUser {
    pub fn public_key(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.session.public_key().unwrap()
    }

    /// Encrypts a new entry and registers the owner's access row.
    pub async fn write_entry(&self, title: &str, content: &str) -> (JournalEntry, EncryptedEntryData) {
        let entry = JournalEntry::new(title, content);
        let encrypted = self.session.encrypt_entry(&entry).unwrap();
        self.coordinator
            .register_owner_access(entry.id, &encrypted.wrapped_key())
            .await
            .unwrap();
        (entry, encrypted)
    }

    pub async fn tag(&self, name: &str) -> Tag {
        self.tags.create_tag(name, None).await.unwrap()
    }
}

/// Signs up a user without publishing their keys.
pub fn unpublished_user(backend: Arc<dyn SharingBackend>, config: ShareConfig) -> TestUser {
    let session = Arc::new(SessionManager::new(
        SessionConfig::insecure_fast(),
        Arc::new(MemoryKeyStore::new()),
    ));
    let id = UserId::new();
    session.sign_up(id, PASSWORD).unwrap();

    let coordinator = Arc::new(SharingCoordinator::new(session.clone(), backend, config));
    let tags = Arc::new(TagAccessService::new(coordinator.clone()));
    TestUser {
        id,
        session,
        coordinator,
        tags,
    }
}

/// Signs up a user and publishes their keys.
pub async fn user(backend: Arc<dyn SharingBackend>, config: ShareConfig) -> TestUser {
    let user = unpublished_user(backend, config);
    user.coordinator.publish_keys().await.unwrap();
    user
}
