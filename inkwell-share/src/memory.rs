//! In-process backend for local-only mode and tests.

use crate::backend::SharingBackend;
use crate::error::{ShareError, ShareResult};
use crate::types::{EntryAccessKey, KeyBackup, Tag, UserTag};
use async_trait::async_trait;
use inkwell_crypto::{PUBLIC_KEY_SIZE, decode_public_key};
use inkwell_types::{EntryId, TagId, UserId};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Default)]
struct MemoryState {
    keys: HashMap<UserId, KeyBackup>,
    access: BTreeMap<(EntryId, UserId), EntryAccessKey>,
    entry_tags: HashMap<EntryId, BTreeSet<TagId>>,
    tags: HashMap<TagId, Tag>,
    memberships: BTreeMap<(TagId, UserId), UserTag>,
}

/// Backend that keeps everything in memory behind one lock.
#[derive(Default)]
pub struct MemoryBackend {
    state: RwLock<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of access rows, across all entries.
    pub async fn access_key_count(&self) -> usize {
        self.state.read().await.access.len()
    }
}

#[async_trait]
impl SharingBackend for MemoryBackend {
    async fn get_public_key(&self, user_id: UserId) -> ShareResult<Option<[u8; PUBLIC_KEY_SIZE]>> {
        let state = self.state.read().await;
        match state.keys.get(&user_id) {
            Some(backup) => Ok(Some(decode_public_key(&backup.public_key_b64)?)),
            None => Ok(None),
        }
    }

    async fn publish_keys(&self, backup: &KeyBackup) -> ShareResult<()> {
        decode_public_key(&backup.public_key_b64)?;
        self.state
            .write()
            .await
            .keys
            .insert(backup.user_id, backup.clone());
        Ok(())
    }

    async fn get_key_backup(&self, user_id: UserId) -> ShareResult<Option<KeyBackup>> {
        Ok(self.state.read().await.keys.get(&user_id).cloned())
    }

    async fn get_access_key(
        &self,
        entry_id: EntryId,
        user_id: UserId,
    ) -> ShareResult<Option<EntryAccessKey>> {
        Ok(self
            .state
            .read()
            .await
            .access
            .get(&(entry_id, user_id))
            .cloned())
    }

    async fn list_access_user_ids(&self, entry_id: EntryId) -> ShareResult<Vec<UserId>> {
        let state = self.state.read().await;
        Ok(state
            .access
            .keys()
            .filter(|(entry, _)| *entry == entry_id)
            .map(|(_, user)| *user)
            .collect())
    }

    async fn upsert_access_keys(&self, keys: &[EntryAccessKey]) -> ShareResult<()> {
        let mut state = self.state.write().await;
        for key in keys {
            state.access.insert((key.entry_id, key.user_id), key.clone());
        }
        debug!("upserted {} access keys", keys.len());
        Ok(())
    }

    async fn delete_access_keys(&self, entry_id: EntryId, user_ids: &[UserId]) -> ShareResult<usize> {
        let mut state = self.state.write().await;
        Ok(user_ids
            .iter()
            .filter(|user| state.access.remove(&(entry_id, **user)).is_some())
            .count())
    }

    async fn link_entry_tags(&self, entry_id: EntryId, tag_ids: &[TagId]) -> ShareResult<()> {
        let mut state = self.state.write().await;
        if let Some(missing) = tag_ids.iter().find(|id| !state.tags.contains_key(*id)) {
            return Err(ShareError::NotFound(format!("tag {missing}")));
        }
        state
            .entry_tags
            .entry(entry_id)
            .or_default()
            .extend(tag_ids.iter().copied());
        Ok(())
    }

    async fn tags_for_entry(&self, entry_id: EntryId) -> ShareResult<Vec<TagId>> {
        let state = self.state.read().await;
        Ok(state
            .entry_tags
            .get(&entry_id)
            .map(|tags| tags.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn shared_entries_for_member(
        &self,
        tag_id: TagId,
        user_id: UserId,
    ) -> ShareResult<Vec<EntryId>> {
        let state = self.state.read().await;
        if !state.memberships.contains_key(&(tag_id, user_id)) {
            return Ok(Vec::new());
        }
        let mut entries: Vec<EntryId> = state
            .entry_tags
            .iter()
            .filter(|(_, tags)| tags.contains(&tag_id))
            .map(|(entry, _)| *entry)
            .collect();
        entries.sort();
        Ok(entries)
    }

    async fn create_tag(&self, tag: &Tag) -> ShareResult<Tag> {
        let mut state = self.state.write().await;
        let duplicate = state
            .tags
            .values()
            .any(|t| t.owner_id == tag.owner_id && t.slug == tag.slug);
        if duplicate || state.tags.contains_key(&tag.id) {
            return Err(ShareError::Conflict(format!("tag '{}' already exists", tag.slug)));
        }
        state.tags.insert(tag.id, tag.clone());
        Ok(tag.clone())
    }

    async fn update_tag(&self, tag: &Tag) -> ShareResult<Tag> {
        let mut state = self.state.write().await;
        let clash = state
            .tags
            .values()
            .any(|t| t.id != tag.id && t.owner_id == tag.owner_id && t.slug == tag.slug);
        if clash {
            return Err(ShareError::Conflict(format!("tag '{}' already exists", tag.slug)));
        }
        match state.tags.get_mut(&tag.id) {
            Some(existing) => {
                *existing = tag.clone();
                Ok(tag.clone())
            }
            None => Err(ShareError::NotFound(format!("tag {}", tag.id))),
        }
    }

    async fn delete_tag(&self, tag_id: TagId) -> ShareResult<()> {
        let mut state = self.state.write().await;
        if state.tags.remove(&tag_id).is_none() {
            return Err(ShareError::NotFound(format!("tag {tag_id}")));
        }
        state.memberships.retain(|(tag, _), _| *tag != tag_id);
        for tags in state.entry_tags.values_mut() {
            tags.remove(&tag_id);
        }
        Ok(())
    }

    async fn get_tag(&self, tag_id: TagId) -> ShareResult<Option<Tag>> {
        Ok(self.state.read().await.tags.get(&tag_id).cloned())
    }

    async fn list_tags(&self, owner_id: UserId) -> ShareResult<Vec<Tag>> {
        let state = self.state.read().await;
        let mut tags: Vec<Tag> = state
            .tags
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect();
        tags.sort_by(|a, b| a.slug.cmp(&b.slug));
        Ok(tags)
    }

    async fn add_user_tag(&self, user_tag: &UserTag) -> ShareResult<UserTag> {
        let mut state = self.state.write().await;
        if !state.tags.contains_key(&user_tag.tag_id) {
            return Err(ShareError::NotFound(format!("tag {}", user_tag.tag_id)));
        }
        Ok(state
            .memberships
            .entry((user_tag.tag_id, user_tag.target_id))
            .or_insert_with(|| user_tag.clone())
            .clone())
    }

    async fn remove_user_tag(&self, tag_id: TagId, user_id: UserId) -> ShareResult<Option<UserTag>> {
        Ok(self
            .state
            .write()
            .await
            .memberships
            .remove(&(tag_id, user_id)))
    }

    async fn tag_members(&self, tag_id: TagId) -> ShareResult<Vec<UserTag>> {
        let state = self.state.read().await;
        Ok(state
            .memberships
            .values()
            .filter(|m| m.tag_id == tag_id)
            .cloned()
            .collect())
    }

    async fn tags_for_user(&self, user_id: UserId) -> ShareResult<Vec<UserTag>> {
        let state = self.state.read().await;
        Ok(state
            .memberships
            .values()
            .filter(|m| m.target_id == user_id)
            .cloned()
            .collect())
    }
}
