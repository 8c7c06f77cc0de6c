//! Storage contract for keys, access rows, tags and memberships.
//!
//! The sharing core never talks to storage directly; everything goes through
//! [`SharingBackend`]. [`crate::MemoryBackend`] serves local-only mode and
//! tests, [`crate::HttpBackend`] the hosted control plane.

use crate::error::ShareResult;
use crate::types::{EntryAccessKey, KeyBackup, Tag, UserTag};
use async_trait::async_trait;
use inkwell_crypto::PUBLIC_KEY_SIZE;
use inkwell_types::{EntryId, TagId, UserId};

#[async_trait]
pub trait SharingBackend: Send + Sync {
    // ── Key directory ──

    /// A user's published public key, or `None` if they never published one.
    async fn get_public_key(&self, user_id: UserId) -> ShareResult<Option<[u8; PUBLIC_KEY_SIZE]>>;

    /// Publishes (or replaces) a user's public key and wrapped-secret backup.
    async fn publish_keys(&self, backup: &KeyBackup) -> ShareResult<()>;

    async fn get_key_backup(&self, user_id: UserId) -> ShareResult<Option<KeyBackup>>;

    // ── Access keys ──

    async fn get_access_key(
        &self,
        entry_id: EntryId,
        user_id: UserId,
    ) -> ShareResult<Option<EntryAccessKey>>;

    /// Every user holding an access row for the entry, owner included.
    async fn list_access_user_ids(&self, entry_id: EntryId) -> ShareResult<Vec<UserId>>;

    /// Inserts or replaces rows by `(entry_id, user_id)`. All or nothing.
    async fn upsert_access_keys(&self, keys: &[EntryAccessKey]) -> ShareResult<()>;

    /// Deletes the rows of `user_ids` for one entry; returns how many existed.
    async fn delete_access_keys(&self, entry_id: EntryId, user_ids: &[UserId]) -> ShareResult<usize>;

    // ── Entry-tag links ──

    /// Adds links from the entry to each tag. Existing links are kept.
    async fn link_entry_tags(&self, entry_id: EntryId, tag_ids: &[TagId]) -> ShareResult<()>;

    async fn tags_for_entry(&self, entry_id: EntryId) -> ShareResult<Vec<TagId>>;

    /// Entries shared under `tag_id`, joined through the current membership
    /// of `user_id`. Empty once the membership row is gone.
    async fn shared_entries_for_member(
        &self,
        tag_id: TagId,
        user_id: UserId,
    ) -> ShareResult<Vec<EntryId>>;

    // ── Tags ──

    /// Stores a new tag. Fails with `Conflict` if the owner already has a
    /// tag with the same slug.
    async fn create_tag(&self, tag: &Tag) -> ShareResult<Tag>;

    async fn update_tag(&self, tag: &Tag) -> ShareResult<Tag>;

    /// Deletes the tag with its memberships and entry links.
    async fn delete_tag(&self, tag_id: TagId) -> ShareResult<()>;

    async fn get_tag(&self, tag_id: TagId) -> ShareResult<Option<Tag>>;

    async fn list_tags(&self, owner_id: UserId) -> ShareResult<Vec<Tag>>;

    // ── Memberships ──

    /// Creates the membership, or returns the existing one unchanged.
    async fn add_user_tag(&self, user_tag: &UserTag) -> ShareResult<UserTag>;

    /// Removes the membership, returning it if it existed.
    async fn remove_user_tag(&self, tag_id: TagId, user_id: UserId) -> ShareResult<Option<UserTag>>;

    async fn tag_members(&self, tag_id: TagId) -> ShareResult<Vec<UserTag>>;

    async fn tags_for_user(&self, user_id: UserId) -> ShareResult<Vec<UserTag>>;
}
