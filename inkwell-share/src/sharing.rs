//! Share workflow: grant, revoke and tag membership propagation.
//!
//! Access to an entry is the set of [`EntryAccessKey`] rows for it. Sharing
//! re-boxes the owner's self-wrapped entry key for each recipient and stores
//! the results in one batch; revoking deletes rows. The entry key is never
//! rotated.

use crate::backend::SharingBackend;
use crate::config::ShareConfig;
use crate::error::{ShareError, ShareResult};
use crate::types::{
    EntryAccessKey, FailureReason, KeyBackup, PropagationReport, ShareFailure, ShareReport,
    public_key_fingerprint,
};
use futures::stream::{self, StreamExt};
use inkwell_crypto::{EncryptedEntryData, PUBLIC_KEY_SIZE, WrappedEntryKey, decode_public_key};
use inkwell_session::SessionManager;
use inkwell_types::{EntryId, JournalEntry, TagId, UserId};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Entries a user can reach through one tag, captured while the membership
/// row still exists.
///
/// Only [`SharingCoordinator::snapshot_shared_entries`] creates one and only
/// [`SharingCoordinator::propagate_tag_leave`] consumes it, so the snapshot
/// cannot be taken after the row is gone.
#[derive(Debug)]
#[must_use = "pass the snapshot to propagate_tag_leave after removing the membership"]
pub struct SharedEntriesSnapshot {
    tag_id: TagId,
    user_id: UserId,
    entries: Vec<EntryId>,
}

impl SharedEntriesSnapshot {
    pub fn tag_id(&self) -> TagId {
        self.tag_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn entries(&self) -> &[EntryId] {
        &self.entries
    }
}

/// Orchestrates entry sharing between the unlocked session and the backend.
pub struct SharingCoordinator {
    session: Arc<SessionManager>,
    backend: Arc<dyn SharingBackend>,
    config: ShareConfig,
}

impl SharingCoordinator {
    pub fn new(
        session: Arc<SessionManager>,
        backend: Arc<dyn SharingBackend>,
        config: ShareConfig,
    ) -> Self {
        Self {
            session,
            backend,
            config,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn backend(&self) -> &Arc<dyn SharingBackend> {
        &self.backend
    }

    pub fn config(&self) -> &ShareConfig {
        &self.config
    }

    // ── Keys ──

    /// Publishes this user's public key and wrapped-secret backup.
    pub async fn publish_keys(&self) -> ShareResult<KeyBackup> {
        let user_id = self.session.require_unlocked()?;
        let record = self
            .session
            .stored_keys()?
            .ok_or_else(|| ShareError::NotFound("local key record".to_string()))?;
        let public_key = decode_public_key(&record.public_key_b64)?;

        let backup = KeyBackup {
            user_id,
            public_key_b64: record.public_key_b64,
            encrypted_secret_key_b64: record.encrypted_secret_key_b64,
            fingerprint: public_key_fingerprint(&public_key),
        };
        self.call(self.backend.publish_keys(&backup)).await?;
        info!("published keys for {user_id} ({})", &backup.fingerprint[..16]);
        Ok(backup)
    }

    // ── Sharing ──

    /// Stores the owner's own self-boxed row for a new entry.
    pub async fn register_owner_access(
        &self,
        entry_id: EntryId,
        owner_key: &WrappedEntryKey,
    ) -> ShareResult<EntryAccessKey> {
        let owner = self.require_owner_key(owner_key)?;
        let row = EntryAccessKey::new(entry_id, owner, owner, owner_key.clone());
        self.call(self.backend.upsert_access_keys(std::slice::from_ref(&row)))
            .await?;
        debug!("registered owner access for entry {entry_id}");
        Ok(row)
    }

    /// Shares an entry with every current member of `tag_ids`.
    ///
    /// Users who already hold a row are skipped. Every other member gets the
    /// owner's entry key re-boxed to their public key; all successes land in
    /// one batch upsert, together with the owner's own row if it is missing.
    pub async fn share_entry(
        &self,
        entry_id: EntryId,
        tag_ids: &[TagId],
        owner_key: &WrappedEntryKey,
    ) -> ShareResult<ShareReport> {
        let owner = self.require_owner_key(owner_key)?;

        self.call(self.backend.link_entry_tags(entry_id, tag_ids))
            .await?;

        let mut members = BTreeSet::new();
        for tag_id in tag_ids {
            let tag_members = self.call(self.backend.tag_members(*tag_id)).await?;
            members.extend(tag_members.into_iter().map(|m| m.target_id));
        }
        members.remove(&owner);

        let existing: BTreeSet<UserId> = self
            .call(self.backend.list_access_user_ids(entry_id))
            .await?
            .into_iter()
            .collect();

        let mut report = ShareReport::default();
        let mut pending = Vec::new();
        for user_id in members {
            if existing.contains(&user_id) {
                report.already_granted.push(user_id);
            } else {
                pending.push(user_id);
            }
        }

        let (mut rows, failures) = self.wrap_for_recipients(entry_id, owner, owner_key, pending).await;
        report.granted = rows.iter().map(|row| row.user_id).collect();
        report.granted.sort();
        report.failures = failures;

        if !existing.contains(&owner) {
            rows.push(EntryAccessKey::new(entry_id, owner, owner, owner_key.clone()));
        }
        if !rows.is_empty() {
            self.call(self.backend.upsert_access_keys(&rows)).await?;
        }

        self.log_share(entry_id, &report);
        Ok(report)
    }

    /// Grants one more user access to an entry this user owns.
    pub async fn grant_access_to_existing_entry(
        &self,
        entry_id: EntryId,
        new_user_id: UserId,
    ) -> ShareResult<ShareReport> {
        let owner = self.session.require_unlocked()?;
        let owner_row = self.owner_row(entry_id, owner).await?;

        let mut report = ShareReport::default();
        if new_user_id == owner
            || self
                .call(self.backend.get_access_key(entry_id, new_user_id))
                .await?
                .is_some()
        {
            report.already_granted.push(new_user_id);
            return Ok(report);
        }

        let (rows, failures) = self
            .wrap_for_recipients(entry_id, owner, &owner_row.wrapped, vec![new_user_id])
            .await;
        if !rows.is_empty() {
            self.call(self.backend.upsert_access_keys(&rows)).await?;
        }
        report.granted = rows.iter().map(|row| row.user_id).collect();
        report.failures = failures;

        self.log_share(entry_id, &report);
        Ok(report)
    }

    pub async fn revoke_entry_access(&self, entry_id: EntryId, user_id: UserId) -> ShareResult<usize> {
        self.revoke_entry_access_for_users(entry_id, &[user_id]).await
    }

    /// Deletes the access rows of `user_ids` in one batch. The owner's own
    /// row is never removed here.
    pub async fn revoke_entry_access_for_users(
        &self,
        entry_id: EntryId,
        user_ids: &[UserId],
    ) -> ShareResult<usize> {
        let owner = self.session.require_unlocked()?;
        let targets: Vec<UserId> = user_ids
            .iter()
            .copied()
            .filter(|user| *user != owner)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if targets.is_empty() {
            return Ok(0);
        }

        let removed = self
            .call(self.backend.delete_access_keys(entry_id, &targets))
            .await?;
        info!("revoked {removed} access key(s) for entry {entry_id}");
        Ok(removed)
    }

    pub async fn has_access(&self, entry_id: EntryId, user_id: UserId) -> ShareResult<bool> {
        Ok(self
            .call(self.backend.get_access_key(entry_id, user_id))
            .await?
            .is_some())
    }

    /// The current user's access row for an entry.
    pub async fn fetch_access_key(&self, entry_id: EntryId) -> ShareResult<Option<EntryAccessKey>> {
        let user_id = self.session.require_unlocked()?;
        self.call(self.backend.get_access_key(entry_id, user_id)).await
    }

    /// Opens an entry shared with the current user.
    ///
    /// `content` may carry any recipient's wrapping; it is replaced by the
    /// current user's row. `Ok(None)` when there is no row or it does not open.
    pub async fn open_shared_entry(
        &self,
        content: &EncryptedEntryData,
        entry_id: EntryId,
        author_pk: &[u8; PUBLIC_KEY_SIZE],
    ) -> ShareResult<Option<JournalEntry>> {
        let Some(row) = self.fetch_access_key(entry_id).await? else {
            debug!("no access key for entry {entry_id}");
            return Ok(None);
        };
        let data = content.clone().with_wrapped_key(row.wrapped);
        Ok(self.session.decrypt_entry(&data, author_pk)?)
    }

    // ── Tag membership propagation ──

    /// Captures the entries `user_id` reaches through `tag_id`. Must run
    /// before the membership row is deleted.
    pub async fn snapshot_shared_entries(
        &self,
        tag_id: TagId,
        user_id: UserId,
    ) -> ShareResult<SharedEntriesSnapshot> {
        let entries = self
            .call(self.backend.shared_entries_for_member(tag_id, user_id))
            .await?;
        debug!(
            "snapshot of {} shared entries for {user_id} via tag {tag_id}",
            entries.len()
        );
        Ok(SharedEntriesSnapshot {
            tag_id,
            user_id,
            entries,
        })
    }

    /// Grants `user_id` every entry shared under `tag_id`. Call after the
    /// membership row exists.
    pub async fn propagate_tag_join(
        &self,
        tag_id: TagId,
        user_id: UserId,
    ) -> ShareResult<PropagationReport> {
        self.session.require_unlocked()?;
        let entries = self
            .call(self.backend.shared_entries_for_member(tag_id, user_id))
            .await?;

        let mut report = PropagationReport::default();
        for entry_id in entries {
            match self.grant_access_to_existing_entry(entry_id, user_id).await {
                Ok(share) => {
                    if !share.granted.is_empty() {
                        report.granted.push(entry_id);
                    } else if !share.already_granted.is_empty() {
                        report.retained.push(entry_id);
                    }
                    report.failures.extend(share.failures);
                }
                Err(ShareError::NotFound(_)) | Err(ShareError::Forbidden(_)) => {
                    report.failures.push(ShareFailure {
                        entry_id,
                        user_id,
                        reason: FailureReason::MissingOwnerKey,
                    });
                }
                Err(ShareError::Session(e)) => return Err(e.into()),
                Err(e) => report.failures.push(ShareFailure {
                    entry_id,
                    user_id,
                    reason: failure_reason(&e),
                }),
            }
        }

        self.log_propagation("join", tag_id, user_id, &report);
        Ok(report)
    }

    /// Revokes what `snapshot` captured, except entries the user owns or
    /// still reaches through another tag.
    pub async fn propagate_tag_leave(
        &self,
        snapshot: SharedEntriesSnapshot,
    ) -> ShareResult<PropagationReport> {
        self.session.require_unlocked()?;
        let SharedEntriesSnapshot {
            tag_id,
            user_id,
            entries,
        } = snapshot;

        let remaining: BTreeSet<TagId> = self
            .call(self.backend.tags_for_user(user_id))
            .await?
            .into_iter()
            .map(|m| m.tag_id)
            .filter(|id| *id != tag_id)
            .collect();

        let mut report = PropagationReport::default();
        for entry_id in entries {
            match self.revoke_unless_covered(entry_id, user_id, tag_id, &remaining).await {
                Ok(true) => report.revoked.push(entry_id),
                Ok(false) => report.retained.push(entry_id),
                Err(e) => report.failures.push(ShareFailure {
                    entry_id,
                    user_id,
                    reason: failure_reason(&e),
                }),
            }
        }

        self.log_propagation("leave", tag_id, user_id, &report);
        Ok(report)
    }

    async fn revoke_unless_covered(
        &self,
        entry_id: EntryId,
        user_id: UserId,
        tag_id: TagId,
        remaining: &BTreeSet<TagId>,
    ) -> ShareResult<bool> {
        let row = self.call(self.backend.get_access_key(entry_id, user_id)).await?;
        if row.as_ref().is_some_and(EntryAccessKey::is_owner_row) {
            return Ok(false);
        }

        let covered = self
            .call(self.backend.tags_for_entry(entry_id))
            .await?
            .into_iter()
            .any(|t| t != tag_id && remaining.contains(&t));
        if covered {
            debug!("{user_id} keeps entry {entry_id} through another tag");
            return Ok(false);
        }

        let removed = self
            .call(self.backend.delete_access_keys(entry_id, &[user_id]))
            .await?;
        Ok(removed > 0)
    }

    // ── Internals ──

    /// Checks the session is unlocked and the wrapped key opens for its owner.
    fn require_owner_key(&self, owner_key: &WrappedEntryKey) -> ShareResult<UserId> {
        let owner = self.session.require_unlocked()?;
        let own_pk = self.session.public_key().ok_or(inkwell_session::SessionError::Locked)?;
        if self.session.unwrap_entry_key(owner_key, &own_pk)?.is_none() {
            return Err(ShareError::InvalidInput(
                "entry key is not self-boxed by the current user".to_string(),
            ));
        }
        Ok(owner)
    }

    async fn owner_row(&self, entry_id: EntryId, owner: UserId) -> ShareResult<EntryAccessKey> {
        let row = self
            .call(self.backend.get_access_key(entry_id, owner))
            .await?
            .ok_or_else(|| ShareError::NotFound(format!("owner access key for entry {entry_id}")))?;
        if !row.is_owner_row() {
            return Err(ShareError::Forbidden(format!(
                "entry {entry_id} was shared with, not authored by, the current user"
            )));
        }
        Ok(row)
    }

    /// Looks up each recipient's public key and re-boxes the owner key for
    /// them, with bounded concurrency. Never fails as a whole.
    async fn wrap_for_recipients(
        &self,
        entry_id: EntryId,
        owner: UserId,
        owner_key: &WrappedEntryKey,
        recipients: Vec<UserId>,
    ) -> (Vec<EntryAccessKey>, Vec<ShareFailure>) {
        let outcomes: Vec<(UserId, Result<WrappedEntryKey, FailureReason>)> = stream::iter(recipients)
            .map(|user_id| async move { (user_id, self.wrap_for(owner_key, user_id).await) })
            .buffer_unordered(self.config.concurrency())
            .collect()
            .await;

        let mut rows = Vec::new();
        let mut failures = Vec::new();
        for (user_id, outcome) in outcomes {
            match outcome {
                Ok(wrapped) => rows.push(EntryAccessKey::new(entry_id, user_id, owner, wrapped)),
                Err(reason) => {
                    warn!("could not grant entry {entry_id} to {user_id}: {reason:?}");
                    failures.push(ShareFailure {
                        entry_id,
                        user_id,
                        reason,
                    });
                }
            }
        }
        (rows, failures)
    }

    async fn wrap_for(
        &self,
        owner_key: &WrappedEntryKey,
        user_id: UserId,
    ) -> Result<WrappedEntryKey, FailureReason> {
        let public_key = match self.call(self.backend.get_public_key(user_id)).await {
            Ok(Some(pk)) => pk,
            Ok(None) => return Err(FailureReason::MissingPublicKey),
            Err(e) => return Err(failure_reason(&e)),
        };
        match self.session.rewrap_entry_key(owner_key, &public_key) {
            Ok(Some(wrapped)) => Ok(wrapped),
            Ok(None) | Err(_) => Err(FailureReason::RewrapFailed),
        }
    }

    /// Runs a backend call under the configured timeout.
    pub(crate) async fn call<T>(&self, fut: impl Future<Output = ShareResult<T>>) -> ShareResult<T> {
        let limit = self.config.request_timeout();
        tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| ShareError::Timeout(limit))?
    }

    fn log_share(&self, entry_id: EntryId, report: &ShareReport) {
        info!(
            "shared entry {entry_id}: {} granted, {} already had access, {} failed",
            report.granted.len(),
            report.already_granted.len(),
            report.failures.len()
        );
    }

    fn log_propagation(&self, kind: &str, tag_id: TagId, user_id: UserId, report: &PropagationReport) {
        if report.failures.is_empty() {
            info!(
                "tag {kind} for {user_id} on {tag_id}: {} granted, {} revoked, {} retained",
                report.granted.len(),
                report.revoked.len(),
                report.retained.len()
            );
        } else {
            warn!(
                "tag {kind} for {user_id} on {tag_id} partially failed: {} failure(s)",
                report.failures.len()
            );
        }
    }
}

fn failure_reason(err: &ShareError) -> FailureReason {
    match err {
        ShareError::Timeout(_) => FailureReason::Timeout,
        other => FailureReason::Backend(other.to_string()),
    }
}
