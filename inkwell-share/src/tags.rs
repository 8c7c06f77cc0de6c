//! Tag and membership management.
//!
//! Tags are the unit of sharing: an entry shared under a tag is readable by
//! every member. Membership changes here drive the grant and revoke
//! propagation in [`SharingCoordinator`].

use crate::backend::SharingBackend;
use crate::error::{ShareError, ShareResult};
use crate::sharing::SharingCoordinator;
use crate::types::{MembershipChange, PropagationReport, Tag, UserTag};
use chrono::Utc;
use inkwell_types::{TagId, UserId};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Colors assigned to tags created without an explicit one.
pub const TAG_PALETTE: [&str; 12] = [
    "#e5484d", "#f76b15", "#ffc53d", "#46a758", "#12a594", "#0d74ce", "#3e63dd", "#6e56cf",
    "#ab4aba", "#d6409f", "#a18072", "#8b8d98",
];

/// Lower-cased, trimmed form used for every tag-name comparison.
pub fn normalize_tag_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// URL-safe identifier for a tag name.
///
/// Letters and digits of any script are kept and runs of anything else
/// become one hyphen. If a character other than whitespace, `-` or `_` was
/// dropped, a short hash of the whole name is appended so that names such
/// as "C++" and "C#" keep distinct slugs. The result is percent-encoded.
pub fn slugify(name: &str) -> String {
    let normalized = normalize_tag_name(name);
    let mut base = String::with_capacity(normalized.len());
    let mut pending_hyphen = false;
    let mut lossy = false;
    for c in normalized.chars() {
        if c.is_alphanumeric() {
            if pending_hyphen && !base.is_empty() {
                base.push('-');
            }
            pending_hyphen = false;
            base.push(c);
        } else {
            lossy |= !(c.is_whitespace() || c == '-' || c == '_');
            pending_hyphen = true;
        }
    }

    let slug = if base.is_empty() {
        name_hash(&normalized)
    } else if lossy {
        format!("{base}-{}", name_hash(&normalized))
    } else {
        base
    };
    urlencoding::encode(&slug).into_owned()
}

fn name_hash(normalized: &str) -> String {
    hex::encode(&Sha256::digest(normalized.as_bytes())[..3])
}

/// Deterministic palette color for a tag name.
pub fn palette_color(name: &str) -> &'static str {
    let digest = Sha256::digest(normalize_tag_name(name).as_bytes());
    let index = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize;
    TAG_PALETTE[index % TAG_PALETTE.len()]
}

/// CRUD for tags owned by the current user and their memberships.
pub struct TagAccessService {
    coordinator: Arc<SharingCoordinator>,
}

impl TagAccessService {
    pub fn new(coordinator: Arc<SharingCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<SharingCoordinator> {
        &self.coordinator
    }

    // ── Tags ──

    pub async fn create_tag(&self, name: &str, color: Option<&str>) -> ShareResult<Tag> {
        let owner = self.coordinator.session().require_unlocked()?;
        let (name, slug) = validated_name(name)?;
        let now = Utc::now();
        let tag = Tag {
            id: TagId::new(),
            owner_id: owner,
            color: color.map(str::to_string).unwrap_or_else(|| palette_color(&name).to_string()),
            name,
            slug,
            created_at: now,
            updated_at: now,
        };

        let created = self.call(self.backend().create_tag(&tag)).await?;
        info!("created tag '{}' ({})", created.slug, created.id);
        Ok(created)
    }

    pub async fn update_tag(
        &self,
        tag_id: TagId,
        name: Option<&str>,
        color: Option<&str>,
    ) -> ShareResult<Tag> {
        let (_, mut tag) = self.owned_tag(tag_id).await?;
        if let Some(name) = name {
            let (name, slug) = validated_name(name)?;
            tag.name = name;
            tag.slug = slug;
        }
        if let Some(color) = color {
            tag.color = color.to_string();
        }
        tag.updated_at = Utc::now();
        self.call(self.backend().update_tag(&tag)).await
    }

    pub async fn get_tag(&self, tag_id: TagId) -> ShareResult<Option<Tag>> {
        self.call(self.backend().get_tag(tag_id)).await
    }

    /// Tags owned by the current user.
    pub async fn list_tags(&self) -> ShareResult<Vec<Tag>> {
        let owner = self.coordinator.session().require_unlocked()?;
        self.call(self.backend().list_tags(owner)).await
    }

    /// Case-insensitive lookup among the current user's tags.
    pub async fn find_tag_by_name(&self, name: &str) -> ShareResult<Option<Tag>> {
        let wanted = normalize_tag_name(name);
        Ok(self
            .list_tags()
            .await?
            .into_iter()
            .find(|tag| normalize_tag_name(&tag.name) == wanted))
    }

    /// Deletes a tag and revokes what its members reached through it.
    pub async fn delete_tag(&self, tag_id: TagId) -> ShareResult<PropagationReport> {
        self.owned_tag(tag_id).await?;
        let members = self.call(self.backend().tag_members(tag_id)).await?;

        let mut snapshots = Vec::with_capacity(members.len());
        for member in &members {
            snapshots.push(
                self.coordinator
                    .snapshot_shared_entries(tag_id, member.target_id)
                    .await?,
            );
        }

        self.call(self.backend().delete_tag(tag_id)).await?;
        info!("deleted tag {tag_id} with {} member(s)", members.len());

        let mut report = PropagationReport::default();
        for snapshot in snapshots {
            report.merge(self.leave(snapshot).await);
        }
        Ok(report)
    }

    // ── Memberships ──

    /// Adds `user_id` to the tag, then grants entries shared under it.
    pub async fn add_member(&self, tag_id: TagId, user_id: UserId) -> ShareResult<MembershipChange> {
        let (owner, _) = self.owned_tag(tag_id).await?;
        if user_id == owner {
            return Err(ShareError::InvalidInput(
                "the tag owner cannot be a member of their own tag".to_string(),
            ));
        }

        let user_tag = self
            .call(self.backend().add_user_tag(&UserTag::new(tag_id, owner, user_id)))
            .await?;
        info!("added {user_id} to tag {tag_id}");

        let propagation = match self.coordinator.propagate_tag_join(tag_id, user_id).await {
            Ok(report) => report,
            Err(e) => {
                warn!("grant propagation for {user_id} on tag {tag_id} aborted: {e}");
                PropagationReport::aborted(e.to_string())
            }
        };
        Ok(MembershipChange {
            user_tag: Some(user_tag),
            propagation,
        })
    }

    /// Removes `user_id` from the tag, then revokes what it granted them.
    pub async fn remove_member(&self, tag_id: TagId, user_id: UserId) -> ShareResult<MembershipChange> {
        self.owned_tag(tag_id).await?;

        let snapshot = self.coordinator.snapshot_shared_entries(tag_id, user_id).await?;
        let removed = self
            .call(self.backend().remove_user_tag(tag_id, user_id))
            .await?;
        if removed.is_some() {
            info!("removed {user_id} from tag {tag_id}");
        }

        Ok(MembershipChange {
            user_tag: removed,
            propagation: self.leave(snapshot).await,
        })
    }

    pub async fn list_members(&self, tag_id: TagId) -> ShareResult<Vec<UserTag>> {
        self.call(self.backend().tag_members(tag_id)).await
    }

    pub async fn list_user_tags(&self, user_id: UserId) -> ShareResult<Vec<UserTag>> {
        self.call(self.backend().tags_for_user(user_id)).await
    }

    // ── Internals ──

    fn backend(&self) -> &dyn SharingBackend {
        self.coordinator.backend().as_ref()
    }

    async fn call<T>(&self, fut: impl Future<Output = ShareResult<T>>) -> ShareResult<T> {
        self.coordinator.call(fut).await
    }

    async fn owned_tag(&self, tag_id: TagId) -> ShareResult<(UserId, Tag)> {
        let owner = self.coordinator.session().require_unlocked()?;
        let tag = self
            .call(self.backend().get_tag(tag_id))
            .await?
            .ok_or_else(|| ShareError::NotFound(format!("tag {tag_id}")))?;
        if tag.owner_id != owner {
            return Err(ShareError::Forbidden(format!("tag {tag_id} belongs to another user")));
        }
        Ok((owner, tag))
    }

    async fn leave(&self, snapshot: crate::sharing::SharedEntriesSnapshot) -> PropagationReport {
        let (tag_id, user_id) = (snapshot.tag_id(), snapshot.user_id());
        match self.coordinator.propagate_tag_leave(snapshot).await {
            Ok(report) => report,
            Err(e) => {
                warn!("revoke propagation for {user_id} on tag {tag_id} aborted: {e}");
                PropagationReport::aborted(e.to_string())
            }
        }
    }
}

fn validated_name(name: &str) -> ShareResult<(String, String)> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ShareError::InvalidInput("tag name is empty".to_string()));
    }
    Ok((trimmed.to_string(), slugify(trimmed)))
}
