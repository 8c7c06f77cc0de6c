//! Two-way sync between an entry's header tags and backend tags.
//!
//! The header is what the user edits; backend tags are what sharing runs
//! on. Reconciliation maps names to tag ids (creating tags as needed), writes
//! backend tags back into the header, and remembers the last reconciled
//! state per entry so unchanged entries can be skipped.

mod frontmatter;
mod metadata;
mod resolve;

pub use frontmatter::{FrontmatterCodec, TagHeaderCodec};
pub use metadata::{SyncMetadataStore, TagSyncMetadata};
pub use resolve::{ConflictStrategy, normalize_tags, resolve_tags};

use crate::config::ShareConfig;
use crate::error::ShareResult;
use crate::tags::{TagAccessService, normalize_tag_name};
use crate::types::{ShareReport, Tag};
use chrono::Utc;
use inkwell_crypto::WrappedEntryKey;
use inkwell_types::{EntryId, TagId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A header tag that could not be created on the backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagConflict {
    pub name: String,
    pub reason: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrontmatterSyncOutcome {
    /// Sorted union of the existing ids and the header's resolved ids.
    pub tag_ids: Vec<TagId>,
    pub created: Vec<Tag>,
    pub conflicts: Vec<TagConflict>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSyncOutcome {
    pub document: String,
    /// Normalized names written into the header by this call.
    pub added: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAndShareOutcome {
    pub sync: FrontmatterSyncOutcome,
    pub share: ShareReport,
}

pub struct TagSyncReconciler {
    tags: Arc<TagAccessService>,
    codec: Box<dyn TagHeaderCodec>,
    metadata: Arc<SyncMetadataStore>,
    strategy: ConflictStrategy,
}

impl TagSyncReconciler {
    pub fn new(tags: Arc<TagAccessService>, metadata: Arc<SyncMetadataStore>) -> Self {
        Self {
            tags,
            codec: Box::new(FrontmatterCodec),
            metadata,
            strategy: ConflictStrategy::default(),
        }
    }

    /// Opens the metadata file named in `config`, or keeps it in memory.
    pub fn from_config(tags: Arc<TagAccessService>, config: &ShareConfig) -> ShareResult<Self> {
        let metadata = match &config.sync_metadata_path {
            Some(path) => SyncMetadataStore::open(path)?,
            None => SyncMetadataStore::new(),
        };
        Ok(Self::new(tags, Arc::new(metadata)))
    }

    pub fn with_codec(mut self, codec: impl TagHeaderCodec + 'static) -> Self {
        self.codec = Box::new(codec);
        self
    }

    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn metadata(&self) -> &Arc<SyncMetadataStore> {
        &self.metadata
    }

    /// Normalized header tags of `document`.
    pub fn header_tags(&self, document: &str) -> Vec<String> {
        normalize_tags(self.codec.read_tags(document))
    }

    /// Applies the configured strategy to two name sets.
    pub fn resolve(&self, frontmatter: &[String], backend: &[String], manual: Option<&[String]>) -> Vec<String> {
        resolve_tags(frontmatter, backend, self.strategy, manual)
    }

    /// Maps header tag names to backend tag ids, creating missing tags.
    ///
    /// Names that could not be created are reported as conflicts; the rest
    /// of the sync still goes through.
    pub async fn sync_frontmatter_to_backend(
        &self,
        entry_id: EntryId,
        document: &str,
        existing_backend_tag_ids: &[TagId],
    ) -> ShareResult<FrontmatterSyncOutcome> {
        let names = self.header_tags(document);
        let known: HashMap<String, TagId> = self
            .tags
            .list_tags()
            .await?
            .into_iter()
            .map(|tag| (normalize_tag_name(&tag.name), tag.id))
            .collect();

        let mut ids: BTreeSet<TagId> = existing_backend_tag_ids.iter().copied().collect();
        let mut outcome = FrontmatterSyncOutcome::default();
        for name in &names {
            if let Some(id) = known.get(name) {
                ids.insert(*id);
                continue;
            }
            match self.tags.create_tag(name, None).await {
                Ok(tag) => {
                    ids.insert(tag.id);
                    outcome.created.push(tag);
                }
                Err(e) => {
                    warn!("could not create tag '{name}' for entry {entry_id}: {e}");
                    outcome.conflicts.push(TagConflict {
                        name: name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        outcome.tag_ids = ids.into_iter().collect();

        self.record(entry_id, names, outcome.tag_ids.clone())?;
        info!(
            "synced header tags of entry {entry_id}: {} id(s), {} created, {} conflict(s)",
            outcome.tag_ids.len(),
            outcome.created.len(),
            outcome.conflicts.len()
        );
        Ok(outcome)
    }

    /// Writes backend tag names missing from the header into it.
    ///
    /// Returns the input unchanged when every backend tag is already there,
    /// compared case-insensitively.
    pub async fn sync_backend_to_frontmatter(
        &self,
        entry_id: EntryId,
        document: &str,
        backend_tag_ids: &[TagId],
    ) -> ShareResult<BackendSyncOutcome> {
        let current = self.header_tags(document);
        let present: BTreeSet<&str> = current.iter().map(String::as_str).collect();

        let mut backend_names = Vec::with_capacity(backend_tag_ids.len());
        for tag_id in backend_tag_ids {
            match self.tags.get_tag(*tag_id).await? {
                Some(tag) => backend_names.push(normalize_tag_name(&tag.name)),
                None => warn!("entry {entry_id} references unknown tag {tag_id}, skipping"),
            }
        }
        let added: Vec<String> = normalize_tags(&backend_names)
            .into_iter()
            .filter(|name| !present.contains(name.as_str()))
            .collect();

        let mut ids: Vec<TagId> = backend_tag_ids.to_vec();
        ids.sort();
        ids.dedup();

        if added.is_empty() {
            debug!("header of entry {entry_id} already has every backend tag");
            self.record(entry_id, current, ids)?;
            return Ok(BackendSyncOutcome {
                document: document.to_string(),
                added,
            });
        }

        let merged = resolve_tags(&current, &added, ConflictStrategy::Merge, None);
        let rewritten = self.codec.write_tags(document, &merged);
        self.record(entry_id, merged, ids)?;
        info!("added {} backend tag(s) to header of entry {entry_id}", added.len());
        Ok(BackendSyncOutcome {
            document: rewritten,
            added,
        })
    }

    /// True if either tag set differs from the last reconciled state.
    pub fn needs_sync(
        &self,
        entry_id: EntryId,
        frontmatter_tags: &[String],
        backend_tag_ids: &[TagId],
    ) -> ShareResult<bool> {
        let Some(last) = self.metadata.get(entry_id)? else {
            return Ok(true);
        };
        let mut ids: Vec<TagId> = backend_tag_ids.to_vec();
        ids.sort();
        ids.dedup();
        Ok(normalize_tags(frontmatter_tags) != last.frontmatter_tags || ids != last.backend_tag_ids)
    }

    /// Syncs the header to the backend, then shares the entry under the
    /// resulting tags.
    pub async fn sync_and_share(
        &self,
        entry_id: EntryId,
        document: &str,
        existing_backend_tag_ids: &[TagId],
        owner_key: &WrappedEntryKey,
    ) -> ShareResult<SyncAndShareOutcome> {
        let sync = self
            .sync_frontmatter_to_backend(entry_id, document, existing_backend_tag_ids)
            .await?;
        let share = self
            .tags
            .coordinator()
            .share_entry(entry_id, &sync.tag_ids, owner_key)
            .await?;
        Ok(SyncAndShareOutcome { sync, share })
    }

    fn record(&self, entry_id: EntryId, frontmatter_tags: Vec<String>, backend_tag_ids: Vec<TagId>) -> ShareResult<()> {
        self.metadata.record(TagSyncMetadata {
            entry_id,
            frontmatter_tags,
            backend_tag_ids,
            strategy: self.strategy,
            last_synced_at: Utc::now(),
        })
    }
}
