//! Last reconciled tag state per entry.

use super::resolve::ConflictStrategy;
use crate::error::{ShareError, ShareResult};
use chrono::{DateTime, Utc};
use inkwell_types::{EntryId, TagId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagSyncMetadata {
    pub entry_id: EntryId,
    /// Sorted, normalized names.
    pub frontmatter_tags: Vec<String>,
    /// Sorted ids.
    pub backend_tag_ids: Vec<TagId>,
    pub strategy: ConflictStrategy,
    pub last_synced_at: DateTime<Utc>,
}

/// Per-entry sync metadata, optionally persisted to a JSON file.
///
/// Every write replaces the whole file through a temp file and a rename.
#[derive(Debug, Default)]
pub struct SyncMetadataStore {
    path: Option<PathBuf>,
    entries: RwLock<BTreeMap<EntryId, TagSyncMetadata>>,
}

impl SyncMetadataStore {
    /// In-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the store from `path`, starting empty if the file is missing.
    pub fn open(path: impl Into<PathBuf>) -> ShareResult<Self> {
        let path = path.into();
        let entries: BTreeMap<EntryId, TagSyncMetadata> = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<Vec<TagSyncMetadata>>(&bytes)?
                .into_iter()
                .map(|meta| (meta.entry_id, meta))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("loaded sync metadata for {} entries from {}", entries.len(), path.display());
        Ok(Self {
            path: Some(path),
            entries: RwLock::new(entries),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, entry_id: EntryId) -> ShareResult<Option<TagSyncMetadata>> {
        Ok(self.read()?.get(&entry_id).cloned())
    }

    pub fn len(&self) -> usize {
        self.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `meta`, replacing any previous record for its entry.
    pub fn record(&self, meta: TagSyncMetadata) -> ShareResult<()> {
        let mut entries = self.write()?;
        entries.insert(meta.entry_id, meta);
        self.persist(&entries)
    }

    pub fn remove(&self, entry_id: EntryId) -> ShareResult<Option<TagSyncMetadata>> {
        let mut entries = self.write()?;
        let removed = entries.remove(&entry_id);
        if removed.is_some() {
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    fn persist(&self, entries: &BTreeMap<EntryId, TagSyncMetadata>) -> ShareResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let records: Vec<&TagSyncMetadata> = entries.values().collect();
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&records)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn read(
        &self,
    ) -> ShareResult<std::sync::RwLockReadGuard<'_, BTreeMap<EntryId, TagSyncMetadata>>> {
        self.entries
            .read()
            .map_err(|_| ShareError::Backend("sync metadata lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> ShareResult<std::sync::RwLockWriteGuard<'_, BTreeMap<EntryId, TagSyncMetadata>>> {
        self.entries
            .write()
            .map_err(|_| ShareError::Backend("sync metadata lock poisoned".to_string()))
    }
}
