//! Tag-based sharing for Inkwell.
//!
//! Provides:
//! - Access keys: per-reader wrappings of an entry key, granted in one batch
//! - Tag membership with grant and revoke propagation
//! - Two-way sync between an entry's header tags and backend tags
//! - A storage contract with in-memory and HTTP implementations

pub mod api_client;
pub mod backend;
pub mod config;
pub mod error;
pub mod memory;
pub mod sharing;
pub mod tag_sync;
pub mod tags;
pub mod types;

pub use api_client::HttpBackend;
pub use backend::SharingBackend;
pub use config::ShareConfig;
pub use error::{ShareError, ShareResult};
pub use memory::MemoryBackend;
pub use sharing::{SharedEntriesSnapshot, SharingCoordinator};
pub use tag_sync::{
    BackendSyncOutcome, ConflictStrategy, FrontmatterCodec, FrontmatterSyncOutcome,
    SyncAndShareOutcome, SyncMetadataStore, TagConflict, TagHeaderCodec, TagSyncMetadata,
    TagSyncReconciler, normalize_tags, resolve_tags,
};
pub use tags::{TAG_PALETTE, TagAccessService, normalize_tag_name, palette_color, slugify};
pub use types::*;
