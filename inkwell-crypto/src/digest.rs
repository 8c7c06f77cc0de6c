//! Indexing digests over entry fields.
//!
//! The storage layer indexes and de-duplicates entries by these hashes
//! without ever seeing plaintext. Fields are normalized first (trimmed,
//! whitespace collapsed, lower-cased) so cosmetic edits hash identically.
//! Each field kind has its own domain prefix.

use inkwell_types::JournalEntry;
use sha2::{Digest, Sha256};

/// Number of normalized characters that make up an entry preview.
pub const PREVIEW_CHARS: usize = 200;

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn tagged_digest(domain: &str, value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(domain.as_bytes());
    hasher.update([0u8]);
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn generate_title_hash(entry: &JournalEntry) -> String {
    tagged_digest("inkwell:title:v1", &normalize(&entry.title))
}

pub fn generate_content_hash(entry: &JournalEntry) -> String {
    tagged_digest("inkwell:content:v1", &normalize(&entry.content))
}

pub fn generate_preview_hash(entry: &JournalEntry) -> String {
    let preview: String = normalize(&entry.content)
        .chars()
        .take(PREVIEW_CHARS)
        .collect();
    tagged_digest("inkwell:preview:v1", &preview)
}
