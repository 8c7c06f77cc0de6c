//! Conflict resolution between header tags and backend tags.

use crate::tags::normalize_tag_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How to reconcile the header's tags with the backend's.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictStrategy {
    /// Union of both sides.
    #[default]
    Merge,
    FrontmatterWins,
    BackendWins,
    /// A caller-supplied final set. Falls back to `Merge` without one.
    Manual,
}

/// Normalizes, de-duplicates and sorts tag names.
pub fn normalize_tags<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| normalize_tag_name(name.as_ref()))
        .filter(|name| !name.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Final tag set for an entry. Pure and total: every input combination
/// yields a normalized, sorted, duplicate-free list.
pub fn resolve_tags(
    frontmatter: &[String],
    backend: &[String],
    strategy: ConflictStrategy,
    manual: Option<&[String]>,
) -> Vec<String> {
    match (strategy, manual) {
        (ConflictStrategy::FrontmatterWins, _) => normalize_tags(frontmatter),
        (ConflictStrategy::BackendWins, _) => normalize_tags(backend),
        (ConflictStrategy::Manual, Some(selection)) => normalize_tags(selection),
        (ConflictStrategy::Merge, _) | (ConflictStrategy::Manual, None) => {
            normalize_tags(frontmatter.iter().chain(backend))
        }
    }
}
