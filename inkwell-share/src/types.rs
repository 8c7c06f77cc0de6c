//! Shared data types for access keys, tags and reports.

use chrono::{DateTime, Utc};
use inkwell_crypto::{PUBLIC_KEY_SIZE, WrappedEntryKey};
use inkwell_types::{EntryId, TagId, UserId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

// ── Key directory ──

/// A user's published keys: the public key for senders and the
/// password-wrapped secret key as a device-recovery backup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyBackup {
    pub user_id: UserId,
    pub public_key_b64: String,
    pub encrypted_secret_key_b64: String,
    /// Hex SHA-256 of the raw public key.
    pub fingerprint: String,
}

/// Hex SHA-256 fingerprint of a public key.
pub fn public_key_fingerprint(public_key: &[u8; PUBLIC_KEY_SIZE]) -> String {
    hex::encode(Sha256::digest(public_key))
}

// ── Access keys ──

/// One reader's wrapped copy of an entry key. Keyed by `(entry_id, user_id)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryAccessKey {
    pub entry_id: EntryId,
    pub user_id: UserId,
    /// Author whose public key authenticates the box.
    pub granted_by: UserId,
    #[serde(flatten)]
    pub wrapped: WrappedEntryKey,
    pub created_at: DateTime<Utc>,
}

impl EntryAccessKey {
    pub fn new(entry_id: EntryId, user_id: UserId, granted_by: UserId, wrapped: WrappedEntryKey) -> Self {
        Self {
            entry_id,
            user_id,
            granted_by,
            wrapped,
            created_at: Utc::now(),
        }
    }

    /// True for the author's own self-boxed row.
    pub fn is_owner_row(&self) -> bool {
        self.user_id == self.granted_by
    }
}

// ── Tags ──

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: TagId,
    pub owner_id: UserId,
    pub name: String,
    pub slug: String,
    pub color: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership of `target_id` in a tag, created by `tagger_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTag {
    pub id: Uuid,
    pub tag_id: TagId,
    pub tagger_id: UserId,
    pub target_id: UserId,
    pub created_at: DateTime<Utc>,
}

impl UserTag {
    pub fn new(tag_id: TagId, tagger_id: UserId, target_id: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            tag_id,
            tagger_id,
            target_id,
            created_at: Utc::now(),
        }
    }
}

// ── Reports ──

/// Why one recipient could not be granted access.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum FailureReason {
    /// The recipient has not published a public key.
    MissingPublicKey,
    /// The caller has no self-boxed row for the entry.
    MissingOwnerKey,
    Timeout,
    Backend(String),
    RewrapFailed,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareFailure {
    pub entry_id: EntryId,
    pub user_id: UserId,
    pub reason: FailureReason,
}

/// Outcome of a share or grant. Failures are per recipient and never abort
/// the rest of the batch.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareReport {
    pub granted: Vec<UserId>,
    pub already_granted: Vec<UserId>,
    pub failures: Vec<ShareFailure>,
}

impl ShareReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Outcome of propagating a membership change to access keys.
///
/// `retained` lists entries the user keeps because they own them or another
/// tag still covers them. `aborted` is set when propagation could not run at
/// all; the membership change itself still stands.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationReport {
    pub granted: Vec<EntryId>,
    pub revoked: Vec<EntryId>,
    pub retained: Vec<EntryId>,
    pub failures: Vec<ShareFailure>,
    pub aborted: Option<String>,
}

impl PropagationReport {
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            aborted: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && self.aborted.is_none()
    }

    pub fn merge(&mut self, other: PropagationReport) {
        self.granted.extend(other.granted);
        self.revoked.extend(other.revoked);
        self.retained.extend(other.retained);
        self.failures.extend(other.failures);
        if self.aborted.is_none() {
            self.aborted = other.aborted;
        }
    }
}

/// Result of adding or removing a tag member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipChange {
    pub user_tag: Option<UserTag>,
    pub propagation: PropagationReport,
}
