use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::hash::ContentHash;
use crate::perceptual::Fingerprint;
use crate::types::{AttachmentId, ConversationId};

/// One observed piece of content.
///
/// A new record is written for every sighting, so the same `hash` may appear
/// many times. Block state belongs to the hash value: blocking a hash flags
/// every record that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashRecord {
    /// Local identifier.
    pub id: Uuid,
    /// Perceptual fingerprint of the content.
    pub hash: Fingerprint,
    /// Conversation in which the content was seen.
    pub conversation_id: ConversationId,
    /// Attachment that carried the content, if known.
    #[serde(default)]
    pub attachment_id: Option<AttachmentId>,
    /// Display name of the file, if known.
    #[serde(default)]
    pub filename: Option<String>,
    /// When the content was seen.
    pub timestamp: DateTime<Utc>,
    /// Whether the hash is blocked.
    #[serde(default)]
    pub blocked: bool,
}

impl HashRecord {
    /// Create an unblocked record with a fresh id.
    #[must_use]
    pub fn new(
        hash: Fingerprint,
        conversation_id: ConversationId,
        attachment_id: Option<AttachmentId>,
        filename: Option<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            hash,
            conversation_id,
            attachment_id,
            filename,
            timestamp,
            blocked: false,
        }
    }
}

/// An attachment whose download was deferred because its content hash was
/// on the shared blocklist.
///
/// There is at most one active record per attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryQueueRecord {
    /// Local identifier, stable across refreshes.
    pub id: Uuid,
    /// The deferred attachment.
    pub attachment_id: AttachmentId,
    /// Exact content hash checked against the shared blocklist.
    pub content_hash: ContentHash,
    /// Earliest time of the next re-check.
    pub next_retry_at: DateTime<Utc>,
    /// Number of re-checks that found the hash still blocked.
    pub retry_attempt: u32,
}

impl RetryQueueRecord {
    /// Create a record at attempt zero.
    #[must_use]
    pub fn new(
        attachment_id: AttachmentId,
        content_hash: ContentHash,
        next_retry_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            attachment_id,
            content_hash,
            next_retry_at,
            retry_attempt: 0,
        }
    }

    /// Whether the record is due at `now`.
    #[must_use]
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at <= now
    }
}
