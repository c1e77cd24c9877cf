use std::time::Duration;

use chrono::{DateTime, Utc};

use mediagate_core::{ContentHash, offset};

/// A shared blocklist entry: the hash is blocked until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocklistEntry {
    pub hash: ContentHash,
    pub inserted_at: DateTime<Utc>,
    /// `None` means the entry never expires.
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlocklistEntry {
    /// Create an entry inserted at `now` that lives for `ttl`.
    pub fn new(hash: ContentHash, now: DateTime<Utc>, ttl: Option<Duration>) -> Self {
        Self {
            hash,
            inserted_at: now,
            expires_at: ttl.map(|ttl| offset(now, ttl)),
        }
    }

    /// Whether the entry has expired at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Result of an insert-if-absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The entry was written.
    Inserted,
    /// A live entry for the hash already existed and was left untouched.
    AlreadyPresent,
}
