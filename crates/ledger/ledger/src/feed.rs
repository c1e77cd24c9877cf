//! Commit notifications.
//!
//! Backends publish a [`LedgerChange`] after a write has committed. Readers
//! that want to react to new or rescheduled retry records (the retry
//! scheduler in particular) subscribe here instead of polling.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use mediagate_core::{AttachmentId, Fingerprint};

/// Default number of buffered changes per subscriber.
pub const DEFAULT_FEED_CAPACITY: usize = 256;

/// A committed change to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerChange {
    /// A sighting was recorded.
    HashRecorded { hash: Fingerprint, blocked: bool },
    /// Block state of a hash changed; `rows` existing records were updated.
    BlockChanged {
        hash: Fingerprint,
        blocked: bool,
        rows: u64,
    },
    /// Old unblocked sightings were removed.
    Pruned { removed: u64 },
    /// A retry record was created.
    RetryInserted {
        attachment_id: AttachmentId,
        next_retry_at: DateTime<Utc>,
    },
    /// A retry record was refreshed or rescheduled.
    RetryUpdated {
        attachment_id: AttachmentId,
        next_retry_at: DateTime<Utc>,
    },
    /// A retry record was removed.
    RetryDeleted { attachment_id: AttachmentId },
}

impl LedgerChange {
    /// The retry time this change scheduled, if it created or rescheduled a
    /// retry record.
    #[must_use]
    pub fn retry_time(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::RetryInserted { next_retry_at, .. } | Self::RetryUpdated { next_retry_at, .. } => {
                Some(*next_retry_at)
            }
            _ => None,
        }
    }
}

/// Broadcast channel of committed ledger changes.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<LedgerChange>,
}

impl ChangeFeed {
    /// Create a feed that buffers up to `capacity` changes per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a committed change. Having no subscribers is not an error.
    pub fn publish(&self, change: LedgerChange) {
        let _ = self.tx.send(change);
    }

    /// Subscribe to changes committed from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerChange> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}
