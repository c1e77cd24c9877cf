use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use mediagate_core::{AttachmentId, ContentHash, Fingerprint, HashRecord, RetryQueueRecord};
use mediagate_ledger::{ChangeFeed, LedgerChange, LedgerError, LedgerStore};

#[derive(Debug, Default)]
struct Tables {
    hash_records: Vec<HashRecord>,
    blocked: HashSet<Fingerprint>,
    retries: HashMap<AttachmentId, RetryQueueRecord>,
}

/// In-memory ledger store.
///
/// Both tables sit behind one mutex, so every operation is serialized.
/// Changes are published after the lock has been released.
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    tables: Mutex<Tables>,
    feed: ChangeFeed,
}

impl MemoryLedgerStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with a custom commit-feed capacity.
    pub fn with_feed_capacity(capacity: usize) -> Self {
        Self {
            tables: Mutex::default(),
            feed: ChangeFeed::new(capacity),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn insert_hash_record(&self, record: &HashRecord) -> Result<(), LedgerError> {
        self.tables.lock().hash_records.push(record.clone());
        self.feed.publish(LedgerChange::HashRecorded {
            hash: record.hash.clone(),
            blocked: record.blocked,
        });
        Ok(())
    }

    async fn set_blocked(&self, hash: &Fingerprint, blocked: bool) -> Result<u64, LedgerError> {
        let (changed, rows) = {
            let mut tables = self.tables.lock();
            let changed = if blocked {
                tables.blocked.insert(hash.clone())
            } else {
                tables.blocked.remove(hash)
            };
            let mut rows = 0;
            for record in tables.hash_records.iter_mut().filter(|r| &r.hash == hash) {
                record.blocked = blocked;
                rows += 1;
            }
            (changed, rows)
        };
        if changed || rows > 0 {
            self.feed.publish(LedgerChange::BlockChanged {
                hash: hash.clone(),
                blocked,
                rows,
            });
        }
        Ok(rows)
    }

    async fn is_blocked(&self, hash: &Fingerprint) -> Result<bool, LedgerError> {
        Ok(self.tables.lock().blocked.contains(hash))
    }

    async fn hash_records(&self) -> Result<Vec<HashRecord>, LedgerError> {
        Ok(self.tables.lock().hash_records.clone())
    }

    async fn prune_hash_records(&self, older_than: DateTime<Utc>) -> Result<u64, LedgerError> {
        let removed = {
            let tables = &mut *self.tables.lock();
            let before = tables.hash_records.len();
            let blocked = &tables.blocked;
            tables.hash_records.retain(|r| {
                r.blocked || r.timestamp >= older_than || blocked.contains(&r.hash)
            });
            (before - tables.hash_records.len()) as u64
        };
        if removed > 0 {
            self.feed.publish(LedgerChange::Pruned { removed });
        }
        Ok(removed)
    }

    async fn upsert_retry(
        &self,
        attachment_id: &AttachmentId,
        content_hash: &ContentHash,
        next_retry_at: DateTime<Utc>,
    ) -> Result<RetryQueueRecord, LedgerError> {
        let (record, inserted) = {
            let mut tables = self.tables.lock();
            match tables.retries.get_mut(attachment_id) {
                Some(existing) => {
                    existing.content_hash = content_hash.clone();
                    existing.next_retry_at = next_retry_at;
                    existing.retry_attempt = 0;
                    (existing.clone(), false)
                }
                None => {
                    let record = RetryQueueRecord::new(
                        attachment_id.clone(),
                        content_hash.clone(),
                        next_retry_at,
                    );
                    tables.retries.insert(attachment_id.clone(), record.clone());
                    (record, true)
                }
            }
        };
        let attachment_id = attachment_id.clone();
        self.feed.publish(if inserted {
            LedgerChange::RetryInserted {
                attachment_id,
                next_retry_at,
            }
        } else {
            LedgerChange::RetryUpdated {
                attachment_id,
                next_retry_at,
            }
        });
        Ok(record)
    }

    async fn retry_record(
        &self,
        attachment_id: &AttachmentId,
    ) -> Result<Option<RetryQueueRecord>, LedgerError> {
        Ok(self.tables.lock().retries.get(attachment_id).cloned())
    }

    async fn retry_records(&self) -> Result<Vec<RetryQueueRecord>, LedgerError> {
        let mut records: Vec<_> = self.tables.lock().retries.values().cloned().collect();
        records.sort_by_key(|r| r.next_retry_at);
        Ok(records)
    }

    async fn due_retries(&self, now: DateTime<Utc>) -> Result<Vec<RetryQueueRecord>, LedgerError> {
        let mut due: Vec<_> = self
            .tables
            .lock()
            .retries
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_retry_at);
        Ok(due)
    }

    async fn update_retry(&self, record: &RetryQueueRecord) -> Result<bool, LedgerError> {
        let updated = {
            let mut tables = self.tables.lock();
            match tables.retries.get_mut(&record.attachment_id) {
                Some(existing) if existing.id == record.id => {
                    existing.retry_attempt = record.retry_attempt;
                    existing.next_retry_at = record.next_retry_at;
                    true
                }
                _ => false,
            }
        };
        if updated {
            self.feed.publish(LedgerChange::RetryUpdated {
                attachment_id: record.attachment_id.clone(),
                next_retry_at: record.next_retry_at,
            });
        }
        Ok(updated)
    }

    async fn delete_retry(&self, attachment_id: &AttachmentId) -> Result<bool, LedgerError> {
        let existed = self.tables.lock().retries.remove(attachment_id).is_some();
        if existed {
            self.feed.publish(LedgerChange::RetryDeleted {
                attachment_id: attachment_id.clone(),
            });
        }
        Ok(existed)
    }

    async fn delete_retry_record(&self, record: &RetryQueueRecord) -> Result<bool, LedgerError> {
        let removed = {
            let mut tables = self.tables.lock();
            let unchanged = tables.retries.get(&record.attachment_id).is_some_and(|current| {
                current.id == record.id
                    && current.content_hash == record.content_hash
                    && current.next_retry_at == record.next_retry_at
            });
            unchanged && tables.retries.remove(&record.attachment_id).is_some()
        };
        if removed {
            self.feed.publish(LedgerChange::RetryDeleted {
                attachment_id: record.attachment_id.clone(),
            });
        }
        Ok(removed)
    }

    async fn next_retry_at(&self) -> Result<Option<DateTime<Utc>>, LedgerError> {
        Ok(self
            .tables
            .lock()
            .retries
            .values()
            .map(|r| r.next_retry_at)
            .min())
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerChange> {
        self.feed.subscribe()
    }
}
