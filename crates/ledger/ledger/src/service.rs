use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use mediagate_core::{AttachmentId, Clock, ConversationId, Fingerprint, HashRecord, SystemClock};

use crate::error::LedgerError;
use crate::store::LedgerStore;

/// A prior sighting within the similarity threshold of a query fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimilarRecord {
    pub record: HashRecord,
    pub distance: u32,
}

/// Local record of seen and blocked content.
///
/// Reads fail open: a storage error during [`is_blocked`](Self::is_blocked)
/// or [`find_similar`](Self::find_similar) is logged and answered as "not
/// blocked" / "nothing similar". Writes surface their errors.
#[derive(Clone)]
pub struct HashLedger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl HashLedger {
    /// Wrap a store, timestamping sightings with the system clock.
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    /// Wrap a store with an explicit clock.
    pub fn with_clock(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Record a sighting of `hash`.
    ///
    /// The new record starts blocked if the hash is already blocked.
    pub async fn record(
        &self,
        hash: &Fingerprint,
        conversation_id: &ConversationId,
        attachment_id: Option<&AttachmentId>,
        filename: Option<&str>,
    ) -> Result<HashRecord, LedgerError> {
        let mut record = HashRecord::new(
            hash.clone(),
            conversation_id.clone(),
            attachment_id.cloned(),
            filename.map(str::to_owned),
            self.clock.now(),
        );
        record.blocked = self.is_blocked(hash).await;
        self.store.insert_hash_record(&record).await?;
        debug!(hash = %hash, conversation_id = %conversation_id, blocked = record.blocked, "recorded sighting");
        Ok(record)
    }

    /// Block `hash`, including sightings recorded later.
    /// Returns the number of existing records touched.
    pub async fn block(&self, hash: &Fingerprint) -> Result<u64, LedgerError> {
        self.store.set_blocked(hash, true).await
    }

    /// Unblock `hash`. Returns the number of existing records touched.
    pub async fn unblock(&self, hash: &Fingerprint) -> Result<u64, LedgerError> {
        self.store.set_blocked(hash, false).await
    }

    /// Whether `hash` is blocked locally. Storage errors read as `false`.
    pub async fn is_blocked(&self, hash: &Fingerprint) -> bool {
        match self.store.is_blocked(hash).await {
            Ok(blocked) => blocked,
            Err(e) => {
                warn!(hash = %hash, error = %e, "ledger block lookup failed, treating as not blocked");
                false
            }
        }
    }

    /// Records within `threshold` bits of `hash`, closest first.
    ///
    /// The threshold is inclusive. Fingerprints of a different length never
    /// match. Storage errors read as an empty result.
    pub async fn find_similar(&self, hash: &Fingerprint, threshold: u32) -> Vec<SimilarRecord> {
        let records = match self.store.hash_records().await {
            Ok(records) => records,
            Err(e) => {
                warn!(hash = %hash, error = %e, "ledger scan failed, reporting no similar records");
                return Vec::new();
            }
        };

        let mut similar: Vec<SimilarRecord> = records
            .into_iter()
            .filter_map(|record| {
                let distance = hash.distance(&record.hash)?;
                (distance <= threshold).then_some(SimilarRecord { record, distance })
            })
            .collect();
        similar.sort_by(|a, b| {
            a.distance
                .cmp(&b.distance)
                .then_with(|| a.record.timestamp.cmp(&b.record.timestamp))
        });
        similar
    }

    /// Remove unblocked sightings older than `older_than`.
    pub async fn prune(&self, older_than: DateTime<Utc>) -> Result<u64, LedgerError> {
        let removed = self.store.prune_hash_records(older_than).await?;
        if removed > 0 {
            debug!(removed, "pruned old sightings");
        }
        Ok(removed)
    }
}

impl std::fmt::Debug for HashLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashLedger")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::broadcast;

    use mediagate_core::{ContentHash, RetryQueueRecord};

    use super::*;
    use crate::feed::{ChangeFeed, LedgerChange};

    /// A store whose every call fails.
    struct BrokenStore {
        feed: ChangeFeed,
    }

    fn down() -> LedgerError {
        LedgerError::Connection("database is locked".into())
    }

    #[async_trait]
    impl LedgerStore for BrokenStore {
        async fn insert_hash_record(&self, _: &HashRecord) -> Result<(), LedgerError> {
            Err(down())
        }
        async fn set_blocked(&self, _: &Fingerprint, _: bool) -> Result<u64, LedgerError> {
            Err(down())
        }
        async fn is_blocked(&self, _: &Fingerprint) -> Result<bool, LedgerError> {
            Err(down())
        }
        async fn hash_records(&self) -> Result<Vec<HashRecord>, LedgerError> {
            Err(down())
        }
        async fn prune_hash_records(&self, _: DateTime<Utc>) -> Result<u64, LedgerError> {
            Err(down())
        }
        async fn upsert_retry(
            &self,
            _: &AttachmentId,
            _: &ContentHash,
            _: DateTime<Utc>,
        ) -> Result<RetryQueueRecord, LedgerError> {
            Err(down())
        }
        async fn retry_record(
            &self,
            _: &AttachmentId,
        ) -> Result<Option<RetryQueueRecord>, LedgerError> {
            Err(down())
        }
        async fn retry_records(&self) -> Result<Vec<RetryQueueRecord>, LedgerError> {
            Err(down())
        }
        async fn due_retries(&self, _: DateTime<Utc>) -> Result<Vec<RetryQueueRecord>, LedgerError> {
            Err(down())
        }
        async fn update_retry(&self, _: &RetryQueueRecord) -> Result<bool, LedgerError> {
            Err(down())
        }
        async fn delete_retry(&self, _: &AttachmentId) -> Result<bool, LedgerError> {
            Err(down())
        }
        async fn delete_retry_record(&self, _: &RetryQueueRecord) -> Result<bool, LedgerError> {
            Err(down())
        }
        async fn next_retry_at(&self) -> Result<Option<DateTime<Utc>>, LedgerError> {
            Err(down())
        }
        fn subscribe(&self) -> broadcast::Receiver<LedgerChange> {
            self.feed.subscribe()
        }
    }

    fn broken() -> HashLedger {
        HashLedger::new(Arc::new(BrokenStore {
            feed: ChangeFeed::default(),
        }))
    }

    fn fingerprint() -> Fingerprint {
        Fingerprint::from_hex("ff00ff00").unwrap()
    }

    #[tokio::test]
    async fn reads_fail_open() {
        let ledger = broken();
        assert!(!ledger.is_blocked(&fingerprint()).await);
        assert!(ledger.find_similar(&fingerprint(), 64).await.is_empty());
    }

    #[tokio::test]
    async fn writes_surface_errors() {
        let ledger = broken();
        let conversation = ConversationId::new("thread-1");
        let err = ledger
            .record(&fingerprint(), &conversation, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Connection(_)));
        assert!(ledger.block(&fingerprint()).await.is_err());
        assert!(ledger.prune(Utc::now()).await.is_err());
    }
}
