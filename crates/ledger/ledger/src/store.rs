use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use mediagate_core::{AttachmentId, ContentHash, Fingerprint, HashRecord, RetryQueueRecord};

use crate::error::LedgerError;
use crate::feed::LedgerChange;

/// Storage for hash sightings and the deferred-download retry queue.
///
/// Implementations must be `Send + Sync` and serialize their own writes.
/// Every successful write publishes a [`LedgerChange`] on the feed returned
/// by [`subscribe`](Self::subscribe) after it has committed; a failed write
/// publishes nothing.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Persist one sighting.
    async fn insert_hash_record(&self, record: &HashRecord) -> Result<(), LedgerError>;

    /// Block or unblock `hash` itself and set the flag on every record
    /// carrying it. The block state persists even when no record exists yet.
    /// Returns the number of records touched.
    async fn set_blocked(&self, hash: &Fingerprint, blocked: bool) -> Result<u64, LedgerError>;

    /// Whether `hash` is blocked.
    async fn is_blocked(&self, hash: &Fingerprint) -> Result<bool, LedgerError>;

    /// Return every stored sighting.
    async fn hash_records(&self) -> Result<Vec<HashRecord>, LedgerError>;

    /// Delete unblocked records with `timestamp < older_than`. Records of a
    /// blocked hash are kept.
    /// Returns the number of records deleted.
    async fn prune_hash_records(&self, older_than: DateTime<Utc>) -> Result<u64, LedgerError>;

    /// Create the retry record for `attachment_id`, or refresh the existing
    /// one: same id, new hash and time, attempt reset to zero.
    async fn upsert_retry(
        &self,
        attachment_id: &AttachmentId,
        content_hash: &ContentHash,
        next_retry_at: DateTime<Utc>,
    ) -> Result<RetryQueueRecord, LedgerError>;

    /// Look up the retry record for an attachment.
    async fn retry_record(
        &self,
        attachment_id: &AttachmentId,
    ) -> Result<Option<RetryQueueRecord>, LedgerError>;

    /// Return every retry record.
    async fn retry_records(&self) -> Result<Vec<RetryQueueRecord>, LedgerError>;

    /// Return retry records with `next_retry_at <= now`, earliest first.
    async fn due_retries(&self, now: DateTime<Utc>) -> Result<Vec<RetryQueueRecord>, LedgerError>;

    /// Persist the attempt counter and next retry time of an existing record.
    /// Returns `false` if the record no longer exists.
    async fn update_retry(&self, record: &RetryQueueRecord) -> Result<bool, LedgerError>;

    /// Remove the retry record for an attachment. Returns `true` if it existed.
    async fn delete_retry(&self, attachment_id: &AttachmentId) -> Result<bool, LedgerError>;

    /// Remove `record` only if the stored record still matches it: same id,
    /// content hash and next retry time. Returns `false` if it was replaced,
    /// refreshed or already removed.
    async fn delete_retry_record(&self, record: &RetryQueueRecord) -> Result<bool, LedgerError>;

    /// Earliest `next_retry_at` over all retry records.
    async fn next_retry_at(&self) -> Result<Option<DateTime<Utc>>, LedgerError>;

    /// Subscribe to committed changes.
    fn subscribe(&self) -> broadcast::Receiver<LedgerChange>;
}
