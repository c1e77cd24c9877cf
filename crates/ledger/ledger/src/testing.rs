//! Helpers for testing ledger stores and their callers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use mediagate_core::{
    AttachmentId, ContentHash, ConversationId, Fingerprint, HashRecord, RetryQueueRecord,
};

use crate::error::LedgerError;
use crate::feed::LedgerChange;
use crate::store::LedgerStore;

fn fingerprint(hex: &str) -> Result<Fingerprint, LedgerError> {
    Fingerprint::from_hex(hex)
        .ok_or_else(|| LedgerError::Serialization(format!("bad test fingerprint {hex}")))
}

fn base_time() -> Result<DateTime<Utc>, LedgerError> {
    Utc.timestamp_millis_opt(1_767_225_600_000)
        .single()
        .ok_or_else(|| LedgerError::Serialization("bad test timestamp".into()))
}

fn sighting(hash: &Fingerprint, at: DateTime<Utc>) -> HashRecord {
    HashRecord::new(
        hash.clone(),
        ConversationId::new("conformance-thread"),
        Some(AttachmentId::new("conformance-attachment")),
        Some("photo.jpg".into()),
        at,
    )
}

/// Run the full ledger store conformance test suite.
///
/// Call this from your backend's test module with a fresh, empty store.
///
/// # Errors
///
/// Returns an error if a store operation fails. Behavioral mismatches panic.
pub async fn run_ledger_conformance_tests(store: &dyn LedgerStore) -> Result<(), LedgerError> {
    test_empty_queue(store).await?;
    test_insert_and_scan(store).await?;
    test_block_applies_to_hash(store).await?;
    test_prune_keeps_blocked(store).await?;
    test_upsert_refreshes(store).await?;
    test_due_retries(store).await?;
    test_update_and_delete(store).await?;
    test_conditional_delete(store).await?;
    test_commit_feed(store).await?;
    Ok(())
}

async fn test_empty_queue(store: &dyn LedgerStore) -> Result<(), LedgerError> {
    assert!(
        store.next_retry_at().await?.is_none(),
        "fresh store should have no retry records"
    );
    assert!(store.retry_records().await?.is_empty());
    Ok(())
}

async fn test_insert_and_scan(store: &dyn LedgerStore) -> Result<(), LedgerError> {
    let hash = fingerprint("a1a1a1a1")?;
    let record = sighting(&hash, base_time()?);
    store.insert_hash_record(&record).await?;

    let found: Vec<HashRecord> = store
        .hash_records()
        .await?
        .into_iter()
        .filter(|r| r.hash == hash)
        .collect();
    assert_eq!(found, vec![record], "scan should return the stored record");
    assert!(!store.is_blocked(&hash).await?);
    Ok(())
}

async fn test_block_applies_to_hash(store: &dyn LedgerStore) -> Result<(), LedgerError> {
    let hash = fingerprint("b2b2b2b2")?;
    let other = fingerprint("b2b2b2b3")?;
    let at = base_time()?;
    store.insert_hash_record(&sighting(&hash, at)).await?;
    store.insert_hash_record(&sighting(&hash, at)).await?;
    store.insert_hash_record(&sighting(&other, at)).await?;

    let touched = store.set_blocked(&hash, true).await?;
    assert_eq!(touched, 2, "block should flag every record with the hash");
    assert!(store.is_blocked(&hash).await?);
    assert!(!store.is_blocked(&other).await?, "other hashes stay unblocked");

    let unseen = fingerprint("00000001")?;
    assert_eq!(store.set_blocked(&unseen, true).await?, 0);
    assert!(
        store.is_blocked(&unseen).await?,
        "block state belongs to the hash, not its records"
    );
    assert_eq!(store.set_blocked(&unseen, false).await?, 0);
    assert!(!store.is_blocked(&unseen).await?);

    let touched = store.set_blocked(&hash, false).await?;
    assert_eq!(touched, 2);
    assert!(!store.is_blocked(&hash).await?);
    Ok(())
}

async fn test_prune_keeps_blocked(store: &dyn LedgerStore) -> Result<(), LedgerError> {
    let now = base_time()?;
    let old = now - Duration::days(40);
    let stale = fingerprint("c3c3c3c3")?;
    let kept = fingerprint("c3c3c3c4")?;
    let recent = fingerprint("c3c3c3c5")?;
    let blocked_later = fingerprint("c3c3c3c6")?;

    store.insert_hash_record(&sighting(&stale, old)).await?;
    store.insert_hash_record(&sighting(&kept, old)).await?;
    store.insert_hash_record(&sighting(&recent, now)).await?;
    store.set_blocked(&kept, true).await?;
    store.set_blocked(&blocked_later, true).await?;
    store
        .insert_hash_record(&sighting(&blocked_later, old))
        .await?;

    let removed = store.prune_hash_records(now - Duration::days(30)).await?;
    assert!(removed >= 1, "the stale unblocked record should be pruned");

    let remaining = store.hash_records().await?;
    assert!(!remaining.iter().any(|r| r.hash == stale));
    assert!(
        remaining.iter().any(|r| r.hash == kept && r.blocked),
        "blocked records survive pruning"
    );
    assert!(remaining.iter().any(|r| r.hash == recent));
    assert!(
        remaining.iter().any(|r| r.hash == blocked_later),
        "records of a blocked hash survive pruning"
    );
    Ok(())
}

async fn test_upsert_refreshes(store: &dyn LedgerStore) -> Result<(), LedgerError> {
    let attachment = AttachmentId::new("upsert-a1");
    let first_at = base_time()? + Duration::minutes(5);
    let created = store
        .upsert_retry(&attachment, &ContentHash::of(b"first"), first_at)
        .await?;
    assert_eq!(created.retry_attempt, 0);
    assert_eq!(created.next_retry_at, first_at);

    let mut bumped = created.clone();
    bumped.retry_attempt = 3;
    assert!(store.update_retry(&bumped).await?);

    let second_at = first_at + Duration::minutes(5);
    let refreshed = store
        .upsert_retry(&attachment, &ContentHash::of(b"second"), second_at)
        .await?;
    assert_eq!(refreshed.id, created.id, "refresh keeps the record id");
    assert_eq!(refreshed.retry_attempt, 0, "refresh resets the attempt");
    assert_eq!(refreshed.content_hash, ContentHash::of(b"second"));
    assert_eq!(refreshed.next_retry_at, second_at);

    let matching = store
        .retry_records()
        .await?
        .into_iter()
        .filter(|r| r.attachment_id == attachment)
        .count();
    assert_eq!(matching, 1, "one active record per attachment");
    assert_eq!(store.retry_record(&attachment).await?, Some(refreshed));

    store.delete_retry(&attachment).await?;
    Ok(())
}

async fn test_due_retries(store: &dyn LedgerStore) -> Result<(), LedgerError> {
    let now = base_time()?;
    let due = AttachmentId::new("due-a1");
    let exact = AttachmentId::new("due-a2");
    let later = AttachmentId::new("due-a3");
    let hash = ContentHash::of(b"due");

    store.upsert_retry(&later, &hash, now + Duration::seconds(1)).await?;
    store.upsert_retry(&due, &hash, now - Duration::seconds(10)).await?;
    store.upsert_retry(&exact, &hash, now).await?;

    let ids: Vec<AttachmentId> = store
        .due_retries(now)
        .await?
        .into_iter()
        .map(|r| r.attachment_id)
        .collect();
    assert_eq!(ids, vec![due.clone(), exact.clone()], "due is inclusive, earliest first");
    assert_eq!(
        store.next_retry_at().await?,
        Some(now - Duration::seconds(10)),
        "next retry is the minimum"
    );

    for id in [&due, &exact, &later] {
        store.delete_retry(id).await?;
    }
    assert!(store.next_retry_at().await?.is_none());
    Ok(())
}

async fn test_update_and_delete(store: &dyn LedgerStore) -> Result<(), LedgerError> {
    let attachment = AttachmentId::new("update-a1");
    let at = base_time()?;
    let mut record = store
        .upsert_retry(&attachment, &ContentHash::of(b"update"), at)
        .await?;

    record.retry_attempt = 1;
    record.next_retry_at = at + Duration::minutes(10);
    assert!(store.update_retry(&record).await?);
    assert_eq!(store.retry_record(&attachment).await?, Some(record.clone()));

    assert!(store.delete_retry(&attachment).await?);
    assert!(!store.delete_retry(&attachment).await?, "second delete finds nothing");
    assert!(store.retry_record(&attachment).await?.is_none());
    assert!(
        !store.update_retry(&record).await?,
        "updating a deleted record reports false"
    );
    Ok(())
}

async fn test_conditional_delete(store: &dyn LedgerStore) -> Result<(), LedgerError> {
    let attachment = AttachmentId::new("conditional-a1");
    let at = base_time()?;
    let checked = store
        .upsert_retry(&attachment, &ContentHash::of(b"old"), at)
        .await?;

    store
        .upsert_retry(&attachment, &ContentHash::of(b"old"), at + Duration::minutes(5))
        .await?;
    assert!(
        !store.delete_retry_record(&checked).await?,
        "a refreshed record is not removed"
    );

    let refreshed = store
        .upsert_retry(&attachment, &ContentHash::of(b"new"), at + Duration::minutes(5))
        .await?;
    assert_eq!(refreshed.id, checked.id);
    let mut stale = refreshed.clone();
    stale.content_hash = ContentHash::of(b"old");
    assert!(!store.delete_retry_record(&stale).await?);
    assert!(store.retry_record(&attachment).await?.is_some());

    assert!(store.delete_retry_record(&refreshed).await?);
    assert!(store.retry_record(&attachment).await?.is_none());
    assert!(!store.delete_retry_record(&refreshed).await?);
    Ok(())
}

async fn test_commit_feed(store: &dyn LedgerStore) -> Result<(), LedgerError> {
    let mut rx = store.subscribe();
    let attachment = AttachmentId::new("feed-a1");
    let hash = ContentHash::of(b"feed");
    let at = base_time()?;

    let mut record = store.upsert_retry(&attachment, &hash, at).await?;
    assert_eq!(
        rx.try_recv().ok(),
        Some(LedgerChange::RetryInserted {
            attachment_id: attachment.clone(),
            next_retry_at: at,
        }),
        "insert publishes after commit"
    );

    record.next_retry_at = at + Duration::minutes(1);
    store.update_retry(&record).await?;
    assert_eq!(
        rx.try_recv().ok(),
        Some(LedgerChange::RetryUpdated {
            attachment_id: attachment.clone(),
            next_retry_at: record.next_retry_at,
        })
    );

    store.delete_retry(&attachment).await?;
    assert_eq!(
        rx.try_recv().ok(),
        Some(LedgerChange::RetryDeleted {
            attachment_id: attachment.clone(),
        })
    );

    store.update_retry(&record).await?;
    store.delete_retry(&attachment).await?;
    assert!(
        rx.try_recv().is_err(),
        "writes that change nothing publish nothing"
    );
    Ok(())
}

/// Wraps a store and fails reads or writes on demand.
///
/// A failed write never reaches the inner store, so it commits and
/// publishes nothing.
pub struct FlakyStore {
    inner: Arc<dyn LedgerStore>,
    write_error: Mutex<Option<LedgerError>>,
    read_error: Mutex<Option<LedgerError>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn LedgerStore>) -> Self {
        Self {
            inner,
            write_error: Mutex::new(None),
            read_error: Mutex::new(None),
        }
    }

    /// Fail every write with `error` until called again with `None`.
    pub fn fail_writes(&self, error: Option<LedgerError>) {
        *self.write_error.lock() = error;
    }

    /// Fail every read with `error` until called again with `None`.
    pub fn fail_reads(&self, error: Option<LedgerError>) {
        *self.read_error.lock() = error;
    }

    fn check_write(&self) -> Result<(), LedgerError> {
        self.write_error.lock().clone().map_or(Ok(()), Err)
    }

    fn check_read(&self) -> Result<(), LedgerError> {
        self.read_error.lock().clone().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    async fn insert_hash_record(&self, record: &HashRecord) -> Result<(), LedgerError> {
        self.check_write()?;
        self.inner.insert_hash_record(record).await
    }

    async fn set_blocked(&self, hash: &Fingerprint, blocked: bool) -> Result<u64, LedgerError> {
        self.check_write()?;
        self.inner.set_blocked(hash, blocked).await
    }

    async fn is_blocked(&self, hash: &Fingerprint) -> Result<bool, LedgerError> {
        self.check_read()?;
        self.inner.is_blocked(hash).await
    }

    async fn hash_records(&self) -> Result<Vec<HashRecord>, LedgerError> {
        self.check_read()?;
        self.inner.hash_records().await
    }

    async fn prune_hash_records(&self, older_than: DateTime<Utc>) -> Result<u64, LedgerError> {
        self.check_write()?;
        self.inner.prune_hash_records(older_than).await
    }

    async fn upsert_retry(
        &self,
        attachment_id: &AttachmentId,
        content_hash: &ContentHash,
        next_retry_at: DateTime<Utc>,
    ) -> Result<RetryQueueRecord, LedgerError> {
        self.check_write()?;
        self.inner
            .upsert_retry(attachment_id, content_hash, next_retry_at)
            .await
    }

    async fn retry_record(
        &self,
        attachment_id: &AttachmentId,
    ) -> Result<Option<RetryQueueRecord>, LedgerError> {
        self.check_read()?;
        self.inner.retry_record(attachment_id).await
    }

    async fn retry_records(&self) -> Result<Vec<RetryQueueRecord>, LedgerError> {
        self.check_read()?;
        self.inner.retry_records().await
    }

    async fn due_retries(&self, now: DateTime<Utc>) -> Result<Vec<RetryQueueRecord>, LedgerError> {
        self.check_read()?;
        self.inner.due_retries(now).await
    }

    async fn update_retry(&self, record: &RetryQueueRecord) -> Result<bool, LedgerError> {
        self.check_write()?;
        self.inner.update_retry(record).await
    }

    async fn delete_retry(&self, attachment_id: &AttachmentId) -> Result<bool, LedgerError> {
        self.check_write()?;
        self.inner.delete_retry(attachment_id).await
    }

    async fn delete_retry_record(&self, record: &RetryQueueRecord) -> Result<bool, LedgerError> {
        self.check_write()?;
        self.inner.delete_retry_record(record).await
    }

    async fn next_retry_at(&self) -> Result<Option<DateTime<Utc>>, LedgerError> {
        self.check_read()?;
        self.inner.next_retry_at().await
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerChange> {
        self.inner.subscribe()
    }
}
