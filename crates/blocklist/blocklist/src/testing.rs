//! Helpers for testing blocklist backends and their callers.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use mediagate_core::ContentHash;

use crate::backend::BlocklistBackend;
use crate::entry::{BlocklistEntry, InsertOutcome};
use crate::error::BlocklistError;

/// Unique hash per call so suites can share a remote table across runs.
fn fresh_hash(label: &str) -> ContentHash {
    ContentHash::of(format!("{label}:{}", uuid::Uuid::new_v4()).as_bytes())
}

/// Whole-second timestamps, since some backends store epoch seconds.
fn whole_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

/// Run the full blocklist backend conformance test suite.
///
/// # Errors
///
/// Returns an error if a backend call fails. Behavioral mismatches panic.
pub async fn run_blocklist_conformance_tests(
    backend: &dyn BlocklistBackend,
) -> Result<(), BlocklistError> {
    test_get_missing(backend).await?;
    test_insert_if_absent(backend).await?;
    test_expired_entry_replaced(backend).await?;
    test_delete(backend).await?;
    test_concurrent_inserts(backend).await?;
    Ok(())
}

async fn test_get_missing(backend: &dyn BlocklistBackend) -> Result<(), BlocklistError> {
    let hash = fresh_hash("missing");
    assert!(backend.get(&hash).await?.is_none());
    Ok(())
}

async fn test_insert_if_absent(backend: &dyn BlocklistBackend) -> Result<(), BlocklistError> {
    let hash = fresh_hash("insert");
    let now = whole_seconds(Utc::now());
    let first = BlocklistEntry::new(hash.clone(), now, Some(Duration::from_secs(3600)));

    assert_eq!(backend.put_if_absent(&first).await?, InsertOutcome::Inserted);
    assert_eq!(backend.get(&hash).await?, Some(first.clone()));

    let later = now + chrono::Duration::seconds(5);
    let second = BlocklistEntry::new(hash.clone(), later, Some(Duration::from_secs(60)));
    assert_eq!(
        backend.put_if_absent(&second).await?,
        InsertOutcome::AlreadyPresent,
        "a live entry must not be overwritten"
    );
    assert_eq!(
        backend.get(&hash).await?,
        Some(first),
        "original entry is preserved"
    );
    backend.delete(&hash).await?;
    Ok(())
}

async fn test_expired_entry_replaced(
    backend: &dyn BlocklistBackend,
) -> Result<(), BlocklistError> {
    let hash = fresh_hash("expired");
    let now = whole_seconds(Utc::now());
    let old = BlocklistEntry::new(
        hash.clone(),
        now - chrono::Duration::seconds(120),
        Some(Duration::from_secs(60)),
    );
    assert_eq!(backend.put_if_absent(&old).await?, InsertOutcome::Inserted);

    let fresh = BlocklistEntry::new(hash.clone(), now, None);
    assert_eq!(
        backend.put_if_absent(&fresh).await?,
        InsertOutcome::Inserted,
        "an expired entry is replaced"
    );
    assert_eq!(backend.get(&hash).await?, Some(fresh));
    backend.delete(&hash).await?;
    Ok(())
}

async fn test_delete(backend: &dyn BlocklistBackend) -> Result<(), BlocklistError> {
    let hash = fresh_hash("delete");
    let entry = BlocklistEntry::new(hash.clone(), whole_seconds(Utc::now()), None);
    backend.put_if_absent(&entry).await?;

    assert!(backend.delete(&hash).await?, "delete reports an existing entry");
    assert!(backend.get(&hash).await?.is_none());
    assert!(!backend.delete(&hash).await?, "second delete finds nothing");
    Ok(())
}

async fn test_concurrent_inserts(backend: &dyn BlocklistBackend) -> Result<(), BlocklistError> {
    let hash = fresh_hash("concurrent");
    let now = whole_seconds(Utc::now());
    let entry = BlocklistEntry::new(hash.clone(), now, Some(Duration::from_secs(3600)));

    let (a, b, c) = futures::join!(
        backend.put_if_absent(&entry),
        backend.put_if_absent(&entry),
        backend.put_if_absent(&entry),
    );
    let outcomes = [a?, b?, c?];
    let inserted = outcomes
        .iter()
        .filter(|o| **o == InsertOutcome::Inserted)
        .count();
    assert_eq!(inserted, 1, "exactly one writer wins: {outcomes:?}");
    assert!(backend.get(&hash).await?.is_some());
    backend.delete(&hash).await?;
    Ok(())
}

/// Wraps a backend and injects failures on demand.
pub struct FlakyBackend {
    inner: Arc<dyn BlocklistBackend>,
    failures: Mutex<VecDeque<BlocklistError>>,
    stalls: AtomicU64,
    down: AtomicBool,
    calls: AtomicU64,
}

impl FlakyBackend {
    pub fn new(inner: Arc<dyn BlocklistBackend>) -> Self {
        Self {
            inner,
            failures: Mutex::new(VecDeque::new()),
            stalls: AtomicU64::new(0),
            down: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    /// Fail the next `n` calls with `error`.
    pub fn fail_next(&self, n: usize, error: BlocklistError) {
        let mut failures = self.failures.lock();
        failures.extend(std::iter::repeat_n(error, n));
    }

    /// Make the next `n` calls hang forever.
    pub fn stall_next(&self, n: u64) {
        self.stalls.fetch_add(n, Ordering::Relaxed);
    }

    /// While down, every call fails with [`BlocklistError::Unavailable`].
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::Relaxed);
    }

    /// Number of calls received so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    async fn before_call(&self) -> Result<(), BlocklistError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.down.load(Ordering::Relaxed) {
            return Err(BlocklistError::Unavailable("backend down".into()));
        }
        let stalled = self
            .stalls
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if stalled {
            std::future::pending::<()>().await;
        }
        let injected = self.failures.lock().pop_front();
        match injected {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BlocklistBackend for FlakyBackend {
    async fn put_if_absent(&self, entry: &BlocklistEntry) -> Result<InsertOutcome, BlocklistError> {
        self.before_call().await?;
        self.inner.put_if_absent(entry).await
    }

    async fn get(&self, hash: &ContentHash) -> Result<Option<BlocklistEntry>, BlocklistError> {
        self.before_call().await?;
        self.inner.get(hash).await
    }

    async fn delete(&self, hash: &ContentHash) -> Result<bool, BlocklistError> {
        self.before_call().await?;
        self.inner.delete(hash).await
    }
}
