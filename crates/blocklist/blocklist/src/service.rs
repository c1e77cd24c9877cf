use std::future::Future;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use mediagate_core::{Clock, ContentHash, SystemClock};

use crate::backend::BlocklistBackend;
use crate::config::BlocklistConfig;
use crate::entry::{BlocklistEntry, InsertOutcome};
use crate::error::BlocklistError;

/// Client for the shared, network-wide blocklist of exact content hashes.
///
/// Every call runs through the same retry loop: each attempt is bounded by
/// [`BlocklistConfig::request_timeout`], transient failures are retried with
/// the configured backoff up to [`BlocklistConfig::max_attempts`] attempts,
/// and permanent failures return immediately. Nothing is cached: the backend
/// is consulted on every check.
#[derive(Clone)]
pub struct SharedBlocklist {
    backend: Arc<dyn BlocklistBackend>,
    config: BlocklistConfig,
    clock: Arc<dyn Clock>,
}

impl SharedBlocklist {
    /// Create a client using the system clock for expiry checks.
    pub fn new(backend: Arc<dyn BlocklistBackend>, config: BlocklistConfig) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    /// Create a client with an explicit clock.
    pub fn with_clock(
        backend: Arc<dyn BlocklistBackend>,
        config: BlocklistConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backend,
            config,
            clock,
        }
    }

    /// Return a reference to the client configuration.
    pub fn config(&self) -> &BlocklistConfig {
        &self.config
    }

    /// Whether `hash` is currently blocked.
    ///
    /// Fails open: if the blocklist cannot be reached after all retries, or
    /// answers with a permanent error, the failure is logged and the hash is
    /// reported as not blocked. Availability of downloads wins over strict
    /// enforcement here; callers that must not fail open use
    /// [`try_contains`](Self::try_contains).
    pub async fn contains(&self, hash: &ContentHash) -> bool {
        match self.try_contains(hash).await {
            Ok(blocked) => blocked,
            Err(e) => {
                warn!(hash = %hash, error = %e, "blocklist check failed, allowing");
                false
            }
        }
    }

    /// Whether `hash` is currently blocked, with failures surfaced.
    ///
    /// An entry that has expired by the client clock is never reported, even
    /// if the backend still returns it.
    #[instrument(skip(self, hash), fields(hash = %hash))]
    pub async fn try_contains(&self, hash: &ContentHash) -> Result<bool, BlocklistError> {
        let entry = self.call("get", || self.backend.get(hash)).await?;
        let now = self.clock.now();
        Ok(entry.is_some_and(|e| !e.is_expired(now)))
    }

    /// Add `hash` to the blocklist with the configured entry lifetime.
    ///
    /// Storing a hash that is already present is not an error.
    #[instrument(skip(self, hash), fields(hash = %hash))]
    pub async fn store(&self, hash: &ContentHash) -> Result<InsertOutcome, BlocklistError> {
        let entry = BlocklistEntry::new(hash.clone(), self.clock.now(), self.config.entry_ttl);
        let outcome = self
            .call("put_if_absent", || self.backend.put_if_absent(&entry))
            .await?;
        debug!(hash = %hash, ?outcome, "stored blocklist entry");
        Ok(outcome)
    }

    /// Remove `hash` from the blocklist. Returns `true` if it was present.
    #[instrument(skip(self, hash), fields(hash = %hash))]
    pub async fn delete(&self, hash: &ContentHash) -> Result<bool, BlocklistError> {
        self.call("delete", || self.backend.delete(hash)).await
    }

    async fn call<T, F, Fut>(&self, op: &'static str, mut request: F) -> Result<T, BlocklistError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BlocklistError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let timeout = self.config.request_timeout;
        let mut attempt = 0;

        loop {
            let err = match tokio::time::timeout(timeout, request()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_elapsed) => BlocklistError::Timeout(timeout),
            };

            if !err.is_retryable() {
                return Err(err);
            }

            attempt += 1;
            if attempt >= max_attempts {
                warn!(op, attempts = attempt, error = %err, "blocklist retries exhausted");
                return Err(BlocklistError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.config.backoff.delay_for(attempt - 1);
            warn!(
                op,
                attempt,
                error = %err,
                delay_ms = %delay.as_millis(),
                "retryable blocklist error, will retry"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

impl std::fmt::Debug for SharedBlocklist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedBlocklist")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;

    use mediagate_core::{Backoff, ManualClock};

    use super::*;
    use crate::testing::FlakyBackend;

    #[derive(Default)]
    struct MapBackend {
        entries: Mutex<HashMap<ContentHash, BlocklistEntry>>,
    }

    #[async_trait]
    impl BlocklistBackend for MapBackend {
        async fn put_if_absent(
            &self,
            entry: &BlocklistEntry,
        ) -> Result<InsertOutcome, BlocklistError> {
            let mut entries = self.entries.lock();
            let live = entries
                .get(&entry.hash)
                .is_some_and(|e| !e.is_expired(entry.inserted_at));
            if live {
                return Ok(InsertOutcome::AlreadyPresent);
            }
            entries.insert(entry.hash.clone(), entry.clone());
            Ok(InsertOutcome::Inserted)
        }

        async fn get(&self, hash: &ContentHash) -> Result<Option<BlocklistEntry>, BlocklistError> {
            Ok(self.entries.lock().get(hash).cloned())
        }

        async fn delete(&self, hash: &ContentHash) -> Result<bool, BlocklistError> {
            Ok(self.entries.lock().remove(hash).is_some())
        }
    }

    fn config(max_attempts: u32) -> BlocklistConfig {
        BlocklistConfig {
            entry_ttl: Some(Duration::from_secs(3600)),
            request_timeout: Duration::from_millis(100),
            max_attempts,
            backoff: Backoff {
                base: Duration::from_millis(10),
                max: Duration::from_millis(50),
                multiplier: 2.0,
                jitter: 0.0,
            },
        }
    }

    fn flaky() -> Arc<FlakyBackend> {
        Arc::new(FlakyBackend::new(Arc::new(MapBackend::default())))
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let backend = flaky();
        let blocklist = SharedBlocklist::new(backend.clone(), config(4));
        let hash = ContentHash::of(b"h1");

        backend.fail_next(2, BlocklistError::Connection("reset".into()));
        assert_eq!(blocklist.store(&hash).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(backend.calls(), 3);
        assert!(blocklist.try_contains(&hash).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_max_attempts() {
        let backend = flaky();
        let blocklist = SharedBlocklist::new(backend.clone(), config(3));
        backend.fail_next(10, BlocklistError::Throttled("slow down".into()));

        let err = blocklist.try_contains(&ContentHash::of(b"h1")).await.unwrap_err();
        match err {
            BlocklistError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, BlocklistError::Throttled(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let backend = flaky();
        let blocklist = SharedBlocklist::new(backend.clone(), config(4));
        backend.fail_next(1, BlocklistError::Unauthorized("bad token".into()));

        let err = blocklist.delete(&ContentHash::of(b"h1")).await.unwrap_err();
        assert!(matches!(err, BlocklistError::Unauthorized(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_requests_time_out_and_retry() {
        let backend = flaky();
        let blocklist = SharedBlocklist::new(backend.clone(), config(2));
        backend.stall_next(1);
        let hash = ContentHash::of(b"h1");

        assert!(!blocklist.try_contains(&hash).await.unwrap());
        assert_eq!(backend.calls(), 2);

        backend.stall_next(2);
        let err = blocklist.try_contains(&hash).await.unwrap_err();
        assert!(matches!(
            err,
            BlocklistError::RetriesExhausted { last, .. } if matches!(*last, BlocklistError::Timeout(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn contains_fails_open() {
        let backend = flaky();
        let blocklist = SharedBlocklist::new(backend.clone(), config(2));
        let hash = ContentHash::of(b"h1");
        blocklist.store(&hash).await.unwrap();

        backend.set_down(true);
        assert!(!blocklist.contains(&hash).await);
        assert!(blocklist.try_contains(&hash).await.is_err());

        backend.set_down(false);
        assert!(blocklist.contains(&hash).await);
    }

    #[tokio::test]
    async fn expired_entries_are_not_contained_and_can_be_restored() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let blocklist = SharedBlocklist::with_clock(
            Arc::new(MapBackend::default()),
            config(1),
            clock.clone(),
        );
        let hash = ContentHash::of(b"h1");

        assert_eq!(blocklist.store(&hash).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(
            blocklist.store(&hash).await.unwrap(),
            InsertOutcome::AlreadyPresent
        );

        clock.advance(Duration::from_secs(3600));
        assert!(!blocklist.contains(&hash).await, "expired at exactly the TTL");
        assert_eq!(blocklist.store(&hash).await.unwrap(), InsertOutcome::Inserted);
        assert!(blocklist.contains(&hash).await);
    }

    #[tokio::test]
    async fn delete_clears_entry() {
        let blocklist = SharedBlocklist::new(Arc::new(MapBackend::default()), config(1));
        let hash = ContentHash::of(b"h1");
        blocklist.store(&hash).await.unwrap();
        assert!(blocklist.delete(&hash).await.unwrap());
        assert!(!blocklist.delete(&hash).await.unwrap());
        assert!(!blocklist.contains(&hash).await);
    }
}
