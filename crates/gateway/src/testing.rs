//! Test doubles for hosts and integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use mediagate_core::{AttachmentId, Clock, offset};

use crate::error::PipelineError;
use crate::pipeline::AttachmentPipeline;

/// An [`AttachmentPipeline`] that serves bytes from memory and records
/// every release.
#[derive(Debug)]
pub struct RecordingPipeline {
    files: Mutex<HashMap<AttachmentId, Vec<u8>>>,
    ready: Mutex<Vec<AttachmentId>>,
    ready_tx: watch::Sender<usize>,
    begin_calls: AtomicU64,
    fail_fetch: AtomicBool,
    fail_mark: AtomicBool,
}

impl RecordingPipeline {
    pub fn new() -> Self {
        let (ready_tx, _) = watch::channel(0);
        Self {
            files: Mutex::new(HashMap::new()),
            ready: Mutex::new(Vec::new()),
            ready_tx,
            begin_calls: AtomicU64::new(0),
            fail_fetch: AtomicBool::new(false),
            fail_mark: AtomicBool::new(false),
        }
    }

    /// Make `bytes` available for `attachment_id`.
    pub fn insert_file(&self, attachment_id: &AttachmentId, bytes: Vec<u8>) {
        self.files.lock().insert(attachment_id.clone(), bytes);
    }

    /// Attachments marked ready, in call order.
    pub fn ready(&self) -> Vec<AttachmentId> {
        self.ready.lock().clone()
    }

    /// How many times `begin_downloading_if_necessary` was called.
    pub fn begin_calls(&self) -> u64 {
        self.begin_calls.load(Ordering::Relaxed)
    }

    /// Fail every fetch while set.
    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::Relaxed);
    }

    /// Fail every `mark_ready_for_download` while set.
    pub fn set_fail_mark(&self, fail: bool) {
        self.fail_mark.store(fail, Ordering::Relaxed);
    }

    /// Wait until at least `count` attachments have been marked ready.
    /// Returns `false` on timeout.
    pub async fn wait_for_ready(&self, count: usize, timeout: Duration) -> bool {
        let mut rx = self.ready_tx.subscribe();
        matches!(
            tokio::time::timeout(timeout, rx.wait_for(|n| *n >= count)).await,
            Ok(Ok(_))
        )
    }
}

impl Default for RecordingPipeline {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AttachmentPipeline for RecordingPipeline {
    async fn fetch_attachment_bytes(
        &self,
        attachment_id: &AttachmentId,
    ) -> Result<Vec<u8>, PipelineError> {
        if self.fail_fetch.load(Ordering::Relaxed) {
            return Err(PipelineError::Transport("fetch disabled".into()));
        }
        self.files
            .lock()
            .get(attachment_id)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(attachment_id.to_string()))
    }

    async fn mark_ready_for_download(
        &self,
        attachment_id: &AttachmentId,
    ) -> Result<(), PipelineError> {
        if self.fail_mark.load(Ordering::Relaxed) {
            return Err(PipelineError::Rejected("mark disabled".into()));
        }
        let count = {
            let mut ready = self.ready.lock();
            ready.push(attachment_id.clone());
            ready.len()
        };
        self.ready_tx.send_replace(count);
        Ok(())
    }

    fn begin_downloading_if_necessary(&self) {
        self.begin_calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// A wall clock that advances with tokio's timer.
///
/// Under `#[tokio::test(start_paused = true)]` timer sleeps and retry
/// timestamps move together, so scheduler tests run instantly.
#[derive(Debug)]
pub struct TokioClock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        offset(self.origin, self.started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_releases_in_order() {
        let pipeline = RecordingPipeline::new();
        let a = AttachmentId::new("a");
        let b = AttachmentId::new("b");
        pipeline.mark_ready_for_download(&a).await.unwrap();
        pipeline.mark_ready_for_download(&b).await.unwrap();
        assert_eq!(pipeline.ready(), vec![a, b]);
        assert!(pipeline.wait_for_ready(2, Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn injected_failures() {
        let pipeline = RecordingPipeline::new();
        let a = AttachmentId::new("a");
        assert!(matches!(
            pipeline.fetch_attachment_bytes(&a).await,
            Err(PipelineError::NotFound(_))
        ));
        pipeline.insert_file(&a, b"bytes".to_vec());
        assert_eq!(pipeline.fetch_attachment_bytes(&a).await.unwrap(), b"bytes");

        pipeline.set_fail_mark(true);
        assert!(pipeline.mark_ready_for_download(&a).await.is_err());
        assert!(pipeline.ready().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_clock_follows_paused_time() {
        let origin = Utc::now();
        let clock = TokioClock::new(origin);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(clock.now(), origin + chrono::Duration::hours(1));
    }
}
