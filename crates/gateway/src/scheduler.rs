//! Background re-checking of deferred downloads.
//!
//! The scheduler is a single-flight loop: at most one task per scheduler
//! processes the retry queue, started on demand and stopped when the queue
//! drains. Between cycles it sleeps until the earliest `next_retry_at`, or
//! until a new retry record is committed, or until shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use mediagate_blocklist::SharedBlocklist;
use mediagate_core::{Backoff, Clock, GuardConfig, RetryQueueRecord, offset, until};
use mediagate_ledger::LedgerStore;

use crate::error::GatewayError;
use crate::metrics::GuardMetrics;
use crate::pipeline::AttachmentPipeline;

/// Retry policy for deferred downloads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
    /// Delay curve between re-checks.
    pub backoff: Backoff,
    /// Give up after this many still-blocked re-checks. `None` retries
    /// until the blocklist entry expires.
    pub max_attempts: Option<u32>,
}

impl From<&GuardConfig> for SchedulerConfig {
    fn from(config: &GuardConfig) -> Self {
        Self {
            backoff: config.retry_backoff(),
            max_attempts: config.retry.max_attempts,
        }
    }
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Due records examined.
    pub checked: usize,
    /// Records whose hash cleared and whose attachment was marked ready.
    pub released: usize,
    /// Records rescheduled because the hash is still blocked.
    pub still_blocked: usize,
    /// Records dropped after reaching the attempt limit.
    pub abandoned: usize,
    /// Blocklist checks that failed; counted as still blocked.
    pub check_failures: usize,
    /// Ledger writes that failed; the record is left for the next pass.
    pub write_failures: usize,
}

/// Single-flight retry loop over the ledger's retry queue.
///
/// Cloning is cheap; clones share the same loop.
#[derive(Clone)]
pub struct RetryScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn LedgerStore>,
    blocklist: SharedBlocklist,
    pipeline: Arc<dyn AttachmentPipeline>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<GuardMetrics>,
    running: AtomicBool,
    wake: Notify,
    cancel: CancellationToken,
    tracker: TaskTracker,
    cycle_lock: Mutex<()>,
    phase: parking_lot::Mutex<LoopPhase>,
}

/// What the loop will do next, as seen by the commit watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopPhase {
    /// Not yet committed to a wake time; any new retry time wakes it.
    Open,
    /// Mid-cycle; the queue is re-read once the cycle ends.
    Cycling,
    /// Asleep until this time.
    SleepingUntil(DateTime<Utc>),
}

/// Owns the running flag while the loop holds it; releases it on drop.
struct RunningGuard<'a> {
    flag: &'a AtomicBool,
    armed: bool,
}

impl<'a> RunningGuard<'a> {
    fn new(flag: &'a AtomicBool) -> Self {
        Self { flag, armed: true }
    }

    fn release(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.armed = false;
    }

    fn reacquire(&mut self) -> bool {
        self.armed = self
            .flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        self.armed
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(false, Ordering::Release);
        }
    }
}

impl RetryScheduler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        blocklist: SharedBlocklist,
        pipeline: Arc<dyn AttachmentPipeline>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<GuardMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                blocklist,
                pipeline,
                config,
                clock,
                metrics,
                running: AtomicBool::new(false),
                wake: Notify::new(),
                cancel: CancellationToken::new(),
                tracker: TaskTracker::new(),
                cycle_lock: Mutex::new(()),
                phase: parking_lot::Mutex::new(LoopPhase::Open),
            }),
        }
    }

    /// Start the loop unless it is already running or shut down.
    ///
    /// Returns `true` if this call started it. Any number of callers may race
    /// here; exactly one wins.
    pub fn start_if_needed(&self) -> bool {
        if self.inner.cancel.is_cancelled() {
            return false;
        }
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(inner.run());
        true
    }

    /// Wake a sleeping loop, or start one if idle.
    ///
    /// If the loop is mid-cycle the wake-up is kept and consumed when it
    /// next goes to sleep.
    pub fn notify_change(&self) {
        self.inner.wake.notify_one();
        self.start_if_needed();
    }

    /// Follow the ledger's commit feed and call
    /// [`notify_change`](Self::notify_change) when a retry record is created
    /// or rescheduled to a time the loop would otherwise sleep past.
    ///
    /// Reschedules written by the loop's own cycle do not wake it again.
    pub fn watch_changes(&self) -> JoinHandle<()> {
        let mut changes = self.inner.store.subscribe();
        let scheduler = self.clone();
        self.inner.tracker.spawn(async move {
            loop {
                tokio::select! {
                    () = scheduler.inner.cancel.cancelled() => break,
                    change = changes.recv() => match change {
                        Ok(change) => {
                            if let Some(at) = change.retry_time()
                                && scheduler.inner.wakes_for(at)
                            {
                                scheduler.notify_change();
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "commit feed lagged, rescanning retry queue");
                            scheduler.notify_change();
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            debug!("commit watcher stopped");
        })
    }

    /// Run one reconciliation pass now.
    ///
    /// Passes never overlap: this waits for an in-flight pass of the
    /// background loop to finish first.
    pub async fn run_cycle(&self) -> Result<CycleReport, GatewayError> {
        self.inner.cycle().await
    }

    /// Whether the loop is currently running.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Stop the loop and the commit watcher and wait for them to exit.
    ///
    /// An in-progress sleep is interrupted. A record being processed is
    /// finished first; the loop stops before the next one.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        info!("retry scheduler shut down");
    }
}

impl std::fmt::Debug for RetryScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryScheduler")
            .field("config", &self.inner.config)
            .field("running", &self.is_running())
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        let mut running = RunningGuard::new(&self.running);
        let mut consecutive_errors: u32 = 0;
        info!("retry scheduler started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_phase(LoopPhase::Cycling);
            let mut failed = match self.cycle().await {
                Ok(report) => {
                    debug!(
                        checked = report.checked,
                        released = report.released,
                        still_blocked = report.still_blocked,
                        abandoned = report.abandoned,
                        "retry cycle complete"
                    );
                    report.write_failures > 0
                }
                Err(e) => {
                    error!(error = %e, "retry cycle failed");
                    true
                }
            };

            // Writes committed from here on leave a fresh permit.
            self.set_phase(LoopPhase::Open);
            let _ = self.wake.notified().now_or_never();

            let next = self.store.next_retry_at().await;
            let now = self.clock.now();
            let mut wait = match next {
                Ok(Some(at)) => until(now, at),
                Ok(None) if !failed => {
                    running.release();
                    let pending = matches!(self.store.next_retry_at().await, Ok(Some(_)));
                    if pending && running.reacquire() {
                        continue;
                    }
                    info!("retry queue empty, scheduler idle");
                    self.set_phase(LoopPhase::Open);
                    return;
                }
                Ok(None) => Duration::ZERO,
                Err(e) => {
                    error!(error = %e, "failed to read next retry time");
                    failed = true;
                    Duration::ZERO
                }
            };

            if failed {
                consecutive_errors = consecutive_errors.saturating_add(1);
                self.metrics.increment_cycle_errors();
                let delay = self.config.backoff.delay_for(consecutive_errors);
                warn!(
                    consecutive_errors,
                    delay_ms = %delay.as_millis(),
                    "retry cycle incomplete, backing off"
                );
                wait = wait.max(delay);
            } else {
                consecutive_errors = 0;
            }

            self.set_phase(LoopPhase::SleepingUntil(offset(now, wait)));
            debug!(wait_ms = %wait.as_millis(), "retry scheduler sleeping");
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = self.wake.notified() => debug!("retry scheduler woken early"),
                () = tokio::time::sleep(wait) => {}
            }
            self.set_phase(LoopPhase::Open);
        }

        self.set_phase(LoopPhase::Open);
        info!("retry scheduler stopped");
    }

    fn set_phase(&self, phase: LoopPhase) {
        *self.phase.lock() = phase;
    }

    /// Whether a retry record due at `at` needs the loop woken or started.
    fn wakes_for(&self, at: DateTime<Utc>) -> bool {
        if !self.running.load(Ordering::Acquire) {
            return true;
        }
        match *self.phase.lock() {
            LoopPhase::Open => true,
            LoopPhase::Cycling => false,
            LoopPhase::SleepingUntil(wake) => at < wake,
        }
    }

    async fn cycle(&self) -> Result<CycleReport, GatewayError> {
        let _serial = self.cycle_lock.lock().await;
        self.metrics.increment_scheduler_cycles();

        let due = self.store.due_retries(self.clock.now()).await?;
        let mut report = CycleReport::default();

        for record in due {
            if self.cancel.is_cancelled() {
                break;
            }
            report.checked += 1;
            self.metrics.increment_rechecks();

            match self.blocklist.try_contains(&record.content_hash).await {
                Ok(false) => self.release(&record, &mut report).await,
                Ok(true) => self.defer(record, &mut report).await,
                Err(e) => {
                    warn!(
                        attachment_id = %record.attachment_id,
                        error = %e,
                        "blocklist re-check failed, treating as still blocked"
                    );
                    report.check_failures += 1;
                    self.defer(record, &mut report).await;
                }
            }
        }

        if report.released > 0 {
            self.pipeline.begin_downloading_if_necessary();
        }
        Ok(report)
    }

    async fn release(&self, record: &RetryQueueRecord, report: &mut CycleReport) {
        let id = &record.attachment_id;
        match self.store.delete_retry_record(record).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(attachment_id = %id, "retry record changed since the check, leaving it");
                return;
            }
            Err(e) => {
                error!(attachment_id = %id, error = %e, "failed to delete retry record");
                report.write_failures += 1;
                return;
            }
        }

        match self.pipeline.mark_ready_for_download(id).await {
            Ok(()) => {
                report.released += 1;
                self.metrics.increment_releases();
                info!(attachment_id = %id, "content cleared, download released");
            }
            Err(e) => {
                warn!(attachment_id = %id, error = %e, "failed to release download, re-enqueueing");
                let next_retry_at = offset(self.clock.now(), self.config.backoff.delay_for(0));
                if let Err(e) = self
                    .store
                    .upsert_retry(id, &record.content_hash, next_retry_at)
                    .await
                {
                    error!(attachment_id = %id, error = %e, "failed to re-enqueue retry record");
                    report.write_failures += 1;
                }
            }
        }
    }

    async fn defer(&self, mut record: RetryQueueRecord, report: &mut CycleReport) {
        let attempt = record.retry_attempt.saturating_add(1);

        if self.config.max_attempts.is_some_and(|max| attempt >= max) {
            match self.store.delete_retry_record(&record).await {
                Ok(true) => {
                    report.abandoned += 1;
                    self.metrics.increment_abandoned();
                    warn!(
                        attachment_id = %record.attachment_id,
                        attempts = attempt,
                        "content still blocked, giving up on deferred download"
                    );
                }
                Ok(false) => {
                    debug!(attachment_id = %record.attachment_id, "retry record replaced, skipping");
                }
                Err(e) => {
                    error!(attachment_id = %record.attachment_id, error = %e, "failed to drop retry record");
                    report.write_failures += 1;
                }
            }
            return;
        }

        let delay = self.config.backoff.delay_for(attempt);
        record.retry_attempt = attempt;
        record.next_retry_at = offset(self.clock.now(), delay);

        match self.store.update_retry(&record).await {
            Ok(true) => {
                report.still_blocked += 1;
                self.metrics.increment_still_blocked();
                debug!(
                    attachment_id = %record.attachment_id,
                    attempt,
                    delay_ms = %delay.as_millis(),
                    "content still blocked, rescheduled"
                );
            }
            Ok(false) => {
                debug!(attachment_id = %record.attachment_id, "retry record replaced, skipping");
            }
            Err(e) => {
                error!(attachment_id = %record.attachment_id, error = %e, "failed to reschedule retry record");
                report.write_failures += 1;
            }
        }
    }
}
