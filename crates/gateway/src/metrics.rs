use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters tracking gate, scheduler and observation outcomes.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct GuardMetrics {
    /// Downloads allowed by the gate.
    pub gate_allowed: AtomicU64,
    /// Downloads deferred because the content hash is blocklisted.
    pub gate_denied: AtomicU64,
    /// Downloads allowed because the blocklist could not be consulted.
    pub gate_fail_open: AtomicU64,
    /// Retry records written by the gate.
    pub retries_enqueued: AtomicU64,
    /// Reconciliation passes run by the scheduler.
    pub scheduler_cycles: AtomicU64,
    /// Blocklist re-checks performed by the scheduler.
    pub rechecks: AtomicU64,
    /// Deferred downloads released after their hash cleared.
    pub releases: AtomicU64,
    /// Re-checks that found the hash still blocked.
    pub still_blocked: AtomicU64,
    /// Retry records dropped after reaching the attempt limit.
    pub abandoned: AtomicU64,
    /// Scheduler passes that failed before completing.
    pub cycle_errors: AtomicU64,
    /// Incoming media fingerprinted and recorded.
    pub observations: AtomicU64,
    /// Incoming media that could not be decoded.
    pub unhashable: AtomicU64,
    /// Observations with at least one similar prior sighting.
    pub duplicate_sightings: AtomicU64,
}

macro_rules! incr {
    ($($method:ident => $field:ident),* $(,)?) => {
        $(
            pub fn $method(&self) {
                self.$field.fetch_add(1, Ordering::Relaxed);
            }
        )*
    };
}

impl GuardMetrics {
    incr! {
        increment_gate_allowed => gate_allowed,
        increment_gate_denied => gate_denied,
        increment_gate_fail_open => gate_fail_open,
        increment_retries_enqueued => retries_enqueued,
        increment_scheduler_cycles => scheduler_cycles,
        increment_rechecks => rechecks,
        increment_releases => releases,
        increment_still_blocked => still_blocked,
        increment_abandoned => abandoned,
        increment_cycle_errors => cycle_errors,
        increment_observations => observations,
        increment_unhashable => unhashable,
        increment_duplicate_sightings => duplicate_sightings,
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            gate_allowed: self.gate_allowed.load(Ordering::Relaxed),
            gate_denied: self.gate_denied.load(Ordering::Relaxed),
            gate_fail_open: self.gate_fail_open.load(Ordering::Relaxed),
            retries_enqueued: self.retries_enqueued.load(Ordering::Relaxed),
            scheduler_cycles: self.scheduler_cycles.load(Ordering::Relaxed),
            rechecks: self.rechecks.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            still_blocked: self.still_blocked.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            cycle_errors: self.cycle_errors.load(Ordering::Relaxed),
            observations: self.observations.load(Ordering::Relaxed),
            unhashable: self.unhashable.load(Ordering::Relaxed),
            duplicate_sightings: self.duplicate_sightings.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`GuardMetrics`] at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub gate_allowed: u64,
    pub gate_denied: u64,
    pub gate_fail_open: u64,
    pub retries_enqueued: u64,
    pub scheduler_cycles: u64,
    pub rechecks: u64,
    pub releases: u64,
    pub still_blocked: u64,
    pub abandoned: u64,
    pub cycle_errors: u64,
    pub observations: u64,
    pub unhashable: u64,
    pub duplicate_sightings: u64,
}
