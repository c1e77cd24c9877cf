use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use mediagate_blocklist::{InsertOutcome, SharedBlocklist};
use mediagate_core::{
    AttachmentId, Clock, ContentHash, ConversationId, GuardConfig, HashRecord, PerceptualError,
    PerceptualHasher,
};
use mediagate_ledger::{HashLedger, SimilarRecord};

use crate::error::GatewayError;
use crate::gate::{DownloadGate, GateDecision};
use crate::metrics::{GuardMetrics, MetricsSnapshot};
use crate::scheduler::RetryScheduler;

/// Result of fingerprinting an incoming attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// The content was fingerprinted and a sighting recorded.
    Recorded {
        record: HashRecord,
        /// Earlier sightings within the similarity threshold, nearest first.
        similar: Vec<SimilarRecord>,
        /// The fingerprint, or a near-duplicate of it, is blocked locally.
        locally_blocked: bool,
    },
    /// The bytes are not a decodable image; nothing was recorded.
    Unhashable { reason: String },
}

/// Entry point for hosts: ties the ledger, the shared blocklist, the download
/// gate and the retry scheduler together.
///
/// Build one with [`MediaGuardBuilder`](crate::MediaGuardBuilder) and share
/// it behind an `Arc`.
pub struct MediaGuard {
    pub(crate) config: GuardConfig,
    pub(crate) ledger: HashLedger,
    pub(crate) blocklist: SharedBlocklist,
    pub(crate) gate: DownloadGate,
    pub(crate) scheduler: RetryScheduler,
    pub(crate) hasher: PerceptualHasher,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) metrics: Arc<GuardMetrics>,
    pub(crate) watching: AtomicBool,
}

impl MediaGuard {
    /// Start background work: the commit watcher and the retry scheduler.
    ///
    /// Does nothing when the guard is disabled. Calling it again is harmless.
    pub fn start(&self) {
        if !self.config.enabled {
            info!("media guard disabled, not starting retry scheduler");
            return;
        }
        if !self.watching.swap(true, Ordering::AcqRel) {
            self.scheduler.watch_changes();
        }
        self.scheduler.start_if_needed();
        info!("media guard started");
    }

    /// Resume background work after the host returns to the foreground.
    pub fn on_foreground(&self) {
        if self.config.enabled {
            self.scheduler.start_if_needed();
        }
    }

    /// Fingerprint incoming media and record the sighting.
    ///
    /// Similar sightings are looked up before the new one is written, so the
    /// result never includes the record itself.
    #[instrument(skip_all, fields(conversation_id = %conversation_id, len = bytes.len()))]
    pub async fn observe_incoming(
        &self,
        conversation_id: &ConversationId,
        attachment_id: Option<&AttachmentId>,
        filename: Option<&str>,
        bytes: &[u8],
    ) -> Result<Observation, GatewayError> {
        let hash = match self.hasher.hash(bytes) {
            Ok(hash) => hash,
            Err(e @ PerceptualError::UnsupportedFormat(_)) => {
                debug!(error = %e, "incoming media is not a decodable image");
                self.metrics.increment_unhashable();
                return Ok(Observation::Unhashable {
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let similar = self
            .ledger
            .find_similar(&hash, self.config.similarity_threshold)
            .await;
        let record = self
            .ledger
            .record(&hash, conversation_id, attachment_id, filename)
            .await?;

        self.metrics.increment_observations();
        if !similar.is_empty() {
            self.metrics.increment_duplicate_sightings();
            info!(hash = %hash, matches = similar.len(), "similar content seen before");
        }

        let locally_blocked = record.blocked || similar.iter().any(|s| s.record.blocked);
        Ok(Observation::Recorded {
            record,
            similar,
            locally_blocked,
        })
    }

    /// Check a download against the shared blocklist.
    ///
    /// A denied download is queued for re-check and the scheduler is nudged.
    pub async fn validate_download(
        &self,
        attachment_id: &AttachmentId,
        content_hash: Option<&ContentHash>,
    ) -> GateDecision {
        let decision = self.gate.validate(attachment_id, content_hash).await;
        self.after_gate(decision);
        decision
    }

    /// Like [`validate_download`](Self::validate_download), for bytes the host
    /// already holds.
    pub async fn validate_download_bytes(
        &self,
        attachment_id: &AttachmentId,
        bytes: &[u8],
    ) -> GateDecision {
        let decision = self.gate.validate_bytes(attachment_id, bytes).await;
        self.after_gate(decision);
        decision
    }

    fn after_gate(&self, decision: GateDecision) {
        if decision == GateDecision::Deny && self.config.enabled {
            self.scheduler.notify_change();
        }
    }

    /// Block content network-wide and locally.
    ///
    /// The exact hash goes to the shared blocklist; a blocklist failure is
    /// returned and nothing is blocked locally. If the bytes decode as an
    /// image its fingerprint is blocked in the ledger as well.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn report_content(&self, bytes: &[u8]) -> Result<InsertOutcome, GatewayError> {
        let outcome = self.blocklist.store(&ContentHash::of(bytes)).await?;
        if let Ok(fingerprint) = self.hasher.hash(bytes) {
            let rows = self.ledger.block(&fingerprint).await?;
            debug!(hash = %fingerprint, rows, "blocked fingerprint locally");
        }
        info!(?outcome, "content reported");
        Ok(outcome)
    }

    /// Undo [`report_content`](Self::report_content).
    ///
    /// Returns `true` if the shared blocklist held the hash. Deferred
    /// downloads of the content are released on their next re-check.
    #[instrument(skip(self, bytes), fields(len = bytes.len()))]
    pub async fn clear_content(&self, bytes: &[u8]) -> Result<bool, GatewayError> {
        let removed = self.blocklist.delete(&ContentHash::of(bytes)).await?;
        if let Ok(fingerprint) = self.hasher.hash(bytes) {
            self.ledger.unblock(&fingerprint).await?;
        }
        info!(removed, "content cleared");
        Ok(removed)
    }

    /// Delete unblocked sightings older than the configured retention.
    ///
    /// A retention reaching past the earliest representable time prunes
    /// nothing.
    pub async fn prune_expired(&self) -> Result<u64, GatewayError> {
        let cutoff = self
            .clock
            .now()
            .checked_sub_signed(self.config.retention())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let removed = self.ledger.prune(cutoff).await?;
        info!(removed, %cutoff, "pruned expired sightings");
        Ok(removed)
    }

    /// Point-in-time view of the guard's counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop background work and wait for it to finish.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        info!("media guard shut down");
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn ledger(&self) -> &HashLedger {
        &self.ledger
    }

    pub fn blocklist(&self) -> &SharedBlocklist {
        &self.blocklist
    }

    pub fn gate(&self) -> &DownloadGate {
        &self.gate
    }

    pub fn scheduler(&self) -> &RetryScheduler {
        &self.scheduler
    }
}

impl std::fmt::Debug for MediaGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaGuard")
            .field("config", &self.config)
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
