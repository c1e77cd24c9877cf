use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use mediagate_blocklist::SharedBlocklist;
use mediagate_core::{AttachmentId, Backoff, Clock, ContentHash, offset};
use mediagate_ledger::LedgerStore;

use crate::metrics::GuardMetrics;
use crate::pipeline::AttachmentPipeline;

/// Outcome of a download check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The download may proceed.
    Allow,
    /// The content is blocklisted; the download is deferred and queued for
    /// re-check.
    Deny,
}

impl GateDecision {
    /// Whether the download may proceed.
    #[must_use]
    pub fn is_allowed(self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Pre-download check against the shared blocklist.
///
/// A blocked attachment gets a retry record so the scheduler can release it
/// once the hash is removed from the blocklist or its entry expires. Every
/// failure along the way resolves to [`GateDecision::Allow`], except a
/// failed retry-record write, which keeps the decision at `Deny`.
pub struct DownloadGate {
    enabled: bool,
    blocklist: SharedBlocklist,
    store: Arc<dyn LedgerStore>,
    pipeline: Arc<dyn AttachmentPipeline>,
    backoff: Backoff,
    clock: Arc<dyn Clock>,
    metrics: Arc<GuardMetrics>,
}

impl DownloadGate {
    pub fn new(
        enabled: bool,
        blocklist: SharedBlocklist,
        store: Arc<dyn LedgerStore>,
        pipeline: Arc<dyn AttachmentPipeline>,
        backoff: Backoff,
        clock: Arc<dyn Clock>,
        metrics: Arc<GuardMetrics>,
    ) -> Self {
        Self {
            enabled,
            blocklist,
            store,
            pipeline,
            backoff,
            clock,
            metrics,
        }
    }

    /// Decide whether `attachment_id` may be downloaded.
    ///
    /// When `content_hash` is `None` the bytes are fetched through the
    /// pipeline and hashed; a failed fetch allows the download.
    #[instrument(skip_all, fields(attachment_id = %attachment_id))]
    pub async fn validate(
        &self,
        attachment_id: &AttachmentId,
        content_hash: Option<&ContentHash>,
    ) -> GateDecision {
        if !self.enabled {
            self.metrics.increment_gate_allowed();
            return GateDecision::Allow;
        }

        let hash = match content_hash {
            Some(hash) => hash.clone(),
            None => match self.pipeline.fetch_attachment_bytes(attachment_id).await {
                Ok(bytes) => ContentHash::of(&bytes),
                Err(e) => {
                    warn!(attachment_id = %attachment_id, error = %e, "could not fetch attachment bytes, allowing");
                    self.metrics.increment_gate_fail_open();
                    self.metrics.increment_gate_allowed();
                    return GateDecision::Allow;
                }
            },
        };

        self.check(attachment_id, &hash).await
    }

    /// Decide whether `attachment_id` may be downloaded, given its bytes.
    #[instrument(skip_all, fields(attachment_id = %attachment_id))]
    pub async fn validate_bytes(&self, attachment_id: &AttachmentId, bytes: &[u8]) -> GateDecision {
        if !self.enabled {
            self.metrics.increment_gate_allowed();
            return GateDecision::Allow;
        }
        self.check(attachment_id, &ContentHash::of(bytes)).await
    }

    async fn check(&self, attachment_id: &AttachmentId, hash: &ContentHash) -> GateDecision {
        match self.blocklist.try_contains(hash).await {
            Ok(false) => {
                debug!(attachment_id = %attachment_id, hash = %hash, "content not blocklisted");
                self.metrics.increment_gate_allowed();
                GateDecision::Allow
            }
            Err(e) => {
                warn!(attachment_id = %attachment_id, hash = %hash, error = %e, "blocklist check failed, allowing");
                self.metrics.increment_gate_fail_open();
                self.metrics.increment_gate_allowed();
                GateDecision::Allow
            }
            Ok(true) => {
                self.metrics.increment_gate_denied();
                self.enqueue(attachment_id, hash).await;
                GateDecision::Deny
            }
        }
    }

    async fn enqueue(&self, attachment_id: &AttachmentId, hash: &ContentHash) {
        let next_retry_at = offset(self.clock.now(), self.backoff.delay_for(0));
        match self
            .store
            .upsert_retry(attachment_id, hash, next_retry_at)
            .await
        {
            Ok(record) => {
                self.metrics.increment_retries_enqueued();
                info!(
                    attachment_id = %attachment_id,
                    hash = %hash,
                    next_retry_at = %record.next_retry_at,
                    "download deferred, content is blocklisted"
                );
            }
            Err(e) => {
                error!(attachment_id = %attachment_id, error = %e, "failed to enqueue retry record");
            }
        }
    }
}

impl std::fmt::Debug for DownloadGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadGate")
            .field("enabled", &self.enabled)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}
