use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use mediagate_blocklist::{BlocklistBackend, BlocklistConfig, SharedBlocklist};
use mediagate_core::{Clock, GuardConfig, PerceptualHasher, SystemClock};
use mediagate_ledger::{HashLedger, LedgerStore};

use crate::error::GatewayError;
use crate::gate::DownloadGate;
use crate::guard::MediaGuard;
use crate::metrics::GuardMetrics;
use crate::pipeline::AttachmentPipeline;
use crate::scheduler::{RetryScheduler, SchedulerConfig};

/// Fluent builder for constructing a [`MediaGuard`].
///
/// A ledger store, a blocklist backend and an attachment pipeline must be
/// supplied. The clock defaults to the system clock and the hasher to a
/// 16×16 grid.
pub struct MediaGuardBuilder {
    config: GuardConfig,
    ledger: Option<Arc<dyn LedgerStore>>,
    blocklist: Option<Arc<dyn BlocklistBackend>>,
    pipeline: Option<Arc<dyn AttachmentPipeline>>,
    clock: Option<Arc<dyn Clock>>,
    hasher: PerceptualHasher,
}

impl MediaGuardBuilder {
    pub fn new(config: GuardConfig) -> Self {
        Self {
            config,
            ledger: None,
            blocklist: None,
            pipeline: None,
            clock: None,
            hasher: PerceptualHasher::default(),
        }
    }

    /// Set the local ledger store (required).
    #[must_use]
    pub fn ledger(mut self, store: Arc<dyn LedgerStore>) -> Self {
        self.ledger = Some(store);
        self
    }

    /// Set the shared blocklist backend (required).
    #[must_use]
    pub fn blocklist(mut self, backend: Arc<dyn BlocklistBackend>) -> Self {
        self.blocklist = Some(backend);
        self
    }

    /// Set the host attachment pipeline (required).
    #[must_use]
    pub fn pipeline(mut self, pipeline: Arc<dyn AttachmentPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn hasher(mut self, hasher: PerceptualHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Consume the builder and produce a [`MediaGuard`].
    ///
    /// Returns an error if the configuration is invalid or a required
    /// component is missing.
    pub fn build(self) -> Result<MediaGuard, GatewayError> {
        self.config.validate()?;

        let store = self
            .ledger
            .ok_or_else(|| GatewayError::Configuration("a ledger store is required".into()))?;
        let backend = self.blocklist.ok_or_else(|| {
            GatewayError::Configuration("a blocklist backend is required".into())
        })?;
        let pipeline = self.pipeline.ok_or_else(|| {
            GatewayError::Configuration("an attachment pipeline is required".into())
        })?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let metrics = Arc::new(GuardMetrics::default());

        let ledger = HashLedger::with_clock(Arc::clone(&store), Arc::clone(&clock));
        let blocklist = SharedBlocklist::with_clock(
            backend,
            BlocklistConfig::from(&self.config),
            Arc::clone(&clock),
        );
        let scheduler_config = SchedulerConfig::from(&self.config);
        let gate = DownloadGate::new(
            self.config.enabled,
            blocklist.clone(),
            Arc::clone(&store),
            Arc::clone(&pipeline),
            scheduler_config.backoff,
            Arc::clone(&clock),
            Arc::clone(&metrics),
        );
        let scheduler = RetryScheduler::new(
            store,
            blocklist.clone(),
            pipeline,
            scheduler_config,
            Arc::clone(&clock),
            Arc::clone(&metrics),
        );

        Ok(MediaGuard {
            config: self.config,
            ledger,
            blocklist,
            gate,
            scheduler,
            hasher: self.hasher,
            clock,
            metrics,
            watching: AtomicBool::new(false),
        })
    }
}

impl Default for MediaGuardBuilder {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}
