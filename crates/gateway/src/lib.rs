//! Download gating and deferred-download reconciliation.
//!
//! [`MediaGuard`] is the host-facing entry point. It fingerprints incoming
//! media into the local [`HashLedger`](mediagate_ledger::HashLedger), checks
//! downloads against the shared blocklist through the [`DownloadGate`], and
//! runs the [`RetryScheduler`] that releases deferred downloads once their
//! content is no longer blocked.

pub mod builder;
pub mod error;
pub mod gate;
pub mod guard;
pub mod metrics;
pub mod pipeline;
pub mod scheduler;
pub mod testing;

pub use builder::MediaGuardBuilder;
pub use error::{GatewayError, PipelineError};
pub use gate::{DownloadGate, GateDecision};
pub use guard::{MediaGuard, Observation};
pub use metrics::{GuardMetrics, MetricsSnapshot};
pub use pipeline::AttachmentPipeline;
pub use scheduler::{CycleReport, RetryScheduler, SchedulerConfig};
