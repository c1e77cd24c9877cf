//! End-to-end simulation of the mediagate flow.
//!
//! Runs one deferred-download lifecycle against real backends: an image
//! arrives and is fingerprinted, it is reported to the shared blocklist, a
//! second download of the same content is denied and queued, the report is
//! withdrawn, and the retry scheduler releases the download.
//!
//! ```no_run
//! use mediagate_simulation::{SimulationOptions, run_scenario};
//!
//! # async fn demo() -> Result<(), mediagate_gateway::GatewayError> {
//! let report = run_scenario(SimulationOptions::quick()).await?;
//! assert!(report.released);
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod scenario;

pub use backends::{BlocklistKind, LedgerKind};
pub use scenario::{ScenarioReport, SimulationOptions, run_scenario, sample_image};
