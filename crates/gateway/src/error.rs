use thiserror::Error;

/// Errors surfaced by the attachment pipeline the host provides.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    /// The attachment is unknown to the host.
    #[error("attachment not found: {0}")]
    NotFound(String),

    /// The bytes could not be fetched.
    #[error("transport error: {0}")]
    Transport(String),

    /// The host refused the request (e.g. the attachment was deleted).
    #[error("rejected: {0}")]
    Rejected(String),
}

/// Errors that can occur in content gating operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// An error occurred in the local ledger.
    #[error("ledger error: {0}")]
    Ledger(#[from] mediagate_ledger::LedgerError),

    /// An error from the shared blocklist.
    #[error("blocklist error: {0}")]
    Blocklist(#[from] mediagate_blocklist::BlocklistError),

    /// An error from the host attachment pipeline.
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// The content could not be fingerprinted.
    #[error("perceptual hash error: {0}")]
    Perceptual(#[from] mediagate_core::PerceptualError),

    /// The configuration was rejected.
    #[error("config error: {0}")]
    Config(#[from] mediagate_core::ConfigError),

    /// The guard was misconfigured (e.g. missing required components).
    #[error("configuration error: {0}")]
    Configuration(String),
}
