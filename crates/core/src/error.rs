use thiserror::Error;

/// Errors from the perceptual hash engine.
#[derive(Debug, Error)]
pub enum PerceptualError {
    /// The input bytes could not be decoded as a supported image format.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The requested grid is too small to produce a meaningful fingerprint.
    #[error("invalid grid size {0}: must be at least 2")]
    InvalidGrid(u32),
}

/// Errors from loading or validating a [`GuardConfig`](crate::GuardConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
