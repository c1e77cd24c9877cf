use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::backoff::Backoff;
use crate::error::ConfigError;

/// Top-level settings for the content gate, loaded from a TOML file.
///
/// # Example
///
/// ```toml
/// enabled = true
/// similarity_threshold = 10
/// retention_days = 30
///
/// [retry]
/// initial_delay_secs = 300
/// max_delay_secs = 86400
///
/// [blocklist]
/// entry_ttl_secs = 2592000
/// max_attempts = 4
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GuardConfig {
    /// Master switch. When disabled every download is allowed unchecked.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Maximum Hamming distance at which two fingerprints count as similar.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: u32,
    /// How long unblocked sightings are kept before pruning.
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    /// Re-check schedule for deferred downloads.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Shared blocklist request behavior.
    #[serde(default)]
    pub blocklist: BlocklistRequestConfig,
}

/// Backoff for re-checking attachments deferred by a blocklist hit.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Delay before the first re-check (default: 5 minutes).
    #[serde(default = "default_retry_initial_secs")]
    pub initial_delay_secs: u64,
    /// Upper bound on the re-check delay (default: 1 day).
    #[serde(default = "default_retry_max_secs")]
    pub max_delay_secs: u64,
    /// Growth factor between re-checks (default: 2.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Fractional jitter (default: 0.1).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Give up after this many still-blocked re-checks. Unlimited when unset.
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Retry and expiry settings for calls to the shared blocklist.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlocklistRequestConfig {
    /// Lifetime of a blocklist entry. Entries never expire when unset.
    #[serde(default = "default_entry_ttl_secs")]
    pub entry_ttl_secs: Option<u64>,
    /// Per-attempt request timeout (default: 5 seconds).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Total attempts per operation, including the first (default: 4).
    #[serde(default = "default_blocklist_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry (default: 200 ms).
    #[serde(default = "default_blocklist_base_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on the retry delay (default: 5 seconds).
    #[serde(default = "default_blocklist_max_ms")]
    pub max_delay_ms: u64,
    /// Growth factor between retries (default: 2.0).
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Fractional jitter (default: 0.1).
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_similarity_threshold() -> u32 {
    10
}

fn default_retention_days() -> u32 {
    30
}

fn default_retry_initial_secs() -> u64 {
    300
}

fn default_retry_max_secs() -> u64 {
    86_400
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

#[allow(clippy::unnecessary_wraps)]
fn default_entry_ttl_secs() -> Option<u64> {
    Some(30 * 86_400)
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_blocklist_attempts() -> u32 {
    4
}

fn default_blocklist_base_ms() -> u64 {
    200
}

fn default_blocklist_max_ms() -> u64 {
    5_000
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            similarity_threshold: default_similarity_threshold(),
            retention_days: default_retention_days(),
            retry: RetryConfig::default(),
            blocklist: BlocklistRequestConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_retry_initial_secs(),
            max_delay_secs: default_retry_max_secs(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            max_attempts: None,
        }
    }
}

impl Default for BlocklistRequestConfig {
    fn default() -> Self {
        Self {
            entry_ttl_secs: default_entry_ttl_secs(),
            request_timeout_ms: default_request_timeout_ms(),
            max_attempts: default_blocklist_attempts(),
            base_delay_ms: default_blocklist_base_ms(),
            max_delay_ms: default_blocklist_max_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl GuardConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys, and
    /// [`ConfigError::Invalid`] when a value is out of range.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let retry = &self.retry;
        check_curve(
            "retry",
            retry.initial_delay_secs,
            retry.max_delay_secs,
            retry.multiplier,
            retry.jitter,
        )?;
        if retry.max_attempts == Some(0) {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1 when set".into(),
            ));
        }

        let bl = &self.blocklist;
        check_curve(
            "blocklist",
            bl.base_delay_ms,
            bl.max_delay_ms,
            bl.multiplier,
            bl.jitter,
        )?;
        if bl.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "blocklist.max_attempts must be at least 1".into(),
            ));
        }
        if bl.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "blocklist.request_timeout_ms must be positive".into(),
            ));
        }
        if bl.entry_ttl_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "blocklist.entry_ttl_secs must be positive when set".into(),
            ));
        }
        Ok(())
    }

    /// Backoff curve for deferred-download re-checks.
    #[must_use]
    pub fn retry_backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_secs(self.retry.initial_delay_secs),
            max: Duration::from_secs(self.retry.max_delay_secs),
            multiplier: self.retry.multiplier,
            jitter: self.retry.jitter,
        }
    }

    /// Backoff curve for transient blocklist failures.
    #[must_use]
    pub fn blocklist_backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.blocklist.base_delay_ms),
            max: Duration::from_millis(self.blocklist.max_delay_ms),
            multiplier: self.blocklist.multiplier,
            jitter: self.blocklist.jitter,
        }
    }

    /// Lifetime of newly stored blocklist entries.
    #[must_use]
    pub fn entry_ttl(&self) -> Option<Duration> {
        self.blocklist.entry_ttl_secs.map(Duration::from_secs)
    }

    /// Per-attempt blocklist request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.blocklist.request_timeout_ms)
    }

    /// Retention window for unblocked sightings.
    #[must_use]
    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

fn check_curve(
    section: &str,
    initial: u64,
    max: u64,
    multiplier: f64,
    jitter: f64,
) -> Result<(), ConfigError> {
    if initial == 0 {
        return Err(ConfigError::Invalid(format!(
            "{section}: initial delay must be positive"
        )));
    }
    if max < initial {
        return Err(ConfigError::Invalid(format!(
            "{section}: max delay ({max}) is below the initial delay ({initial})"
        )));
    }
    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(ConfigError::Invalid(format!(
            "{section}: multiplier must be >= 1.0, got {multiplier}"
        )));
    }
    if !(0.0..1.0).contains(&jitter) {
        return Err(ConfigError::Invalid(format!(
            "{section}: jitter must be in [0, 1), got {jitter}"
        )));
    }
    Ok(())
}
