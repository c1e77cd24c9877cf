use std::time::Duration;

use mediagate_core::{Backoff, GuardConfig};

/// Request behavior of [`SharedBlocklist`](crate::SharedBlocklist).
#[derive(Debug, Clone, PartialEq)]
pub struct BlocklistConfig {
    /// Lifetime given to newly stored entries.
    pub entry_ttl: Option<Duration>,
    /// Per-attempt timeout.
    pub request_timeout: Duration,
    /// Total attempts per operation, including the first.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Backoff,
}

impl Default for BlocklistConfig {
    fn default() -> Self {
        Self::from(&GuardConfig::default())
    }
}

impl From<&GuardConfig> for BlocklistConfig {
    fn from(config: &GuardConfig) -> Self {
        Self {
            entry_ttl: config.entry_ttl(),
            request_timeout: config.request_timeout(),
            max_attempts: config.blocklist.max_attempts,
            backoff: config.blocklist_backoff(),
        }
    }
}
