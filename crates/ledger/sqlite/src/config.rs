use std::time::Duration;

/// Configuration for the SQLite ledger store.
#[derive(Debug, Clone)]
pub struct SqliteLedgerConfig {
    /// SQLite connection URL (e.g. `sqlite://mediagate.db`).
    pub url: String,
    /// Table name prefix (e.g. "mediagate_").
    pub prefix: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// How long a connection waits for another writer's lock before failing.
    pub busy_timeout: Duration,
}

impl SqliteLedgerConfig {
    /// Create a new configuration with the given URL and defaults.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            prefix: "mediagate_".to_owned(),
            max_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// A private in-memory database. Uses a single connection so every
    /// query sees the same database.
    pub fn in_memory() -> Self {
        Self {
            max_connections: 1,
            ..Self::new("sqlite::memory:")
        }
    }

    /// Set the table prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the lock wait timeout.
    #[must_use]
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set the pool size.
    #[must_use]
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max.max(1);
        self
    }
}

impl Default for SqliteLedgerConfig {
    fn default() -> Self {
        Self::new("sqlite://mediagate.db")
    }
}
