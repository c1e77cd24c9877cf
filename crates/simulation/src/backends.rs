use std::sync::Arc;

use mediagate_blocklist::BlocklistBackend;
use mediagate_blocklist_memory::MemoryBlocklistBackend;
use mediagate_gateway::GatewayError;
use mediagate_ledger::LedgerStore;
use mediagate_ledger_memory::MemoryLedgerStore;
use mediagate_ledger_sqlite::{SqliteLedgerConfig, SqliteLedgerStore};

/// Which ledger store the simulation runs against.
#[derive(Debug, Clone, Default)]
pub enum LedgerKind {
    #[default]
    Memory,
    /// SQLite database at the given URL, e.g. `sqlite://ledger.db`.
    Sqlite(String),
}

/// Which shared blocklist backend the simulation runs against.
#[derive(Debug, Clone, Default)]
pub enum BlocklistKind {
    #[default]
    Memory,
    /// `DynamoDB` (or `DynamoDB` Local) table; created if missing.
    #[cfg(feature = "dynamodb")]
    DynamoDb(mediagate_blocklist_dynamodb::DynamoConfig),
}

impl LedgerKind {
    pub async fn connect(&self) -> Result<Arc<dyn LedgerStore>, GatewayError> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryLedgerStore::new())),
            Self::Sqlite(url) => {
                let store = SqliteLedgerStore::new(&SqliteLedgerConfig::new(url.clone())).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

impl BlocklistKind {
    pub async fn connect(&self) -> Result<Arc<dyn BlocklistBackend>, GatewayError> {
        match self {
            Self::Memory => Ok(Arc::new(MemoryBlocklistBackend::new())),
            #[cfg(feature = "dynamodb")]
            Self::DynamoDb(config) => {
                let backend = mediagate_blocklist_dynamodb::DynamoBlocklistBackend::new(config).await;
                mediagate_blocklist_dynamodb::create_table(backend.client(), &config.table_name)
                    .await?;
                Ok(Arc::new(backend))
            }
        }
    }
}
