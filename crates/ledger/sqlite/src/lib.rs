pub mod config;
pub mod migrations;
pub mod store;

pub use config::SqliteLedgerConfig;
pub use store::SqliteLedgerStore;
