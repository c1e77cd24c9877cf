pub mod backend;
pub mod config;
pub mod entry;
pub mod error;
pub mod service;
pub mod testing;

pub use backend::BlocklistBackend;
pub use config::BlocklistConfig;
pub use entry::{BlocklistEntry, InsertOutcome};
pub use error::BlocklistError;
pub use service::SharedBlocklist;
