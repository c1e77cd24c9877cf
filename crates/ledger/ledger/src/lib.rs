pub mod error;
pub mod feed;
pub mod service;
pub mod store;
pub mod testing;

pub use error::LedgerError;
pub use feed::{ChangeFeed, LedgerChange};
pub use service::{HashLedger, SimilarRecord};
pub use store::LedgerStore;
