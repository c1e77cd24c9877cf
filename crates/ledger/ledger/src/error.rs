/// Errors that can occur during ledger operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    /// The storage backend could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// The storage backend rejected or failed the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// A stored row could not be converted into a record.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The requested record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
}
