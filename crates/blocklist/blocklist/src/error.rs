use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the shared blocklist.
#[derive(Debug, Clone, Error)]
pub enum BlocklistError {
    /// The request did not complete within the allowed duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A network or transport-level error occurred.
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend asked us to slow down.
    #[error("throttled: {0}")]
    Throttled(String),

    /// The backend is temporarily unable to serve requests.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// Credentials were missing or rejected.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The backend rejected the request as malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The table or resource backing the blocklist does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored entry could not be decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Any other backend failure.
    #[error("backend error: {0}")]
    Backend(String),

    /// Every attempt failed with a transient error.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<BlocklistError>,
    },
}

impl BlocklistError {
    /// Returns `true` if the error is transient and the operation may succeed
    /// on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::Throttled(_) | Self::Unavailable(_)
        )
    }
}
