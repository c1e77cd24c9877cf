use async_trait::async_trait;

use mediagate_core::ContentHash;

use crate::entry::{BlocklistEntry, InsertOutcome};
use crate::error::BlocklistError;

/// Key-value transport for the shared blocklist.
///
/// Implementations must be `Send + Sync` and safe under independent writers.
/// A backend performs one request per call; retries and timeouts are layered
/// on top by [`SharedBlocklist`](crate::SharedBlocklist).
#[async_trait]
pub trait BlocklistBackend: Send + Sync {
    /// Write `entry` unless a live entry for its hash exists.
    ///
    /// An existing entry counts as live if it has not expired at
    /// `entry.inserted_at`; expired entries are replaced.
    async fn put_if_absent(&self, entry: &BlocklistEntry) -> Result<InsertOutcome, BlocklistError>;

    /// Fetch the stored entry, expired or not.
    async fn get(&self, hash: &ContentHash) -> Result<Option<BlocklistEntry>, BlocklistError>;

    /// Remove the entry. Returns `true` if it existed.
    async fn delete(&self, hash: &ContentHash) -> Result<bool, BlocklistError>;
}
