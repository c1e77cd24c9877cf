use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use mediagate_blocklist::{BlocklistBackend, BlocklistEntry, BlocklistError, InsertOutcome};
use mediagate_core::ContentHash;

/// In-memory blocklist backed by [`DashMap`].
///
/// Insert-if-absent runs under the shard lock held by the entry API, so
/// concurrent writers for the same hash see exactly one `Inserted`.
#[derive(Debug, Default)]
pub struct MemoryBlocklistBackend {
    entries: DashMap<ContentHash, BlocklistEntry>,
}

impl MemoryBlocklistBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl BlocklistBackend for MemoryBlocklistBackend {
    async fn put_if_absent(&self, entry: &BlocklistEntry) -> Result<InsertOutcome, BlocklistError> {
        match self.entries.entry(entry.hash.clone()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_expired(entry.inserted_at) {
                    existing.insert(entry.clone());
                    Ok(InsertOutcome::Inserted)
                } else {
                    Ok(InsertOutcome::AlreadyPresent)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
                Ok(InsertOutcome::Inserted)
            }
        }
    }

    async fn get(&self, hash: &ContentHash) -> Result<Option<BlocklistEntry>, BlocklistError> {
        Ok(self.entries.get(hash).map(|e| e.value().clone()))
    }

    async fn delete(&self, hash: &ContentHash) -> Result<bool, BlocklistError> {
        Ok(self.entries.remove(hash).is_some())
    }
}
