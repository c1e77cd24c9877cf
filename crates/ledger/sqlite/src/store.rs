use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use mediagate_core::{
    AttachmentId, ContentHash, ConversationId, Fingerprint, HashRecord, RetryQueueRecord,
};
use mediagate_ledger::{ChangeFeed, LedgerChange, LedgerError, LedgerStore};

use crate::config::SqliteLedgerConfig;
use crate::migrations;

/// SQLite-backed ledger store using `sqlx`.
///
/// Every write is a single statement or a transaction that starts with a
/// write, so concurrent writers queue on the database lock (bounded by the
/// configured busy timeout) instead of failing. Changes are published only
/// after the write commits.
pub struct SqliteLedgerStore {
    pool: SqlitePool,
    hashes: String,
    blocked: String,
    retries: String,
    feed: ChangeFeed,
}

impl SqliteLedgerStore {
    /// Open the database, creating the file if needed, and run migrations.
    pub async fn new(config: &SqliteLedgerConfig) -> Result<Self, LedgerError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| LedgerError::Connection(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(config.busy_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| LedgerError::Connection(e.to_string()))?;

        Self::from_pool(pool, &config.prefix).await
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool, prefix: &str) -> Result<Self, LedgerError> {
        migrations::run_migrations(&pool, prefix)
            .await
            .map_err(backend_err)?;

        debug!(prefix, "sqlite ledger ready");
        Ok(Self {
            pool,
            hashes: format!("{prefix}hash_records"),
            blocked: format!("{prefix}blocked_hashes"),
            retries: format!("{prefix}retry_queue"),
            feed: ChangeFeed::default(),
        })
    }
}

fn backend_err(e: sqlx::Error) -> LedgerError {
    match e {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            LedgerError::Connection(e.to_string())
        }
        other => LedgerError::Backend(other.to_string()),
    }
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| LedgerError::Serialization(format!("timestamp out of range: {ms}")))
}

#[derive(sqlx::FromRow)]
struct HashRow {
    id: String,
    hash: String,
    conversation_id: String,
    attachment_id: Option<String>,
    filename: Option<String>,
    timestamp_ms: i64,
    blocked: bool,
}

impl TryFrom<HashRow> for HashRecord {
    type Error = LedgerError;

    fn try_from(row: HashRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&row.id).map_err(|e| LedgerError::Serialization(e.to_string()))?,
            hash: Fingerprint::from_hex(&row.hash).ok_or_else(|| {
                LedgerError::Serialization(format!("invalid fingerprint: {}", row.hash))
            })?,
            conversation_id: ConversationId::new(row.conversation_id),
            attachment_id: row.attachment_id.map(AttachmentId::new),
            filename: row.filename,
            timestamp: from_millis(row.timestamp_ms)?,
            blocked: row.blocked,
        })
    }
}

#[derive(sqlx::FromRow)]
struct RetryRow {
    id: String,
    attachment_id: String,
    content_hash: String,
    next_retry_at_ms: i64,
    retry_attempt: i64,
}

impl TryFrom<RetryRow> for RetryQueueRecord {
    type Error = LedgerError;

    fn try_from(row: RetryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: Uuid::parse_str(&row.id).map_err(|e| LedgerError::Serialization(e.to_string()))?,
            attachment_id: AttachmentId::new(row.attachment_id),
            content_hash: ContentHash::parse(&row.content_hash).ok_or_else(|| {
                LedgerError::Serialization(format!("invalid content hash: {}", row.content_hash))
            })?,
            next_retry_at: from_millis(row.next_retry_at_ms)?,
            retry_attempt: u32::try_from(row.retry_attempt)
                .map_err(|e| LedgerError::Serialization(e.to_string()))?,
        })
    }
}

fn collect<R, T>(rows: Vec<R>) -> Result<Vec<T>, LedgerError>
where
    T: TryFrom<R, Error = LedgerError>,
{
    rows.into_iter().map(T::try_from).collect()
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn insert_hash_record(&self, record: &HashRecord) -> Result<(), LedgerError> {
        let sql = format!(
            "INSERT INTO {} (id, hash, conversation_id, attachment_id, filename, timestamp_ms, blocked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            self.hashes
        );
        sqlx::query(&sql)
            .bind(record.id.to_string())
            .bind(record.hash.as_str())
            .bind(record.conversation_id.as_str())
            .bind(record.attachment_id.as_ref().map(AttachmentId::as_str))
            .bind(record.filename.as_deref())
            .bind(to_millis(record.timestamp))
            .bind(record.blocked)
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;

        self.feed.publish(LedgerChange::HashRecorded {
            hash: record.hash.clone(),
            blocked: record.blocked,
        });
        Ok(())
    }

    async fn set_blocked(&self, hash: &Fingerprint, blocked: bool) -> Result<u64, LedgerError> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        let mark = if blocked {
            format!("INSERT OR IGNORE INTO {} (hash) VALUES (?1)", self.blocked)
        } else {
            format!("DELETE FROM {} WHERE hash = ?1", self.blocked)
        };
        let changed = sqlx::query(&mark)
            .bind(hash.as_str())
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?
            .rows_affected()
            > 0;

        let update = format!("UPDATE {} SET blocked = ?1 WHERE hash = ?2", self.hashes);
        let rows = sqlx::query(&update)
            .bind(blocked)
            .bind(hash.as_str())
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?
            .rows_affected();

        tx.commit().await.map_err(backend_err)?;

        if changed || rows > 0 {
            self.feed.publish(LedgerChange::BlockChanged {
                hash: hash.clone(),
                blocked,
                rows,
            });
        }
        Ok(rows)
    }

    async fn is_blocked(&self, hash: &Fingerprint) -> Result<bool, LedgerError> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE hash = ?1)",
            self.blocked
        );
        let found = sqlx::query_scalar::<_, i64>(&sql)
            .bind(hash.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(found != 0)
    }

    async fn hash_records(&self) -> Result<Vec<HashRecord>, LedgerError> {
        let sql = format!("SELECT * FROM {} ORDER BY timestamp_ms", self.hashes);
        let rows = sqlx::query_as::<_, HashRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        collect(rows)
    }

    async fn prune_hash_records(&self, older_than: DateTime<Utc>) -> Result<u64, LedgerError> {
        let sql = format!(
            "DELETE FROM {} WHERE blocked = 0 AND timestamp_ms < ?1
             AND hash NOT IN (SELECT hash FROM {})",
            self.hashes, self.blocked
        );
        let removed = sqlx::query(&sql)
            .bind(to_millis(older_than))
            .execute(&self.pool)
            .await
            .map_err(backend_err)?
            .rows_affected();

        if removed > 0 {
            self.feed.publish(LedgerChange::Pruned { removed });
        }
        Ok(removed)
    }

    async fn upsert_retry(
        &self,
        attachment_id: &AttachmentId,
        content_hash: &ContentHash,
        next_retry_at: DateTime<Utc>,
    ) -> Result<RetryQueueRecord, LedgerError> {
        let fresh = RetryQueueRecord::new(attachment_id.clone(), content_hash.clone(), next_retry_at);
        let sql = format!(
            "INSERT INTO {} (id, attachment_id, content_hash, next_retry_at_ms, retry_attempt)
             VALUES (?1, ?2, ?3, ?4, 0)
             ON CONFLICT (attachment_id) DO UPDATE SET
                 content_hash = excluded.content_hash,
                 next_retry_at_ms = excluded.next_retry_at_ms,
                 retry_attempt = 0
             RETURNING id, attachment_id, content_hash, next_retry_at_ms, retry_attempt",
            self.retries
        );
        let row = sqlx::query_as::<_, RetryRow>(&sql)
            .bind(fresh.id.to_string())
            .bind(attachment_id.as_str())
            .bind(content_hash.as_str())
            .bind(to_millis(next_retry_at))
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;

        let record = RetryQueueRecord::try_from(row)?;
        let inserted = record.id == fresh.id;

        let attachment_id = attachment_id.clone();
        self.feed.publish(if inserted {
            LedgerChange::RetryInserted {
                attachment_id,
                next_retry_at,
            }
        } else {
            LedgerChange::RetryUpdated {
                attachment_id,
                next_retry_at,
            }
        });
        Ok(record)
    }

    async fn retry_record(
        &self,
        attachment_id: &AttachmentId,
    ) -> Result<Option<RetryQueueRecord>, LedgerError> {
        let sql = format!("SELECT * FROM {} WHERE attachment_id = ?1", self.retries);
        sqlx::query_as::<_, RetryRow>(&sql)
            .bind(attachment_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?
            .map(RetryQueueRecord::try_from)
            .transpose()
    }

    async fn retry_records(&self) -> Result<Vec<RetryQueueRecord>, LedgerError> {
        let sql = format!("SELECT * FROM {} ORDER BY next_retry_at_ms", self.retries);
        let rows = sqlx::query_as::<_, RetryRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        collect(rows)
    }

    async fn due_retries(&self, now: DateTime<Utc>) -> Result<Vec<RetryQueueRecord>, LedgerError> {
        let sql = format!(
            "SELECT * FROM {} WHERE next_retry_at_ms <= ?1 ORDER BY next_retry_at_ms",
            self.retries
        );
        let rows = sqlx::query_as::<_, RetryRow>(&sql)
            .bind(to_millis(now))
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        collect(rows)
    }

    async fn update_retry(&self, record: &RetryQueueRecord) -> Result<bool, LedgerError> {
        let sql = format!(
            "UPDATE {} SET retry_attempt = ?1, next_retry_at_ms = ?2 WHERE id = ?3 AND attachment_id = ?4",
            self.retries
        );
        let updated = sqlx::query(&sql)
            .bind(i64::from(record.retry_attempt))
            .bind(to_millis(record.next_retry_at))
            .bind(record.id.to_string())
            .bind(record.attachment_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?
            .rows_affected()
            > 0;

        if updated {
            self.feed.publish(LedgerChange::RetryUpdated {
                attachment_id: record.attachment_id.clone(),
                next_retry_at: record.next_retry_at,
            });
        }
        Ok(updated)
    }

    async fn delete_retry(&self, attachment_id: &AttachmentId) -> Result<bool, LedgerError> {
        let sql = format!("DELETE FROM {} WHERE attachment_id = ?1", self.retries);
        let existed = sqlx::query(&sql)
            .bind(attachment_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?
            .rows_affected()
            > 0;

        if existed {
            self.feed.publish(LedgerChange::RetryDeleted {
                attachment_id: attachment_id.clone(),
            });
        }
        Ok(existed)
    }

    async fn delete_retry_record(&self, record: &RetryQueueRecord) -> Result<bool, LedgerError> {
        let sql = format!(
            "DELETE FROM {} WHERE id = ?1 AND attachment_id = ?2 AND content_hash = ?3
             AND next_retry_at_ms = ?4",
            self.retries
        );
        let removed = sqlx::query(&sql)
            .bind(record.id.to_string())
            .bind(record.attachment_id.as_str())
            .bind(record.content_hash.as_str())
            .bind(to_millis(record.next_retry_at))
            .execute(&self.pool)
            .await
            .map_err(backend_err)?
            .rows_affected()
            > 0;

        if removed {
            self.feed.publish(LedgerChange::RetryDeleted {
                attachment_id: record.attachment_id.clone(),
            });
        }
        Ok(removed)
    }

    async fn next_retry_at(&self) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let sql = format!("SELECT MIN(next_retry_at_ms) FROM {}", self.retries);
        let min = sqlx::query_scalar::<_, Option<i64>>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        min.map(from_millis).transpose()
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerChange> {
        self.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use mediagate_ledger::testing::run_ledger_conformance_tests;

    use super::*;

    async fn memory_store() -> SqliteLedgerStore {
        SqliteLedgerStore::new(&SqliteLedgerConfig::in_memory())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn conformance() {
        let store = memory_store().await;
        run_ledger_conformance_tests(&store).await.unwrap();
    }

    #[tokio::test]
    async fn prefix_isolates_tables() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let a = SqliteLedgerStore::from_pool(pool.clone(), "a_").await.unwrap();
        let b = SqliteLedgerStore::from_pool(pool, "b_").await.unwrap();

        let now = Utc::now();
        a.upsert_retry(&AttachmentId::new("x"), &ContentHash::of(b"x"), now)
            .await
            .unwrap();
        assert_eq!(a.retry_records().await.unwrap().len(), 1);
        assert!(b.retry_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_write_publishes_nothing() {
        let store = memory_store().await;
        let mut rx = store.subscribe();

        sqlx::query(&format!("DROP TABLE {}", store.retries))
            .execute(&store.pool)
            .await
            .unwrap();

        let result = store
            .upsert_retry(
                &AttachmentId::new("a1"),
                &ContentHash::of(b"x"),
                Utc::now() + Duration::minutes(5),
            )
            .await;
        assert!(matches!(result, Err(LedgerError::Backend(_))));
        assert!(rx.try_recv().is_err(), "rolled-back writes are not announced");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_upserts_on_a_file_database() {
        let path = std::env::temp_dir().join(format!("mediagate-ledger-{}", Uuid::new_v4()));
        let config = SqliteLedgerConfig::new(format!("sqlite://{}", path.display()));
        let store = std::sync::Arc::new(SqliteLedgerStore::new(&config).await.unwrap());
        let at = Utc::now();

        for round in 0..20 {
            let shared = AttachmentId::new(format!("shared-{round}"));
            let handles: Vec<_> = (0..4)
                .flat_map(|i| {
                    let own = AttachmentId::new(format!("own-{round}-{i}"));
                    [shared.clone(), own].map(|attachment| {
                        let store = std::sync::Arc::clone(&store);
                        tokio::spawn(async move {
                            store
                                .upsert_retry(&attachment, &ContentHash::of(b"x"), at)
                                .await
                        })
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap().expect("concurrent upsert failed");
            }
        }

        assert_eq!(store.retry_records().await.unwrap().len(), 20 + 20 * 4);
        store.pool.close().await;
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = std::env::temp_dir().join(format!("mediagate-ledger-{}", Uuid::new_v4()));
        let url = format!("sqlite://{}", dir.display());
        let config = SqliteLedgerConfig::new(&url);
        let at = DateTime::from_timestamp_millis(1_767_225_600_123).unwrap();

        {
            let store = SqliteLedgerStore::new(&config).await.unwrap();
            store
                .upsert_retry(&AttachmentId::new("a1"), &ContentHash::of(b"x"), at)
                .await
                .unwrap();
            store.pool.close().await;
        }

        let store = SqliteLedgerStore::new(&config).await.unwrap();
        assert_eq!(store.next_retry_at().await.unwrap(), Some(at));
        store.pool.close().await;
        let _ = std::fs::remove_file(&dir);
    }
}
