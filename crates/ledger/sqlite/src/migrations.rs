use sqlx::SqlitePool;

/// Create the ledger tables and indexes if they do not already exist.
pub async fn run_migrations(pool: &SqlitePool, prefix: &str) -> Result<(), sqlx::Error> {
    let hashes = format!("{prefix}hash_records");
    let retries = format!("{prefix}retry_queue");
    let blocked = format!("{prefix}blocked_hashes");

    let statements = [
        format!(
            "
            CREATE TABLE IF NOT EXISTS {hashes} (
                id              TEXT PRIMARY KEY,
                hash            TEXT NOT NULL,
                conversation_id TEXT NOT NULL,
                attachment_id   TEXT,
                filename        TEXT,
                timestamp_ms    INTEGER NOT NULL,
                blocked         INTEGER NOT NULL DEFAULT 0
            )
            "
        ),
        format!("CREATE INDEX IF NOT EXISTS idx_{prefix}hash_records_hash ON {hashes} (hash)"),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{prefix}hash_records_time ON {hashes} (timestamp_ms) WHERE blocked = 0"
        ),
        format!(
            "
            CREATE TABLE IF NOT EXISTS {blocked} (
                hash TEXT PRIMARY KEY
            )
            "
        ),
        format!(
            "
            CREATE TABLE IF NOT EXISTS {retries} (
                id               TEXT PRIMARY KEY,
                attachment_id    TEXT NOT NULL UNIQUE,
                content_hash     TEXT NOT NULL,
                next_retry_at_ms INTEGER NOT NULL,
                retry_attempt    INTEGER NOT NULL DEFAULT 0
            )
            "
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{prefix}retry_queue_next ON {retries} (next_retry_at_ms)"
        ),
    ];

    for stmt in &statements {
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}
