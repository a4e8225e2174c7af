//! SQLite-backed key-value store

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::error::ClientResult;
use crate::store::KeyValueStore;

/// A `KeyValueStore` persisted in a local SQLite database.
///
/// State lives in a single two-column table; values are plain strings
/// addressed by fixed keys.
pub struct SqliteKeyStore {
    pool: SqlitePool,
}

impl SqliteKeyStore {
    /// Open (or create) the database at the given path
    pub async fn connect(db_path: &str) -> ClientResult<Self> {
        let db_url = format!("sqlite:{db_path}?mode=rwc");
        let pool = SqlitePool::connect(&db_url).await?;
        Self::with_pool(pool).await
    }

    /// Build a store over an existing connection pool
    pub async fn with_pool(pool: SqlitePool) -> ClientResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transport_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// An in-memory database, for tests.
    // A single connection: each new in-memory SQLite connection would
    // otherwise see its own empty database.
    pub async fn in_memory() -> ClientResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyStore {
    async fn get(&self, key: &str) -> ClientResult<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>(
            r#"SELECT value FROM transport_state WHERE key = ?"#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transport_state (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = datetime('now')
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> ClientResult<()> {
        sqlx::query(r#"DELETE FROM transport_state WHERE key = ?"#)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
