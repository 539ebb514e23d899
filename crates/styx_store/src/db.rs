//! SQLite backend via sqlx.

use std::{path::Path, str::FromStr};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::{
    error::StoreError,
    traits::{CursorStore, KeyValueStore, SeenKey},
};

/// Store handle. Cheap to clone (the pool is reference counted).
#[derive(Clone)]
pub struct SqliteStore {
    pub pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and run pending migrations.
    ///
    /// WAL is set on the connection options: SQLite refuses to change
    /// `journal_mode` inside the transaction sqlx wraps each migration in.
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePool::connect_with(opts).await?;
        Self::migrate(pool).await
    }

    /// Private database that lives as long as the returned handle.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        tracing::debug!(target: "styx_store", event = "migrated");
        Ok(Self { pool })
    }
}

#[async_trait]
impl CursorStore for SqliteStore {
    async fn get_cursor(&self, owner: &str) -> Result<Option<String>, StoreError> {
        let id = sqlx::query_scalar::<_, String>("SELECT record_id FROM cursors WHERE owner = ?")
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn set_cursor(&self, owner: &str, record_id: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO cursors (owner, record_id, updated_at) VALUES (?, ?, datetime('now'))
             ON CONFLICT(owner) DO UPDATE SET record_id = excluded.record_id, updated_at = excluded.updated_at",
        )
        .bind(owner)
        .bind(record_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn has_seen(&self, owner: &str, key: SeenKey<'_>) -> Result<bool, StoreError> {
        let hit = sqlx::query_scalar::<_, i64>(
            "SELECT 1 FROM seen WHERE owner = ? AND kind = ? AND value = ?",
        )
        .bind(owner)
        .bind(key.kind())
        .bind(key.value())
        .fetch_optional(&self.pool)
        .await?;
        Ok(hit.is_some())
    }

    async fn mark_seen(&self, owner: &str, key: SeenKey<'_>) -> Result<(), StoreError> {
        sqlx::query("INSERT OR IGNORE INTO seen (owner, kind, value) VALUES (?, ?, ?)")
            .bind(owner)
            .bind(key.kind())
            .bind(key.value())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value = sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let res = sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
