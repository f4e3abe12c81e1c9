//! SQLite database backing the persistence port

use crate::services::persistence::KeyValueStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

/// Version of the table layout, stored in `PRAGMA user_version`
const DB_SCHEMA_VERSION: i64 = 1;

/// Database connection pool
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection
    pub async fn new(path: &str) -> Result<Self> {
        let in_memory = path.contains(":memory:");

        let mut options = SqliteConnectOptions::from_str(path)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every in-memory connection is its own database
        let max_connections = if in_memory { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.initialize().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        let version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&self.pool)
            .await?;

        if version > DB_SCHEMA_VERSION {
            anyhow::bail!(
                "Database schema v{} is newer than this build supports (v{})",
                version,
                DB_SCHEMA_VERSION
            );
        }

        if version < DB_SCHEMA_VERSION {
            info!("Migrating database schema v{} -> v{}", version, DB_SCHEMA_VERSION);
            sqlx::query(&format!("PRAGMA user_version = {}", DB_SCHEMA_VERSION))
                .execute(&self.pool)
                .await?;
        }

        Ok(())
    }

    /// Initialize database schema
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        self.run_migrations().await?;

        info!("Database initialized");
        Ok(())
    }

    /// Keys currently stored, with their last write time
    pub async fn list_keys(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, updated_at FROM kv_store ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("key"), row.get("updated_at")))
            .collect())
    }
}

#[async_trait]
impl KeyValueStore for Database {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("Failed to read key {}", key))?;

        Ok(row.map(|r| r.get("value")))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to write key {}", key))?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_overwrites_and_get_reads_back() {
        let db = Database::new("sqlite::memory:").await.unwrap();

        assert_eq!(db.get("portfolio").await.unwrap(), None);
        db.set("portfolio", "[]").await.unwrap();
        db.set("portfolio", r#"["INFY"]"#).await.unwrap();
        assert_eq!(db.get("portfolio").await.unwrap().as_deref(), Some(r#"["INFY"]"#));

        let keys = db.list_keys().await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].0, "portfolio");
    }

    #[tokio::test]
    async fn test_remove() {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.set("kiteLoggedIn", "true").await.unwrap();
        db.remove("kiteLoggedIn").await.unwrap();
        assert_eq!(db.get("kiteLoggedIn").await.unwrap(), None);
    }
}
