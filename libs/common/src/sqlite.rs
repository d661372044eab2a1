//! SQLite pool client

use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Connection pool tuned for an edge gateway
#[derive(Clone)]
pub struct SqliteClient {
    pool: SqlitePool,
    db_path: String,
}

impl SqliteClient {
    /// Open (or create) the database file in WAL mode
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .journal_mode(SqliteJournalMode::Wal) // Concurrent readers while appending
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        // 2MB page cache (negative value means KB)
        sqlx::query("PRAGMA cache_size = -2000")
            .execute(&pool)
            .await?;

        info!("SQLite archive database opened: {}", db_path_str);

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    /// Single-connection in-memory database
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self {
            pool,
            db_path: ":memory:".to_string(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Check if the database answers
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_database_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("archive.db");

        let client = SqliteClient::new(&path).await.unwrap();
        assert!(client.ping().await);
        assert!(path.exists());
        client.close().await;
    }

    #[tokio::test]
    async fn test_in_memory() {
        let client = SqliteClient::in_memory().await.unwrap();
        assert!(client.ping().await);
        assert_eq!(client.path(), ":memory:");
    }
}
