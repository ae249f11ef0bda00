//! SQLite vector store for Pullwise
//!
//! Snippets and their embeddings are persisted per project. Similarity search
//! loads one project's rows and ranks them with cosine similarity in process.

pub mod error;
pub mod snippets;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::debug;

pub use error::{Error, Result};
pub use snippets::{SnippetRepository, SqliteVectorStore};

/// Database connection pool
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection from a file path
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Io(format!("Failed to create database directory: {}", e)))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        debug!(path = %db_path.display(), "Opened vector database");
        Self::migrate(pool).await
    }

    /// Create a private in-memory database (one connection, gone on drop)
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Migration(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Get the default database path (~/.cache/pullwise/vectors.db)
    pub fn default_path() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| Error::Io("Could not determine cache directory".to_string()))?;
        Ok(cache_dir.join("pullwise").join("vectors.db"))
    }

    /// Get the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Get the snippets repository
    pub fn snippets(&self) -> SnippetRepository {
        SnippetRepository::new(self.pool.clone())
    }

    /// A [`pullwise_core::providers::VectorStore`] backed by this database
    pub fn vector_store(&self) -> SqliteVectorStore {
        SqliteVectorStore::new(self.snippets())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("vectors.db");

        let _db = Database::new(&db_path).await.unwrap();
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_database_migrations() {
        let db = Database::in_memory().await.unwrap();

        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='snippets'",
        )
        .fetch_one(db.pool())
        .await
        .unwrap();
        assert_eq!(result.0, 1);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("vectors.db");

        {
            let db = Database::new(&db_path).await.unwrap();
            let snippet = pullwise_core::Snippet::new("func A() {}", "a.go", "go")
                .with_embedding(vec![1.0, 0.0]);
            db.snippets().upsert("p", &[snippet]).await.unwrap();
            db.pool().close().await;
        }

        let db = Database::new(&db_path).await.unwrap();
        assert_eq!(db.snippets().count("p").await.unwrap(), 1);
    }
}
