//! Repository for indexed snippets and the vector store adapter on top of it

use async_trait::async_trait;
use pullwise_core::providers::VectorStore;
use pullwise_core::store::rank_nearest;
use pullwise_core::Snippet;
use sqlx::sqlite::SqlitePool;
use tracing::debug;

use crate::{Error, Result};

/// Raw `snippets` row
#[derive(Debug, Clone, sqlx::FromRow)]
struct SnippetRow {
    id: String,
    project_id: String,
    filename: String,
    language: String,
    content: String,
    embedding: String, // JSON array
}

impl SnippetRow {
    fn into_snippet(self) -> Result<Snippet> {
        let embedding: Vec<f32> = serde_json::from_str(&self.embedding)?;
        Ok(Snippet {
            id: self.id,
            content: self.content,
            filename: self.filename,
            language: self.language,
            project_id: self.project_id,
            embedding: Some(embedding),
        })
    }
}

/// Repository for snippet records
#[derive(Debug, Clone)]
pub struct SnippetRepository {
    pool: SqlitePool,
}

impl SnippetRepository {
    /// Create a new repository instance
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace snippets under `project_id` in one transaction
    pub async fn upsert(&self, project_id: &str, snippets: &[Snippet]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for snippet in snippets {
            let embedding = snippet.embedding.as_ref().ok_or_else(|| {
                Error::InvalidData(format!("Snippet {} has no embedding", snippet.id))
            })?;

            sqlx::query(
                "INSERT INTO snippets (id, project_id, filename, language, content, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    project_id = excluded.project_id,
                    filename = excluded.filename,
                    language = excluded.language,
                    content = excluded.content,
                    embedding = excluded.embedding",
            )
            .bind(&snippet.id)
            .bind(project_id)
            .bind(&snippet.filename)
            .bind(&snippet.language)
            .bind(&snippet.content)
            .bind(serde_json::to_string(embedding)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(project_id, count = snippets.len(), "Stored snippets");
        Ok(())
    }

    /// All snippets of a project, oldest first
    pub async fn find_by_project(&self, project_id: &str) -> Result<Vec<Snippet>> {
        let rows: Vec<SnippetRow> = sqlx::query_as(
            "SELECT id, project_id, filename, language, content, embedding
             FROM snippets
             WHERE project_id = ?1
             ORDER BY rowid ASC",
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(SnippetRow::into_snippet).collect()
    }

    /// Number of snippets stored for a project
    pub async fn count(&self, project_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM snippets WHERE project_id = ?1")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Remove every snippet of a project; returns the number deleted
    pub async fn delete_project(&self, project_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM snippets WHERE project_id = ?1")
            .bind(project_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

/// [`VectorStore`] over a [`SnippetRepository`] with brute-force cosine ranking
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    repo: SnippetRepository,
}

impl SqliteVectorStore {
    pub fn new(repo: SnippetRepository) -> Self {
        Self { repo }
    }

    pub fn repository(&self) -> &SnippetRepository {
        &self.repo
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, project_id: &str, snippets: &[Snippet]) -> pullwise_core::Result<()> {
        Ok(self.repo.upsert(project_id, snippets).await?)
    }

    async fn query_nearest(
        &self,
        project_id: &str,
        vector: &[f32],
        k: usize,
    ) -> pullwise_core::Result<Vec<Snippet>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let candidates = self.repo.find_by_project(project_id).await?;
        Ok(rank_nearest(candidates, vector, k))
    }

    async fn clear_project(&self, project_id: &str) -> pullwise_core::Result<u64> {
        Ok(self.repo.delete_project(project_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    fn snippet(content: &str, embedding: Vec<f32>) -> Snippet {
        Snippet::new(content, "main.go", "go").with_embedding(embedding)
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.snippets();

        repo.upsert("acme/widget/main/1", &[snippet("func A() {}", vec![0.5, 0.25])])
            .await
            .unwrap();

        let found = repo.find_by_project("acme/widget/main/1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "func A() {}");
        assert_eq!(found[0].project_id, "acme/widget/main/1");
        assert_eq!(found[0].embedding.as_deref(), Some(&[0.5f32, 0.25][..]));
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_id() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.snippets();
        let mut s = snippet("v1", vec![1.0]);

        repo.upsert("p", &[s.clone()]).await.unwrap();
        s.content = "v2".to_string();
        repo.upsert("p", &[s]).await.unwrap();

        assert_eq!(repo.count("p").await.unwrap(), 1);
        assert_eq!(repo.find_by_project("p").await.unwrap()[0].content, "v2");
    }

    #[tokio::test]
    async fn test_missing_embedding_rolls_back_batch() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.snippets();

        let err = repo
            .upsert(
                "p",
                &[snippet("ok", vec![1.0]), Snippet::new("bare", "b.go", "go")],
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidData(_)));
        assert_eq!(repo.count("p").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_query_nearest_ranks_within_project() {
        let db = Database::in_memory().await.unwrap();
        let store = db.vector_store();

        store
            .upsert(
                "acme/widget/main/1",
                &[
                    snippet("far", vec![0.0, 1.0]),
                    snippet("near", vec![1.0, 0.0]),
                    snippet("mid", vec![0.7, 0.7]),
                ],
            )
            .await
            .unwrap();
        store
            .upsert("acme/widget/main/2", &[snippet("other", vec![1.0, 0.0])])
            .await
            .unwrap();

        let found = store
            .query_nearest("acme/widget/main/1", &[1.0, 0.0], 2)
            .await
            .unwrap();
        let contents: Vec<&str> = found.iter().map(|s| s.content.as_str()).collect();
        assert_eq!(contents, vec!["near", "mid"]);

        assert!(store
            .query_nearest("acme/widget/main/3", &[1.0, 0.0], 5)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_delete_project() {
        let db = Database::in_memory().await.unwrap();
        let repo = db.snippets();
        repo.upsert("p", &[snippet("a", vec![1.0]), snippet("b", vec![2.0])])
            .await
            .unwrap();

        assert_eq!(repo.delete_project("p").await.unwrap(), 2);
        assert_eq!(repo.count("p").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_project_through_vector_store() {
        let db = Database::in_memory().await.unwrap();
        let store = db.vector_store();
        store.upsert("p", &[snippet("a", vec![1.0])]).await.unwrap();
        store.upsert("q", &[snippet("b", vec![1.0])]).await.unwrap();

        assert_eq!(store.clear_project("p").await.unwrap(), 1);
        assert_eq!(store.repository().count("p").await.unwrap(), 0);
        assert_eq!(store.repository().count("q").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_store_errors_convert_to_core() {
        let db = Database::in_memory().await.unwrap();
        let store = db.vector_store();
        let err = store
            .upsert("p", &[Snippet::new("bare", "b.go", "go")])
            .await
            .unwrap_err();
        assert!(matches!(err, pullwise_core::Error::InvalidSnippet(_)));
        assert!(!err.is_retryable());

        let err: pullwise_core::Error = Error::Migration("locked".to_string()).into();
        assert!(matches!(err, pullwise_core::Error::Store(_)));
        assert!(err.is_retryable());
    }
}
