//! Embeds snippets and stores them under a project id

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::models::Snippet;
use crate::providers::{EmbeddingProvider, VectorStore};
use crate::retry::{Retrier, RetryPolicy};
use crate::{Error, Result};

/// Turns snippets into vectors and upserts them into the vector store
#[derive(Clone)]
pub struct Indexer {
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    model: String,
    retrier: Retrier<Error>,
}

impl Indexer {
    pub fn new(
        embeddings: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            embeddings,
            store,
            model: model.into(),
            retrier: Retrier::default(),
        }
    }

    /// Set the retry policy for provider calls
    pub fn with_retry_policy(mut self, policy: RetryPolicy<Error>) -> Self {
        self.retrier = Retrier::new(policy);
        self
    }

    /// Embed every snippet in one batch and store them tagged with `project_id`
    ///
    /// Embeddings are attached in place. The project's previous snippets are
    /// replaced, so indexing the same project twice does not duplicate them.
    /// If the upsert fails the call fails as a whole; nothing is guaranteed to
    /// be stored.
    pub async fn index(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
        snippets: &mut [Snippet],
    ) -> Result<()> {
        if snippets.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = snippets.iter().map(|s| s.content.clone()).collect();
        let vectors = self
            .retrier
            .run(cancel, || self.embeddings.create_embeddings(&self.model, &texts))
            .await?;

        if vectors.len() != snippets.len() {
            return Err(Error::EmbeddingMismatch {
                expected: snippets.len(),
                actual: vectors.len(),
            });
        }

        for (snippet, vector) in snippets.iter_mut().zip(vectors) {
            snippet.project_id = project_id.to_string();
            snippet.embedding = Some(vector);
        }
        debug!(project_id, count = snippets.len(), "Attached embeddings");

        let cleared = self
            .retrier
            .run(cancel, || self.store.clear_project(project_id))
            .await?;
        if cleared > 0 {
            debug!(project_id, cleared, "Replaced previous snippets");
        }

        let stored: &[Snippet] = snippets;
        self.retrier
            .run(cancel, || self.store.upsert(project_id, stored))
            .await?;

        info!(project_id, count = stored.len(), "Indexed snippets");
        Ok(())
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("model", &self.model)
            .field("retrier", &self.retrier)
            .finish_non_exhaustive()
    }
}
