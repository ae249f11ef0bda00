//! Nearest-neighbour context lookup for a query text

use std::fmt::Write as _;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::models::Snippet;
use crate::providers::{EmbeddingProvider, VectorStore};
use crate::retry::{Retrier, RetryPolicy};
use crate::{Error, Result};

/// Embeds a query and returns the most similar snippets of a project
#[derive(Clone)]
pub struct ContextRetriever {
    embeddings: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    model: String,
    retrier: Retrier<Error>,
}

impl ContextRetriever {
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

    pub fn with_retry_policy(mut self, policy: RetryPolicy<Error>) -> Self {
        self.retrier = Retrier::new(policy);
        self
    }

    /// Up to `k` snippets from `project_id` nearest to `query`, nearest first
    pub async fn nearest(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
        query: &str,
        k: usize,
    ) -> Result<Vec<Snippet>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let texts = [query.to_string()];
        let mut vectors = self
            .retrier
            .run(cancel, || self.embeddings.create_embeddings(&self.model, &texts))
            .await?;

        if vectors.len() != 1 {
            return Err(Error::EmbeddingMismatch {
                expected: 1,
                actual: vectors.len(),
            });
        }
        let vector = vectors.remove(0);

        let snippets = self
            .retrier
            .run(cancel, || self.store.query_nearest(project_id, &vector, k))
            .await?;

        debug!(project_id, k, found = snippets.len(), "Retrieved context");
        Ok(snippets)
    }

    /// The rendered context block for `query`; empty when nothing matches
    pub async fn retrieve(
        &self,
        cancel: &CancellationToken,
        project_id: &str,
        query: &str,
        k: usize,
    ) -> Result<String> {
        let snippets = self.nearest(cancel, project_id, query, k).await?;
        Ok(format_context(&snippets))
    }
}

impl std::fmt::Debug for ContextRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextRetriever")
            .field("model", &self.model)
            .field("retrier", &self.retrier)
            .finish_non_exhaustive()
    }
}

/// Render snippets as numbered context entries, in rank order
pub fn format_context(snippets: &[Snippet]) -> String {
    let mut out = String::new();
    for (i, snippet) in snippets.iter().enumerate() {
        let _ = write!(
            out,
            "--- Context Snippet {} from file {} ---\n{}\n\n",
            i, snippet.filename, snippet.content
        );
    }
    out
}
