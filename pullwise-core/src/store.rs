//! In-memory vector store and similarity helpers
//!
//! Ranking is brute-force cosine similarity. The SQLite store in
//! `pullwise-store` reuses [`rank_nearest`] so both adapters order results
//! identically.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::models::Snippet;
use crate::providers::VectorStore;
use crate::{Error, Result};

/// Cosine similarity of two vectors; 0.0 when either is zero or lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// The `k` snippets most similar to `vector`, most similar first
///
/// Snippets without an embedding are ignored. Ties keep input order.
pub fn rank_nearest(snippets: impl IntoIterator<Item = Snippet>, vector: &[f32], k: usize) -> Vec<Snippet> {
    let mut scored: Vec<(f32, Snippet)> = snippets
        .into_iter()
        .filter_map(|s| {
            let score = cosine_similarity(s.embedding.as_deref()?, vector);
            Some((score, s))
        })
        .collect();

    scored.sort_by(|(a, _), (b, _)| b.total_cmp(a));
    scored.into_iter().take(k).map(|(_, s)| s).collect()
}

/// Snippets of one project in insertion order, indexed by id
#[derive(Debug, Default)]
struct Partition {
    snippets: Vec<Snippet>,
    positions: HashMap<String, usize>,
}

impl Partition {
    fn put(&mut self, snippet: Snippet) {
        match self.positions.get(&snippet.id) {
            Some(&at) => self.snippets[at] = snippet,
            None => {
                self.positions.insert(snippet.id.clone(), self.snippets.len());
                self.snippets.push(snippet);
            }
        }
    }
}

/// Vector store kept in process memory, partitioned by project id
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    projects: RwLock<HashMap<String, Partition>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snippets stored under `project_id`
    pub fn len(&self, project_id: &str) -> usize {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(project_id)
            .map_or(0, |p| p.snippets.len())
    }

    pub fn is_empty(&self) -> bool {
        self.projects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .all(|p| p.snippets.is_empty())
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, project_id: &str, snippets: &[Snippet]) -> Result<()> {
        if let Some(missing) = snippets.iter().find(|s| s.embedding.is_none()) {
            return Err(Error::InvalidSnippet(format!(
                "Snippet {} has no embedding",
                missing.id
            )));
        }

        let mut projects = self.projects.write().unwrap_or_else(PoisonError::into_inner);
        let partition = projects.entry(project_id.to_string()).or_default();
        for snippet in snippets {
            let mut snippet = snippet.clone();
            snippet.project_id = project_id.to_string();
            partition.put(snippet);
        }
        Ok(())
    }

    async fn query_nearest(&self, project_id: &str, vector: &[f32], k: usize) -> Result<Vec<Snippet>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        let Some(partition) = projects.get(project_id) else {
            return Ok(Vec::new());
        };
        Ok(rank_nearest(partition.snippets.iter().cloned(), vector, k))
    }

    async fn clear_project(&self, project_id: &str) -> Result<u64> {
        let removed = self
            .projects
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(project_id)
            .map_or(0, |p| p.snippets.len());
        Ok(removed as u64)
    }
}
