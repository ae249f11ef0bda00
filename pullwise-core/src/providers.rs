//! Capability traits for the external collaborators
//!
//! The pipeline never talks to a network service directly. Each provider is a
//! trait with one production adapter (in the `pullwise-github`,
//! `pullwise-openai` and `pullwise-store` crates) and one test double in
//! [`crate::testing`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::models::{Embedding, Snippet};
use crate::Result;

/// A cloned working copy, deleted when released or dropped
#[derive(Debug)]
pub struct Checkout {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl Checkout {
    /// Take ownership of a temporary directory holding the clone
    pub fn temporary(dir: TempDir) -> Self {
        Self {
            path: dir.path().to_path_buf(),
            dir: Some(dir),
        }
    }

    /// Wrap a path that is not owned (never deleted)
    pub fn borrowed(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dir: None,
        }
    }

    /// Root of the working copy
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the working copy now, reporting any failure
    pub fn release(mut self) -> Result<()> {
        if let Some(dir) = self.dir.take() {
            debug!(path = %self.path.display(), "Releasing checkout");
            dir.close()?;
        }
        Ok(())
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!(path = %self.path.display(), error = %e, "Failed to remove checkout");
            }
        }
    }
}

/// Source-control provider
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Clone `branch` of `url` into a fresh working copy
    async fn clone_repo(&self, url: &str, branch: &str) -> Result<Checkout>;

    /// Download the unified diff at `url`
    async fn download_diff(&self, url: &str) -> Result<String>;

    /// Post `body` as a comment on pull request `number`
    async fn post_comment(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<()>;
}

/// Embedding inference provider
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed every text; the response is aligned with the request by index
    async fn create_embeddings(&self, model: &str, texts: &[String]) -> Result<Vec<Embedding>>;
}

/// Sampling options for a completion request
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOptions {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 1024,
        }
    }
}

/// Language model inference provider
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Complete `prompt`, returning every completion choice
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Vec<String>>;
}

/// Project-partitioned vector store
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace snippets under `project_id`; every snippet must carry an embedding
    async fn upsert(&self, project_id: &str, snippets: &[Snippet]) -> Result<()>;

    /// The `k` snippets of `project_id` nearest to `vector`, nearest first
    async fn query_nearest(&self, project_id: &str, vector: &[f32], k: usize)
        -> Result<Vec<Snippet>>;

    /// Remove every snippet of `project_id`; returns how many were removed
    async fn clear_project(&self, project_id: &str) -> Result<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_release_deletes_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        let checkout = Checkout::temporary(dir);
        assert!(path.exists());
        checkout.release().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_checkout_drop_deletes_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().to_path_buf();
        {
            let _checkout = Checkout::temporary(dir);
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_borrowed_checkout_is_kept() {
        let dir = TempDir::new().unwrap();
        let checkout = Checkout::borrowed(dir.path());
        checkout.release().unwrap();
        assert!(dir.path().exists());
    }
}
