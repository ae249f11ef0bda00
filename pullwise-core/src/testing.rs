//! Test doubles for the provider traits
//!
//! Compiled for unit tests and for downstream crates that enable the
//! `testing` feature.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::metrics::{CounterMetric, HistogramMetric, MetricsSink};
use crate::models::{Embedding, Snippet, Status};
use crate::providers::{
    Checkout, EmbeddingProvider, GenerationOptions, LanguageModel, VectorStore, VersionControl,
};
use crate::{Error, Result};

/// Dimensionality of [`FakeEmbeddings`] vectors
pub const FAKE_EMBEDDING_DIM: usize = 32;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A comment recorded by [`FakeVersionControl`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedComment {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub body: String,
}

#[derive(Debug, Default)]
struct VcsState {
    clone_calls: u32,
    checkout_paths: Vec<PathBuf>,
    diff_requests: Vec<String>,
    comment_attempts: u32,
    comments: Vec<PostedComment>,
}

/// Version control double that materializes a fixed file set per clone
#[derive(Debug)]
pub struct FakeVersionControl {
    files: Vec<(String, String)>,
    diff: String,
    diff_delay: Option<Duration>,
    fail_clone: bool,
    fail_comments: bool,
    state: Mutex<VcsState>,
}

impl FakeVersionControl {
    pub fn new() -> Self {
        Self {
            files: Vec::new(),
            diff: "diff --git a/main.go b/main.go\n+func added() {}\n".to_string(),
            diff_delay: None,
            fail_clone: false,
            fail_comments: false,
            state: Mutex::new(VcsState::default()),
        }
    }

    /// Add a file (relative path) to every clone
    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        self.files.push((path.into(), content.into()));
        self
    }

    pub fn with_diff(mut self, diff: impl Into<String>) -> Self {
        self.diff = diff.into();
        self
    }

    /// Sleep before answering diff downloads
    pub fn with_diff_delay(mut self, delay: Duration) -> Self {
        self.diff_delay = Some(delay);
        self
    }

    pub fn failing_clone(mut self) -> Self {
        self.fail_clone = true;
        self
    }

    pub fn failing_comments(mut self) -> Self {
        self.fail_comments = true;
        self
    }

    pub fn clone_calls(&self) -> u32 {
        lock(&self.state).clone_calls
    }

    /// Paths of every checkout handed out
    pub fn checkout_paths(&self) -> Vec<PathBuf> {
        lock(&self.state).checkout_paths.clone()
    }

    pub fn diff_requests(&self) -> Vec<String> {
        lock(&self.state).diff_requests.clone()
    }

    pub fn comment_attempts(&self) -> u32 {
        lock(&self.state).comment_attempts
    }

    /// Successfully posted comments
    pub fn comments(&self) -> Vec<PostedComment> {
        lock(&self.state).comments.clone()
    }
}

impl Default for FakeVersionControl {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VersionControl for FakeVersionControl {
    async fn clone_repo(&self, _url: &str, _branch: &str) -> Result<Checkout> {
        lock(&self.state).clone_calls += 1;
        if self.fail_clone {
            return Err(Error::Vcs("remote unavailable".to_string()));
        }

        let dir = TempDir::new()?;
        for (path, content) in &self.files {
            let target = dir.path().join(path);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, content)?;
        }
        lock(&self.state).checkout_paths.push(dir.path().to_path_buf());
        Ok(Checkout::temporary(dir))
    }

    async fn download_diff(&self, url: &str) -> Result<String> {
        lock(&self.state).diff_requests.push(url.to_string());
        if let Some(delay) = self.diff_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.diff.clone())
    }

    async fn post_comment(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<()> {
        let mut state = lock(&self.state);
        state.comment_attempts += 1;
        if self.fail_comments {
            return Err(Error::Vcs("comment rejected".to_string()));
        }
        state.comments.push(PostedComment {
            owner: owner.to_string(),
            repo: repo.to_string(),
            number,
            body: body.to_string(),
        });
        Ok(())
    }
}

/// Deterministic embedding of a text: a byte histogram over fixed buckets
///
/// Identical texts map to identical vectors, so a query equal to a stored
/// snippet's content has cosine similarity 1.0 with it.
pub fn fake_embedding(text: &str) -> Embedding {
    let mut vector = vec![0.0f32; FAKE_EMBEDDING_DIM];
    for byte in text.bytes() {
        vector[byte as usize % FAKE_EMBEDDING_DIM] += 1.0;
    }
    vector
}

/// Embedding provider double recording every batch request
#[derive(Debug, Default)]
pub struct FakeEmbeddings {
    fail: bool,
    truncate: bool,
    requests: Mutex<Vec<Vec<String>>>,
}

impl FakeEmbeddings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request fails with a transient error
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// Respond with one vector fewer than requested
    pub fn with_truncated_response(mut self) -> Self {
        self.truncate = true;
        self
    }

    /// Number of requests, including failed ones
    pub fn calls(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<Vec<String>> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbeddings {
    async fn create_embeddings(&self, _model: &str, texts: &[String]) -> Result<Vec<Embedding>> {
        lock(&self.requests).push(texts.to_vec());
        if self.fail {
            return Err(Error::Embedding("service unavailable".to_string()));
        }

        let mut vectors: Vec<Embedding> = texts.iter().map(|t| fake_embedding(t)).collect();
        if self.truncate {
            vectors.pop();
        }
        Ok(vectors)
    }
}

#[derive(Debug, Default)]
struct LlmState {
    calls: u32,
    prompts: Vec<String>,
    options: Vec<GenerationOptions>,
}

/// Language model double with scripted choices
#[derive(Debug)]
pub struct ScriptedLanguageModel {
    choices: Vec<String>,
    failures: u32,
    state: Mutex<LlmState>,
}

impl ScriptedLanguageModel {
    /// Always answer with `choices` (possibly none)
    pub fn replying(choices: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            choices: choices.into_iter().map(Into::into).collect(),
            failures: 0,
            state: Mutex::new(LlmState::default()),
        }
    }

    /// Fail `failures` times with a transient error, then answer `text`
    pub fn failing_then_replying(failures: u32, text: impl Into<String>) -> Self {
        Self {
            failures,
            ..Self::replying([text])
        }
    }

    /// Always fail with a transient error
    pub fn failing() -> Self {
        Self::failing_then_replying(u32::MAX, "")
    }

    pub fn calls(&self) -> u32 {
        lock(&self.state).calls
    }

    /// Every prompt received, in order
    pub fn prompts(&self) -> Vec<String> {
        lock(&self.state).prompts.clone()
    }

    pub fn options(&self) -> Vec<GenerationOptions> {
        lock(&self.state).options.clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedLanguageModel {
    async fn generate(&self, prompt: &str, options: &GenerationOptions) -> Result<Vec<String>> {
        let mut state = lock(&self.state);
        state.calls += 1;
        state.prompts.push(prompt.to_string());
        state.options.push(options.clone());
        if state.calls <= self.failures {
            return Err(Error::Llm("rate limited".to_string()));
        }
        Ok(self.choices.clone())
    }
}

/// Vector store whose upserts always fail
#[derive(Debug, Default)]
pub struct FailingVectorStore {
    upserts: Mutex<u32>,
}

impl FailingVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert_calls(&self) -> u32 {
        *lock(&self.upserts)
    }
}

#[async_trait]
impl VectorStore for FailingVectorStore {
    async fn upsert(&self, _project_id: &str, _snippets: &[Snippet]) -> Result<()> {
        *lock(&self.upserts) += 1;
        Err(Error::Store("database is locked".to_string()))
    }

    async fn query_nearest(&self, _project_id: &str, _vector: &[f32], _k: usize) -> Result<Vec<Snippet>> {
        Err(Error::Store("database is locked".to_string()))
    }

    async fn clear_project(&self, _project_id: &str) -> Result<u64> {
        Ok(0)
    }
}

/// Metrics sink that keeps every observation in memory
#[derive(Debug, Default)]
pub struct RecordingMetrics {
    counters: Mutex<HashMap<(CounterMetric, Status), u64>>,
    observations: Mutex<Vec<(HistogramMetric, Status, f64)>>,
}

impl RecordingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, counter: CounterMetric, status: Status) -> u64 {
        lock(&self.counters).get(&(counter, status)).copied().unwrap_or(0)
    }

    /// Number of histogram observations for a status
    pub fn observations(&self, histogram: HistogramMetric, status: Status) -> usize {
        lock(&self.observations)
            .iter()
            .filter(|(h, s, _)| *h == histogram && *s == status)
            .count()
    }
}

impl MetricsSink for RecordingMetrics {
    fn increment(&self, counter: CounterMetric, status: Status) {
        *lock(&self.counters).entry((counter, status)).or_default() += 1;
    }

    fn observe(&self, histogram: HistogramMetric, status: Status, seconds: f64) {
        lock(&self.observations).push((histogram, status, seconds));
    }
}
