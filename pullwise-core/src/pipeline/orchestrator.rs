//! Sequences the review stages for one event

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::{ContextRetriever, Indexer, Publisher, ReviewGenerator, Stage};
use crate::config::Config;
use crate::extract::ProjectExtractor;
use crate::models::{dominant_language, ReviewEvent};
use crate::prompts::{PromptTemplates, Task};
use crate::providers::{
    EmbeddingProvider, GenerationOptions, LanguageModel, VectorStore, VersionControl,
};
use crate::retry::{Retrier, RetryPolicy};
use crate::{Error, Result};

/// Default per-event deadline
pub const DEFAULT_EVENT_TIMEOUT: Duration = Duration::from_secs(180);

/// Default number of context snippets retrieved per review
pub const DEFAULT_RETRIEVE_K: usize = 5;

/// The external collaborators one orchestrator talks to
#[derive(Clone)]
pub struct Providers {
    pub vcs: Arc<dyn VersionControl>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
    pub llm: Arc<dyn LanguageModel>,
    pub store: Arc<dyn VectorStore>,
}

/// Tunables for the pipeline
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Deadline for the whole pipeline run of one event
    pub event_timeout: Duration,
    /// Number of context snippets to retrieve
    pub retrieve_k: usize,
    /// Embedding model name
    pub embedding_model: String,
    pub generation: GenerationOptions,
    pub templates: PromptTemplates,
    /// Policy shared by every retry-wrapped provider call
    pub retry: RetryPolicy<Error>,
    /// Prompt language when no snippet language is known
    pub default_language: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            event_timeout: DEFAULT_EVENT_TIMEOUT,
            retrieve_k: DEFAULT_RETRIEVE_K,
            embedding_model: "text-embedding-3-small".to_string(),
            generation: GenerationOptions::default(),
            templates: PromptTemplates::default(),
            retry: RetryPolicy::new().with_should_retry(Error::is_retryable),
            default_language: "go".to_string(),
        }
    }
}

impl OrchestratorSettings {
    /// Settings derived from the loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            event_timeout: config.worker.event_timeout,
            retrieve_k: config.worker.retrieve_k,
            embedding_model: config.embedding.model.clone(),
            generation: config.llm.generation_options(),
            templates: config.tasks.templates(),
            retry: config.retry.policy(),
            ..Self::default()
        }
    }

    pub fn with_event_timeout(mut self, timeout: Duration) -> Self {
        self.event_timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy<Error>) -> Self {
        self.retry = retry;
        self
    }
}

/// Summary of a completed review
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewReport {
    pub project_id: String,
    /// Number of snippets extracted and indexed
    pub snippets: usize,
    /// Prompt language
    pub language: String,
    /// The posted review text
    pub review: String,
    pub elapsed: Duration,
}

/// Runs the full review pipeline for one event under a deadline
pub struct Orchestrator {
    vcs: Arc<dyn VersionControl>,
    extractor: ProjectExtractor,
    indexer: Indexer,
    retriever: ContextRetriever,
    generator: ReviewGenerator,
    publisher: Publisher,
    retrier: Retrier<Error>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(providers: Providers, settings: OrchestratorSettings) -> Self {
        let policy = settings.retry.clone();
        let model = settings.embedding_model.clone();

        Self {
            extractor: ProjectExtractor::with_defaults(),
            indexer: Indexer::new(providers.embeddings.clone(), providers.store.clone(), &model)
                .with_retry_policy(policy.clone()),
            retriever: ContextRetriever::new(providers.embeddings, providers.store, &model)
                .with_retry_policy(policy.clone()),
            generator: ReviewGenerator::new(providers.llm, settings.generation.clone())
                .with_templates(settings.templates.clone())
                .with_retry_policy(policy.clone()),
            publisher: Publisher::new(providers.vcs.clone()).with_retry_policy(policy.clone()),
            retrier: Retrier::new(policy),
            vcs: providers.vcs,
            settings,
        }
    }

    /// Replace the snippet extractor (e.g. to register more languages)
    pub fn with_extractor(mut self, extractor: ProjectExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Process one event end to end
    ///
    /// On timeout the in-flight stage is cancelled and dropped, which also
    /// drops the checkout and deletes the clone. A running extraction walk
    /// notices the cancellation and stops.
    pub async fn process(&self, event: &ReviewEvent) -> Result<ReviewReport> {
        let span = info_span!(
            "review",
            owner = %event.owner,
            repo = %event.repo,
            number = event.number
        );

        async {
            let cancel = CancellationToken::new();
            let started = Instant::now();
            let timeout = self.settings.event_timeout;

            let result = tokio::select! {
                result = self.run_stages(&cancel, event, started) => result,
                _ = tokio::time::sleep(timeout) => {
                    cancel.cancel();
                    Err(Error::Timeout(timeout))
                }
            };

            let elapsed_ms = started.elapsed().as_millis() as u64;
            match &result {
                Ok(_) => info!(elapsed_ms, "Review completed"),
                Err(e) if e.is_user_facing() => warn!(elapsed_ms, "{}", e),
                Err(e) => warn!(elapsed_ms, stage = ?e.stage(), error = %e, "Review failed"),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn run_stages(
        &self,
        cancel: &CancellationToken,
        event: &ReviewEvent,
        started: Instant,
    ) -> Result<ReviewReport> {
        let checkout = self
            .retrier
            .run(cancel, || self.vcs.clone_repo(&event.clone_url, &event.branch))
            .await
            .map_err(|e| e.in_stage(Stage::Clone))?;
        debug!(path = %checkout.path().display(), "Cloned repository");

        let mut snippets = self
            .extractor
            .extract(checkout.path(), cancel)
            .await
            .map_err(|e| e.in_stage(Stage::Extract))?;
        if snippets.is_empty() {
            return Err(Error::NothingToReview);
        }

        let project_id = event.project_id();
        self.indexer
            .index(cancel, &project_id, &mut snippets)
            .await
            .map_err(|e| e.in_stage(Stage::Index))?;

        let diff = self
            .retrier
            .run(cancel, || self.vcs.download_diff(&event.diff_url))
            .await
            .map_err(|e| e.in_stage(Stage::DownloadDiff))?;
        debug!(diff_len = diff.len(), "Downloaded diff");

        let context = self
            .retriever
            .retrieve(cancel, &project_id, &diff, self.settings.retrieve_k)
            .await
            .map_err(|e| e.in_stage(Stage::Retrieve))?;

        let language = dominant_language(&snippets)
            .unwrap_or_else(|| self.settings.default_language.clone());
        let review = self
            .generator
            .generate(cancel, Task::CodeReview, &diff, &context, &language)
            .await
            .map_err(|e| e.in_stage(Stage::Generate))?;

        self.publisher
            .publish(cancel, &event.owner, &event.repo, event.number, &review)
            .await
            .map_err(|e| e.in_stage(Stage::Publish))?;

        // The comment is already posted; a cleanup failure must not trigger redelivery
        if let Err(e) = checkout.release() {
            warn!(error = %e, "Failed to remove clone directory");
        }

        Ok(ReviewReport {
            project_id,
            snippets: snippets.len(),
            language,
            review,
            elapsed: started.elapsed(),
        })
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("extractor", &self.extractor)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
