//! Configuration management for Pullwise
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (PULLWISE_*)
//! 3. Config file (~/.config/pullwise/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize};

use crate::prompts::{PromptTemplates, Task};
use crate::providers::GenerationOptions;
use crate::retry::{Backoff, RetryPolicy};
use crate::{Error, Result};

/// Worker pool configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    pub count: usize,

    /// Wall-clock bound for processing one event
    #[serde(with = "humantime_serde")]
    pub event_timeout: Duration,

    /// Number of context snippets retrieved for a review
    pub retrieve_k: usize,

    /// Capacity of the in-process message queue
    pub channel_capacity: usize,

    /// Deliveries per message before a failing event is left uncommitted
    pub max_deliveries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: 4,
            event_timeout: Duration::from_secs(180),
            retrieve_k: 5,
            channel_capacity: 2000,
            max_deliveries: 3,
        }
    }
}

/// Retry configuration applied to every provider call
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per call (0 means the default of 3)
    pub max_attempts: u32,

    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    /// Jittered policy that only retries transient errors
    pub fn policy(&self) -> RetryPolicy<Error> {
        RetryPolicy::new()
            .with_max_attempts(self.max_attempts)
            .with_backoff(Backoff::ExponentialJitter {
                base: self.base_delay,
                max: self.max_delay,
            })
            .with_should_retry(Error::is_retryable)
    }
}

/// Language model configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    pub api_base_url: String,

    pub model: String,

    pub temperature: f32,

    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        let defaults = GenerationOptions::default();
        Self {
            api_base_url: "https://api.openai.com/v1".to_string(),
            model: defaults.model,
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
        }
    }
}

impl LlmConfig {
    /// Sampling options for completion requests
    pub fn generation_options(&self) -> GenerationOptions {
        GenerationOptions {
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

/// Embedding model configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// OpenAI-compatible API base URL
    pub api_base_url: String,

    pub model: String,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
        }
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path (defaults to ~/.cache/pullwise/vectors.db)
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    /// Resolved database path
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match &self.path {
            Some(path) => Ok(path.clone()),
            None => dirs::cache_dir()
                .map(|p| p.join("pullwise").join("vectors.db"))
                .ok_or_else(|| Error::Config("Could not determine cache directory".to_string())),
        }
    }
}

/// Metrics exposition configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Address to serve `/metrics` on (disabled when unset)
    pub address: Option<String>,
}

/// Prompt template override for one task
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Template text using `{{TEXT}}`, `{{CONTEXT}}` and `{{LANGUAGE}}`
    pub template: Option<String>,
}

/// Per-task prompt configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TasksConfig {
    pub code_review: TaskConfig,
    pub code_completion: TaskConfig,
    pub code_generation: TaskConfig,
}

impl TasksConfig {
    /// Embedded templates with configured overrides applied
    pub fn templates(&self) -> PromptTemplates {
        let mut templates = PromptTemplates::new();
        for (task, config) in [
            (Task::CodeReview, &self.code_review),
            (Task::CodeCompletion, &self.code_completion),
            (Task::CodeGeneration, &self.code_generation),
        ] {
            if let Some(template) = &config.template {
                templates.set(task, template.clone());
            }
        }
        templates
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub worker: WorkerConfig,
    pub retry: RetryConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub store: StoreConfig,
    pub metrics: MetricsConfig,
    pub tasks: TasksConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/pullwise/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pullwise").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - PULLWISE_WORKERS: Number of workers
    /// - PULLWISE_EVENT_TIMEOUT: Per-event timeout (e.g. "3m")
    /// - PULLWISE_MAX_DELIVERIES: Deliveries per message
    /// - PULLWISE_LLM_BASE_URL / PULLWISE_LLM_MODEL
    /// - PULLWISE_EMBEDDING_BASE_URL / PULLWISE_EMBEDDING_MODEL
    /// - PULLWISE_STORE_PATH: Vector database path
    /// - PULLWISE_METRICS_ADDR: Metrics listen address
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(workers) = lookup("PULLWISE_WORKERS") {
            self.worker.count = workers
                .parse()
                .map_err(|_| Error::Config(format!("Invalid PULLWISE_WORKERS: {}", workers)))?;
        }

        if let Some(timeout) = lookup("PULLWISE_EVENT_TIMEOUT") {
            self.worker.event_timeout = humantime::parse_duration(&timeout).map_err(|e| {
                Error::Config(format!("Invalid PULLWISE_EVENT_TIMEOUT '{}': {}", timeout, e))
            })?;
        }

        if let Some(max) = lookup("PULLWISE_MAX_DELIVERIES") {
            self.worker.max_deliveries = max
                .parse()
                .map_err(|_| Error::Config(format!("Invalid PULLWISE_MAX_DELIVERIES: {}", max)))?;
        }

        if let Some(url) = lookup("PULLWISE_LLM_BASE_URL") {
            self.llm.api_base_url = url;
        }

        if let Some(model) = lookup("PULLWISE_LLM_MODEL") {
            self.llm.model = model;
        }

        if let Some(url) = lookup("PULLWISE_EMBEDDING_BASE_URL") {
            self.embedding.api_base_url = url;
        }

        if let Some(model) = lookup("PULLWISE_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }

        if let Some(path) = lookup("PULLWISE_STORE_PATH") {
            self.store.path = Some(PathBuf::from(path));
        }

        if let Some(addr) = lookup("PULLWISE_METRICS_ADDR") {
            self.metrics.address = Some(addr);
        }

        Ok(self)
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, workers: Option<usize>, metrics_addr: Option<String>) -> Self {
        if let Some(count) = workers {
            self.worker.count = count;
        }

        if let Some(addr) = metrics_addr {
            self.metrics.address = Some(addr);
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(
        path: Option<&Path>,
        workers: Option<usize>,
        metrics_addr: Option<String>,
    ) -> Result<Self> {
        let base = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::load()?,
        };

        let config = base
            .with_env_overrides()?
            .with_cli_overrides(workers, metrics_addr);
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.worker.count == 0 {
            return Err(Error::Config("worker.count must be at least 1".to_string()));
        }
        if self.worker.event_timeout.is_zero() {
            return Err(Error::Config("worker.event_timeout must be non-zero".to_string()));
        }
        if self.worker.channel_capacity == 0 {
            return Err(Error::Config(
                "worker.channel_capacity must be at least 1".to_string(),
            ));
        }
        if self.worker.max_deliveries == 0 {
            return Err(Error::Config(
                "worker.max_deliveries must be at least 1".to_string(),
            ));
        }
        if self.embedding.api_base_url.is_empty() {
            return Err(Error::Config("embedding.api_base_url is empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.worker.count, 4);
        assert_eq!(config.worker.event_timeout, Duration::from_secs(180));
        assert_eq!(config.worker.retrieve_k, 5);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.embedding.model, "text-embedding-3-small");
        assert!(config.metrics.address.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
[worker]
count = 8
event_timeout = "90s"

[retry]
max_attempts = 5
base_delay = "100ms"
max_delay = "2s"

[llm]
model = "gpt-4o"
max_tokens = 2048

[tasks.code_review]
template = "Review {{TEXT}} with {{CONTEXT}}"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.worker.count, 8);
        assert_eq!(config.worker.event_timeout, Duration::from_secs(90));
        assert_eq!(config.retry.base_delay, Duration::from_millis(100));
        assert_eq!(config.llm.model, "gpt-4o");
        assert_eq!(config.llm.max_tokens, 2048);
        // Untouched fields keep their defaults
        assert_eq!(config.worker.retrieve_k, 5);
        assert_eq!(
            config.tasks.code_review.template.as_deref(),
            Some("Review {{TEXT}} with {{CONTEXT}}")
        );
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("PULLWISE_WORKERS", "2"),
            ("PULLWISE_EVENT_TIMEOUT", "45s"),
            ("PULLWISE_MAX_DELIVERIES", "5"),
            ("PULLWISE_LLM_MODEL", "local-model"),
            ("PULLWISE_METRICS_ADDR", "127.0.0.1:9100"),
        ]
        .into_iter()
        .collect();

        let config = Config::default()
            .with_overrides_from(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.worker.count, 2);
        assert_eq!(config.worker.event_timeout, Duration::from_secs(45));
        assert_eq!(config.worker.max_deliveries, 5);
        assert_eq!(config.llm.model, "local-model");
        assert_eq!(config.metrics.address.as_deref(), Some("127.0.0.1:9100"));
    }

    #[test]
    fn test_invalid_env_override() {
        let result = Config::default().with_overrides_from(|k| {
            (k == "PULLWISE_WORKERS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_cli_overrides_win() {
        let config = Config::default()
            .with_overrides_from(|k| (k == "PULLWISE_WORKERS").then(|| "2".to_string()))
            .unwrap()
            .with_cli_overrides(Some(16), Some("0.0.0.0:9000".to_string()));
        assert_eq!(config.worker.count, 16);
        assert_eq!(config.metrics.address.as_deref(), Some("0.0.0.0:9000"));
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let config = Config::default().with_cli_overrides(Some(0), None);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        }
        .policy();
        assert_eq!(policy.max_attempts(), 3);
    }

    #[test]
    fn test_task_template_overrides() {
        let tasks = TasksConfig {
            code_completion: TaskConfig {
                template: Some("complete {{TEXT}}".to_string()),
            },
            ..TasksConfig::default()
        };
        let templates = tasks.templates();
        assert_eq!(templates.get(Task::CodeCompletion), "complete {{TEXT}}");
        assert!(templates.get(Task::CodeReview).contains("{{CONTEXT}}"));
    }
}
