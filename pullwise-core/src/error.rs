//! Error types for Pullwise

use std::time::Duration;

use thiserror::Error;

use crate::pipeline::Stage;
use crate::retry::Cancelled;

/// Result type alias for Pullwise operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for Pullwise operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Version control provider error (clone, diff download, comment)
    #[error("Version control error: {0}")]
    Vcs(String),

    /// Credentials were rejected by a provider
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Code unit extraction error
    #[error("Extraction error: {0}")]
    Extract(String),

    /// Embedding provider error
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Embedding provider returned a different number of vectors than requested
    #[error("Embedding provider returned {actual} vectors for {expected} inputs")]
    EmbeddingMismatch { expected: usize, actual: usize },

    /// Language model provider error
    #[error("Language model error: {0}")]
    Llm(String),

    /// Language model returned no completion choices
    #[error("No response choices from language model")]
    NoResponse,

    /// Task name that has no prompt template
    #[error("Unknown task: {0}")]
    UnknownTask(String),

    /// Vector store error
    #[error("Vector store error: {0}")]
    Store(String),

    /// Snippet that violates the vector store's contract
    #[error("Invalid snippet: {0}")]
    InvalidSnippet(String),

    /// Queue transport error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Metrics registration or encoding error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// The project contains no recognized code units
    #[error("No snippets found, nothing to review")]
    NothingToReview,

    /// The operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// The per-event deadline elapsed
    #[error("Event processing timed out after {0:?}")]
    Timeout(Duration),

    /// A pipeline stage failed
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap this error with the pipeline stage it came from
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            // Already attributed, or not a stage fault
            Error::Stage { .. } | Error::Timeout(_) | Error::NothingToReview => self,
            other => Error::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, looking through stage attribution
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }

    /// The stage this error is attributed to, if any
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Error::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Whether retrying the failed call could help
    ///
    /// Network and provider failures are transient. Contract violations,
    /// user-facing conditions and cancellation are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_)
            | Error::Vcs(_)
            | Error::Embedding(_)
            | Error::Llm(_)
            | Error::Store(_)
            | Error::Queue(_)
            | Error::Other(_) => true,
            Error::Stage { source, .. } => source.is_retryable(),
            Error::Json(_)
            | Error::Config(_)
            | Error::Metrics(_)
            | Error::Unauthorized(_)
            | Error::Extract(_)
            | Error::InvalidSnippet(_)
            | Error::EmbeddingMismatch { .. }
            | Error::NoResponse
            | Error::UnknownTask(_)
            | Error::NothingToReview
            | Error::Cancelled
            | Error::Timeout(_) => false,
        }
    }

    /// Whether this is an expected, user-facing condition rather than a system fault
    pub fn is_user_facing(&self) -> bool {
        matches!(self.root(), Error::NothingToReview)
    }
}

impl From<Cancelled> for Error {
    fn from(_: Cancelled) -> Self {
        Error::Cancelled
    }
}
