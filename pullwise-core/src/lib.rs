//! Pullwise Core - asynchronous pull request review pipeline
//!
//! This crate provides the review pipeline (extract, index, retrieve,
//! generate, publish), the retry executor every provider call goes through,
//! and the worker pool that consumes review events from a queue. External
//! services are reached only through the traits in [`providers`].

pub mod config;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod queue;
pub mod retry;
pub mod secrets;
pub mod store;
pub mod worker;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{ProcessingOutcome, ReviewEvent, Snippet, Status};
pub use pipeline::{Orchestrator, OrchestratorSettings, Providers, ReviewReport, Stage};
pub use queue::{ChannelQueue, MessageSource, QueueMessage};
pub use retry::{Backoff, Retrier, RetryPolicy};
pub use secrets::Secrets;
pub use worker::{PoolSummary, WorkerPool};
