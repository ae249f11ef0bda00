//! The per-event review pipeline
//!
//! Stages run strictly in sequence for one event:
//! clone → extract → index → download diff → retrieve → generate → publish.
//! The [`Orchestrator`] owns the per-event deadline and the checkout cleanup.

mod generator;
mod indexer;
mod orchestrator;
mod publisher;
mod retriever;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use generator::ReviewGenerator;
pub use indexer::Indexer;
pub use orchestrator::{Orchestrator, OrchestratorSettings, Providers, ReviewReport};
pub use publisher::Publisher;
pub use retriever::{format_context, ContextRetriever};

/// A step of the review pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Clone,
    Extract,
    Index,
    DownloadDiff,
    Retrieve,
    Generate,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Clone => "clone",
            Stage::Extract => "extract",
            Stage::Index => "index",
            Stage::DownloadDiff => "download-diff",
            Stage::Retrieve => "retrieve",
            Stage::Generate => "generate",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
