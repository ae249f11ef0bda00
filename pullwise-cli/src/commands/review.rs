//! Review command - review a single pull request through the queue

use std::sync::Arc;

use clap::Args;
use prometheus::Registry;
use pullwise_core::metrics::{MetricsSink, PrometheusMetrics};
use pullwise_core::{ChannelQueue, Config, Orchestrator, PoolSummary, ReviewEvent, WorkerPool};
use pullwise_github::parse_github_url;

use crate::providers;

/// Arguments for the review command
#[derive(Args, Debug)]
pub struct ReviewArgs {
    /// Repository owner (optional when --repo is owner/repo or a URL)
    #[arg(long)]
    pub owner: Option<String>,

    /// Repository name, owner/repo, or GitHub URL
    #[arg(long)]
    pub repo: String,

    /// Pull request number
    #[arg(short, long)]
    pub number: u64,

    /// Head branch of the pull request
    #[arg(short, long)]
    pub branch: String,

    /// Clone URL (defaults to https://github.com/<owner>/<repo>.git)
    #[arg(long)]
    pub clone_url: Option<String>,

    /// Diff URL (defaults to the pull request's .diff URL)
    #[arg(long)]
    pub diff_url: Option<String>,
}

impl ReviewArgs {
    /// Execute the review command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let event = self.event()?;
        println!("Reviewing {} (branch {})", event, event.branch);

        let orchestrator = Arc::new(providers::build_orchestrator(config).await?);
        let metrics = Arc::new(PrometheusMetrics::new(&Registry::new())?);

        let summary = review_once(orchestrator, metrics, &event).await?;
        if summary.succeeded == 0 {
            anyhow::bail!("Review of {} failed; see the log for details", event);
        }

        println!("Review posted to {}", event);
        Ok(())
    }

    /// The event this invocation describes
    pub fn event(&self) -> anyhow::Result<ReviewEvent> {
        let (owner, repo) = match &self.owner {
            Some(owner) => (owner.clone(), self.repo.clone()),
            None => parse_github_url(&self.repo)?,
        };

        let mut event = ReviewEvent::github(owner, repo, self.number, &self.branch);
        if let Some(url) = &self.clone_url {
            event.clone_url = url.clone();
        }
        if let Some(url) = &self.diff_url {
            event.diff_url = url.clone();
        }
        Ok(event)
    }
}

/// Enqueue one event and run a single worker until the queue drains
pub async fn review_once(
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<dyn MetricsSink>,
    event: &ReviewEvent,
) -> anyhow::Result<PoolSummary> {
    let queue = Arc::new(ChannelQueue::new(1));
    queue.publish_event(event).await?;
    queue.close();

    Ok(WorkerPool::new(queue, orchestrator, metrics, 1).run().await)
}
