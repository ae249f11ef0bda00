//! Consume command - run the worker pool over a stream of review events

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Args;
use prometheus::Registry;
use pullwise_core::metrics::PrometheusMetrics;
use pullwise_core::{ChannelQueue, Config, WorkerPool};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{metrics_server, providers};

/// Arguments for the consume command
#[derive(Args, Debug)]
pub struct ConsumeArgs {
    /// JSON-lines file of review events ("-" reads stdin)
    #[arg(short, long, default_value = "-")]
    pub events: PathBuf,

    /// Number of concurrent workers (overrides config and env)
    #[arg(short, long)]
    pub workers: Option<usize>,
}

impl ConsumeArgs {
    /// Execute the consume command
    pub async fn execute(&self, config: &Config) -> anyhow::Result<()> {
        let reader = self.open_events().await?;

        let registry = Registry::new();
        let metrics = Arc::new(PrometheusMetrics::new(&registry)?);
        let shutdown = CancellationToken::new();

        let server = match &config.metrics.address {
            Some(addr) => Some(metrics_server::spawn(addr, metrics.clone(), shutdown.clone()).await?),
            None => None,
        };

        let orchestrator = Arc::new(providers::build_orchestrator(config).await?);
        // Failed reviews are redelivered until they run out of deliveries
        let queue = Arc::new(
            ChannelQueue::new(config.worker.channel_capacity)
                .with_max_deliveries(config.worker.max_deliveries),
        );

        let feeder = tokio::spawn({
            let queue = queue.clone();
            async move {
                let result = feed_events(reader, &queue).await;
                queue.close();
                result
            }
        });

        let pool = WorkerPool::new(
            queue.clone(),
            orchestrator,
            metrics.clone(),
            config.worker.count,
        )
        .with_shutdown(shutdown.child_token());

        let pool_shutdown = pool.shutdown_token();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, finishing in-flight reviews");
                pool_shutdown.cancel();
            }
        });

        let summary = pool.run().await;
        interrupt.abort();
        feeder.abort();
        match feeder.await {
            Ok(Ok(published)) => debug!(published, "Event stream finished"),
            Ok(Err(e)) => warn!(error = %e, "Event stream failed"),
            Err(_) => debug!("Event stream reader stopped"),
        }

        shutdown.cancel();
        if let Some(server) = server {
            let _ = server.await;
        }

        println!(
            "Processed {} event(s): {} succeeded, {} failed, {} dropped",
            summary.processed, summary.succeeded, summary.failed, summary.dropped
        );
        let uncommitted = queue.pending().len();
        if uncommitted > 0 {
            println!(
                "{} message(s) left uncommitted after {} deliveries",
                uncommitted,
                queue.max_deliveries()
            );
        }
        let unread = queue.backlog();
        if unread > 0 {
            println!("{} message(s) not yet read at shutdown", unread);
        }

        Ok(())
    }

    async fn open_events(&self) -> anyhow::Result<Box<dyn AsyncBufRead + Send + Unpin>> {
        if self.events.as_os_str() == "-" {
            return Ok(Box::new(BufReader::new(tokio::io::stdin())));
        }

        let file = tokio::fs::File::open(&self.events)
            .await
            .with_context(|| format!("Failed to open events file {}", self.events.display()))?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Publish every non-blank line of `reader`; returns how many were queued
///
/// Lines are forwarded as-is so malformed events reach the workers, which
/// drop them without commit.
pub async fn feed_events<R>(reader: R, queue: &ChannelQueue) -> anyhow::Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut published = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        queue.publish(line.as_bytes()).await?;
        published += 1;
    }
    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pullwise_core::{MessageSource, ReviewEvent};

    #[tokio::test]
    async fn test_feed_events_skips_blank_lines() {
        let event = ReviewEvent::github("acme", "widget", 7, "fix-1");
        let input = format!(
            "{}\n\n   \nnot json\n",
            String::from_utf8(event.to_json().unwrap()).unwrap()
        );
        let queue = ChannelQueue::new(8);

        let published = feed_events(input.as_bytes(), &queue).await.unwrap();
        queue.close();
        assert_eq!(published, 2);

        let first = queue.recv().await.unwrap();
        assert_eq!(ReviewEvent::from_json(&first.payload).unwrap(), event);
        let second = queue.recv().await.unwrap();
        assert_eq!(second.payload, b"not json");
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_feed_events_into_closed_queue_fails() {
        let queue = ChannelQueue::new(8);
        queue.close();
        assert!(feed_events(&b"{}\n"[..], &queue).await.is_err());
    }
}
