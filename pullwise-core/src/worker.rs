//! Worker pool consuming review events from a message source
//!
//! Workers compete on one [`MessageSource`]. A message is committed only when
//! its review succeeds. A failed review is released for redelivery and a
//! malformed message is released without it; neither is committed. One failed
//! event never stops a worker.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::metrics::{CounterMetric, HistogramMetric, MetricsRecorder, MetricsSink};
use crate::models::{ProcessingOutcome, ReviewEvent, Status};
use crate::pipeline::Orchestrator;
use crate::queue::{MessageSource, QueueMessage};

/// Counts reported when the pool stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolSummary {
    /// Messages that went through the pipeline
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Malformed messages dropped without commit
    pub dropped: u64,
}

impl PoolSummary {
    fn merge(&mut self, other: PoolSummary) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.dropped += other.dropped;
    }
}

/// A fixed number of workers feeding the orchestrator
pub struct WorkerPool {
    source: Arc<dyn MessageSource>,
    orchestrator: Arc<Orchestrator>,
    metrics: Arc<dyn MetricsSink>,
    workers: usize,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        source: Arc<dyn MessageSource>,
        orchestrator: Arc<Orchestrator>,
        metrics: Arc<dyn MetricsSink>,
        workers: usize,
    ) -> Self {
        Self {
            source,
            orchestrator,
            metrics,
            workers: workers.max(1),
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an externally owned shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Token that stops workers from taking new messages
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Run until the source is exhausted or shutdown is requested
    ///
    /// Returns after every worker and the metrics recorder have stopped.
    pub async fn run(self) -> PoolSummary {
        let (recorder, recorder_task) = MetricsRecorder::spawn(self.metrics.clone());
        info!(workers = self.workers, "Starting worker pool");

        let mut set = JoinSet::new();
        for id in 0..self.workers {
            let worker = Worker {
                id,
                source: self.source.clone(),
                orchestrator: self.orchestrator.clone(),
                recorder: recorder.clone(),
                shutdown: self.shutdown.clone(),
            };
            set.spawn(worker.run().instrument(info_span!("worker", id)));
        }
        drop(recorder);

        let mut summary = PoolSummary::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(worker_summary) => summary.merge(worker_summary),
                Err(e) => error!(error = %e, "Worker task failed"),
            }
        }

        if let Err(e) = recorder_task.await {
            error!(error = %e, "Metrics recorder failed");
        }

        info!(
            processed = summary.processed,
            succeeded = summary.succeeded,
            failed = summary.failed,
            dropped = summary.dropped,
            "Worker pool stopped"
        );
        summary
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .finish_non_exhaustive()
    }
}

struct Worker {
    id: usize,
    source: Arc<dyn MessageSource>,
    orchestrator: Arc<Orchestrator>,
    recorder: MetricsRecorder,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) -> PoolSummary {
        let mut summary = PoolSummary::default();

        loop {
            let message = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    debug!(worker = self.id, "Shutdown requested");
                    break;
                }
                message = self.source.recv() => message,
            };
            let Some(message) = message else {
                debug!(worker = self.id, "Message source exhausted");
                break;
            };

            let event = match ReviewEvent::from_json(&message.payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!(id = message.id, error = %e, "Dropping malformed message");
                    self.recorder.increment(CounterMetric::QueueConsume, Status::Failure);
                    summary.dropped += 1;
                    self.release(&message, false).await;
                    continue;
                }
            };
            self.recorder.increment(CounterMetric::QueueConsume, Status::Success);

            let outcome = self.process(event).await;
            summary.processed += 1;
            if outcome.is_success() {
                summary.succeeded += 1;
                self.commit(&message).await;
            } else {
                summary.failed += 1;
                self.release(&message, true).await;
            }
        }

        summary
    }

    async fn process(&self, event: ReviewEvent) -> ProcessingOutcome {
        let started = Instant::now();
        let result = self.orchestrator.process(&event).await;
        let outcome = ProcessingOutcome::from_result(event, &result, started.elapsed());

        self.recorder.increment(CounterMetric::EventProcess, outcome.status);
        self.recorder.observe(
            HistogramMetric::EventProcessLatency,
            outcome.status,
            outcome.elapsed.as_secs_f64(),
        );

        if let Some(error) = &outcome.error {
            if outcome.user_facing {
                warn!(event = %outcome.event, "{}", error);
            } else {
                error!(event = %outcome.event, stage = ?outcome.stage, error = %error, "Event processing failed");
            }
        }
        outcome
    }

    async fn commit(&self, message: &QueueMessage) {
        if let Err(e) = self.source.commit(message).await {
            error!(id = message.id, error = %e, "Failed to commit message");
        }
    }

    async fn release(&self, message: &QueueMessage, redeliver: bool) {
        if let Err(e) = self.source.release(message, redeliver).await {
            error!(id = message.id, error = %e, "Failed to release message");
        }
    }
}
