//! Processing metrics
//!
//! Workers never touch the registry directly. They push observations through a
//! [`MetricsRecorder`] handle onto an unbounded channel, and a single recorder
//! task applies them to the [`MetricsSink`].

use std::sync::Arc;

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry, Encoder,
    HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::models::Status;
use crate::Result;

/// Counters emitted by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterMetric {
    /// `event_process_total{status}`
    EventProcess,
    /// `queue_consume_total{status}`
    QueueConsume,
}

/// Histograms emitted by the consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistogramMetric {
    /// `event_process_latency_seconds{status}`
    EventProcessLatency,
}

/// Destination for processing metrics
pub trait MetricsSink: Send + Sync {
    fn increment(&self, counter: CounterMetric, status: Status);
    fn observe(&self, histogram: HistogramMetric, status: Status, seconds: f64);
}

/// Prometheus-backed sink registered on an explicit registry
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    events: IntCounterVec,
    consumed: IntCounterVec,
    latency: HistogramVec,
}

impl PrometheusMetrics {
    /// Register the pipeline metrics on `registry`
    pub fn new(registry: &Registry) -> Result<Self> {
        Ok(Self {
            registry: registry.clone(),
            events: register_int_counter_vec_with_registry!(
                Opts::new("event_process_total", "Processed review events by outcome"),
                &["status"],
                registry
            )?,
            consumed: register_int_counter_vec_with_registry!(
                Opts::new("queue_consume_total", "Messages taken from the queue by outcome"),
                &["status"],
                registry
            )?,
            latency: register_histogram_vec_with_registry!(
                HistogramOpts::new(
                    "event_process_latency_seconds",
                    "End-to-end review latency by outcome"
                )
                .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 180.0, 300.0]),
                &["status"],
                registry
            )?,
        })
    }

    /// Current value of a counter
    pub fn counter(&self, counter: CounterMetric, status: Status) -> u64 {
        self.counter_vec(counter)
            .with_label_values(&[status.as_str()])
            .get()
    }

    /// Number of latency observations recorded
    pub fn latency_count(&self, status: Status) -> u64 {
        self.latency.with_label_values(&[status.as_str()]).get_sample_count()
    }

    /// Prometheus text exposition of the whole registry
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    fn counter_vec(&self, counter: CounterMetric) -> &IntCounterVec {
        match counter {
            CounterMetric::EventProcess => &self.events,
            CounterMetric::QueueConsume => &self.consumed,
        }
    }
}

impl MetricsSink for PrometheusMetrics {
    fn increment(&self, counter: CounterMetric, status: Status) {
        self.counter_vec(counter)
            .with_label_values(&[status.as_str()])
            .inc();
    }

    fn observe(&self, histogram: HistogramMetric, status: Status, seconds: f64) {
        match histogram {
            HistogramMetric::EventProcessLatency => self
                .latency
                .with_label_values(&[status.as_str()])
                .observe(seconds),
        }
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Observation {
    Increment(CounterMetric, Status),
    Observe(HistogramMetric, Status, f64),
}

/// Cloneable, non-blocking handle feeding the recorder task
#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    tx: mpsc::UnboundedSender<Observation>,
}

impl MetricsRecorder {
    /// Spawn the recorder task; it ends once every handle is dropped
    ///
    /// The join handle resolves to the number of observations applied.
    pub fn spawn(sink: Arc<dyn MetricsSink>) -> (Self, JoinHandle<u64>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(async move {
            let mut applied = 0u64;
            while let Some(observation) = rx.recv().await {
                match observation {
                    Observation::Increment(counter, status) => sink.increment(counter, status),
                    Observation::Observe(histogram, status, seconds) => {
                        sink.observe(histogram, status, seconds)
                    }
                }
                applied += 1;
            }
            debug!(applied, "Metrics recorder stopped");
            applied
        });
        (Self { tx }, task)
    }

    pub fn increment(&self, counter: CounterMetric, status: Status) {
        self.send(Observation::Increment(counter, status));
    }

    pub fn observe(&self, histogram: HistogramMetric, status: Status, seconds: f64) {
        self.send(Observation::Observe(histogram, status, seconds));
    }

    fn send(&self, observation: Observation) {
        if self.tx.send(observation).is_err() {
            debug!(?observation, "Metrics recorder gone, dropping observation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_counters_and_render() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry).unwrap();

        metrics.increment(CounterMetric::EventProcess, Status::Success);
        metrics.increment(CounterMetric::EventProcess, Status::Failure);
        metrics.increment(CounterMetric::EventProcess, Status::Failure);
        metrics.observe(HistogramMetric::EventProcessLatency, Status::Success, 2.5);

        assert_eq!(metrics.counter(CounterMetric::EventProcess, Status::Failure), 2);
        assert_eq!(metrics.latency_count(Status::Success), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("event_process_total{status=\"failure\"} 2"));
        assert!(text.contains("event_process_latency_seconds_count{status=\"success\"} 1"));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        PrometheusMetrics::new(&registry).unwrap();
        assert!(PrometheusMetrics::new(&registry).is_err());
    }

    #[tokio::test]
    async fn test_recorder_applies_then_stops() {
        let registry = Registry::new();
        let metrics = PrometheusMetrics::new(&registry).unwrap();
        let (recorder, task) = MetricsRecorder::spawn(Arc::new(metrics.clone()));

        let worker = recorder.clone();
        worker.increment(CounterMetric::QueueConsume, Status::Success);
        worker.observe(HistogramMetric::EventProcessLatency, Status::Failure, 0.1);
        drop(worker);
        drop(recorder);

        assert_eq!(task.await.unwrap(), 2);
        assert_eq!(metrics.counter(CounterMetric::QueueConsume, Status::Success), 1);
        assert_eq!(metrics.latency_count(Status::Failure), 1);
    }
}
