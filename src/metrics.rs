//! Prometheus metrics for the job runtime.
//!
//! The executor feeds every [`JobEvent`] into the collector and the dispatcher
//! refreshes the per-queue depth gauges once per tick. Exposition is left to
//! the embedding application: [`PrometheusMetricsCollector::get_metrics_text`]
//! renders the text format for whatever HTTP surface it already has.

use crate::{
    Result, TaskhiveError,
    stats::{JobEvent, JobEventType, QueueStats},
};
use prometheus::{CounterVec, Encoder, GaugeVec, HistogramVec, Registry, TextEncoder};

/// Configuration for metrics collection
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Prefix for every metric name
    pub namespace: String,
    /// Histogram buckets for job durations, in seconds
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            namespace: "taskhive".to_string(),
            duration_buckets: vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
        }
    }
}

impl MetricsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }
}

/// Prometheus metrics collector for job queue metrics
pub struct PrometheusMetricsCollector {
    registry: Registry,
    jobs_total: CounterVec,
    jobs_duration: HistogramVec,
    jobs_failed_total: CounterVec,
    queue_depth: GaugeVec,
}

fn metrics_error(what: &str, e: prometheus::Error) -> TaskhiveError {
    TaskhiveError::Metrics {
        message: format!("Failed to {}: {}", what, e),
    }
}

impl PrometheusMetricsCollector {
    pub fn new(config: MetricsConfig) -> Result<Self> {
        let registry = Registry::new();
        let ns = &config.namespace;

        let jobs_total = CounterVec::new(
            prometheus::Opts::new(
                format!("{}_jobs_total", ns),
                "Total number of job lifecycle events",
            ),
            &["queue", "status"],
        )
        .map_err(|e| metrics_error("create jobs_total metric", e))?;

        let jobs_duration = HistogramVec::new(
            prometheus::HistogramOpts::new(
                format!("{}_job_duration_seconds", ns),
                "Job processing duration in seconds",
            )
            .buckets(config.duration_buckets.clone()),
            &["queue"],
        )
        .map_err(|e| metrics_error("create job_duration metric", e))?;

        let jobs_failed_total = CounterVec::new(
            prometheus::Opts::new(
                format!("{}_jobs_failed_total", ns),
                "Total number of failed job executions",
            ),
            &["queue", "error_type"],
        )
        .map_err(|e| metrics_error("create jobs_failed_total metric", e))?;

        let queue_depth = GaugeVec::new(
            prometheus::Opts::new(
                format!("{}_queue_depth", ns),
                "Current number of jobs per queue and state",
            ),
            &["queue", "state"],
        )
        .map_err(|e| metrics_error("create queue_depth metric", e))?;

        registry
            .register(Box::new(jobs_total.clone()))
            .map_err(|e| metrics_error("register jobs_total", e))?;
        registry
            .register(Box::new(jobs_duration.clone()))
            .map_err(|e| metrics_error("register job_duration", e))?;
        registry
            .register(Box::new(jobs_failed_total.clone()))
            .map_err(|e| metrics_error("register jobs_failed_total", e))?;
        registry
            .register(Box::new(queue_depth.clone()))
            .map_err(|e| metrics_error("register queue_depth", e))?;

        Ok(Self {
            registry,
            jobs_total,
            jobs_duration,
            jobs_failed_total,
            queue_depth,
        })
    }

    /// Record a job event as metrics
    pub fn record_job_event(&self, event: &JobEvent) {
        let queue = event.queue_name.as_str();

        self.jobs_total
            .with_label_values(&[queue, event.event_type.as_str()])
            .inc();

        match event.event_type {
            JobEventType::Completed => {
                if let Some(duration_ms) = event.processing_time_ms {
                    self.jobs_duration
                        .with_label_values(&[queue])
                        .observe(duration_ms as f64 / 1000.0);
                }
            }
            JobEventType::Retried | JobEventType::Failed => {
                let error_type = if event.timed_out {
                    "timeout"
                } else if event.event_type == JobEventType::Failed {
                    "exhausted"
                } else {
                    "processor"
                };
                self.jobs_failed_total
                    .with_label_values(&[queue, error_type])
                    .inc();
            }
            JobEventType::Started => {}
        }
    }

    /// Update the depth gauges of one queue.
    pub fn update_queue_depth(&self, stats: &QueueStats) {
        let queue = stats.queue_name.as_str();
        for (state, value) in [
            ("waiting", stats.waiting),
            ("active", stats.active),
            ("delayed", stats.delayed),
            ("failed", stats.failed),
        ] {
            self.queue_depth
                .with_label_values(&[queue, state])
                .set(value as f64);
        }
    }

    /// Get metrics as Prometheus text format
    pub fn get_metrics_text(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| metrics_error("encode metrics", e))?;

        String::from_utf8(buffer).map_err(|e| TaskhiveError::Metrics {
            message: format!("Failed to convert metrics to string: {}", e),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
