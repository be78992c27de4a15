//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges the transfer pipeline reports on.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{MetricStep, Result, TelemetryError};

/// Prometheus-backed metrics registry shared across the pipeline.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    jobs_submitted_total: IntCounterVec,
    jobs_finished_total: IntCounterVec,
    job_retries_total: IntCounter,
    jobs_running: IntGauge,
    jobs_queued: IntGauge,
    bus_reconnects_total: IntCounter,
    labels_published_total: IntCounterVec,
}

/// Snapshot of selected gauges and counters for shutdown reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Jobs currently executing.
    pub jobs_running: i64,
    /// Jobs waiting for a worker slot.
    pub jobs_queued: i64,
    /// Jobs that finished successfully.
    pub jobs_succeeded_total: u64,
    /// Jobs that finished in the failed state.
    pub jobs_failed_total: u64,
    /// Retries scheduled after transient failures.
    pub job_retries_total: u64,
    /// Reconnections performed by the bus client.
    pub bus_reconnects_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let jobs_submitted_total = IntCounterVec::new(
            Opts::new(
                "q4d_jobs_submitted_total",
                "Job submissions by admission outcome",
            ),
            &["outcome"],
        )
        .map_err(|source| collector("q4d_jobs_submitted_total", source))?;
        let jobs_finished_total = IntCounterVec::new(
            Opts::new("q4d_jobs_finished_total", "Jobs reaching a terminal status"),
            &["status"],
        )
        .map_err(|source| collector("q4d_jobs_finished_total", source))?;
        let job_retries_total = IntCounter::with_opts(Opts::new(
            "q4d_job_retries_total",
            "Resubmissions after transient transfer failures",
        ))
        .map_err(|source| collector("q4d_job_retries_total", source))?;
        let jobs_running =
            IntGauge::with_opts(Opts::new("q4d_jobs_running", "Jobs currently transferring"))
                .map_err(|source| collector("q4d_jobs_running", source))?;
        let jobs_queued = IntGauge::with_opts(Opts::new(
            "q4d_jobs_queued",
            "Jobs waiting for a worker slot",
        ))
        .map_err(|source| collector("q4d_jobs_queued", source))?;
        let bus_reconnects_total = IntCounter::with_opts(Opts::new(
            "q4d_bus_reconnects_total",
            "Bus sessions re-established after a transport loss",
        ))
        .map_err(|source| collector("q4d_bus_reconnects_total", source))?;
        let labels_published_total = IntCounterVec::new(
            Opts::new("q4d_labels_published_total", "Label notifications published"),
            &["label"],
        )
        .map_err(|source| collector("q4d_labels_published_total", source))?;

        register(&registry, "q4d_jobs_submitted_total", &jobs_submitted_total)?;
        register(&registry, "q4d_jobs_finished_total", &jobs_finished_total)?;
        register(&registry, "q4d_job_retries_total", &job_retries_total)?;
        register(&registry, "q4d_jobs_running", &jobs_running)?;
        register(&registry, "q4d_jobs_queued", &jobs_queued)?;
        register(&registry, "q4d_bus_reconnects_total", &bus_reconnects_total)?;
        register(
            &registry,
            "q4d_labels_published_total",
            &labels_published_total,
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                jobs_submitted_total,
                jobs_finished_total,
                job_retries_total,
                jobs_running,
                jobs_queued,
                bus_reconnects_total,
                labels_published_total,
            }),
        })
    }

    /// Count a submission attempt by its admission outcome.
    pub fn inc_job_submitted(&self, outcome: &str) {
        self.inner
            .jobs_submitted_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Count a job reaching a terminal status.
    pub fn inc_job_finished(&self, status: &str) {
        self.inner
            .jobs_finished_total
            .with_label_values(&[status])
            .inc();
    }

    /// Count a retry resubmission.
    pub fn inc_job_retry(&self) {
        self.inner.job_retries_total.inc();
    }

    /// Set the running-jobs gauge.
    pub fn set_jobs_running(&self, count: usize) {
        self.inner.jobs_running.set(to_gauge(count));
    }

    /// Set the queued-jobs gauge.
    pub fn set_jobs_queued(&self, count: usize) {
        self.inner.jobs_queued.set(to_gauge(count));
    }

    /// Count a completed bus reconnection.
    pub fn inc_bus_reconnect(&self) {
        self.inner.bus_reconnects_total.inc();
    }

    /// Count a label notification.
    pub fn inc_label_published(&self, label: &str) {
        self.inner
            .labels_published_total
            .with_label_values(&[label])
            .inc();
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|source| TelemetryError::Exposition { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::ExpositionText { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let finished = &self.inner.jobs_finished_total;
        MetricsSnapshot {
            jobs_running: self.inner.jobs_running.get(),
            jobs_queued: self.inner.jobs_queued.get(),
            jobs_succeeded_total: finished.with_label_values(&["succeeded"]).get(),
            jobs_failed_total: finished.with_label_values(&["failed"]).get(),
            job_retries_total: self.inner.job_retries_total.get(),
            bus_reconnects_total: self.inner.bus_reconnects_total.get(),
        }
    }
}

const fn collector(name: &'static str, source: prometheus::Error) -> TelemetryError {
    TelemetryError::metric(name, MetricStep::Build, source)
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: prometheus::core::Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::metric(name, MetricStep::Register, source))
}

fn to_gauge(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_updates() -> Result<()> {
        let metrics = Metrics::new()?;
        metrics.inc_job_submitted("accepted");
        metrics.inc_job_submitted("duplicate");
        metrics.inc_job_finished("succeeded");
        metrics.inc_job_finished("failed");
        metrics.inc_job_finished("failed");
        metrics.inc_job_retry();
        metrics.set_jobs_running(2);
        metrics.set_jobs_queued(3);
        metrics.inc_bus_reconnect();
        metrics.inc_label_published("DONE");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.jobs_running, 2);
        assert_eq!(snapshot.jobs_queued, 3);
        assert_eq!(snapshot.jobs_succeeded_total, 1);
        assert_eq!(snapshot.jobs_failed_total, 2);
        assert_eq!(snapshot.job_retries_total, 1);
        assert_eq!(snapshot.bus_reconnects_total, 1);

        let rendered = metrics.render()?;
        assert!(rendered.contains("q4d_jobs_submitted_total"));
        assert!(rendered.contains("q4d_labels_published_total"));
        Ok(())
    }

    #[test]
    fn snapshot_serialises_to_json() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let metrics = Metrics::new()?;
        let value = serde_json::to_value(metrics.snapshot())?;
        assert_eq!(value["jobs_running"], 0);
        assert_eq!(value["bus_reconnects_total"], 0);
        Ok(())
    }

    #[test]
    fn gauge_conversion_saturates() {
        assert_eq!(to_gauge(usize::MAX), i64::MAX);
        assert_eq!(to_gauge(7), 7);
    }
}
