//! Prometheus metrics for work queues.

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, exponential_buckets,
};
use std::time::Duration;

/// Metrics recorded by a [`Queue`](crate::Queue).
///
/// Every metric carries a constant `name` label so several queues can share a registry.
#[derive(Debug, Clone)]
pub struct QueueMetrics {
    depth: IntGauge,
    adds: IntCounter,
    retries: IntCounter,
    work_duration: Histogram,
}

impl QueueMetrics {
    /// Creates the queue metrics and registers them with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric with the same name and labels is already registered.
    pub fn new(name: &str, registry: &Registry) -> Result<Self, prometheus::Error> {
        let depth = IntGauge::with_opts(
            Opts::new("workqueue_depth", "Current depth of the work queue").const_label("name", name),
        )?;
        let adds = IntCounter::with_opts(
            Opts::new("workqueue_adds_total", "Total number of adds handled by the work queue")
                .const_label("name", name),
        )?;
        let retries = IntCounter::with_opts(
            Opts::new("workqueue_retries_total", "Total number of rate-limited retries")
                .const_label("name", name),
        )?;
        let work_duration = Histogram::with_opts(
            HistogramOpts::new(
                "workqueue_work_duration_seconds",
                "Time between an item leaving the queue and being marked done",
            )
            .const_label("name", name)
            .buckets(exponential_buckets(0.000_01, 10.0, 10)?),
        )?;

        registry.register(Box::new(depth.clone()))?;
        registry.register(Box::new(adds.clone()))?;
        registry.register(Box::new(retries.clone()))?;
        registry.register(Box::new(work_duration.clone()))?;

        Ok(Self {
            depth,
            adds,
            retries,
            work_duration,
        })
    }

    pub(crate) fn set_depth(&self, depth: usize) {
        self.depth.set(i64::try_from(depth).unwrap_or(i64::MAX));
    }

    pub(crate) fn add(&self) {
        self.adds.inc();
    }

    pub(crate) fn retry(&self) {
        self.retries.inc();
    }

    pub(crate) fn observe_work(&self, elapsed: Duration) {
        self.work_duration.observe(elapsed.as_secs_f64());
    }
}
