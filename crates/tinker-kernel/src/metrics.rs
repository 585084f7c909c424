//! Metrics sink.
//!
//! Capability modules report additive measurements -- counts and sizes --
//! through a [`MetricsObserver`].  Observers must tolerate reports from many
//! threads in any order; nothing here implies ordering across modules.

use std::fmt;

use dashmap::DashMap;

/// Whether a metric counts occurrences or aggregates a measured value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Event,
}

/// A named metric with a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Metric {
    pub name: &'static str,
    pub unit: &'static str,
    pub kind: MetricKind,
}

impl Metric {
    pub const fn counter(name: &'static str) -> Self {
        Self {
            name,
            unit: "count",
            kind: MetricKind::Counter,
        }
    }

    pub const fn event(name: &'static str, unit: &'static str) -> Self {
        Self {
            name,
            unit,
            kind: MetricKind::Event,
        }
    }

    pub const HTTP_REQUESTS: Metric = Metric::counter("http_requests");
    pub const HTTP_UPLOAD: Metric = Metric::event("http_upload", "bytes");
    pub const HTTP_DOWNLOAD: Metric = Metric::event("http_download", "bytes");
    pub const WEBSOCKET_INCOMING: Metric = Metric::event("websocket_incoming", "bytes");
    pub const WEBSOCKET_OUTGOING: Metric = Metric::event("websocket_outgoing", "bytes");
    pub const COROUTINES_CREATED: Metric = Metric::counter("coroutines_created");
    pub const COROUTINES_DISPOSED: Metric = Metric::counter("coroutines_dispose");
    pub const MAIN_THREAD_TASKS: Metric = Metric::counter("main_thread_tasks");
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.unit)
    }
}

/// A write-only sink for metrics.
pub trait MetricsObserver: Send + Sync {
    /// Increment a counter by one.
    fn observe(&self, counter: Metric);

    /// Record one measurement of an event metric.
    fn observe_value(&self, metric: Metric, value: u64);
}

/// Drops every measurement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsObserver for NoopMetrics {
    fn observe(&self, _counter: Metric) {}

    fn observe_value(&self, _metric: Metric, _value: u64) {}
}

/// Aggregated totals for one metric.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MetricTotals {
    /// Number of observations.
    pub count: u64,
    /// Sum of observed values (equal to `count` for counters).
    pub total: u64,
}

/// In-memory observer backed by [`DashMap`].
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    totals: DashMap<&'static str, MetricTotals>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Totals recorded for `metric` so far.
    pub fn get(&self, metric: Metric) -> MetricTotals {
        self.totals
            .get(metric.name)
            .map(|e| *e.value())
            .unwrap_or_default()
    }

    /// Snapshot of all recorded metrics, sorted by name.
    pub fn snapshot(&self) -> Vec<(&'static str, MetricTotals)> {
        let mut all: Vec<_> = self.totals.iter().map(|e| (*e.key(), *e.value())).collect();
        all.sort_by_key(|(name, _)| *name);
        all
    }
}

impl MetricsObserver for MetricsRecorder {
    fn observe(&self, counter: Metric) {
        self.observe_value(counter, 1);
    }

    fn observe_value(&self, metric: Metric, value: u64) {
        let mut entry = self.totals.entry(metric.name).or_default();
        entry.count = entry.count.saturating_add(1);
        entry.total = entry.total.saturating_add(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_and_event_totals() {
        let recorder = MetricsRecorder::new();
        recorder.observe(Metric::HTTP_REQUESTS);
        recorder.observe(Metric::HTTP_REQUESTS);
        recorder.observe_value(Metric::HTTP_DOWNLOAD, 100);
        recorder.observe_value(Metric::HTTP_DOWNLOAD, 23);

        assert_eq!(
            recorder.get(Metric::HTTP_REQUESTS),
            MetricTotals { count: 2, total: 2 }
        );
        assert_eq!(
            recorder.get(Metric::HTTP_DOWNLOAD),
            MetricTotals {
                count: 2,
                total: 123
            }
        );
        assert_eq!(recorder.get(Metric::HTTP_UPLOAD), MetricTotals::default());
    }

    #[test]
    fn snapshot_is_sorted() {
        let recorder = MetricsRecorder::new();
        recorder.observe(Metric::MAIN_THREAD_TASKS);
        recorder.observe(Metric::HTTP_REQUESTS);
        let names: Vec<_> = recorder.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["http_requests", "main_thread_tasks"]);
    }

    #[test]
    fn metric_display() {
        assert_eq!(Metric::HTTP_UPLOAD.to_string(), "http_upload (bytes)");
    }
}
