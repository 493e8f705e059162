//! Reservoir Observability
//!
//! Metrics sinks fed by pools and the health service, plus structured
//! tracing setup. Pools and probes only depend on the [`MetricsSink`]
//! capability ("record a numeric observation with labels"); whether that
//! ends up in Prometheus, in memory for tests, or nowhere is decided by
//! the embedding application.

use std::fmt::Debug;
use std::sync::{Arc, Mutex};

#[cfg(feature = "metrics")]
pub mod metrics;

#[cfg(feature = "tracing")]
pub mod trace;

#[cfg(feature = "metrics")]
pub use metrics::PrometheusSink;

#[cfg(feature = "tracing")]
pub use trace::init_tracing;

/// Histogram of connection acquisition wait, labelled by `pool`
pub const POOL_ACQUIRE_SECONDS: &str = "reservoir_pool_acquire_seconds";
/// Counter of acquisitions that timed out, labelled by `pool`
pub const POOL_EXHAUSTIONS_TOTAL: &str = "reservoir_pool_exhaustions_total";
/// Counter of failed connection creations and probes, labelled by `pool`
pub const POOL_CONNECTION_ERRORS_TOTAL: &str = "reservoir_pool_connection_errors_total";
/// Gauge set to 1 when the last pool probe succeeded, labelled by `pool`
pub const POOL_HEALTHY: &str = "reservoir_pool_healthy";
/// Histogram of a single component probe, labelled by `component` and `status`
pub const HEALTH_CHECK_SECONDS: &str = "reservoir_health_check_seconds";
/// Histogram of a full health cycle, labelled by `status`
pub const HEALTH_CYCLE_SECONDS: &str = "reservoir_health_cycle_seconds";

/// Standard latency buckets, from 5ms up to 10s
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, // 5ms
    0.01,  // 10ms
    0.02,  // 20ms
    0.05,  // 50ms
    0.1,   // 100ms
    0.2,   // 200ms
    0.5,   // 500ms
    1.0,   // 1s
    2.5,   // 2.5s
    5.0,   // 5s
    10.0,  // 10s
];

/// Destination for numeric observations.
///
/// Implementations must never panic or block: sinks are called from
/// connection release paths and from inside health probes.
pub trait MetricsSink: Send + Sync + Debug {
    /// Record a sample into a distribution (latency, size, ...).
    fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]);

    /// Increment a monotonic counter by one.
    fn increment(&self, name: &str, labels: &[(&str, &str)]);

    /// Set a gauge to an absolute value.
    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]);
}

/// Sink that drops every observation
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn observe(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
    fn increment(&self, _name: &str, _labels: &[(&str, &str)]) {}
    fn set_gauge(&self, _name: &str, _value: f64, _labels: &[(&str, &str)]) {}
}

/// Shared no-op sink, the default for pools and services
pub fn noop_sink() -> Arc<dyn MetricsSink> {
    Arc::new(NoopSink)
}

/// What kind of call produced a [`RecordedMetric`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Observation,
    Counter,
    Gauge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMetric {
    pub kind: MetricKind,
    pub name: String,
    pub value: f64,
    pub labels: Vec<(String, String)>,
}

impl RecordedMetric {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// Sink that keeps every observation in memory, for assertions in tests
/// and for embedding applications that export metrics themselves.
#[derive(Debug, Default)]
pub struct InMemorySink {
    records: Mutex<Vec<RecordedMetric>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<RecordedMetric> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    /// All records with the given metric name
    pub fn named(&self, name: &str) -> Vec<RecordedMetric> {
        self.records()
            .into_iter()
            .filter(|r| r.name == name)
            .collect()
    }

    fn push(&self, kind: MetricKind, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Ok(mut records) = self.records.lock() {
            records.push(RecordedMetric {
                kind,
                name: name.to_string(),
                value,
                labels: labels
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
        }
    }
}

impl MetricsSink for InMemorySink {
    fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.push(MetricKind::Observation, name, value, labels);
    }

    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        self.push(MetricKind::Counter, name, 1.0, labels);
    }

    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        self.push(MetricKind::Gauge, name, value, labels);
    }
}

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Observability configuration
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Filter directive used when `RUST_LOG` is not set
    pub default_filter: String,
    pub log_format: LogFormat,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            default_filter: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

/// Observability initialization errors
#[derive(thiserror::Error, Debug)]
pub enum ObservabilityError {
    #[error("Metrics initialization failed: {0}")]
    MetricsInit(String),

    #[error("Tracing initialization failed: {0}")]
    TracingInit(String),
}
