//! Prometheus-backed [`MetricsSink`].
//!
//! Metric families are created lazily on first use; the label names are
//! fixed by the first observation of a given metric name. Observations
//! whose label set disagrees with the registered family are dropped and
//! logged instead of panicking.

use std::collections::HashMap;
use std::sync::RwLock;

use prometheus::{
    CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

use crate::{LATENCY_BUCKETS, MetricsSink, ObservabilityError};

#[derive(Debug, Default)]
struct Families {
    histograms: HashMap<String, HistogramVec>,
    counters: HashMap<String, CounterVec>,
    gauges: HashMap<String, GaugeVec>,
}

/// Metrics sink writing into a dedicated Prometheus [`Registry`]
#[derive(Debug)]
pub struct PrometheusSink {
    registry: Registry,
    families: RwLock<Families>,
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusSink {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Self {
        Self {
            registry,
            families: RwLock::new(Families::default()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all families in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, ObservabilityError> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(|e| ObservabilityError::MetricsInit(e.to_string()))
    }

    fn histogram(&self, name: &str, label_names: &[&str]) -> Option<HistogramVec> {
        if let Ok(families) = self.families.read()
            && let Some(existing) = families.histograms.get(name)
        {
            return Some(existing.clone());
        }

        let mut families = self.families.write().ok()?;
        if let Some(existing) = families.histograms.get(name) {
            return Some(existing.clone());
        }
        let histogram = HistogramVec::new(
            HistogramOpts::new(name, format!("{name} distribution"))
                .buckets(LATENCY_BUCKETS.to_vec()),
            label_names,
        )
        .and_then(|h| self.registry.register(Box::new(h.clone())).map(|_| h));
        match histogram {
            Ok(h) => {
                families.histograms.insert(name.to_string(), h.clone());
                Some(h)
            }
            Err(e) => {
                log_registration_failure(name, &e);
                None
            }
        }
    }

    fn counter(&self, name: &str, label_names: &[&str]) -> Option<CounterVec> {
        if let Ok(families) = self.families.read()
            && let Some(existing) = families.counters.get(name)
        {
            return Some(existing.clone());
        }

        let mut families = self.families.write().ok()?;
        if let Some(existing) = families.counters.get(name) {
            return Some(existing.clone());
        }
        let counter = CounterVec::new(Opts::new(name, format!("{name} counter")), label_names)
            .and_then(|c| self.registry.register(Box::new(c.clone())).map(|_| c));
        match counter {
            Ok(c) => {
                families.counters.insert(name.to_string(), c.clone());
                Some(c)
            }
            Err(e) => {
                log_registration_failure(name, &e);
                None
            }
        }
    }

    fn gauge(&self, name: &str, label_names: &[&str]) -> Option<GaugeVec> {
        if let Ok(families) = self.families.read()
            && let Some(existing) = families.gauges.get(name)
        {
            return Some(existing.clone());
        }

        let mut families = self.families.write().ok()?;
        if let Some(existing) = families.gauges.get(name) {
            return Some(existing.clone());
        }
        let gauge = GaugeVec::new(Opts::new(name, format!("{name} gauge")), label_names)
            .and_then(|g| self.registry.register(Box::new(g.clone())).map(|_| g));
        match gauge {
            Ok(g) => {
                families.gauges.insert(name.to_string(), g.clone());
                Some(g)
            }
            Err(e) => {
                log_registration_failure(name, &e);
                None
            }
        }
    }
}

fn split_labels<'a>(labels: &[(&'a str, &'a str)]) -> (Vec<&'a str>, Vec<&'a str>) {
    labels.iter().copied().unzip()
}

fn log_registration_failure(name: &str, error: &prometheus::Error) {
    #[cfg(feature = "tracing")]
    tracing::warn!(metric = name, error = %error, "Failed to register metric family");
    #[cfg(not(feature = "tracing"))]
    let _ = (name, error);
}

fn log_label_mismatch(name: &str, error: &prometheus::Error) {
    #[cfg(feature = "tracing")]
    tracing::debug!(metric = name, error = %error, "Dropping observation with mismatched labels");
    #[cfg(not(feature = "tracing"))]
    let _ = (name, error);
}

impl MetricsSink for PrometheusSink {
    fn observe(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let (keys, values) = split_labels(labels);
        if let Some(histogram) = self.histogram(name, &keys) {
            match histogram.get_metric_with_label_values(&values) {
                Ok(h) => h.observe(value),
                Err(e) => log_label_mismatch(name, &e),
            }
        }
    }

    fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        let (keys, values) = split_labels(labels);
        if let Some(counter) = self.counter(name, &keys) {
            match counter.get_metric_with_label_values(&values) {
                Ok(c) => c.inc(),
                Err(e) => log_label_mismatch(name, &e),
            }
        }
    }

    fn set_gauge(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        let (keys, values) = split_labels(labels);
        if let Some(gauge) = self.gauge(name, &keys) {
            match gauge.get_metric_with_label_values(&values) {
                Ok(g) => g.set(value),
                Err(e) => log_label_mismatch(name, &e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{POOL_ACQUIRE_SECONDS, POOL_EXHAUSTIONS_TOTAL, POOL_HEALTHY};

    #[test]
    fn test_prometheus_sink_renders_families() {
        let sink = PrometheusSink::new();
        sink.observe(POOL_ACQUIRE_SECONDS, 0.02, &[("pool", "database")]);
        sink.observe(POOL_ACQUIRE_SECONDS, 0.04, &[("pool", "database")]);
        sink.increment(POOL_EXHAUSTIONS_TOTAL, &[("pool", "cache")]);
        sink.set_gauge(POOL_HEALTHY, 1.0, &[("pool", "http")]);

        let text = sink.render().unwrap();
        assert!(text.contains("reservoir_pool_acquire_seconds_count{pool=\"database\"} 2"));
        assert!(text.contains("reservoir_pool_exhaustions_total{pool=\"cache\"} 1"));
        assert!(text.contains("reservoir_pool_healthy{pool=\"http\"} 1"));
    }

    #[test]
    fn test_mismatched_labels_are_dropped() {
        let sink = PrometheusSink::new();
        sink.increment(POOL_EXHAUSTIONS_TOTAL, &[("pool", "cache")]);
        sink.increment(POOL_EXHAUSTIONS_TOTAL, &[("pool", "cache"), ("extra", "x")]);

        let text = sink.render().unwrap();
        assert!(text.contains("reservoir_pool_exhaustions_total{pool=\"cache\"} 1"));
    }
}
