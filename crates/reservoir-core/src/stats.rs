//! Runtime counters of a connection pool.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of acquisition wait samples kept for the rolling average
pub const WAIT_SAMPLE_CAPACITY: usize = 1000;

/// Point-in-time copy of a pool's counters.
///
/// Pools own the live instance and mutate it under their internal lock;
/// callers only ever receive clones, so editing a snapshot never leaks back
/// into the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub pool_name: String,
    pub active_connections: usize,
    pub idle_connections: usize,
    pub total_connections: usize,
    pub waiting_connections: usize,
    pub connection_errors: u64,
    pub connection_creations: u64,
    pub connection_closures: u64,
    pub pool_hits: u64,
    pub pool_misses: u64,
    pub pool_exhaustions: u64,
    pub peak_connections: usize,
    pub average_wait_time: Duration,
    pub last_health_check: Option<DateTime<Utc>>,
}

impl PoolStats {
    pub fn new(pool_name: impl Into<String>) -> Self {
        Self {
            pool_name: pool_name.into(),
            active_connections: 0,
            idle_connections: 0,
            total_connections: 0,
            waiting_connections: 0,
            connection_errors: 0,
            connection_creations: 0,
            connection_closures: 0,
            pool_hits: 0,
            pool_misses: 0,
            pool_exhaustions: 0,
            peak_connections: 0,
            average_wait_time: Duration::ZERO,
            last_health_check: None,
        }
    }

    /// Share of live connections that are checked out, in percent.
    ///
    /// Returns `None` when the pool holds no connections at all.
    pub fn usage_percent(&self) -> Option<f64> {
        if self.total_connections == 0 {
            None
        } else {
            Some(self.active_connections as f64 / self.total_connections as f64 * 100.0)
        }
    }

    /// Share of `max_size` that is checked out, in percent.
    pub fn capacity_percent(&self, max_size: usize) -> f64 {
        if max_size == 0 {
            0.0
        } else {
            self.active_connections as f64 / max_size as f64 * 100.0
        }
    }

    /// Fraction of successful acquisitions served from the idle set.
    pub fn hit_ratio(&self) -> f64 {
        let served = self.pool_hits + self.connection_creations;
        if served == 0 {
            0.0
        } else {
            self.pool_hits as f64 / served as f64
        }
    }

    pub fn record_peak(&mut self) {
        self.peak_connections = self.peak_connections.max(self.total_connections);
    }
}

/// Bounded rolling window of acquisition wait times
#[derive(Debug, Clone, Default)]
pub struct WaitSamples {
    samples: VecDeque<Duration>,
    sum: Duration,
}

impl WaitSamples {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sample, evicting the oldest past [`WAIT_SAMPLE_CAPACITY`],
    /// and return the new average.
    pub fn record(&mut self, wait: Duration) -> Duration {
        if self.samples.len() == WAIT_SAMPLE_CAPACITY
            && let Some(oldest) = self.samples.pop_front()
        {
            self.sum = self.sum.saturating_sub(oldest);
        }
        self.samples.push_back(wait);
        self.sum = self.sum.saturating_add(wait);
        self.average()
    }

    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            Duration::ZERO
        } else {
            self.sum / self.samples.len() as u32
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_percent_guards_zero_total() {
        let stats = PoolStats::new("database");
        assert_eq!(stats.usage_percent(), None);

        let stats = PoolStats {
            active_connections: 18,
            total_connections: 20,
            ..PoolStats::new("database")
        };
        assert_eq!(stats.usage_percent(), Some(90.0));
    }

    #[test]
    fn test_hit_ratio() {
        let stats = PoolStats {
            pool_hits: 3,
            connection_creations: 1,
            ..PoolStats::new("cache")
        };
        assert!((stats.hit_ratio() - 0.75).abs() < f64::EPSILON);
        assert_eq!(PoolStats::new("cache").hit_ratio(), 0.0);
    }

    #[test]
    fn test_snapshot_is_independent_copy() {
        let original = PoolStats::new("http");
        let mut copy = original.clone();
        copy.active_connections = 99;
        copy.pool_name.push_str("-mutated");
        assert_eq!(original.active_connections, 0);
        assert_eq!(original.pool_name, "http");
    }

    #[test]
    fn test_wait_samples_are_capped() {
        let mut samples = WaitSamples::new();
        for _ in 0..WAIT_SAMPLE_CAPACITY {
            samples.record(Duration::from_millis(10));
        }
        assert_eq!(samples.average(), Duration::from_millis(10));

        for _ in 0..WAIT_SAMPLE_CAPACITY {
            samples.record(Duration::from_millis(30));
        }
        assert_eq!(samples.len(), WAIT_SAMPLE_CAPACITY);
        assert_eq!(samples.average(), Duration::from_millis(30));
    }

    #[test]
    fn test_wait_samples_partial_average() {
        let mut samples = WaitSamples::new();
        assert_eq!(samples.average(), Duration::ZERO);
        samples.record(Duration::from_millis(10));
        let avg = samples.record(Duration::from_millis(30));
        assert_eq!(avg, Duration::from_millis(20));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn prop_average_stays_within_window(
                waits in prop::collection::vec(0u64..5_000, 1..1_500),
            ) {
                let mut samples = WaitSamples::new();
                for &ms in &waits {
                    samples.record(Duration::from_millis(ms));
                }

                let window = &waits[waits.len().saturating_sub(WAIT_SAMPLE_CAPACITY)..];
                let min = *window.iter().min().unwrap();
                let max = *window.iter().max().unwrap();
                let avg = samples.average();

                prop_assert_eq!(samples.len(), window.len());
                prop_assert!(avg >= Duration::from_millis(min));
                prop_assert!(avg <= Duration::from_millis(max));
            }
        }
    }
}
