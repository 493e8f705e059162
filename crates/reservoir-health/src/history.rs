//! Bounded, time-limited buffer of health status transitions.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reservoir_core::{HealthCheckResult, HealthStatus, HealthStatusHistory};

use crate::config::HistoryConfig;

/// Entries kept by cleanup regardless of size and age, at most
const FLOOR_LIMIT: usize = 10;

/// Status history, oldest entry first.
#[derive(Debug)]
pub struct HealthHistory {
    config: HistoryConfig,
    entries: VecDeque<HealthStatusHistory>,
    last_statuses: Option<HashMap<String, HealthStatus>>,
}

impl HealthHistory {
    pub fn new(config: HistoryConfig) -> Self {
        Self {
            config,
            entries: VecDeque::with_capacity(config.max_entries + config.cleanup_batch_size),
            last_statuses: None,
        }
    }

    /// Append an entry for `result` holding only the components whose
    /// status changed since the previously recorded result.
    pub fn record(&mut self, result: &HealthCheckResult) -> &HealthStatusHistory {
        let entry = HealthStatusHistory::from_result(result, self.last_statuses.as_ref());
        self.last_statuses = Some(result.component_statuses());
        self.push(entry)
    }

    pub fn push(&mut self, entry: HealthStatusHistory) -> &HealthStatusHistory {
        self.entries.push_back(entry);
        // just pushed
        &self.entries[self.entries.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &HealthStatusHistory> {
        self.entries.iter()
    }

    /// Entries recorded at or after `cutoff`, oldest first
    pub fn since(&self, cutoff: DateTime<Utc>) -> Vec<HealthStatusHistory> {
        self.entries
            .iter()
            .filter(|entry| entry.timestamp >= cutoff)
            .cloned()
            .collect()
    }

    /// Entries that survive cleanup regardless of size and age
    pub fn floor(&self) -> usize {
        FLOOR_LIMIT
            .min(self.config.cleanup_batch_size)
            .min(self.config.max_entries)
    }

    /// Drop entries over the size bound or past the retention window.
    ///
    /// Over `max_entries`, the oldest `len - max_entries + cleanup_batch_size`
    /// entries go. Independently every entry older than `retention_days`
    /// goes. The larger of the two removals applies, but never below
    /// [`floor`](Self::floor) entries when at least that many existed.
    /// Returns the number of removed entries; running it twice is harmless.
    pub fn cleanup(&mut self, now: DateTime<Utc>) -> usize {
        let len = self.entries.len();
        if len == 0 {
            return 0;
        }

        let by_size = if len > self.config.max_entries {
            len - self.config.max_entries + self.config.cleanup_batch_size
        } else {
            0
        };

        let cutoff = now - ChronoDuration::days(i64::from(self.config.retention_days));
        let by_age = self
            .entries
            .iter()
            .take_while(|entry| entry.timestamp < cutoff)
            .count();

        let mut remove = by_size.max(by_age).min(len);
        let floor = self.floor();
        if len >= floor {
            remove = remove.min(len - floor);
        }

        self.entries.drain(..remove);
        remove
    }
}
