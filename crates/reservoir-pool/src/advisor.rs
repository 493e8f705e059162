//! Read-only performance analysis over pool statistics.

use std::time::Duration;

use reservoir_core::{PoolConfig, PoolStats};
use serde::{Deserialize, Serialize};

/// Scores and advice derived from one stats snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolAnalysis {
    pub pool_name: String,
    /// Checked-out connections as a share of `max_size`, 0-100
    pub utilization_score: f64,
    /// Acquisitions served from the idle set, 0-100
    pub efficiency_score: f64,
    pub recommendations: Vec<String>,
}

/// Turns stats into recommendations. Must not touch the pool.
pub trait PerformanceAdvisor: Send + Sync {
    fn analyze(&self, stats: &PoolStats, config: &PoolConfig) -> PoolAnalysis;
}

/// Rule-based advisor with fixed thresholds
#[derive(Debug, Clone)]
pub struct ThresholdAdvisor {
    pub high_utilization_percent: f64,
    pub low_utilization_percent: f64,
    pub max_error_rate: f64,
    pub min_efficiency_percent: f64,
}

impl Default for ThresholdAdvisor {
    fn default() -> Self {
        Self {
            high_utilization_percent: 80.0,
            low_utilization_percent: 20.0,
            max_error_rate: 0.05,
            min_efficiency_percent: 50.0,
        }
    }
}

impl PerformanceAdvisor for ThresholdAdvisor {
    fn analyze(&self, stats: &PoolStats, config: &PoolConfig) -> PoolAnalysis {
        let utilization_score = stats.capacity_percent(config.max_size);
        let efficiency_score = stats.hit_ratio() * 100.0;
        let served = stats.pool_hits + stats.connection_creations;
        let mut recommendations = Vec::new();

        if stats.pool_exhaustions > 0 {
            recommendations.push(format!(
                "increase max_size: pool was exhausted {} time(s)",
                stats.pool_exhaustions
            ));
        } else if utilization_score >= self.high_utilization_percent {
            recommendations.push(format!(
                "increase max_size: utilization at {utilization_score:.1}%"
            ));
        }

        if utilization_score <= self.low_utilization_percent
            && stats.total_connections > config.min_size.max(1)
        {
            recommendations.push(format!(
                "pool underutilized: {} connections open at {utilization_score:.1}% utilization, consider lowering min_size",
                stats.total_connections
            ));
        }

        let attempts = served + stats.connection_errors;
        if attempts > 0 {
            let error_rate = stats.connection_errors as f64 / attempts as f64;
            if error_rate > self.max_error_rate {
                recommendations.push(format!(
                    "investigate backend errors: {:.1}% of connection attempts failed",
                    error_rate * 100.0
                ));
            }
        }

        if served >= 10 && efficiency_score < self.min_efficiency_percent {
            recommendations.push(format!(
                "connections are rarely reused ({efficiency_score:.1}% hits), consider raising idle_timeout or min_size"
            ));
        }

        if stats.average_wait_time > config.connection_timeout / 2
            && stats.average_wait_time > Duration::ZERO
        {
            recommendations.push(format!(
                "average wait {}ms is close to connection_timeout",
                stats.average_wait_time.as_millis()
            ));
        }

        PoolAnalysis {
            pool_name: stats.pool_name.clone(),
            utilization_score,
            efficiency_score,
            recommendations,
        }
    }
}
