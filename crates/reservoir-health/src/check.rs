//! The component check contract and the shared classification rules.

use async_trait::async_trait;
use reservoir_core::{ComponentHealth, ComponentType, HealthStatus};

use crate::config::Thresholds;
use crate::error::HealthCheckError;

/// A probe for one component of the system.
///
/// Implementations report degraded or unhealthy states through the
/// returned [`ComponentHealth`]; an `Err` means the probe itself could not
/// produce an answer and is recorded as `Unknown`. The service enforces the
/// timeout and isolates panics, so checks need to do neither.
#[async_trait]
pub trait ComponentCheck: Send + Sync + 'static {
    /// Component name, unique within a service
    fn name(&self) -> &str;

    fn component_type(&self) -> ComponentType;

    async fn check(&self) -> Result<ComponentHealth, HealthCheckError>;
}

/// Classify pool usage `active / total` against `threshold_percent`.
///
/// A pool without any connections is unhealthy. Usage at or above the
/// threshold is degraded.
pub fn classify_pool_usage(active: usize, total: usize, threshold_percent: f64) -> (HealthStatus, String) {
    if total == 0 {
        return (
            HealthStatus::Unhealthy,
            "no connections available".to_string(),
        );
    }

    let usage = pool_usage_percent(active, total);
    if usage >= threshold_percent {
        (
            HealthStatus::Degraded,
            format!("pool usage at {usage:.1}% (threshold {threshold_percent:.1}%)"),
        )
    } else {
        (
            HealthStatus::Healthy,
            format!("pool usage at {usage:.1}% ({active}/{total} connections active)"),
        )
    }
}

/// `active / total` in percent, 0 for an empty pool
pub fn pool_usage_percent(active: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        active as f64 / total as f64 * 100.0
    }
}

/// Classify a resource reading such as disk or memory usage.
pub fn classify_percentage(value: f64, thresholds: &Thresholds) -> HealthStatus {
    if value > thresholds.unhealthy_percent {
        HealthStatus::Unhealthy
    } else if value > thresholds.degraded_percent {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// Alert line for a component, `None` when it needs no attention.
pub fn alert_for(component: &ComponentHealth) -> Option<String> {
    match component.status {
        HealthStatus::Unhealthy => Some(format!(
            "{} is unhealthy: {}",
            component.name, component.message
        )),
        HealthStatus::Degraded => {
            let detail = match (component.usage_percent(), component.threshold_percent()) {
                (Some(usage), Some(threshold)) => {
                    format!("pool usage at {usage:.1}% (threshold {threshold:.1}%)")
                }
                _ => component.message.clone(),
            };
            Some(format!("{} is degraded: {detail}", component.name))
        }
        HealthStatus::Healthy | HealthStatus::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(18, 20, 90.0, HealthStatus::Degraded)]
    #[case(18, 20, 95.0, HealthStatus::Healthy)]
    #[case(20, 20, 90.0, HealthStatus::Degraded)]
    #[case(0, 20, 90.0, HealthStatus::Healthy)]
    #[case(0, 0, 90.0, HealthStatus::Unhealthy)]
    fn test_classify_pool_usage(
        #[case] active: usize,
        #[case] total: usize,
        #[case] threshold: f64,
        #[case] expected: HealthStatus,
    ) {
        let (status, _) = classify_pool_usage(active, total, threshold);
        assert_eq!(status, expected);
    }

    #[test]
    fn test_degraded_usage_message() {
        let (_, message) = classify_pool_usage(18, 20, 90.0);
        assert_eq!(message, "pool usage at 90.0% (threshold 90.0%)");
    }

    #[rstest]
    #[case(50.0, HealthStatus::Healthy)]
    #[case(85.0, HealthStatus::Healthy)]
    #[case(85.5, HealthStatus::Degraded)]
    #[case(95.0, HealthStatus::Degraded)]
    #[case(99.0, HealthStatus::Unhealthy)]
    fn test_classify_percentage(#[case] value: f64, #[case] expected: HealthStatus) {
        assert_eq!(classify_percentage(value, &Thresholds::default()), expected);
    }

    #[test]
    fn test_alert_enriched_with_usage() {
        let component = ComponentHealth::degraded("database", ComponentType::Database, "busy")
            .with_usage(92.0, 90.0);
        assert_eq!(
            alert_for(&component).unwrap(),
            "database is degraded: pool usage at 92.0% (threshold 90.0%)"
        );
    }

    #[test]
    fn test_alert_for_unhealthy_and_healthy() {
        let down = ComponentHealth::unhealthy("cache", ComponentType::Cache, "probe failed");
        assert_eq!(alert_for(&down).unwrap(), "cache is unhealthy: probe failed");

        let fine = ComponentHealth::healthy("cpu", ComponentType::Cpu, "ok");
        assert!(alert_for(&fine).is_none());

        let unknown = ComponentHealth::unknown("disk", ComponentType::FileSystem, "timeout");
        assert!(alert_for(&unknown).is_none());
    }
}
