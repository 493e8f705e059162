//! Health model shared by pools and the health check service.
//!
//! - [`HealthStatus`] orders statuses by severity for aggregation
//! - [`ComponentHealth`] is the immutable outcome of one probe
//! - [`HealthCheckResult`] is one monitoring cycle over all components
//! - [`HealthStatusHistory`] keeps only the components that changed

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata key carrying a component's utilization percentage
pub const USAGE_PERCENT_KEY: &str = "usage_percent";
/// Metadata key carrying the threshold the utilization is compared to
pub const THRESHOLD_PERCENT_KEY: &str = "threshold_percent";

/// Health status levels, ordered by severity through [`HealthStatus::priority`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    /// The probe could not produce an answer
    Unknown,
}

impl HealthStatus {
    /// Aggregation priority: UNHEALTHY(3) > DEGRADED(2) > HEALTHY(1) > UNKNOWN(0)
    pub fn priority(&self) -> u8 {
        match self {
            HealthStatus::Unhealthy => 3,
            HealthStatus::Degraded => 2,
            HealthStatus::Healthy => 1,
            HealthStatus::Unknown => 0,
        }
    }

    /// Worst status of the iterator by priority, `Unknown` if it is empty.
    pub fn worst<I>(statuses: I) -> HealthStatus
    where
        I: IntoIterator<Item = HealthStatus>,
    {
        statuses
            .into_iter()
            .max_by_key(HealthStatus::priority)
            .unwrap_or(HealthStatus::Unknown)
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, HealthStatus::Degraded)
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy)
    }

    /// Healthy or degraded
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Kind of component a health probe covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Database,
    Cache,
    /// A network-dependent service such as an upstream HTTP API
    ExternalApi,
    FileSystem,
    Memory,
    Cpu,
    ConnectionPool,
    Other,
}

impl std::fmt::Display for ComponentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ComponentType::Database => "database",
            ComponentType::Cache => "cache",
            ComponentType::ExternalApi => "external_api",
            ComponentType::FileSystem => "file_system",
            ComponentType::Memory => "memory",
            ComponentType::Cpu => "cpu",
            ComponentType::ConnectionPool => "connection_pool",
            ComponentType::Other => "other",
        };
        f.write_str(name)
    }
}

/// Outcome of probing a single component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub component_type: ComponentType,
    pub status: HealthStatus,
    pub message: String,
    pub response_time: Option<Duration>,
    pub last_check: DateTime<Utc>,
    pub metadata: HashMap<String, Value>,
    pub error_count: u64,
}

impl ComponentHealth {
    pub fn new(
        name: impl Into<String>,
        component_type: ComponentType,
        status: HealthStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            component_type,
            status,
            message: message.into(),
            response_time: None,
            last_check: Utc::now(),
            metadata: HashMap::new(),
            error_count: 0,
        }
    }

    pub fn healthy(
        name: impl Into<String>,
        component_type: ComponentType,
        message: impl Into<String>,
    ) -> Self {
        Self::new(name, component_type, HealthStatus::Healthy, message)
    }

    pub fn degraded(
        name: impl Into<String>,
        component_type: ComponentType,
        message: impl Into<String>,
    ) -> Self {
        Self::new(name, component_type, HealthStatus::Degraded, message)
    }

    pub fn unhealthy(
        name: impl Into<String>,
        component_type: ComponentType,
        message: impl Into<String>,
    ) -> Self {
        Self::new(name, component_type, HealthStatus::Unhealthy, message)
    }

    pub fn unknown(
        name: impl Into<String>,
        component_type: ComponentType,
        message: impl Into<String>,
    ) -> Self {
        Self::new(name, component_type, HealthStatus::Unknown, message)
    }

    pub fn with_response_time(mut self, response_time: Duration) -> Self {
        self.response_time = Some(response_time);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_error_count(mut self, error_count: u64) -> Self {
        self.error_count = error_count;
        self
    }

    /// Attach utilization and threshold so alerts can explain a degradation.
    pub fn with_usage(self, usage_percent: f64, threshold_percent: f64) -> Self {
        self.with_metadata(USAGE_PERCENT_KEY, round_percent(usage_percent))
            .with_metadata(THRESHOLD_PERCENT_KEY, round_percent(threshold_percent))
    }

    pub fn usage_percent(&self) -> Option<f64> {
        self.metadata.get(USAGE_PERCENT_KEY).and_then(Value::as_f64)
    }

    pub fn threshold_percent(&self) -> Option<f64> {
        self.metadata
            .get(THRESHOLD_PERCENT_KEY)
            .and_then(Value::as_f64)
    }
}

fn round_percent(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Number of components per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSummary {
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub unknown: usize,
}

impl HealthSummary {
    pub fn from_components<'a, I>(components: I) -> Self
    where
        I: IntoIterator<Item = &'a ComponentHealth>,
    {
        let mut summary = Self::default();
        for component in components {
            match component.status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Degraded => summary.degraded += 1,
                HealthStatus::Unhealthy => summary.unhealthy += 1,
                HealthStatus::Unknown => summary.unknown += 1,
            }
        }
        summary
    }

    pub fn total(&self) -> usize {
        self.healthy + self.degraded + self.unhealthy + self.unknown
    }
}

/// Cost of one monitoring cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckPerformance {
    pub total_check_time: Duration,
    pub components_checked: usize,
    pub timestamp: DateTime<Utc>,
}

/// Result of one comprehensive health check cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub overall_status: HealthStatus,
    pub components: HashMap<String, ComponentHealth>,
    pub summary: HealthSummary,
    pub alerts: Vec<String>,
    pub performance: CheckPerformance,
}

impl HealthCheckResult {
    /// Status code an HTTP layer would typically answer with.
    ///
    /// Degraded is reported as healthy-with-warnings.
    pub fn http_status_code(&self) -> u16 {
        match self.overall_status {
            HealthStatus::Healthy | HealthStatus::Degraded => 200,
            HealthStatus::Unhealthy | HealthStatus::Unknown => 503,
        }
    }

    pub fn component_statuses(&self) -> HashMap<String, HealthStatus> {
        self.components
            .iter()
            .map(|(name, health)| (name.clone(), health.status))
            .collect()
    }
}

/// One history entry: overall status plus the components whose status changed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatusHistory {
    pub timestamp: DateTime<Utc>,
    pub overall_status: HealthStatus,
    pub component_changes: HashMap<String, HealthStatus>,
}

impl HealthStatusHistory {
    /// Build an entry containing only components that differ from `previous`.
    ///
    /// Components missing from `previous` count as changed.
    pub fn from_result(
        result: &HealthCheckResult,
        previous: Option<&HashMap<String, HealthStatus>>,
    ) -> Self {
        let component_changes = result
            .components
            .iter()
            .filter(|(name, health)| {
                previous
                    .and_then(|prev| prev.get(name.as_str()))
                    .is_none_or(|status| *status != health.status)
            })
            .map(|(name, health)| (name.clone(), health.status))
            .collect();

        Self {
            timestamp: result.timestamp,
            overall_status: result.overall_status,
            component_changes,
        }
    }
}
