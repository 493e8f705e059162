//! Checks backed by the connection pools of a [`PoolManager`].

use std::sync::Arc;

use async_trait::async_trait;
use reservoir_core::{ComponentHealth, ComponentType, HealthStatus};
use reservoir_pool::PoolManager;
use reservoir_pool::manager::{CACHE_POOL, DATABASE_POOL, HTTP_POOL};

use crate::check::{ComponentCheck, classify_pool_usage, pool_usage_percent};
use crate::error::HealthCheckError;

/// Database pool usage against a threshold, after a pool health probe
pub struct DatabaseCheck {
    manager: Arc<PoolManager>,
    pool: String,
    threshold_percent: f64,
}

impl DatabaseCheck {
    pub fn new(manager: Arc<PoolManager>, threshold_percent: f64) -> Self {
        Self {
            manager,
            pool: DATABASE_POOL.to_string(),
            threshold_percent,
        }
    }

    /// Watch a pool other than `database`
    pub fn for_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = pool.into();
        self
    }
}

#[async_trait]
impl ComponentCheck for DatabaseCheck {
    fn name(&self) -> &str {
        "database"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Database
    }

    async fn check(&self) -> Result<ComponentHealth, HealthCheckError> {
        let Some(pool) = self.manager.get_pool(&self.pool) else {
            return Ok(ComponentHealth::healthy(
                self.name(),
                self.component_type(),
                "database not configured",
            ));
        };

        let probe_ok = pool.health_check().await;
        let stats = pool.stats();

        let (status, message) = if probe_ok {
            classify_pool_usage(
                stats.active_connections,
                stats.total_connections,
                self.threshold_percent,
            )
        } else {
            (
                HealthStatus::Unhealthy,
                format!("pool '{}' failed its health probe", self.pool),
            )
        };

        Ok(ComponentHealth::new(self.name(), self.component_type(), status, message)
            .with_usage(
                pool_usage_percent(stats.active_connections, stats.total_connections),
                self.threshold_percent,
            )
            .with_metadata("active_connections", stats.active_connections)
            .with_metadata("idle_connections", stats.idle_connections)
            .with_metadata("total_connections", stats.total_connections)
            .with_metadata("pool_exhaustions", stats.pool_exhaustions)
            .with_error_count(stats.connection_errors))
    }
}

/// Pass/fail health probe of a single pool
pub struct PoolProbeCheck {
    name: String,
    component_type: ComponentType,
    manager: Arc<PoolManager>,
    pool: String,
}

impl PoolProbeCheck {
    pub fn new(
        name: impl Into<String>,
        component_type: ComponentType,
        manager: Arc<PoolManager>,
        pool: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            component_type,
            manager,
            pool: pool.into(),
        }
    }

    /// The `cache` pool as the `cache` component
    pub fn cache(manager: Arc<PoolManager>) -> Self {
        Self::new("cache", ComponentType::Cache, manager, CACHE_POOL)
    }

    /// The `http` pool as the `external_api` component
    pub fn external_api(manager: Arc<PoolManager>) -> Self {
        Self::new("external_api", ComponentType::ExternalApi, manager, HTTP_POOL)
    }
}

#[async_trait]
impl ComponentCheck for PoolProbeCheck {
    fn name(&self) -> &str {
        &self.name
    }

    fn component_type(&self) -> ComponentType {
        self.component_type
    }

    async fn check(&self) -> Result<ComponentHealth, HealthCheckError> {
        let Some(pool) = self.manager.get_pool(&self.pool) else {
            return Ok(ComponentHealth::healthy(
                &self.name,
                self.component_type,
                format!("{} not configured", self.name),
            ));
        };

        let healthy = pool.health_check().await;
        let stats = pool.stats();
        let health = if healthy {
            ComponentHealth::healthy(
                &self.name,
                self.component_type,
                format!("pool '{}' is responding", self.pool),
            )
        } else {
            ComponentHealth::unhealthy(
                &self.name,
                self.component_type,
                format!("pool '{}' failed its health probe", self.pool),
            )
        };

        Ok(health
            .with_metadata("backend", pool.kind().to_string())
            .with_metadata("total_connections", stats.total_connections)
            .with_metadata("hit_ratio", stats.hit_ratio())
            .with_error_count(stats.connection_errors))
    }
}

/// Aggregate view over every pool the manager owns
pub struct ConnectionPoolsCheck {
    manager: Arc<PoolManager>,
    capacity_percent: f64,
}

impl ConnectionPoolsCheck {
    pub fn new(manager: Arc<PoolManager>, capacity_percent: f64) -> Self {
        Self {
            manager,
            capacity_percent,
        }
    }
}

#[async_trait]
impl ComponentCheck for ConnectionPoolsCheck {
    fn name(&self) -> &str {
        "connection_pools"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::ConnectionPool
    }

    async fn check(&self) -> Result<ComponentHealth, HealthCheckError> {
        if self.manager.pool_names().is_empty() {
            return Ok(ComponentHealth::healthy(
                self.name(),
                self.component_type(),
                "no connection pools configured",
            ));
        }

        let probes = self.manager.health_check_all().await;
        let stats = self.manager.get_pool_stats();

        let total: usize = stats.values().map(|s| s.total_connections).sum();
        let active: usize = stats.values().map(|s| s.active_connections).sum();
        let errors: u64 = stats.values().map(|s| s.connection_errors).sum();
        let mut failing: Vec<_> = probes
            .iter()
            .filter(|(_, healthy)| !**healthy)
            .map(|(name, _)| name.as_str())
            .collect();
        failing.sort_unstable();

        let (status, message) = if total == 0 {
            (
                HealthStatus::Unhealthy,
                "no pooled connections available".to_string(),
            )
        } else if !failing.is_empty() {
            (
                HealthStatus::Degraded,
                format!("pools failing health probe: {}", failing.join(", ")),
            )
        } else if active as f64 > total as f64 * self.capacity_percent / 100.0 {
            (
                HealthStatus::Degraded,
                format!("connection pools near capacity: {active}/{total}"),
            )
        } else {
            (
                HealthStatus::Healthy,
                format!("connection pools healthy: {active}/{total}"),
            )
        };

        Ok(ComponentHealth::new(self.name(), self.component_type(), status, message)
            .with_metadata("pools", stats.len())
            .with_metadata("active_connections", active)
            .with_metadata("total_connections", total)
            .with_metadata("failing_pools", failing)
            .with_error_count(errors))
    }
}
