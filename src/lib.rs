//! # Reservoir
//!
//! Reservoir keeps a bounded set of reusable connections per backend and
//! answers "is the system healthy" by composing independent probes.
//!
//! ## Core Components
//!
//! - **[ConnectionPool]**: bounded pool over any [`ConnectionBackend`], with
//!   scoped [`PooledConnection`] handles that return themselves on drop
//! - **[PoolManager]**: named registry of pools with all-or-nothing startup,
//!   parallel health checks and best-effort shutdown
//! - **[HealthCheckService]**: parallel component checks aggregated into a
//!   [`HealthCheckResult`], with status history and a monitoring loop
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reservoir::{HealthCheckConfig, HealthCheckService, PoolManager, PoolManagerConfig};
//!
//! let manager = Arc::new(PoolManager::new(PoolManagerConfig::from_env()?));
//! manager.initialize().await?;
//!
//! let health = HealthCheckService::with_default_checks(
//!     HealthCheckConfig::builder().build()?,
//!     Arc::clone(&manager),
//! )?;
//! health.start_monitoring().await;
//!
//! let conn = manager
//!     .get_connection::<reservoir::backend::PostgresBackend>("database")
//!     .await?;
//! conn.simple_query("SELECT 1").await?;
//! ```

// ============================================================================
// Module aliases for namespaced access
// ============================================================================

pub use reservoir_core as core;
pub use reservoir_health as health;
pub use reservoir_observability as observability;
pub use reservoir_pool as pool;
pub use reservoir_pool::backend;

// ============================================================================
// Configuration and errors
// ============================================================================

pub use reservoir_core::{
    BackendError, BackendKind, ConfigError, PoolConfig, PoolConfigBuilder, PoolError,
    sanitize_url,
};

// ============================================================================
// Pools
// ============================================================================

pub use reservoir_core::PoolStats;
pub use reservoir_pool::{
    BackendPoolFactory, BackendSpec, ConnectionBackend, ConnectionPool, ManagedPool,
    PoolDefinition, PoolFactory, PoolManager, PoolManagerConfig, PoolManagerError, PoolPhase,
    PooledConnection, global_manager, shutdown_global_manager,
};

// Read-only analysis
pub use reservoir_pool::{PerformanceAdvisor, PoolAnalysis, ThresholdAdvisor};

// ============================================================================
// Health
// ============================================================================

pub use reservoir_core::{
    ComponentHealth, ComponentType, HealthCheckResult, HealthStatus, HealthStatusHistory,
    HealthSummary,
};
pub use reservoir_health::{
    ComponentCheck, HealthCheckConfig, HealthCheckError, HealthCheckService, HealthServiceError,
    global_health_service, shutdown_global_health_service,
};

// ============================================================================
// Observability
// ============================================================================

pub use reservoir_observability::{
    LogFormat, MetricsSink, NoopSink, ObservabilityConfig, PrometheusSink, init_tracing,
};
