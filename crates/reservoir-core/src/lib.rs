//! # Reservoir Core
//!
//! Shared vocabulary of the Reservoir crates: pool configuration and
//! statistics, the health model produced by probes, typed environment
//! loading and the error taxonomy.

pub mod config;
pub mod env;
pub mod error;
pub mod health;
pub mod stats;

pub use config::{BackendKind, PoolConfig, PoolConfigBuilder};
pub use error::{BackendError, ConfigError, PoolError, sanitize_url};
pub use health::{
    CheckPerformance, ComponentHealth, ComponentType, HealthCheckResult, HealthStatus,
    HealthStatusHistory, HealthSummary,
};
pub use stats::{PoolStats, WAIT_SAMPLE_CAPACITY, WaitSamples};
