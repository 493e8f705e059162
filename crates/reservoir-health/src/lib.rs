//! # Reservoir Health
//!
//! Composes independent component checks into one answer to "is the
//! system healthy". Checks run in parallel, each isolated behind its own
//! timeout and task, and the worst component status wins:
//! UNHEALTHY > DEGRADED > HEALTHY > UNKNOWN.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use reservoir_health::{HealthCheckConfig, HealthCheckService};
//!
//! let service = HealthCheckService::with_default_checks(
//!     HealthCheckConfig::builder().build()?,
//!     Arc::clone(&manager),
//! )?;
//! let result = service.perform_comprehensive_health_check().await;
//! println!("{} -> HTTP {}", result.overall_status, result.http_status_code());
//! ```

pub mod check;
pub mod checks;
pub mod config;
pub mod error;
pub mod history;
pub mod service;

use std::sync::Arc;

use tokio::sync::OnceCell;

pub use check::{ComponentCheck, alert_for, classify_percentage, classify_pool_usage};
pub use checks::{
    ConnectionPoolsCheck, CpuCheck, DatabaseCheck, FileSystemCheck, MemoryCheck, PoolProbeCheck,
    default_checks,
};
pub use config::{HealthCheckConfig, HealthCheckConfigBuilder, HistoryConfig, Thresholds};
pub use error::{HealthCheckError, HealthServiceError};
pub use history::HealthHistory;
pub use service::HealthCheckService;

pub use reservoir_core::{
    ComponentHealth, ComponentType, HealthCheckResult, HealthStatus, HealthStatusHistory,
    HealthSummary,
};

static GLOBAL_SERVICE: OnceCell<Arc<HealthCheckService>> = OnceCell::const_new();

/// Process-wide health service with the standard checks over
/// [`reservoir_pool::global_manager`], monitoring started.
///
/// Built once from `RESERVOIR_HEALTH_*`; concurrent first callers share
/// a single construction.
pub async fn global_health_service() -> Result<Arc<HealthCheckService>, HealthServiceError> {
    GLOBAL_SERVICE
        .get_or_try_init(|| async {
            let config = HealthCheckConfigBuilder::from_env()?.build()?;
            let manager = reservoir_pool::global_manager().await?;
            let service = HealthCheckService::with_default_checks(config, manager)?;
            service.start_monitoring().await;
            Ok::<_, HealthServiceError>(Arc::new(service))
        })
        .await
        .cloned()
}

/// Stop monitoring on the process-wide service if it was ever built.
pub async fn shutdown_global_health_service() {
    if let Some(service) = GLOBAL_SERVICE.get() {
        service.stop_monitoring().await;
    }
}
