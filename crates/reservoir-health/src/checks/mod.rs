//! Built-in component checks.

mod pools;
mod system;

use std::sync::Arc;

use reservoir_pool::PoolManager;

pub use pools::{ConnectionPoolsCheck, DatabaseCheck, PoolProbeCheck};
pub use system::{CpuCheck, FileSystemCheck, MemoryCheck};

use crate::check::ComponentCheck;
use crate::config::HealthCheckConfig;

/// The standard check set: database, cache, connection_pools, file_system,
/// memory, cpu and external_api.
///
/// Pools missing from `manager` report healthy as "not configured".
pub fn default_checks(
    config: &HealthCheckConfig,
    manager: Arc<PoolManager>,
) -> Vec<Arc<dyn ComponentCheck>> {
    vec![
        Arc::new(DatabaseCheck::new(
            Arc::clone(&manager),
            config.database_threshold_percent,
        )),
        Arc::new(PoolProbeCheck::cache(Arc::clone(&manager))),
        Arc::new(ConnectionPoolsCheck::new(
            Arc::clone(&manager),
            config.pool_capacity_percent,
        )),
        Arc::new(FileSystemCheck::new(config.disk, config.probe_dir())),
        Arc::new(MemoryCheck::new(config.memory)),
        Arc::new(CpuCheck::new(config.cpu)),
        Arc::new(PoolProbeCheck::external_api(manager)),
    ]
}
