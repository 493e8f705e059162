//! Named collection of pools managed as one unit.
//!
//! The name→pool map sits behind its own `RwLock`, held only to copy or
//! mutate the map and never across an `.await`. Pool operations always
//! run on cloned `Arc`s, so the manager lock and the per-pool locks are
//! never nested.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use reservoir_core::env::get_env_string;
use reservoir_core::{
    BackendKind, ConfigError, PoolConfig, PoolConfigBuilder, PoolError, PoolStats, sanitize_url,
};
use reservoir_observability::{MetricsSink, noop_sink};
use serde::Deserialize;
use tokio::sync::{Mutex, OnceCell};
use tracing::{error, info, warn};

use crate::advisor::{PerformanceAdvisor, PoolAnalysis};
use crate::backend::ConnectionBackend;
use crate::managed::ManagedPool;
use crate::pool::{ConnectionPool, PooledConnection};

/// Environment variable holding the database URL for [`PoolManagerConfig::from_env`]
pub const DATABASE_URL_ENV: &str = "RESERVOIR_DATABASE_URL";
/// Environment variable holding the cache URL for [`PoolManagerConfig::from_env`]
pub const REDIS_URL_ENV: &str = "RESERVOIR_REDIS_URL";
/// Environment variable holding the upstream base URL for [`PoolManagerConfig::from_env`]
pub const HTTP_BASE_URL_ENV: &str = "RESERVOIR_HTTP_BASE_URL";

/// Conventional pool names used by [`PoolManagerConfig::from_env`]
pub const DATABASE_POOL: &str = "database";
pub const CACHE_POOL: &str = "cache";
pub const HTTP_POOL: &str = "http";

#[derive(Debug, thiserror::Error)]
pub enum PoolManagerError {
    #[error("failed to initialize pool '{pool}': {source}")]
    PoolInitialization {
        pool: String,
        #[source]
        source: PoolError,
    },

    #[error("duplicate pool name '{0}'")]
    DuplicatePool(String),

    #[error("pool manager has been shut down")]
    AlreadyClosed,

    #[error("pool '{0}' not found")]
    PoolNotFound(String),

    #[error("pool '{pool}' is not backed by {expected}")]
    BackendMismatch { pool: String, expected: String },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Backend a pool definition connects to
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendSpec {
    Database { url: String },
    Cache { url: String },
    Http { base_url: String },
}

impl BackendSpec {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendSpec::Database { .. } => BackendKind::Database,
            BackendSpec::Cache { .. } => BackendKind::Cache,
            BackendSpec::Http { .. } => BackendKind::Http,
        }
    }
}

impl std::fmt::Debug for BackendSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendSpec::Database { url } => f
                .debug_struct("Database")
                .field("url", &sanitize_url(url))
                .finish(),
            BackendSpec::Cache { url } => f
                .debug_struct("Cache")
                .field("url", &sanitize_url(url))
                .finish(),
            BackendSpec::Http { base_url } => f
                .debug_struct("Http")
                .field("base_url", &sanitize_url(base_url))
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PoolDefinition {
    pub config: PoolConfig,
    pub backend: BackendSpec,
}

impl PoolDefinition {
    pub fn new(config: PoolConfig, backend: BackendSpec) -> Self {
        Self { config, backend }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

/// Pools the manager brings up, in initialization order
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PoolManagerConfig {
    pub pools: Vec<PoolDefinition>,
}

impl PoolManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pool(mut self, definition: PoolDefinition) -> Self {
        self.pools.push(definition);
        self
    }

    /// One pool per configured URL variable, each sized through
    /// `RESERVOIR_POOL_<NAME>_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::new();

        if let Some(url) = get_env_string(DATABASE_URL_ENV) {
            config = config.with_pool(PoolDefinition::new(
                PoolConfigBuilder::from_env(DATABASE_POOL)?.build()?,
                BackendSpec::Database { url },
            ));
        }
        if let Some(url) = get_env_string(REDIS_URL_ENV) {
            config = config.with_pool(PoolDefinition::new(
                PoolConfigBuilder::from_env(CACHE_POOL)?.build()?,
                BackendSpec::Cache { url },
            ));
        }
        if let Some(base_url) = get_env_string(HTTP_BASE_URL_ENV) {
            config = config.with_pool(PoolDefinition::new(
                PoolConfigBuilder::from_env(HTTP_POOL)?.build()?,
                BackendSpec::Http { base_url },
            ));
        }

        Ok(config)
    }

    /// Reject duplicate names and invalid pool configs.
    pub fn validate(&self) -> Result<(), PoolManagerError> {
        let mut seen = HashSet::new();
        for definition in &self.pools {
            definition.config.validate()?;
            if !seen.insert(definition.name()) {
                return Err(PoolManagerError::DuplicatePool(
                    definition.name().to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Turns a definition into a pool. Swappable so tests can inject backends.
pub trait PoolFactory: Send + Sync {
    fn build(&self, definition: &PoolDefinition) -> Result<Arc<dyn ManagedPool>, PoolError>;
}

/// Factory for the compiled-in database, cache and HTTP backends
#[derive(Debug, Clone)]
pub struct BackendPoolFactory {
    metrics: Arc<dyn MetricsSink>,
}

impl Default for BackendPoolFactory {
    fn default() -> Self {
        Self::new(noop_sink())
    }
}

impl BackendPoolFactory {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self { metrics }
    }

    fn pool<B: ConnectionBackend>(
        &self,
        config: &PoolConfig,
        backend: B,
    ) -> Result<Arc<dyn ManagedPool>, PoolError> {
        let pool = ConnectionPool::with_metrics(config.clone(), backend, Arc::clone(&self.metrics))?;
        Ok(Arc::new(pool))
    }
}

impl PoolFactory for BackendPoolFactory {
    fn build(&self, definition: &PoolDefinition) -> Result<Arc<dyn ManagedPool>, PoolError> {
        let config = &definition.config;
        match &definition.backend {
            #[cfg(feature = "postgres")]
            BackendSpec::Database { url } => {
                self.pool(config, crate::backend::PostgresBackend::new(url.clone()))
            }
            #[cfg(feature = "redis")]
            BackendSpec::Cache { url } => {
                let backend = crate::backend::RedisBackend::new(url.clone()).map_err(|source| {
                    PoolError::Backend {
                        pool: config.name.clone(),
                        source,
                    }
                })?;
                self.pool(config, backend)
            }
            #[cfg(feature = "http")]
            BackendSpec::Http { base_url } => {
                let backend = crate::backend::HttpBackend::new(base_url.clone())
                    .with_request_timeout(config.connection_timeout)
                    .with_pool_idle_timeout(config.idle_timeout);
                self.pool(config, backend)
            }
            #[allow(unreachable_patterns)]
            other => Err(PoolError::InvalidConfig(ConfigError::ValidationError(
                format!(
                    "pool '{}': {} backend support is not compiled in",
                    config.name,
                    other.kind()
                ),
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManagerPhase {
    Uninitialized,
    Ready,
    Closed,
}

/// Owns every configured pool and coordinates their lifecycle
pub struct PoolManager {
    config: PoolManagerConfig,
    factory: Arc<dyn PoolFactory>,
    pools: RwLock<HashMap<String, Arc<dyn ManagedPool>>>,
    lifecycle: Mutex<ManagerPhase>,
    initialized: AtomicBool,
    default_advisor: Option<Arc<dyn PerformanceAdvisor>>,
    advisors: RwLock<HashMap<String, Arc<dyn PerformanceAdvisor>>>,
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("pools", &self.pool_names())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

impl PoolManager {
    pub fn new(config: PoolManagerConfig) -> Self {
        Self {
            config,
            factory: Arc::new(BackendPoolFactory::default()),
            pools: RwLock::new(HashMap::new()),
            lifecycle: Mutex::new(ManagerPhase::Uninitialized),
            initialized: AtomicBool::new(false),
            default_advisor: None,
            advisors: RwLock::new(HashMap::new()),
        }
    }

    /// Build pools through the compiled-in backends, reporting into `metrics`
    pub fn with_metrics(self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.with_factory(Arc::new(BackendPoolFactory::new(metrics)))
    }

    pub fn with_factory(mut self, factory: Arc<dyn PoolFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Advisor used for pools without a dedicated one
    pub fn with_advisor(mut self, advisor: Arc<dyn PerformanceAdvisor>) -> Self {
        self.default_advisor = Some(advisor);
        self
    }

    pub fn register_advisor(&self, pool: impl Into<String>, advisor: Arc<dyn PerformanceAdvisor>) {
        self.advisors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pool.into(), advisor);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Build and initialize every configured pool.
    ///
    /// All or nothing: if any pool fails, the pools already started are
    /// closed again and the manager stays uninitialized. Idempotent once
    /// it succeeded; fails with [`PoolManagerError::AlreadyClosed`] after
    /// [`close_all`](Self::close_all).
    pub async fn initialize(&self) -> Result<(), PoolManagerError> {
        let mut phase = self.lifecycle.lock().await;
        match *phase {
            ManagerPhase::Ready => return Ok(()),
            ManagerPhase::Closed => return Err(PoolManagerError::AlreadyClosed),
            ManagerPhase::Uninitialized => {}
        }

        self.config.validate()?;

        let mut started: Vec<Arc<dyn ManagedPool>> = Vec::with_capacity(self.config.pools.len());
        for definition in &self.config.pools {
            match self.start_pool(definition).await {
                Ok(pool) => started.push(pool),
                Err(e) => {
                    error!(pool = %definition.name(), error = %e, "Pool manager initialization failed");
                    for pool in started {
                        if let Err(close_err) = pool.close().await {
                            warn!(
                                pool = %pool.name(),
                                error = %close_err,
                                "Failed to close pool during initialization rollback"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        {
            let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
            for pool in started {
                pools.insert(pool.name().to_string(), pool);
            }
        }

        *phase = ManagerPhase::Ready;
        self.initialized.store(true, Ordering::Release);
        info!(pools = ?self.pool_names(), "Connection pool manager initialized");
        Ok(())
    }

    async fn start_pool(
        &self,
        definition: &PoolDefinition,
    ) -> Result<Arc<dyn ManagedPool>, PoolManagerError> {
        let into_init_error = |source: PoolError| PoolManagerError::PoolInitialization {
            pool: definition.name().to_string(),
            source,
        };
        let pool = self.factory.build(definition).map_err(into_init_error)?;
        pool.initialize().await.map_err(into_init_error)?;
        Ok(pool)
    }

    /// Look up a pool by name; `None` for unknown names.
    pub fn get_pool(&self, name: &str) -> Option<Arc<dyn ManagedPool>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Look up a pool and recover its concrete backend type.
    pub fn get_typed_pool<B: ConnectionBackend>(
        &self,
        name: &str,
    ) -> Option<Arc<ConnectionPool<B>>> {
        self.get_pool(name)?
            .as_any()
            .downcast::<ConnectionPool<B>>()
            .ok()
    }

    /// Check out a connection from a named pool of backend `B`.
    pub async fn get_connection<B: ConnectionBackend>(
        &self,
        name: &str,
    ) -> Result<PooledConnection<B>, PoolManagerError> {
        let pool = self
            .get_pool(name)
            .ok_or_else(|| PoolManagerError::PoolNotFound(name.to_string()))?;
        let typed = pool.as_any().downcast::<ConnectionPool<B>>().map_err(|_| {
            PoolManagerError::BackendMismatch {
                pool: name.to_string(),
                expected: std::any::type_name::<B>().to_string(),
            }
        })?;
        Ok(typed.get_connection().await?)
    }

    pub fn pool_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn get_all_pools(&self) -> HashMap<String, Arc<dyn ManagedPool>> {
        self.pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Independent copies of every pool's counters
    pub fn get_pool_stats(&self) -> HashMap<String, PoolStats> {
        self.get_all_pools()
            .into_iter()
            .map(|(name, pool)| (name, pool.stats()))
            .collect()
    }

    /// Run every pool's health check concurrently.
    ///
    /// Each check runs in its own task, so a panicking pool reports
    /// `false` without affecting the others.
    pub async fn health_check_all(&self) -> HashMap<String, bool> {
        let (names, handles): (Vec<_>, Vec<_>) = self
            .get_all_pools()
            .into_iter()
            .map(|(name, pool)| (name, tokio::spawn(async move { pool.health_check().await })))
            .unzip();

        names
            .into_iter()
            .zip(join_all(handles).await)
            .map(|(name, outcome)| match outcome {
                Ok(healthy) => (name, healthy),
                Err(e) => {
                    error!(pool = %name, error = %e, "Pool health check task failed");
                    (name, false)
                }
            })
            .collect()
    }

    /// Analyze every pool that has an advisor. Read-only.
    pub fn analyze_pools(&self) -> HashMap<String, PoolAnalysis> {
        let advisors = self
            .advisors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        self.get_all_pools()
            .into_iter()
            .filter_map(|(name, pool)| {
                let advisor = advisors
                    .get(&name)
                    .cloned()
                    .or_else(|| self.default_advisor.clone())?;
                let analysis = advisor.analyze(&pool.stats(), pool.config());
                Some((name, analysis))
            })
            .collect()
    }

    /// Close every pool, best effort and idempotent.
    ///
    /// Failures and panics are logged per pool and do not stop the
    /// remaining pools from being closed.
    pub async fn close_all(&self) {
        let mut phase = self.lifecycle.lock().await;
        if *phase == ManagerPhase::Closed {
            return;
        }

        let pools: Vec<_> = self
            .pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let (names, handles): (Vec<_>, Vec<_>) = pools
            .into_iter()
            .map(|(name, pool)| (name, tokio::spawn(async move { pool.close().await })))
            .unzip();

        let mut failures = 0usize;
        for (name, outcome) in names.into_iter().zip(join_all(handles).await) {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!(pool = %name, error = %e, "Failed to close pool");
                }
                Err(e) => {
                    failures += 1;
                    error!(pool = %name, error = %e, "Pool close task failed");
                }
            }
        }

        *phase = ManagerPhase::Closed;
        self.initialized.store(false, Ordering::Release);
        info!(failures, "Connection pool manager shut down");
    }
}

static GLOBAL_MANAGER: OnceCell<Arc<PoolManager>> = OnceCell::const_new();

/// Process-wide manager, built from the environment on first use.
///
/// Concurrent first callers wait on a single construction; a failed
/// construction is retried by the next caller.
pub async fn global_manager() -> Result<Arc<PoolManager>, PoolManagerError> {
    GLOBAL_MANAGER
        .get_or_try_init(|| async {
            let manager = PoolManager::new(PoolManagerConfig::from_env()?);
            manager.initialize().await?;
            Ok::<_, PoolManagerError>(Arc::new(manager))
        })
        .await
        .cloned()
}

/// Close the process-wide manager if it was ever built.
pub async fn shutdown_global_manager() {
    if let Some(manager) = GLOBAL_MANAGER.get() {
        manager.close_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn definition(name: &str) -> PoolDefinition {
        PoolDefinition::new(
            PoolConfig::builder(name)
                .min_size(0)
                .max_size(2)
                .build()
                .unwrap(),
            BackendSpec::Http {
                base_url: "http://localhost:1".to_string(),
            },
        )
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config = PoolManagerConfig::new()
            .with_pool(definition("http"))
            .with_pool(definition("http"));
        assert!(matches!(
            config.validate(),
            Err(PoolManagerError::DuplicatePool(name)) if name == "http"
        ));
    }

    #[test]
    fn test_backend_spec_debug_hides_credentials() {
        let spec = BackendSpec::Database {
            url: "postgres://app:hunter2@db/app".to_string(),
        };
        assert!(!format!("{spec:?}").contains("hunter2"));
        assert_eq!(spec.kind(), BackendKind::Database);
    }

    #[test]
    fn test_definitions_deserialize() {
        let json = r#"{
            "pools": [{
                "config": {
                    "name": "cache",
                    "min_size": 1,
                    "max_size": 4,
                    "connection_timeout": {"secs": 5, "nanos": 0},
                    "idle_timeout": {"secs": 300, "nanos": 0},
                    "max_lifetime": {"secs": 1800, "nanos": 0},
                    "health_check_interval": {"secs": 60, "nanos": 0},
                    "validation_timeout": {"secs": 5, "nanos": 0},
                    "retry_attempts": 3,
                    "retry_delay": {"secs": 1, "nanos": 0}
                },
                "backend": {"type": "cache", "url": "redis://localhost:6379"}
            }]
        }"#;
        let config: PoolManagerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.pools[0].config.max_size, 4);
        assert_eq!(config.pools[0].config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.pools[0].backend.kind(), BackendKind::Cache);
    }

    #[cfg(feature = "http")]
    #[tokio::test]
    async fn test_http_pools_from_factory() {
        let manager = PoolManager::new(PoolManagerConfig::new().with_pool(definition("http")));
        manager.initialize().await.unwrap();
        assert!(manager.is_initialized());
        assert!(manager.get_pool("http").is_some());
        assert!(manager.get_pool("missing").is_none());
        assert!(
            manager
                .get_typed_pool::<crate::backend::HttpBackend>("http")
                .is_some()
        );
        manager.close_all().await;
        assert!(!manager.is_initialized());
        assert!(matches!(
            manager.initialize().await,
            Err(PoolManagerError::AlreadyClosed)
        ));
    }
}
