//! # Reservoir Pool
//!
//! A generic, backend-agnostic connection pool and the manager that owns
//! a named set of pools.
//!
//! ```rust,ignore
//! use reservoir_pool::{ConnectionPool, backend::PostgresBackend};
//! use reservoir_core::PoolConfig;
//!
//! let pool = ConnectionPool::new(
//!     PoolConfig::builder("database").max_size(10).build()?,
//!     PostgresBackend::new("postgres://app@localhost/app"),
//! )?;
//! pool.initialize().await?;
//!
//! let conn = pool.get_connection().await?;
//! conn.simple_query("SELECT 1").await?;
//! // dropped here: back into the idle set
//! ```
//!
//! Backends are selected through cargo features: `postgres`, `redis`
//! and `http` (all enabled by default).

pub mod advisor;
pub mod backend;
pub mod managed;
pub mod manager;
pub mod pool;

pub use advisor::{PerformanceAdvisor, PoolAnalysis, ThresholdAdvisor};
pub use backend::ConnectionBackend;
pub use managed::ManagedPool;
pub use manager::{
    BackendPoolFactory, BackendSpec, PoolDefinition, PoolFactory, PoolManager, PoolManagerConfig,
    PoolManagerError, global_manager, shutdown_global_manager,
};
pub use pool::{ConnectionPool, MAX_RECENT_ERRORS, PoolPhase, PooledConnection};

pub use reservoir_core::{BackendError, BackendKind, PoolConfig, PoolError, PoolStats};
