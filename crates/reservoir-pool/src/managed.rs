//! Object-safe view over pools of any backend, as stored by the manager.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use reservoir_core::{BackendKind, PoolConfig, PoolError, PoolStats};

use crate::backend::ConnectionBackend;
use crate::pool::{ConnectionPool, PoolPhase};

#[async_trait]
pub trait ManagedPool: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn kind(&self) -> BackendKind;

    fn config(&self) -> &PoolConfig;

    fn phase(&self) -> PoolPhase;

    /// Independent copy of the pool counters
    fn stats(&self) -> PoolStats;

    async fn initialize(&self) -> Result<(), PoolError>;

    async fn close(&self) -> Result<(), PoolError>;

    async fn health_check(&self) -> bool;

    /// Upcast used to recover the concrete `ConnectionPool<B>`
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

#[async_trait]
impl<B: ConnectionBackend> ManagedPool for ConnectionPool<B> {
    fn name(&self) -> &str {
        ConnectionPool::name(self)
    }

    fn kind(&self) -> BackendKind {
        self.backend().kind()
    }

    fn config(&self) -> &PoolConfig {
        ConnectionPool::config(self)
    }

    fn phase(&self) -> PoolPhase {
        ConnectionPool::phase(self)
    }

    fn stats(&self) -> PoolStats {
        ConnectionPool::stats(self)
    }

    async fn initialize(&self) -> Result<(), PoolError> {
        ConnectionPool::initialize(self).await
    }

    async fn close(&self) -> Result<(), PoolError> {
        ConnectionPool::close(self).await
    }

    async fn health_check(&self) -> bool {
        ConnectionPool::health_check(self).await
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
