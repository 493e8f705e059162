//! Stub checks and an in-memory pool backend for the health tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reservoir_core::{
    BackendError, BackendKind, ComponentHealth, ComponentType, HealthStatus, PoolConfig,
    PoolError,
};
use reservoir_health::{ComponentCheck, HealthCheckError};
use reservoir_pool::{
    BackendSpec, ConnectionBackend, ConnectionPool, ManagedPool, PoolDefinition, PoolFactory,
    PoolManager, PoolManagerConfig,
};

/// Always reports the same status
pub struct StaticCheck {
    pub name: &'static str,
    pub status: HealthStatus,
}

#[async_trait]
impl ComponentCheck for StaticCheck {
    fn name(&self) -> &str {
        self.name
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Other
    }

    async fn check(&self) -> Result<ComponentHealth, HealthCheckError> {
        Ok(ComponentHealth::new(
            self.name,
            ComponentType::Other,
            self.status,
            format!("{} is {}", self.name, self.status),
        ))
    }
}

pub fn fixed(name: &'static str, status: HealthStatus) -> StaticCheck {
    StaticCheck { name, status }
}

pub struct FailingCheck;

#[async_trait]
impl ComponentCheck for FailingCheck {
    fn name(&self) -> &str {
        "failing"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::ExternalApi
    }

    async fn check(&self) -> Result<ComponentHealth, HealthCheckError> {
        Err(HealthCheckError::failed("failing", "connection refused"))
    }
}

pub struct PanickingCheck;

#[async_trait]
impl ComponentCheck for PanickingCheck {
    fn name(&self) -> &str {
        "panicking"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Other
    }

    async fn check(&self) -> Result<ComponentHealth, HealthCheckError> {
        panic!("probe exploded");
    }
}

pub struct SlowCheck {
    pub delay: Duration,
}

#[async_trait]
impl ComponentCheck for SlowCheck {
    fn name(&self) -> &str {
        "slow"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::ExternalApi
    }

    async fn check(&self) -> Result<ComponentHealth, HealthCheckError> {
        tokio::time::sleep(self.delay).await;
        Ok(ComponentHealth::healthy("slow", ComponentType::ExternalApi, "eventually fine"))
    }
}

/// Counts runs; reports unhealthy until `recover_after` runs happened
pub struct CountingCheck {
    pub runs: Arc<AtomicUsize>,
    pub recover_after: usize,
}

impl CountingCheck {
    pub fn new(recover_after: usize) -> (Self, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            Self {
                runs: Arc::clone(&runs),
                recover_after,
            },
            runs,
        )
    }
}

#[async_trait]
impl ComponentCheck for CountingCheck {
    fn name(&self) -> &str {
        "counting"
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Other
    }

    async fn check(&self) -> Result<ComponentHealth, HealthCheckError> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        let status = if run > self.recover_after {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        Ok(ComponentHealth::new(
            "counting",
            ComponentType::Other,
            status,
            format!("run {run}"),
        ))
    }
}

#[derive(Debug)]
pub struct MockConnection;

/// Clones share their counters and the validity switch
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    created: Arc<AtomicU64>,
    invalid: Arc<AtomicBool>,
}

impl MockBackend {
    /// Make every validation fail until switched back
    pub fn set_invalid(&self, invalid: bool) {
        self.invalid.store(invalid, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionBackend for MockBackend {
    type Connection = MockConnection;

    fn kind(&self) -> BackendKind {
        BackendKind::Other
    }

    async fn create(&self) -> Result<MockConnection, BackendError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection)
    }

    async fn validate(&self, _connection: &MockConnection) -> bool {
        !self.invalid.load(Ordering::SeqCst)
    }

    async fn close(&self, _connection: MockConnection) -> Result<(), BackendError> {
        Ok(())
    }
}

struct MockFactory {
    backend: MockBackend,
}

impl PoolFactory for MockFactory {
    fn build(&self, definition: &PoolDefinition) -> Result<Arc<dyn ManagedPool>, PoolError> {
        Ok(Arc::new(ConnectionPool::new(
            definition.config.clone(),
            self.backend.clone(),
        )?))
    }
}

/// Initialized manager with one mock pool per `(name, min, max)`
pub async fn manager(pools: &[(&str, usize, usize)]) -> Arc<PoolManager> {
    manager_with_backend(pools).await.0
}

/// Like [`manager`], also returning the backend every pool shares
pub async fn manager_with_backend(
    pools: &[(&str, usize, usize)],
) -> (Arc<PoolManager>, MockBackend) {
    let config = pools
        .iter()
        .fold(PoolManagerConfig::new(), |config, (name, min, max)| {
            config.with_pool(PoolDefinition::new(
                PoolConfig::builder(*name)
                    .min_size(*min)
                    .max_size(*max)
                    .connection_timeout(Duration::from_millis(200))
                    .build()
                    .unwrap(),
                BackendSpec::Http {
                    base_url: format!("http://{name}.internal"),
                },
            ))
        });

    let backend = MockBackend::default();
    let manager = PoolManager::new(config).with_factory(Arc::new(MockFactory {
        backend: backend.clone(),
    }));
    manager.initialize().await.unwrap();
    (Arc::new(manager), backend)
}

pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
