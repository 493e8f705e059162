//! Scriptable in-memory backend shared by the pool integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reservoir_core::{BackendError, BackendKind, PoolConfig};
use reservoir_pool::ConnectionBackend;

#[derive(Debug, PartialEq, Eq)]
pub struct MockConnection {
    pub id: u64,
}

#[derive(Debug, Default)]
pub struct MockState {
    next_id: AtomicU64,
    pub created: AtomicU64,
    pub validated: AtomicU64,
    pub closed: AtomicU64,
    /// Number of upcoming `create` calls that fail
    pub failing_creates: AtomicU32,
    pub all_invalid: AtomicBool,
    pub invalid_ids: Mutex<HashSet<u64>>,
    pub create_delay_ms: AtomicU64,
}

#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    pub state: Arc<MockState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> u64 {
        self.state.created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> u64 {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn validated(&self) -> u64 {
        self.state.validated.load(Ordering::SeqCst)
    }

    pub fn fail_next_creates(&self, count: u32) {
        self.state.failing_creates.store(count, Ordering::SeqCst);
    }

    pub fn set_all_invalid(&self, invalid: bool) {
        self.state.all_invalid.store(invalid, Ordering::SeqCst);
    }

    pub fn invalidate(&self, id: u64) {
        self.state.invalid_ids.lock().unwrap().insert(id);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        self.state
            .create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionBackend for MockBackend {
    type Connection = MockConnection;

    fn kind(&self) -> BackendKind {
        BackendKind::Other
    }

    async fn create(&self) -> Result<MockConnection, BackendError> {
        let delay = self.state.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failing = self.state.failing_creates.load(Ordering::SeqCst);
        if failing > 0 {
            self.state
                .failing_creates
                .store(failing - 1, Ordering::SeqCst);
            return Err(BackendError::Connect("mock refused connection".to_string()));
        }

        self.state.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockConnection {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
        })
    }

    async fn validate(&self, connection: &MockConnection) -> bool {
        self.state.validated.fetch_add(1, Ordering::SeqCst);
        !self.state.all_invalid.load(Ordering::SeqCst)
            && !self.state.invalid_ids.lock().unwrap().contains(&connection.id)
    }

    async fn close(&self, _connection: MockConnection) -> Result<(), BackendError> {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn config(name: &str, min: usize, max: usize) -> PoolConfig {
    PoolConfig::builder(name)
        .min_size(min)
        .max_size(max)
        .connection_timeout(Duration::from_millis(200))
        .retry_delay(Duration::from_millis(10))
        .build()
        .unwrap()
}

/// Let spawned close tasks run
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
