//! Backend strategies plugged into [`ConnectionPool`](crate::ConnectionPool).
//!
//! A backend only knows how to open, probe and close one raw connection.
//! Sizing, recycling, retries and bookkeeping all live in the pool.

use async_trait::async_trait;
use reservoir_core::{BackendError, BackendKind};

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "http")]
pub use http::HttpBackend;
#[cfg(feature = "postgres")]
pub use postgres::{PostgresBackend, PostgresConnection};
#[cfg(feature = "redis")]
pub use redis::RedisBackend;

/// Driver contract required by the pool.
///
/// Each call is wrapped in its own timeout by the pool, so implementations
/// do not need to enforce one themselves.
#[async_trait]
pub trait ConnectionBackend: Send + Sync + 'static {
    type Connection: Send + Sync + 'static;

    fn kind(&self) -> BackendKind;

    /// Open a new raw connection
    async fn create(&self) -> Result<Self::Connection, BackendError>;

    /// Cheap liveness probe (ping, no-op query, HEAD request)
    async fn validate(&self, connection: &Self::Connection) -> bool;

    /// Release the raw connection
    async fn close(&self, connection: Self::Connection) -> Result<(), BackendError>;
}
