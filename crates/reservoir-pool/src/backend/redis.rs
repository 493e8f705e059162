//! Redis backend using multiplexed async connections.

use async_trait::async_trait;
use redis::Client;
use redis::aio::MultiplexedConnection;
use reservoir_core::{BackendError, BackendKind, sanitize_url};

use super::ConnectionBackend;

#[derive(Clone)]
pub struct RedisBackend {
    client: Client,
    url: String,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("url", &sanitize_url(&self.url))
            .finish()
    }
}

impl RedisBackend {
    /// Parse the URL eagerly so misconfiguration fails at pool construction
    pub fn new(url: impl Into<String>) -> Result<Self, BackendError> {
        let url = url.into();
        let client = Client::open(url.as_str()).map_err(|e| {
            BackendError::Connect(format!("invalid redis url {}: {e}", sanitize_url(&url)))
        })?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ConnectionBackend for RedisBackend {
    type Connection = MultiplexedConnection;

    fn kind(&self) -> BackendKind {
        BackendKind::Cache
    }

    async fn create(&self) -> Result<Self::Connection, BackendError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                BackendError::Connect(format!(
                    "redis connection to {} failed: {e}",
                    sanitize_url(&self.url)
                ))
            })
    }

    async fn validate(&self, connection: &Self::Connection) -> bool {
        // Multiplexed handles are cheap clones of the same pipeline
        let mut conn = connection.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(reply) => reply == "PONG",
            Err(e) => {
                tracing::debug!(error = %e, "Redis PING failed");
                false
            }
        }
    }

    async fn close(&self, connection: Self::Connection) -> Result<(), BackendError> {
        drop(connection);
        Ok(())
    }
}
