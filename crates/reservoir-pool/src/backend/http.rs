//! HTTP client backend.
//!
//! A "connection" is a configured `reqwest::Client` bound to one upstream.
//! Validation issues a `HEAD` against the base URL; anything below 500
//! counts as alive, since 4xx still proves the upstream answers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reservoir_core::{BackendError, BackendKind, sanitize_url};

use super::ConnectionBackend;

#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    request_timeout: Duration,
    pool_idle_timeout: Duration,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ConnectionBackend for HttpBackend {
    type Connection = Client;

    fn kind(&self) -> BackendKind {
        BackendKind::Http
    }

    async fn create(&self) -> Result<Self::Connection, BackendError> {
        Client::builder()
            .timeout(self.request_timeout)
            .pool_idle_timeout(self.pool_idle_timeout)
            .build()
            .map_err(|e| BackendError::Connect(format!("failed to build HTTP client: {e}")))
    }

    async fn validate(&self, connection: &Self::Connection) -> bool {
        match connection.head(&self.base_url).send().await {
            Ok(response) => response.status().as_u16() < 500,
            Err(e) => {
                tracing::debug!(
                    url = %sanitize_url(&self.base_url),
                    error = %e,
                    "HTTP liveness probe failed"
                );
                false
            }
        }
    }

    async fn close(&self, connection: Self::Connection) -> Result<(), BackendError> {
        drop(connection);
        Ok(())
    }
}
