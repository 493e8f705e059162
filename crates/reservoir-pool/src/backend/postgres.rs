//! PostgreSQL backend built on `tokio-postgres`.

use async_trait::async_trait;
use reservoir_core::{BackendError, BackendKind, sanitize_url};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

use super::ConnectionBackend;

/// A client together with the task driving its socket
pub struct PostgresConnection {
    client: Client,
    driver: JoinHandle<()>,
}

impl PostgresConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }
}

impl std::ops::Deref for PostgresConnection {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

/// Opens plain-TCP connections from a `postgres://` URL
#[derive(Clone)]
pub struct PostgresBackend {
    url: String,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("url", &sanitize_url(&self.url))
            .finish()
    }
}

impl PostgresBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl ConnectionBackend for PostgresBackend {
    type Connection = PostgresConnection;

    fn kind(&self) -> BackendKind {
        BackendKind::Database
    }

    async fn create(&self) -> Result<Self::Connection, BackendError> {
        let (client, connection) = tokio_postgres::connect(&self.url, NoTls)
            .await
            .map_err(|e| {
                BackendError::Connect(format!(
                    "postgres connection to {} failed: {e}",
                    sanitize_url(&self.url)
                ))
            })?;

        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(error = %e, "PostgreSQL connection task terminated");
            }
        });

        Ok(PostgresConnection { client, driver })
    }

    async fn validate(&self, connection: &Self::Connection) -> bool {
        if connection.client.is_closed() {
            return false;
        }
        connection.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self, connection: Self::Connection) -> Result<(), BackendError> {
        let PostgresConnection { client, driver } = connection;
        // Dropping the last client handle lets the driver task finish on its own.
        drop(client);
        if !driver.is_finished() {
            driver.abort();
        }
        Ok(())
    }
}
