//! Error types of the health subsystem.

use std::time::Duration;

use reservoir_core::ConfigError;
use reservoir_pool::PoolManagerError;
use thiserror::Error;

/// Failure of a single component probe.
///
/// These never leave the service: each one is turned into an `Unknown`
/// component result carrying the error text.
#[derive(Debug, Error)]
pub enum HealthCheckError {
    #[error("{component} check timed out after {}", humantime::format_duration(*.timeout))]
    Timeout { component: String, timeout: Duration },

    #[error("{component} check failed: {message}")]
    Failed { component: String, message: String },

    #[error("{component} check panicked")]
    Panicked { component: String },

    #[error("no health check registered for component '{0}'")]
    UnknownComponent(String),
}

impl HealthCheckError {
    pub fn failed(component: impl Into<String>, message: impl std::fmt::Display) -> Self {
        HealthCheckError::Failed {
            component: component.into(),
            message: message.to_string(),
        }
    }
}

/// Errors building or starting the health service
#[derive(Debug, Error)]
pub enum HealthServiceError {
    #[error("invalid health check configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("pool manager unavailable: {0}")]
    PoolManager(#[from] PoolManagerError),
}
