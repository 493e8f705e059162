//! Pool configuration with builder, validation and environment loading.
//!
//! ```rust
//! use std::time::Duration;
//! use reservoir_core::PoolConfig;
//!
//! let config = PoolConfig::builder("database")
//!     .min_size(2)
//!     .max_size(10)
//!     .connection_timeout(Duration::from_secs(5))
//!     .build()
//!     .unwrap();
//! assert_eq!(config.max_size, 10);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::env::{get_env_u32, get_env_u64, get_env_usize, scoped_key};
use crate::error::ConfigError;

const ENV_PREFIX: &str = "RESERVOIR_POOL";

/// Which kind of backend a pool talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Database,
    Cache,
    Http,
    Other,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Database => write!(f, "database"),
            BackendKind::Cache => write!(f, "cache"),
            BackendKind::Http => write!(f, "http"),
            BackendKind::Other => write!(f, "other"),
        }
    }
}

/// Immutable configuration of a single connection pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Unique pool name, used as the key in the pool manager
    pub name: String,
    /// Connections created eagerly and kept warm
    pub min_size: usize,
    /// Hard upper bound on live connections
    pub max_size: usize,
    /// How long `get_connection` waits for a free slot
    pub connection_timeout: Duration,
    /// Idle connections older than this are closed instead of reused
    pub idle_timeout: Duration,
    /// Connections older than this are closed regardless of usage
    pub max_lifetime: Duration,
    /// Period of the background maintenance and health probe
    pub health_check_interval: Duration,
    /// Budget for a single liveness probe
    pub validation_timeout: Duration,
    /// Connection creation attempts before the error surfaces
    pub retry_attempts: u32,
    /// Base delay between creation attempts, doubled after every failure
    pub retry_delay: Duration,
}

impl PoolConfig {
    pub fn builder(name: impl Into<String>) -> PoolConfigBuilder {
        PoolConfigBuilder::new(name)
    }

    /// Validate sizing and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "pool name cannot be empty".to_string(),
            ));
        }
        if self.max_size == 0 {
            return Err(ConfigError::ValidationError(format!(
                "pool '{}': max_size must be greater than 0",
                self.name
            )));
        }
        if self.min_size > self.max_size {
            return Err(ConfigError::ValidationError(format!(
                "pool '{}': min_size ({}) cannot exceed max_size ({})",
                self.name, self.min_size, self.max_size
            )));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::ValidationError(format!(
                "pool '{}': retry_attempts must be at least 1",
                self.name
            )));
        }

        let timeouts = [
            ("connection_timeout", self.connection_timeout),
            ("idle_timeout", self.idle_timeout),
            ("max_lifetime", self.max_lifetime),
            ("health_check_interval", self.health_check_interval),
            ("validation_timeout", self.validation_timeout),
        ];
        for (field, value) in timeouts {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "pool '{}': {field} must be greater than 0",
                    self.name
                )));
            }
        }

        Ok(())
    }

    /// Delay before the retry that follows the `attempt`-th failure (1-based).
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_delay.saturating_mul(1u32 << exponent)
    }
}

/// Builder for [`PoolConfig`]
#[derive(Debug, Clone)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: PoolConfig {
                name: name.into(),
                min_size: 5,
                max_size: 20,
                connection_timeout: Duration::from_secs(30),
                idle_timeout: Duration::from_secs(300),
                max_lifetime: Duration::from_secs(1800),
                health_check_interval: Duration::from_secs(60),
                validation_timeout: Duration::from_secs(5),
                retry_attempts: 3,
                retry_delay: Duration::from_secs(1),
            },
        }
    }

    /// Start from defaults and apply `RESERVOIR_POOL_<NAME>_*` overrides.
    ///
    /// Supported suffixes: `MIN_SIZE`, `MAX_SIZE`, `CONNECTION_TIMEOUT_SECS`,
    /// `IDLE_TIMEOUT_SECS`, `MAX_LIFETIME_SECS`, `HEALTH_CHECK_INTERVAL_SECS`,
    /// `VALIDATION_TIMEOUT_MS`, `RETRY_ATTEMPTS`, `RETRY_DELAY_MS`.
    pub fn from_env(name: impl Into<String>) -> Result<Self, ConfigError> {
        let name = name.into();
        let key = |field: &str| scoped_key(ENV_PREFIX, &name, field);
        let mut builder = Self::new(name.clone());

        if let Some(min) = get_env_usize(&key("MIN_SIZE"))? {
            builder = builder.min_size(min);
        }
        if let Some(max) = get_env_usize(&key("MAX_SIZE"))? {
            builder = builder.max_size(max);
        }
        if let Some(secs) = get_env_u64(&key("CONNECTION_TIMEOUT_SECS"))? {
            builder = builder.connection_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = get_env_u64(&key("IDLE_TIMEOUT_SECS"))? {
            builder = builder.idle_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = get_env_u64(&key("MAX_LIFETIME_SECS"))? {
            builder = builder.max_lifetime(Duration::from_secs(secs));
        }
        if let Some(secs) = get_env_u64(&key("HEALTH_CHECK_INTERVAL_SECS"))? {
            builder = builder.health_check_interval(Duration::from_secs(secs));
        }
        if let Some(ms) = get_env_u64(&key("VALIDATION_TIMEOUT_MS"))? {
            builder = builder.validation_timeout(Duration::from_millis(ms));
        }
        if let Some(attempts) = get_env_u32(&key("RETRY_ATTEMPTS"))? {
            builder = builder.retry_attempts(attempts);
        }
        if let Some(ms) = get_env_u64(&key("RETRY_DELAY_MS"))? {
            builder = builder.retry_delay(Duration::from_millis(ms));
        }

        Ok(builder)
    }

    pub fn min_size(mut self, min_size: usize) -> Self {
        self.config.min_size = min_size;
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = max_size;
        self
    }

    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_lifetime = lifetime;
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    pub fn validation_timeout(mut self, timeout: Duration) -> Self {
        self.config.validation_timeout = timeout;
        self
    }

    pub fn retry_attempts(mut self, attempts: u32) -> Self {
        self.config.retry_attempts = attempts;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn build(self) -> Result<PoolConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_builder() {
        let config = PoolConfig::builder("database").build().unwrap();
        assert_eq!(config.name, "database");
        assert_eq!(config.min_size, 5);
        assert_eq!(config.max_size, 20);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.connection_timeout, Duration::from_secs(30));
        assert_eq!(config.health_check_interval, Duration::from_secs(60));
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
        assert_eq!(config.retry_attempts, 3);
    }

    #[test]
    fn test_validation_rejects_min_above_max() {
        let result = PoolConfig::builder("cache").min_size(10).max_size(5).build();
        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("min_size (10) cannot exceed max_size (5)")
        );
    }

    #[test]
    fn test_validation_rejects_zero_max() {
        let result = PoolConfig::builder("cache").min_size(0).max_size(0).build();
        assert!(result.unwrap_err().to_string().contains("max_size"));
    }

    #[test]
    fn test_validation_rejects_zero_timeouts() {
        let result = PoolConfig::builder("http")
            .connection_timeout(Duration::ZERO)
            .build();
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("connection_timeout must be greater than 0")
        );
    }

    #[test]
    fn test_validation_rejects_empty_name() {
        assert!(PoolConfig::builder("  ").build().is_err());
    }

    #[test]
    fn test_retry_backoff_is_exponential() {
        let config = PoolConfig::builder("database")
            .retry_delay(Duration::from_millis(100))
            .build()
            .unwrap();
        assert_eq!(config.retry_backoff(1), Duration::from_millis(100));
        assert_eq!(config.retry_backoff(2), Duration::from_millis(200));
        assert_eq!(config.retry_backoff(3), Duration::from_millis(400));
    }

    #[test]
    fn test_from_env_overrides() {
        // SAFETY: the variable names are unique to this test
        unsafe {
            std::env::set_var("RESERVOIR_POOL_ENVTEST_MAX_SIZE", "42");
            std::env::set_var("RESERVOIR_POOL_ENVTEST_MIN_SIZE", "3");
            std::env::set_var("RESERVOIR_POOL_ENVTEST_CONNECTION_TIMEOUT_SECS", "7");
        }

        let config = PoolConfigBuilder::from_env("envtest")
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(config.max_size, 42);
        assert_eq!(config.min_size, 3);
        assert_eq!(config.connection_timeout, Duration::from_secs(7));

        unsafe {
            std::env::remove_var("RESERVOIR_POOL_ENVTEST_MAX_SIZE");
            std::env::remove_var("RESERVOIR_POOL_ENVTEST_MIN_SIZE");
            std::env::remove_var("RESERVOIR_POOL_ENVTEST_CONNECTION_TIMEOUT_SECS");
        }
    }

    #[test]
    fn test_from_env_rejects_garbage() {
        // SAFETY: the variable name is unique to this test
        unsafe {
            std::env::set_var("RESERVOIR_POOL_BADENV_MAX_SIZE", "lots");
        }
        let err = PoolConfigBuilder::from_env("badenv").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvVar { .. }));
        unsafe {
            std::env::remove_var("RESERVOIR_POOL_BADENV_MAX_SIZE");
        }
    }
}
