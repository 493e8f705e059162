//! Health service configuration.

use std::path::PathBuf;
use std::time::Duration;

use reservoir_core::ConfigError;
use reservoir_core::env::{get_env_bool, get_env_f64, get_env_string, get_env_u32, get_env_u64, get_env_usize};
use serde::{Deserialize, Serialize};

const ENV_PREFIX: &str = "RESERVOIR_HEALTH";

/// Degraded/unhealthy cut-offs for a percentage reading.
///
/// A reading strictly above a cut-off crosses it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub degraded_percent: f64,
    pub unhealthy_percent: f64,
}

impl Thresholds {
    pub const fn new(degraded_percent: f64, unhealthy_percent: f64) -> Self {
        Self {
            degraded_percent,
            unhealthy_percent,
        }
    }

    fn validate(&self, what: &str) -> Result<(), ConfigError> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        if !in_range(self.degraded_percent) || !in_range(self.unhealthy_percent) {
            return Err(ConfigError::ValidationError(format!(
                "{what} thresholds must be between 0 and 100"
            )));
        }
        if self.degraded_percent > self.unhealthy_percent {
            return Err(ConfigError::ValidationError(format!(
                "{what} degraded threshold ({}) cannot exceed unhealthy threshold ({})",
                self.degraded_percent, self.unhealthy_percent
            )));
        }
        Ok(())
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::new(85.0, 95.0)
    }
}

/// Retention rules of the status history buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    pub max_entries: usize,
    pub retention_days: u32,
    /// Extra entries dropped when the size bound is exceeded, so cleanup
    /// does not run on every single append
    pub cleanup_batch_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 100,
            retention_days: 7,
            cleanup_batch_size: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    /// Pause between monitoring cycles
    pub check_interval: Duration,
    /// Budget for each individual component check
    pub check_timeout: Duration,
    /// Pause after a failed monitoring cycle
    pub error_pause: Duration,
    /// Database pool usage at or above this is degraded
    pub database_threshold_percent: f64,
    /// Share of active connections across all pools above which they are degraded
    pub pool_capacity_percent: f64,
    pub disk: Thresholds,
    pub memory: Thresholds,
    pub cpu: Thresholds,
    pub history: HistoryConfig,
    pub alerts_enabled: bool,
    /// Directory used for the file system write probe, the system temp dir if unset
    pub probe_dir: Option<PathBuf>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            check_timeout: Duration::from_secs(10),
            error_pause: Duration::from_secs(10),
            database_threshold_percent: 90.0,
            pool_capacity_percent: 90.0,
            disk: Thresholds::default(),
            memory: Thresholds::default(),
            cpu: Thresholds::default(),
            history: HistoryConfig::default(),
            alerts_enabled: true,
            probe_dir: None,
        }
    }
}

impl HealthCheckConfig {
    pub fn builder() -> HealthCheckConfigBuilder {
        HealthCheckConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("check_interval", self.check_interval),
            ("check_timeout", self.check_timeout),
            ("error_pause", self.error_pause),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "{field} must be greater than 0"
                )));
            }
        }

        for (field, value) in [
            ("database_threshold_percent", self.database_threshold_percent),
            ("pool_capacity_percent", self.pool_capacity_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{field} must be between 0 and 100, got {value}"
                )));
            }
        }

        self.disk.validate("disk")?;
        self.memory.validate("memory")?;
        self.cpu.validate("cpu")?;

        if self.history.max_entries == 0 {
            return Err(ConfigError::ValidationError(
                "history max_entries must be greater than 0".to_string(),
            ));
        }
        if self.history.cleanup_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "history cleanup_batch_size must be greater than 0".to_string(),
            ));
        }
        if self.history.retention_days == 0 {
            return Err(ConfigError::ValidationError(
                "history retention_days must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn probe_dir(&self) -> PathBuf {
        self.probe_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[derive(Debug, Clone, Default)]
pub struct HealthCheckConfigBuilder {
    config: HealthCheckConfig,
}

impl HealthCheckConfigBuilder {
    /// Start from defaults and apply `RESERVOIR_HEALTH_*` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let key = |field: &str| format!("{ENV_PREFIX}_{field}");
        let mut config = HealthCheckConfig::default();

        if let Some(secs) = get_env_u64(&key("CHECK_INTERVAL_SECS"))? {
            config.check_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = get_env_u64(&key("CHECK_TIMEOUT_SECS"))? {
            config.check_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = get_env_u64(&key("ERROR_PAUSE_SECS"))? {
            config.error_pause = Duration::from_secs(secs);
        }
        if let Some(percent) = get_env_f64(&key("DATABASE_THRESHOLD_PERCENT"))? {
            config.database_threshold_percent = percent;
        }
        if let Some(percent) = get_env_f64(&key("POOL_CAPACITY_PERCENT"))? {
            config.pool_capacity_percent = percent;
        }
        for (prefix, thresholds) in [
            ("DISK", &mut config.disk),
            ("MEMORY", &mut config.memory),
            ("CPU", &mut config.cpu),
        ] {
            if let Some(percent) = get_env_f64(&key(&format!("{prefix}_DEGRADED_PERCENT")))? {
                thresholds.degraded_percent = percent;
            }
            if let Some(percent) = get_env_f64(&key(&format!("{prefix}_UNHEALTHY_PERCENT")))? {
                thresholds.unhealthy_percent = percent;
            }
        }
        if let Some(entries) = get_env_usize(&key("HISTORY_MAX_ENTRIES"))? {
            config.history.max_entries = entries;
        }
        if let Some(days) = get_env_u32(&key("HISTORY_RETENTION_DAYS"))? {
            config.history.retention_days = days;
        }
        if let Some(batch) = get_env_usize(&key("HISTORY_CLEANUP_BATCH_SIZE"))? {
            config.history.cleanup_batch_size = batch;
        }
        if let Some(enabled) = get_env_bool(&key("ALERTS_ENABLED"))? {
            config.alerts_enabled = enabled;
        }
        if let Some(dir) = get_env_string(&key("PROBE_DIR")) {
            config.probe_dir = Some(PathBuf::from(dir));
        }

        Ok(Self { config })
    }

    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.config.check_interval = interval;
        self
    }

    pub fn check_timeout(mut self, timeout: Duration) -> Self {
        self.config.check_timeout = timeout;
        self
    }

    pub fn error_pause(mut self, pause: Duration) -> Self {
        self.config.error_pause = pause;
        self
    }

    pub fn database_threshold_percent(mut self, percent: f64) -> Self {
        self.config.database_threshold_percent = percent;
        self
    }

    pub fn pool_capacity_percent(mut self, percent: f64) -> Self {
        self.config.pool_capacity_percent = percent;
        self
    }

    pub fn disk(mut self, thresholds: Thresholds) -> Self {
        self.config.disk = thresholds;
        self
    }

    pub fn memory(mut self, thresholds: Thresholds) -> Self {
        self.config.memory = thresholds;
        self
    }

    pub fn cpu(mut self, thresholds: Thresholds) -> Self {
        self.config.cpu = thresholds;
        self
    }

    pub fn history(mut self, history: HistoryConfig) -> Self {
        self.config.history = history;
        self
    }

    pub fn alerts_enabled(mut self, enabled: bool) -> Self {
        self.config.alerts_enabled = enabled;
        self
    }

    pub fn probe_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.probe_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> Result<HealthCheckConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
