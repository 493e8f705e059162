//! Health check orchestration: parallel checks, aggregation, history and
//! the periodic monitoring loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use reservoir_core::{
    CheckPerformance, ComponentHealth, HealthCheckResult, HealthStatus, HealthStatusHistory,
    HealthSummary,
};
use reservoir_observability::{HEALTH_CHECK_SECONDS, HEALTH_CYCLE_SECONDS, MetricsSink, noop_sink};
use reservoir_pool::PoolManager;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::check::{ComponentCheck, alert_for};
use crate::checks::default_checks;
use crate::config::HealthCheckConfig;
use crate::error::{HealthCheckError, HealthServiceError};
use crate::history::HealthHistory;

struct Inner {
    config: HealthCheckConfig,
    checks: RwLock<Vec<Arc<dyn ComponentCheck>>>,
    /// Latest result per component, written after each cycle
    component_cache: RwLock<HashMap<String, ComponentHealth>>,
    history: Mutex<HealthHistory>,
    last_result: RwLock<Option<HealthCheckResult>>,
    metrics: Arc<dyn MetricsSink>,
}

struct Monitor {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs component checks and keeps the latest results and status history
pub struct HealthCheckService {
    inner: Arc<Inner>,
    monitor: tokio::sync::Mutex<Option<Monitor>>,
}

impl std::fmt::Debug for HealthCheckService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthCheckService")
            .field("checks", &self.check_names())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl HealthCheckService {
    /// Service without any checks registered
    pub fn new(config: HealthCheckConfig) -> Result<Self, HealthServiceError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                history: Mutex::new(HealthHistory::new(config.history)),
                config,
                checks: RwLock::new(Vec::new()),
                component_cache: RwLock::new(HashMap::new()),
                last_result: RwLock::new(None),
                metrics: noop_sink(),
            }),
            monitor: tokio::sync::Mutex::new(None),
        })
    }

    /// Service with the standard checks over `manager`
    pub fn with_default_checks(
        config: HealthCheckConfig,
        manager: Arc<PoolManager>,
    ) -> Result<Self, HealthServiceError> {
        let service = Self::new(config)?;
        for check in default_checks(&service.inner.config, manager) {
            service.register_arc(check);
        }
        Ok(service)
    }

    /// Report check and cycle durations to `metrics`.
    ///
    /// Only valid before the service is shared.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.metrics = metrics;
        } else {
            warn!("Health service already shared, metrics sink not replaced");
        }
        self
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.inner.config
    }

    /// Add a check; one with the same name is replaced.
    pub fn register<C: ComponentCheck>(&self, check: C) {
        self.register_arc(Arc::new(check));
    }

    pub fn register_arc(&self, check: Arc<dyn ComponentCheck>) {
        let mut checks = self
            .inner
            .checks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        checks.retain(|existing| existing.name() != check.name());
        checks.push(check);
    }

    pub fn check_names(&self) -> Vec<String> {
        self.inner
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|check| check.name().to_string())
            .collect()
    }

    /// Run every registered check concurrently and aggregate the outcome.
    ///
    /// Never fails: a check that errors, panics or exceeds `check_timeout`
    /// is reported as `Unknown` and the others are unaffected.
    pub async fn perform_comprehensive_health_check(&self) -> HealthCheckResult {
        self.inner.perform().await
    }

    /// Latest cached result of one component
    pub fn get_component_health(&self, name: &str) -> Option<ComponentHealth> {
        self.inner
            .component_cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn last_result(&self) -> Option<HealthCheckResult> {
        self.inner
            .last_result
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// History entries of the last `hours` hours, oldest first
    pub fn get_health_history(&self, hours: u32) -> Vec<HealthStatusHistory> {
        let cutoff = Utc::now() - chrono::Duration::hours(i64::from(hours));
        self.inner.lock_history().since(cutoff)
    }

    pub fn history_len(&self) -> usize {
        self.inner.lock_history().len()
    }

    /// Re-run a single component check and refresh its cached result.
    ///
    /// Recovery here means re-checking; nothing is restarted or repaired.
    pub async fn attempt_recovery(&self, name: &str) -> Result<ComponentHealth, HealthCheckError> {
        let check = self
            .inner
            .find_check(name)
            .ok_or_else(|| HealthCheckError::UnknownComponent(name.to_string()))?;

        let previous = self.get_component_health(name).map(|h| h.status);
        let health = self.inner.run_isolated(check).await;
        self.inner
            .component_cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(health.name.clone(), health.clone());

        info!(
            component = %name,
            previous = ?previous,
            status = %health.status,
            "Component recovery check completed"
        );
        Ok(health)
    }

    pub async fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(|monitor| !monitor.handle.is_finished())
    }

    /// Start the periodic monitoring loop. No-op when already running.
    pub async fn start_monitoring(&self) {
        let mut monitor = self.monitor.lock().await;
        if monitor
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
        {
            return;
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(monitoring_loop(Arc::clone(&self.inner), shutdown_rx));
        *monitor = Some(Monitor { shutdown, handle });
        info!(
            interval_ms = self.inner.config.check_interval.as_millis() as u64,
            "Health monitoring started"
        );
    }

    /// Signal the monitoring loop and wait for it to exit. No-op when idle.
    pub async fn stop_monitoring(&self) {
        let Some(running) = self.monitor.lock().await.take() else {
            return;
        };

        let _ = running.shutdown.send(true);
        match running.handle.await {
            Ok(()) => info!("Health monitoring stopped"),
            Err(e) if e.is_panic() => error!("Health monitoring task panicked"),
            Err(_) => warn!("Health monitoring task was cancelled"),
        }
    }
}

impl Inner {
    fn lock_history(&self) -> MutexGuard<'_, HealthHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn find_check(&self, name: &str) -> Option<Arc<dyn ComponentCheck>> {
        self.checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|check| check.name() == name)
            .cloned()
    }

    /// Run one check in its own task with the configured timeout.
    async fn run_isolated(self: &Arc<Self>, check: Arc<dyn ComponentCheck>) -> ComponentHealth {
        let name = check.name().to_string();
        let component_type = check.component_type();
        let timeout = self.config.check_timeout;
        let started = Instant::now();

        let task = tokio::spawn(async move {
            match tokio::time::timeout(timeout, check.check()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(HealthCheckError::Timeout {
                    component: check.name().to_string(),
                    timeout,
                }),
            }
        });

        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => Err(HealthCheckError::Panicked {
                component: name.clone(),
            }),
            Err(e) => Err(HealthCheckError::failed(&name, e)),
        };
        let elapsed = started.elapsed();

        self.metrics.observe(
            HEALTH_CHECK_SECONDS,
            elapsed.as_secs_f64(),
            &[("component", name.as_str())],
        );

        match outcome {
            Ok(mut health) => {
                health.response_time.get_or_insert(elapsed);
                health
            }
            Err(e) => {
                warn!(component = %name, error = %e, "Health check did not complete");
                ComponentHealth::unknown(name, component_type, e.to_string())
                    .with_response_time(elapsed)
                    .with_error_count(1)
            }
        }
    }

    async fn perform(self: &Arc<Self>) -> HealthCheckResult {
        let started = Instant::now();
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let checks: Vec<_> = self
            .checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let results = join_all(checks.into_iter().map(|check| self.run_isolated(check))).await;
        let components: HashMap<String, ComponentHealth> = results
            .into_iter()
            .map(|health| (health.name.clone(), health))
            .collect();

        let overall_status = HealthStatus::worst(components.values().map(|c| c.status));
        let summary = HealthSummary::from_components(components.values());
        let alerts = if self.config.alerts_enabled {
            let mut alerts: Vec<_> = components.values().filter_map(alert_for).collect();
            alerts.sort();
            alerts
        } else {
            Vec::new()
        };
        let total_check_time = started.elapsed();

        let result = HealthCheckResult {
            timestamp: Utc::now(),
            correlation_id,
            overall_status,
            performance: CheckPerformance {
                total_check_time,
                components_checked: components.len(),
                timestamp: Utc::now(),
            },
            components,
            summary,
            alerts,
        };

        self.metrics
            .observe(HEALTH_CYCLE_SECONDS, total_check_time.as_secs_f64(), &[]);
        self.publish(&result);

        info!(
            correlation_id = %result.correlation_id,
            overall = %result.overall_status,
            components = result.summary.total(),
            duration_ms = total_check_time.as_millis() as u64,
            "Health check completed"
        );
        for alert in &result.alerts {
            warn!(correlation_id = %result.correlation_id, alert = %alert, "Health alert");
        }
        result
    }

    /// Store the result in the cache and history, then clean the history
    /// in the background.
    fn publish(self: &Arc<Self>, result: &HealthCheckResult) {
        {
            let mut cache = self
                .component_cache
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            for (name, health) in &result.components {
                cache.insert(name.clone(), health.clone());
            }
        }

        self.lock_history().record(result);
        *self
            .last_result
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(result.clone());

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let removed = inner.lock_history().cleanup(Utc::now());
            if removed > 0 {
                debug!(removed, "Cleaned up health history");
            }
        });
    }
}

async fn monitoring_loop(inner: Arc<Inner>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        // A panicking cycle must not take the loop down with it
        let cycle = {
            let inner = Arc::clone(&inner);
            tokio::spawn(async move { inner.perform().await })
        };

        let pause: Duration = match cycle.await {
            Ok(result) => {
                debug!(overall = %result.overall_status, "Monitoring cycle finished");
                inner.config.check_interval
            }
            Err(e) => {
                error!(error = %e, "Monitoring cycle failed");
                inner.config.error_pause
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = shutdown_rx.changed() => break,
        }
    }
    debug!("Health monitoring loop exited");
}
