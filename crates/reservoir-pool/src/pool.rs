//! Generic bounded connection pool.
//!
//! Acquisition protocol:
//!
//! 1. Take a semaphore permit, waiting at most `connection_timeout`.
//!    There are exactly `max_size` permits. Every checked-out connection
//!    and every connection still being opened holds one, and a
//!    connection being opened is counted as pending until it lands. So
//!    `total + pending <= max_size` holds at all times: a caller only
//!    opens a connection after finding the idle set empty, and refills
//!    reserve their slot against that sum under the state lock.
//! 2. Pop idle connections oldest-first. Expired ones (past `max_lifetime`
//!    or `idle_timeout`) are closed, the first live one is validated and
//!    handed out. A failed validation discards it and the loop continues.
//! 3. With nothing idle, create a new connection with bounded retries.
//!
//! [`PooledConnection`] owns the permit and returns the connection to the
//! idle set when dropped, on every exit path of the caller including
//! cancellation.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use reservoir_core::{BackendError, PoolConfig, PoolError, PoolStats, WaitSamples};
use reservoir_observability::{
    MetricsSink, POOL_ACQUIRE_SECONDS, POOL_CONNECTION_ERRORS_TOTAL, POOL_EXHAUSTIONS_TOTAL,
    POOL_HEALTHY, noop_sink,
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backend::ConnectionBackend;

/// Connection errors tolerated within one `health_check_interval`
pub const MAX_RECENT_ERRORS: usize = 5;

/// Lifecycle of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Closed,
}

struct IdleEntry<C> {
    connection: C,
    created_at: Instant,
    last_used: Instant,
}

struct PoolState<C> {
    phase: PoolPhase,
    idle: VecDeque<IdleEntry<C>>,
    stats: PoolStats,
    wait_samples: WaitSamples,
    /// Newest error timestamps, at most `MAX_RECENT_ERRORS + 1`
    recent_errors: VecDeque<Instant>,
    /// Connections being opened that are not counted in `stats` yet
    pending_creations: usize,
}

impl<C> PoolState<C> {
    fn record_creation(&mut self) {
        self.stats.connection_creations += 1;
        self.stats.total_connections += 1;
        self.stats.record_peak();
    }

    fn record_closure(&mut self) {
        self.stats.total_connections = self.stats.total_connections.saturating_sub(1);
        self.stats.connection_closures += 1;
    }

    fn record_error(&mut self) {
        self.stats.connection_errors += 1;
        if self.recent_errors.len() > MAX_RECENT_ERRORS {
            self.recent_errors.pop_front();
        }
        self.recent_errors.push_back(Instant::now());
    }

    /// Errors recorded less than `window` ago, saturating past
    /// `MAX_RECENT_ERRORS + 1`.
    fn errors_within(&self, window: Duration, now: Instant) -> usize {
        self.recent_errors
            .iter()
            .filter(|at| now.saturating_duration_since(**at) < window)
            .count()
    }
}

/// Who a checkout is for. Health checks do not count as pool hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checkout {
    Caller,
    HealthCheck,
}

/// Counts a connection as pending while it is being opened
struct CreationSlot<'a, B: ConnectionBackend> {
    shared: &'a Shared<B>,
}

impl<B: ConnectionBackend> Drop for CreationSlot<'_, B> {
    fn drop(&mut self) {
        let mut state = self.shared.lock_state();
        state.pending_creations = state.pending_creations.saturating_sub(1);
    }
}

pub(crate) struct Shared<B: ConnectionBackend> {
    config: PoolConfig,
    backend: B,
    state: Mutex<PoolState<B::Connection>>,
    semaphore: Arc<Semaphore>,
    metrics: Arc<dyn MetricsSink>,
}

fn is_expired(config: &PoolConfig, created_at: Instant, last_used: Instant, now: Instant) -> bool {
    now.saturating_duration_since(created_at) >= config.max_lifetime
        || now.saturating_duration_since(last_used) >= config.idle_timeout
}

impl<B: ConnectionBackend> Shared<B> {
    fn lock_state(&self) -> MutexGuard<'_, PoolState<B::Connection>> {
        // Counters stay usable even if a holder panicked mid-update
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn phase(&self) -> PoolPhase {
        self.lock_state().phase
    }

    fn set_phase(&self, phase: PoolPhase) {
        self.lock_state().phase = phase;
    }

    fn not_initialized(&self) -> PoolError {
        PoolError::NotInitialized {
            pool: self.config.name.clone(),
        }
    }

    fn ensure_ready(&self) -> Result<(), PoolError> {
        if self.phase() == PoolPhase::Ready {
            Ok(())
        } else {
            Err(self.not_initialized())
        }
    }

    fn labels(&self) -> [(&str, &str); 1] {
        [("pool", self.name())]
    }

    fn record_error(&self) {
        self.lock_state().record_error();
        self.metrics
            .increment(POOL_CONNECTION_ERRORS_TOTAL, &self.labels());
    }

    fn record_exhaustion(&self) {
        {
            let mut state = self.lock_state();
            state.stats.pool_misses += 1;
            state.stats.pool_exhaustions += 1;
        }
        self.metrics.increment(POOL_EXHAUSTIONS_TOTAL, &self.labels());
    }

    fn record_wait(&self, wait: Duration) {
        {
            let mut state = self.lock_state();
            let average = state.wait_samples.record(wait);
            state.stats.average_wait_time = average;
        }
        self.metrics
            .observe(POOL_ACQUIRE_SECONDS, wait.as_secs_f64(), &self.labels());
    }

    async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<B>, PoolError> {
        let started = Instant::now();
        self.ensure_ready()?;

        let permit = {
            let _waiting = WaitingGuard::new(self);
            let acquire = Arc::clone(&self.semaphore).acquire_owned();
            match tokio::time::timeout(self.config.connection_timeout, acquire).await {
                Ok(Ok(permit)) => permit,
                // The semaphore is closed only by `close()`
                Ok(Err(_)) => return Err(self.not_initialized()),
                Err(_) => {
                    self.record_exhaustion();
                    warn!(
                        pool = %self.name(),
                        timeout_ms = self.config.connection_timeout.as_millis() as u64,
                        "Connection pool exhausted"
                    );
                    return Err(PoolError::ConnectionTimeout {
                        pool: self.config.name.clone(),
                        timeout: self.config.connection_timeout,
                    });
                }
            }
        };

        let connection = self.checkout(permit, Checkout::Caller).await?;
        self.record_wait(started.elapsed());
        Ok(connection)
    }

    async fn try_acquire(
        self: &Arc<Self>,
        purpose: Checkout,
    ) -> Result<PooledConnection<B>, PoolError> {
        self.ensure_ready()?;
        let permit = match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(self.not_initialized()),
            Err(TryAcquireError::NoPermits) => {
                return Err(PoolError::PoolExhausted {
                    pool: self.config.name.clone(),
                });
            }
        };
        self.checkout(permit, purpose).await
    }

    /// Turn a permit into a live connection.
    async fn checkout(
        self: &Arc<Self>,
        mut permit: OwnedSemaphorePermit,
        purpose: Checkout,
    ) -> Result<PooledConnection<B>, PoolError> {
        loop {
            let (candidate, expired) = self.take_idle();
            for connection in expired {
                self.close_raw(connection).await;
            }

            let Some(entry) = candidate else { break };
            let guard = PooledConnection::new(Arc::clone(self), entry.connection, entry.created_at, permit);

            if self.validate(&guard).await {
                if purpose == Checkout::Caller {
                    self.lock_state().stats.pool_hits += 1;
                }
                return Ok(guard);
            }

            warn!(pool = %self.name(), "Discarding connection that failed validation");
            let Some((connection, returned)) = guard.into_discarded(true) else {
                return Err(PoolError::ConnectionValidation {
                    pool: self.config.name.clone(),
                    message: "connection handle already released".to_string(),
                });
            };
            self.metrics
                .increment(POOL_CONNECTION_ERRORS_TOTAL, &self.labels());
            self.close_raw(connection).await;
            permit = returned;
        }

        let connection = {
            let _slot = self.creation_slot();
            let connection = self.create_with_retry().await?;
            let mut state = self.lock_state();
            state.record_creation();
            state.stats.active_connections += 1;
            connection
        };
        debug!(pool = %self.name(), "Created new connection");
        Ok(PooledConnection::new(
            Arc::clone(self),
            connection,
            Instant::now(),
            permit,
        ))
    }

    /// Count a connection as pending until the returned slot is dropped.
    ///
    /// Only permit holders that found the idle set empty call this, so the
    /// permit already bounds `total + pending`.
    fn creation_slot(&self) -> CreationSlot<'_, B> {
        self.lock_state().pending_creations += 1;
        CreationSlot { shared: self }
    }

    /// Reserve a refill slot while `total + pending` is below both
    /// `min_size` and `max_size`.
    fn refill_slot(&self) -> Option<CreationSlot<'_, B>> {
        let mut state = self.lock_state();
        let reserved = state.stats.total_connections + state.pending_creations;
        if reserved >= self.config.min_size || reserved >= self.config.max_size {
            return None;
        }
        state.pending_creations += 1;
        Some(CreationSlot { shared: self })
    }

    /// Pop the oldest live idle entry, collecting expired ones on the way.
    fn take_idle(&self) -> (Option<IdleEntry<B::Connection>>, Vec<B::Connection>) {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut state = self.lock_state();
        while let Some(entry) = state.idle.pop_front() {
            state.stats.idle_connections = state.stats.idle_connections.saturating_sub(1);
            if is_expired(&self.config, entry.created_at, entry.last_used, now) {
                state.record_closure();
                expired.push(entry.connection);
                continue;
            }
            state.stats.active_connections += 1;
            return (Some(entry), expired);
        }
        (None, expired)
    }

    async fn validate(&self, connection: &B::Connection) -> bool {
        tokio::time::timeout(
            self.config.validation_timeout,
            self.backend.validate(connection),
        )
        .await
        .unwrap_or(false)
    }

    async fn create_with_retry(&self) -> Result<B::Connection, PoolError> {
        let attempts = self.config.retry_attempts.max(1);
        let mut last_error = BackendError::Connect("no connection attempt was made".to_string());

        for attempt in 1..=attempts {
            match tokio::time::timeout(self.config.connection_timeout, self.backend.create()).await
            {
                Ok(Ok(connection)) => return Ok(connection),
                Ok(Err(e)) => last_error = e,
                Err(_) => last_error = BackendError::Timeout(self.config.connection_timeout),
            }

            self.record_error();
            warn!(
                pool = %self.name(),
                attempt,
                attempts,
                error = %last_error,
                "Connection creation failed"
            );
            if attempt < attempts {
                tokio::time::sleep(self.config.retry_backoff(attempt)).await;
            }
        }

        error!(
            pool = %self.name(),
            attempts,
            error = %last_error,
            "Giving up on connection creation"
        );
        Err(PoolError::Backend {
            pool: self.config.name.clone(),
            source: last_error,
        })
    }

    /// Close a connection whose removal was already counted.
    async fn close_raw(&self, connection: B::Connection) {
        let timeout = self.config.validation_timeout;
        match tokio::time::timeout(timeout, self.backend.close(connection)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(pool = %self.name(), error = %e, "Failed to close connection"),
            Err(_) => warn!(pool = %self.name(), "Timed out closing connection"),
        }
    }

    fn spawn_close(self: &Arc<Self>, connection: B::Connection) {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(self);
                handle.spawn(async move { shared.close_raw(connection).await });
            }
            Err(_) => {
                debug!(pool = %self.name(), "No runtime available, dropping connection");
                drop(connection);
            }
        }
    }

    /// Close idle connections that outlived `idle_timeout` or `max_lifetime`.
    async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let expired: VecDeque<_> = {
            let mut state = self.lock_state();
            let (live, expired): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut state.idle)
                .into_iter()
                .partition(|entry| !is_expired(&self.config, entry.created_at, entry.last_used, now));
            state.idle = live;
            for _ in &expired {
                state.record_closure();
            }
            state.stats.idle_connections = state.idle.len();
            expired
        };

        let count = expired.len();
        for entry in expired {
            self.close_raw(entry.connection).await;
        }
        if count > 0 {
            debug!(pool = %self.name(), evicted = count, "Recycled expired idle connections");
        }
        count
    }

    /// Create idle connections until `min_size` is reached or no slot is free.
    async fn replenish(&self) -> usize {
        let mut created = 0;
        loop {
            let Some(_slot) = self.refill_slot() else {
                break;
            };
            let Ok(_permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
                break;
            };
            match self.create_with_retry().await {
                Ok(connection) => {
                    let now = Instant::now();
                    let mut state = self.lock_state();
                    state.record_creation();
                    state.idle.push_back(IdleEntry {
                        connection,
                        created_at: now,
                        last_used: now,
                    });
                    state.stats.idle_connections += 1;
                    created += 1;
                }
                Err(e) => {
                    warn!(pool = %self.name(), error = %e, "Could not replenish pool to min_size");
                    break;
                }
            }
        }
        created
    }

    async fn health_check(self: &Arc<Self>) -> bool {
        if self.phase() != PoolPhase::Ready {
            return false;
        }

        self.evict_expired().await;
        self.replenish().await;

        let probe_ok = match self.try_acquire(Checkout::HealthCheck).await {
            Ok(_connection) => true,
            // Every slot is busy serving callers, which is not a failure
            Err(PoolError::PoolExhausted { .. }) => true,
            Err(e) => {
                warn!(pool = %self.name(), error = %e, "Pool health probe failed");
                false
            }
        };

        let healthy = {
            let mut state = self.lock_state();
            state.stats.last_health_check = Some(Utc::now());
            let errors = state.errors_within(self.config.health_check_interval, Instant::now());
            probe_ok && errors <= MAX_RECENT_ERRORS && state.phase == PoolPhase::Ready
        };

        self.metrics.set_gauge(
            POOL_HEALTHY,
            if healthy { 1.0 } else { 0.0 },
            &self.labels(),
        );
        healthy
    }
}

/// Tracks a caller blocked on the semaphore, also across cancellation
struct WaitingGuard<'a, B: ConnectionBackend> {
    shared: &'a Shared<B>,
}

impl<'a, B: ConnectionBackend> WaitingGuard<'a, B> {
    fn new(shared: &'a Shared<B>) -> Self {
        shared.lock_state().stats.waiting_connections += 1;
        Self { shared }
    }
}

impl<B: ConnectionBackend> Drop for WaitingGuard<'_, B> {
    fn drop(&mut self) {
        let mut state = self.shared.lock_state();
        state.stats.waiting_connections = state.stats.waiting_connections.saturating_sub(1);
    }
}

struct Maintenance {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Bounded pool of connections produced by a [`ConnectionBackend`]
pub struct ConnectionPool<B: ConnectionBackend> {
    shared: Arc<Shared<B>>,
    lifecycle: tokio::sync::Mutex<Option<Maintenance>>,
}

impl<B: ConnectionBackend> std::fmt::Debug for ConnectionPool<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("name", &self.shared.config.name)
            .field("kind", &self.shared.backend.kind())
            .field("phase", &self.phase())
            .finish()
    }
}

impl<B: ConnectionBackend> ConnectionPool<B> {
    pub fn new(config: PoolConfig, backend: B) -> Result<Self, PoolError> {
        Self::with_metrics(config, backend, noop_sink())
    }

    pub fn with_metrics(
        config: PoolConfig,
        backend: B,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let stats = PoolStats::new(config.name.clone());
        Ok(Self {
            shared: Arc::new(Shared {
                semaphore: Arc::new(Semaphore::new(config.max_size)),
                state: Mutex::new(PoolState {
                    phase: PoolPhase::Uninitialized,
                    idle: VecDeque::with_capacity(config.max_size),
                    stats,
                    wait_samples: WaitSamples::new(),
                    recent_errors: VecDeque::with_capacity(MAX_RECENT_ERRORS + 1),
                    pending_creations: 0,
                }),
                config,
                backend,
                metrics,
            }),
            lifecycle: tokio::sync::Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn backend(&self) -> &B {
        &self.shared.backend
    }

    pub fn phase(&self) -> PoolPhase {
        self.shared.phase()
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == PoolPhase::Ready
    }

    /// Copy of the current counters
    pub fn stats(&self) -> PoolStats {
        self.shared.lock_state().stats.clone()
    }

    /// Warm the pool to `min_size` and start background maintenance.
    ///
    /// Idempotent: a ready or closed pool is left untouched, and concurrent
    /// callers serialize on the lifecycle lock so setup runs once.
    pub async fn initialize(&self) -> Result<(), PoolError> {
        let mut maintenance = self.lifecycle.lock().await;
        match self.phase() {
            PoolPhase::Ready | PoolPhase::Closed => return Ok(()),
            _ => self.shared.set_phase(PoolPhase::Initializing),
        }

        let started = Instant::now();
        let mut warmed = Vec::with_capacity(self.shared.config.min_size);
        for _ in 0..self.shared.config.min_size {
            match self.shared.create_with_retry().await {
                Ok(connection) => warmed.push(connection),
                Err(e) => {
                    for connection in warmed {
                        self.shared.close_raw(connection).await;
                    }
                    self.shared.set_phase(PoolPhase::Uninitialized);
                    error!(pool = %self.name(), error = %e, "Connection pool initialization failed");
                    return Err(e);
                }
            }
        }

        {
            let now = Instant::now();
            let mut state = self.shared.lock_state();
            for connection in warmed {
                state.record_creation();
                state.idle.push_back(IdleEntry {
                    connection,
                    created_at: now,
                    last_used: now,
                });
            }
            state.stats.idle_connections = state.idle.len();
            state.phase = PoolPhase::Ready;
        }

        *maintenance = Some(spawn_maintenance(&self.shared));
        info!(
            pool = %self.name(),
            backend = %self.shared.backend.kind(),
            min_size = self.shared.config.min_size,
            max_size = self.shared.config.max_size,
            duration_ms = started.elapsed().as_millis() as u64,
            "Initialized connection pool"
        );
        Ok(())
    }

    /// Stop maintenance, fail pending waiters and close idle connections.
    ///
    /// Checked-out connections are closed as their guards are dropped.
    /// Idempotent; the last close failure, if any, is returned after every
    /// idle connection has been attempted.
    pub async fn close(&self) -> Result<(), PoolError> {
        let mut maintenance = self.lifecycle.lock().await;
        match self.phase() {
            PoolPhase::Closed => return Ok(()),
            PoolPhase::Uninitialized => {
                self.shared.semaphore.close();
                self.shared.set_phase(PoolPhase::Closed);
                return Ok(());
            }
            _ => self.shared.set_phase(PoolPhase::ShuttingDown),
        }

        if let Some(task) = maintenance.take() {
            let _ = task.shutdown.send(true);
            if let Err(e) = task.handle.await
                && e.is_panic()
            {
                warn!(pool = %self.name(), "Pool maintenance task panicked");
            }
        }

        self.shared.semaphore.close();

        let drained: Vec<_> = {
            let mut state = self.shared.lock_state();
            let drained: Vec<_> = state.idle.drain(..).collect();
            for _ in &drained {
                state.record_closure();
            }
            state.stats.idle_connections = 0;
            drained
        };

        let mut last_error = None;
        for entry in drained {
            let timeout = self.shared.config.validation_timeout;
            match tokio::time::timeout(timeout, self.shared.backend.close(entry.connection)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => last_error = Some(e),
                Err(_) => last_error = Some(BackendError::Timeout(timeout)),
            }
        }

        self.shared.set_phase(PoolPhase::Closed);
        info!(pool = %self.name(), "Closed connection pool");

        match last_error {
            Some(source) => Err(PoolError::Backend {
                pool: self.shared.config.name.clone(),
                source,
            }),
            None => Ok(()),
        }
    }

    /// Check out a connection, waiting up to `connection_timeout` for a slot.
    pub async fn get_connection(&self) -> Result<PooledConnection<B>, PoolError> {
        self.shared.acquire().await
    }

    /// Check out a connection only if a slot is free right now.
    pub async fn try_get_connection(&self) -> Result<PooledConnection<B>, PoolError> {
        self.shared.try_acquire(Checkout::Caller).await
    }

    /// Recycle expired idle connections, refill to `min_size` and probe one
    /// connection. Sets `last_health_check`.
    ///
    /// Unhealthy when the pool is not ready, the probe fails, or more than
    /// [`MAX_RECENT_ERRORS`] connection errors happened within the last
    /// `health_check_interval`. Reading the error window does not reset
    /// it, so concurrent health checks of the same pool agree. Their
    /// checkout is not counted in `pool_hits`.
    pub async fn health_check(&self) -> bool {
        self.shared.health_check().await
    }
}

fn spawn_maintenance<B: ConnectionBackend>(shared: &Arc<Shared<B>>) -> Maintenance {
    let (shutdown, mut shutdown_rx) = watch::channel(false);
    let weak = Arc::downgrade(shared);
    let interval = shared.config.health_check_interval;

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown_rx.changed() => break,
            }

            let Some(shared) = weak.upgrade() else { break };
            if shared.health_check().await {
                debug!(pool = %shared.name(), "Pool maintenance completed");
            } else {
                warn!(pool = %shared.name(), "Pool reported unhealthy during maintenance");
            }
        }
    });

    Maintenance { shutdown, handle }
}

/// Scoped handle to a pooled connection.
///
/// Dereferences to the backend connection. Dropping it returns the
/// connection to the idle set, or closes it when the pool is shutting
/// down, the handle was marked broken, or it outlived `max_lifetime`.
pub struct PooledConnection<B: ConnectionBackend> {
    shared: Arc<Shared<B>>,
    connection: Option<B::Connection>,
    permit: Option<OwnedSemaphorePermit>,
    created_at: Instant,
    broken: bool,
}

impl<B: ConnectionBackend> PooledConnection<B> {
    fn new(
        shared: Arc<Shared<B>>,
        connection: B::Connection,
        created_at: Instant,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            shared,
            connection: Some(connection),
            permit: Some(permit),
            created_at,
            broken: false,
        }
    }

    pub fn pool_name(&self) -> &str {
        self.shared.name()
    }

    /// Time since the underlying connection was opened
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Close the connection on release instead of returning it to the pool
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Detach connection and permit without returning either to the pool.
    fn into_discarded(mut self, count_error: bool) -> Option<(B::Connection, OwnedSemaphorePermit)> {
        let connection = self.connection.take()?;
        let permit = self.permit.take()?;
        let mut state = self.shared.lock_state();
        state.stats.active_connections = state.stats.active_connections.saturating_sub(1);
        state.record_closure();
        if count_error {
            state.record_error();
        }
        Some((connection, permit))
    }
}

impl<B: ConnectionBackend> std::fmt::Debug for PooledConnection<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.shared.config.name)
            .field("age", &self.age())
            .field("broken", &self.broken)
            .finish()
    }
}

impl<B: ConnectionBackend> Deref for PooledConnection<B> {
    type Target = B::Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("BUG: PooledConnection has None connection (this should never happen)")
    }
}

impl<B: ConnectionBackend> DerefMut for PooledConnection<B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("BUG: PooledConnection has None connection (this should never happen)")
    }
}

impl<B: ConnectionBackend> Drop for PooledConnection<B> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let now = Instant::now();
        let mut state = self.shared.lock_state();
        state.stats.active_connections = state.stats.active_connections.saturating_sub(1);

        let reusable = state.phase == PoolPhase::Ready
            && !self.broken
            && now.saturating_duration_since(self.created_at) < self.shared.config.max_lifetime;

        if reusable {
            state.idle.push_back(IdleEntry {
                connection,
                created_at: self.created_at,
                last_used: now,
            });
            state.stats.idle_connections += 1;
            drop(state);
        } else {
            state.record_closure();
            drop(state);
            self.shared.spawn_close(connection);
        }
        // The permit is released after the connection is back in the idle set
        self.permit.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_by_lifetime_and_idle_time() {
        let config = PoolConfig::builder("test")
            .idle_timeout(Duration::from_secs(10))
            .max_lifetime(Duration::from_secs(60))
            .build()
            .unwrap();
        let start = Instant::now();

        assert!(!is_expired(&config, start, start, start + Duration::from_secs(5)));
        assert!(is_expired(&config, start, start, start + Duration::from_secs(10)));
        assert!(is_expired(
            &config,
            start,
            start + Duration::from_secs(55),
            start + Duration::from_secs(61)
        ));
    }

    #[test]
    fn test_state_counters() {
        let mut state: PoolState<()> = PoolState {
            phase: PoolPhase::Ready,
            idle: VecDeque::new(),
            stats: PoolStats::new("test"),
            wait_samples: WaitSamples::new(),
            recent_errors: VecDeque::new(),
            pending_creations: 0,
        };
        state.record_creation();
        state.record_creation();
        state.record_closure();
        state.record_error();

        assert_eq!(state.stats.total_connections, 1);
        assert_eq!(state.stats.peak_connections, 2);
        assert_eq!(state.stats.connection_creations, 2);
        assert_eq!(state.stats.connection_closures, 1);
        assert_eq!(state.stats.connection_errors, 1);
        assert_eq!(state.recent_errors.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_window_is_bounded_and_ages_out() {
        let mut state: PoolState<()> = PoolState {
            phase: PoolPhase::Ready,
            idle: VecDeque::new(),
            stats: PoolStats::new("test"),
            wait_samples: WaitSamples::new(),
            recent_errors: VecDeque::new(),
            pending_creations: 0,
        };
        for _ in 0..20 {
            state.record_error();
        }
        let window = Duration::from_secs(60);

        assert_eq!(state.recent_errors.len(), MAX_RECENT_ERRORS + 1);
        assert_eq!(state.errors_within(window, Instant::now()), MAX_RECENT_ERRORS + 1);
        // Reading twice yields the same answer
        assert_eq!(state.errors_within(window, Instant::now()), MAX_RECENT_ERRORS + 1);
        assert_eq!(state.stats.connection_errors, 20);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(state.errors_within(window, Instant::now()), 0);
    }
}
