// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Connection Pool
//!
//! Fixed-size async pool over any [`ConnectionManager`]. The SQLite store uses
//! it through [`crate::infrastructure::db::SqliteConnectionManager`].
//!
//! All bookkeeping (idle set, waiter queue, live count) sits behind a single
//! `parking_lot::Mutex` that is never held across an `.await`. Connection
//! creation, liveness probes and closes happen outside the lock with the slot
//! reserved in `size` beforehand, so the pool never exceeds `max_connections`
//! live connections.
//!
//! Callers receive a [`PoolConnection`] guard. Dropping it releases the
//! connection: the oldest queued waiter gets it directly, otherwise it goes
//! back to the idle set.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::node_config::PoolSettings;
use crate::domain::repository::RepositoryError;

/// Opens, probes and closes connections of one kind.
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    type Connection: Send + 'static;

    async fn connect(&self) -> Result<Self::Connection, PoolError>;

    /// Cheap liveness probe run before a connection is handed out.
    async fn is_valid(&self, conn: &mut Self::Connection) -> bool;

    async fn close(&self, conn: Self::Connection);
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("connection pool is shut down")]
    Closed,

    #[error("timed out after {0:?} waiting for a connection")]
    AcquireTimeout(Duration),

    #[error("pool exhausted: {live} of {target} connections alive and none could be created")]
    Exhausted { live: u32, target: u32 },

    #[error("failed to open connection: {0}")]
    Connect(String),
}

impl From<PoolError> for RepositoryError {
    fn from(err: PoolError) -> Self {
        RepositoryError::Unavailable(err.to_string())
    }
}

pub const MIN_CONNECTIONS: u32 = 1;
pub const MAX_CONNECTIONS: u32 = 100;
const MIN_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);
const MAX_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(60);
const MIN_IDLE_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(24 * 3600);
const MIN_HEALTH_INTERVAL: Duration = Duration::from_secs(1);
const MAX_HEALTH_INTERVAL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Target and ceiling for live connections.
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Idle connections older than this are recycled by the health check.
    pub idle_timeout: Duration,
    pub health_check_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// Bound every knob to a range that can neither spin nor hang forever.
    pub fn clamped(self) -> Self {
        let clamped = Self {
            max_connections: self.max_connections.clamp(MIN_CONNECTIONS, MAX_CONNECTIONS),
            acquire_timeout: self
                .acquire_timeout
                .clamp(MIN_ACQUIRE_TIMEOUT, MAX_ACQUIRE_TIMEOUT),
            idle_timeout: self.idle_timeout.clamp(MIN_IDLE_TIMEOUT, MAX_IDLE_TIMEOUT),
            health_check_interval: self
                .health_check_interval
                .clamp(MIN_HEALTH_INTERVAL, MAX_HEALTH_INTERVAL),
        };
        if clamped != self {
            warn!(requested = ?self, applied = ?clamped, "Pool configuration clamped");
        }
        clamped
    }
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            max_connections: settings.max_connections,
            acquire_timeout: Duration::from_millis(settings.acquire_timeout_ms),
            idle_timeout: Duration::from_secs(settings.idle_timeout_seconds),
            health_check_interval: Duration::from_secs(settings.health_check_interval_seconds),
        }
    }
}

/// Usage metadata kept alongside each live connection.
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    pub created_at: Instant,
    pub last_acquired: Option<Instant>,
    pub last_released: Option<Instant>,
    pub usage_count: u64,
}

/// One live connection plus its metadata. Owned by the pool or by exactly one
/// [`PoolConnection`] guard.
pub struct PooledConnection<C> {
    conn: C,
    meta: ConnectionMeta,
}

impl<C> PooledConnection<C> {
    fn new(conn: C) -> Self {
        Self {
            conn,
            meta: ConnectionMeta {
                created_at: Instant::now(),
                last_acquired: None,
                last_released: None,
                usage_count: 0,
            },
        }
    }

    fn idle_since(&self) -> Instant {
        self.meta.last_released.unwrap_or(self.meta.created_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// Live connections, idle or checked out.
    pub size: u32,
    pub idle: u32,
    pub waiting: u32,
    pub max: u32,
    pub closed: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    pub recycled: u32,
    pub created: u32,
    pub failed: u32,
}

struct Waiter<M: ConnectionManager> {
    id: u64,
    tx: oneshot::Sender<PoolConnection<M>>,
}

struct PoolState<M: ConnectionManager> {
    idle: VecDeque<PooledConnection<M::Connection>>,
    waiters: VecDeque<Waiter<M>>,
    /// Live plus reserved-for-creation slots.
    size: u32,
    closed: bool,
}

struct PoolInner<M: ConnectionManager> {
    manager: Arc<M>,
    config: PoolConfig,
    state: Mutex<PoolState<M>>,
    next_waiter: AtomicU64,
}

/// Async connection pool. Cheap to clone.
pub struct ConnectionPool<M: ConnectionManager> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> Clone for ConnectionPool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// RAII handle to a checked-out connection.
pub struct PoolConnection<M: ConnectionManager> {
    conn: Option<PooledConnection<M::Connection>>,
    pool: Arc<PoolInner<M>>,
}

impl<M: ConnectionManager> std::fmt::Debug for PoolConnection<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolConnection")
            .field("meta", &self.meta())
            .finish_non_exhaustive()
    }
}

impl<M: ConnectionManager> PoolConnection<M> {
    pub fn meta(&self) -> Option<&ConnectionMeta> {
        self.conn.as_ref().map(|c| &c.meta)
    }

    /// Close this connection instead of returning it, e.g. after an I/O error
    /// left it in an unknown state. A replacement is opened in the background
    /// if callers are queued.
    pub async fn discard(mut self) {
        if let Some(pooled) = self.conn.take() {
            self.pool.manager.close(pooled.conn).await;
            self.pool.forget_one();
        }
    }
}

impl<M: ConnectionManager> Deref for PoolConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &Self::Target {
        match &self.conn {
            Some(pooled) => &pooled.conn,
            None => unreachable!("connection is only taken on drop or discard"),
        }
    }
}

impl<M: ConnectionManager> DerefMut for PoolConnection<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match &mut self.conn {
            Some(pooled) => &mut pooled.conn,
            None => unreachable!("connection is only taken on drop or discard"),
        }
    }
}

impl<M: ConnectionManager> Drop for PoolConnection<M> {
    fn drop(&mut self) {
        if let Some(pooled) = self.conn.take() {
            PoolInner::release(&self.pool, pooled);
        }
    }
}

enum Next<M: ConnectionManager> {
    Idle(PooledConnection<M::Connection>),
    Create,
    Wait(u64, oneshot::Receiver<PoolConnection<M>>),
}

impl<M: ConnectionManager> PoolInner<M> {
    /// Return a connection: oldest live waiter first, else the idle set.
    fn release(this: &Arc<Self>, mut pooled: PooledConnection<M::Connection>) {
        pooled.meta.last_released = Some(Instant::now());

        let mut state = this.state.lock();
        if state.closed {
            state.size = state.size.saturating_sub(1);
            drop(state);
            this.close_detached(pooled.conn);
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            let guard = PoolConnection {
                conn: Some(pooled),
                pool: this.clone(),
            };
            match waiter.tx.send(guard) {
                Ok(()) => return,
                // Waiter gave up; reclaim without running the guard's Drop.
                Err(mut guard) => match guard.conn.take() {
                    Some(p) => pooled = p,
                    None => return,
                },
            }
        }

        state.idle.push_back(pooled);
    }

    /// Drop one slot from the live count and, if anyone is queued, try to
    /// open a replacement for them.
    fn forget_one(self: &Arc<Self>) {
        let replace = {
            let mut state = self.state.lock();
            state.size = state.size.saturating_sub(1);
            if !state.closed && !state.waiters.is_empty() && state.size < self.config.max_connections
            {
                state.size += 1;
                true
            } else {
                false
            }
        };
        if replace {
            self.spawn_replacement();
        }
    }

    fn spawn_replacement(self: &Arc<Self>) {
        let inner = self.clone();
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            inner.state.lock().size -= 1;
            return;
        };
        handle.spawn(async move {
            match inner.manager.connect().await {
                Ok(conn) => PoolInner::release(&inner, PooledConnection::new(conn)),
                Err(e) => {
                    warn!(error = %e, "Failed to open replacement connection");
                    let mut state = inner.state.lock();
                    state.size = state.size.saturating_sub(1);
                }
            }
        });
    }

    fn close_detached(&self, conn: M::Connection) {
        let manager = self.manager.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { manager.close(conn).await });
        }
    }
}

impl<M: ConnectionManager> ConnectionPool<M> {
    /// Build the pool and open `max_connections` connections up front. Fails
    /// only if not a single connection could be opened.
    pub async fn new(manager: M, config: PoolConfig) -> Result<Self, PoolError> {
        let config = config.clamped();
        let target = config.max_connections;
        let pool = Self {
            inner: Arc::new(PoolInner {
                manager: Arc::new(manager),
                config,
                state: Mutex::new(PoolState {
                    idle: VecDeque::with_capacity(target as usize),
                    waiters: VecDeque::new(),
                    size: 0,
                    closed: false,
                }),
                next_waiter: AtomicU64::new(0),
            }),
        };

        let mut last_error = None;
        for _ in 0..target {
            match pool.inner.manager.connect().await {
                Ok(conn) => {
                    let mut state = pool.inner.state.lock();
                    state.size += 1;
                    state.idle.push_back(PooledConnection::new(conn));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to open initial pool connection");
                    last_error = Some(e);
                }
            }
        }

        let size = pool.inner.state.lock().size;
        if size == 0 {
            return Err(last_error.unwrap_or(PoolError::Exhausted { live: 0, target }));
        }
        info!(size, target, "Connection pool ready");
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a connection, waiting up to `acquire_timeout` for one to be
    /// released when the pool is at capacity.
    pub async fn acquire(&self) -> Result<PoolConnection<M>, PoolError> {
        let timeout = self.inner.config.acquire_timeout;
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let next = {
                let mut state = self.inner.state.lock();
                if state.closed {
                    return Err(PoolError::Closed);
                }
                if let Some(pooled) = state.idle.pop_back() {
                    Next::Idle(pooled)
                } else if state.size < self.inner.config.max_connections {
                    state.size += 1;
                    Next::Create
                } else {
                    let id = self.inner.next_waiter.fetch_add(1, Ordering::Relaxed);
                    let (tx, rx) = oneshot::channel();
                    state.waiters.push_back(Waiter { id, tx });
                    Next::Wait(id, rx)
                }
            };

            match next {
                Next::Idle(pooled) => {
                    if let Some(conn) = self.checkout_if_valid(pooled).await {
                        return Ok(conn);
                    }
                }
                Next::Create => match self.inner.manager.connect().await {
                    Ok(conn) => return Ok(self.checkout(PooledConnection::new(conn))),
                    Err(e) => {
                        let mut state = self.inner.state.lock();
                        state.size = state.size.saturating_sub(1);
                        return Err(e);
                    }
                },
                Next::Wait(id, mut rx) => {
                    metrics::counter!("courier_pool_waits_total").increment(1);
                    let handed = match tokio::time::timeout_at(deadline, &mut rx).await {
                        Ok(Ok(guard)) => guard,
                        Ok(Err(_)) => return Err(PoolError::Closed),
                        Err(_) => {
                            let still_queued = {
                                let mut state = self.inner.state.lock();
                                let before = state.waiters.len();
                                state.waiters.retain(|w| w.id != id);
                                state.waiters.len() != before
                            };
                            if still_queued {
                                debug!(waiter = id, "Acquire timed out");
                                return Err(PoolError::AcquireTimeout(timeout));
                            }
                            // Released to us between the timeout and the lock.
                            match rx.try_recv() {
                                Ok(guard) => guard,
                                Err(_) => return Err(PoolError::Closed),
                            }
                        }
                    };
                    if let Some(conn) = self.revalidate(handed).await {
                        return Ok(conn);
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(PoolError::AcquireTimeout(timeout));
            }
        }
    }

    fn checkout(&self, mut pooled: PooledConnection<M::Connection>) -> PoolConnection<M> {
        pooled.meta.last_acquired = Some(Instant::now());
        pooled.meta.usage_count += 1;
        PoolConnection {
            conn: Some(pooled),
            pool: self.inner.clone(),
        }
    }

    /// Probe an idle connection; an invalid one is closed and its slot freed
    /// so the next loop iteration opens a fresh connection.
    async fn checkout_if_valid(
        &self,
        mut pooled: PooledConnection<M::Connection>,
    ) -> Option<PoolConnection<M>> {
        if self.inner.manager.is_valid(&mut pooled.conn).await {
            return Some(self.checkout(pooled));
        }
        warn!(usage_count = pooled.meta.usage_count, "Replacing invalid pooled connection");
        metrics::counter!("courier_pool_connections_replaced_total").increment(1);
        self.inner.manager.close(pooled.conn).await;
        let mut state = self.inner.state.lock();
        state.size = state.size.saturating_sub(1);
        None
    }

    async fn revalidate(&self, mut guard: PoolConnection<M>) -> Option<PoolConnection<M>> {
        let pooled = guard.conn.take()?;
        self.checkout_if_valid(pooled).await
    }

    /// Recycle idle connections past `idle_timeout` and top the pool back up
    /// to its target size.
    pub async fn health_check(&self) -> Result<HealthReport, PoolError> {
        let target = self.inner.config.max_connections;
        let idle_timeout = self.inner.config.idle_timeout;
        let now = Instant::now();

        let expired: Vec<_> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            let (expired, keep): (VecDeque<_>, VecDeque<_>) = state
                .idle
                .drain(..)
                .partition(|p| now.duration_since(p.idle_since()) >= idle_timeout);
            state.idle = keep;
            state.size = state.size.saturating_sub(expired.len() as u32);
            expired.into_iter().collect()
        };

        let mut report = HealthReport {
            recycled: expired.len() as u32,
            ..Default::default()
        };
        for pooled in expired {
            self.inner.manager.close(pooled.conn).await;
        }

        let deficit = {
            let mut state = self.inner.state.lock();
            let deficit = target.saturating_sub(state.size);
            state.size += deficit;
            deficit
        };

        for _ in 0..deficit {
            match self.inner.manager.connect().await {
                Ok(conn) => {
                    PoolInner::release(&self.inner, PooledConnection::new(conn));
                    report.created += 1;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to restore pool connection");
                    let mut state = self.inner.state.lock();
                    state.size = state.size.saturating_sub(1);
                    report.failed += 1;
                }
            }
        }

        if deficit > 0 && report.created == 0 {
            let live = self.inner.state.lock().size;
            error!(live, target, "Connection pool exhausted: no connection could be created");
            metrics::counter!("courier_pool_exhausted_total").increment(1);
            return Err(PoolError::Exhausted { live, target });
        }

        if report.recycled > 0 || report.failed > 0 {
            debug!(
                recycled = report.recycled,
                created = report.created,
                failed = report.failed,
                "Pool health check"
            );
        }
        Ok(report)
    }

    /// Run [`Self::health_check`] every `health_check_interval` until
    /// cancelled or the pool is shut down.
    pub fn spawn_health_check(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let pool = self.clone();
        let period = self.inner.config.health_check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => match pool.health_check().await {
                        Ok(_) => {}
                        Err(PoolError::Closed) => break,
                        Err(e) => error!(error = %e, "Pool health check failed"),
                    },
                }
            }
            debug!("Pool health check stopped");
        })
    }

    /// Reject every waiter and close all idle connections. Checked-out
    /// connections are closed as they are released. Idempotent.
    pub async fn shutdown(&self) {
        let idle: Vec<_> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            // Dropping the senders wakes every waiter with `Closed`.
            state.waiters.clear();
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.size = state.size.saturating_sub(idle.len() as u32);
            idle
        };

        let closed = idle.len();
        for pooled in idle {
            self.inner.manager.close(pooled.conn).await;
        }
        info!(closed, "Connection pool shut down");
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            size: state.size,
            idle: state.idle.len() as u32,
            waiting: state.waiters.len() as u32,
            max: self.inner.config.max_connections,
            closed: state.closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    struct MockConn {
        id: usize,
        healthy: Arc<AtomicBool>,
    }

    #[derive(Default)]
    struct MockManager {
        opened: AtomicUsize,
        closed: AtomicUsize,
        fail_connect: AtomicBool,
        /// Health flag shared by every connection opened so far.
        healthy: Arc<AtomicBool>,
    }

    impl MockManager {
        fn healthy() -> Self {
            Self {
                healthy: Arc::new(AtomicBool::new(true)),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl ConnectionManager for Arc<MockManager> {
        type Connection = MockConn;

        async fn connect(&self) -> Result<MockConn, PoolError> {
            if self.fail_connect.load(Ordering::SeqCst) {
                return Err(PoolError::Connect("refused".to_string()));
            }
            let id = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(MockConn {
                id,
                healthy: self.healthy.clone(),
            })
        }

        async fn is_valid(&self, conn: &mut MockConn) -> bool {
            conn.healthy.load(Ordering::SeqCst)
        }

        async fn close(&self, _conn: MockConn) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn config(max: u32) -> PoolConfig {
        PoolConfig {
            max_connections: max,
            acquire_timeout: Duration::from_millis(200),
            idle_timeout: Duration::from_secs(300),
            health_check_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_config_clamped() {
        let clamped = PoolConfig {
            max_connections: 500,
            acquire_timeout: Duration::ZERO,
            idle_timeout: Duration::from_secs(7 * 24 * 3600),
            health_check_interval: Duration::from_millis(1),
        }
        .clamped();
        assert_eq!(clamped.max_connections, 100);
        assert_eq!(clamped.acquire_timeout, Duration::from_millis(100));
        assert_eq!(clamped.idle_timeout, Duration::from_secs(24 * 3600));
        assert_eq!(clamped.health_check_interval, Duration::from_secs(1));

        let zero = PoolConfig {
            max_connections: 0,
            ..PoolConfig::default()
        }
        .clamped();
        assert_eq!(zero.max_connections, 1);
    }

    #[tokio::test]
    async fn test_new_fills_pool() {
        let manager = Arc::new(MockManager::healthy());
        let pool = ConnectionPool::new(manager.clone(), config(3)).await.unwrap();
        let status = pool.status();
        assert_eq!(status.size, 3);
        assert_eq!(status.idle, 3);
        assert_eq!(manager.opened.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_new_fails_when_nothing_connects() {
        let manager = Arc::new(MockManager::healthy());
        manager.fail_connect.store(true, Ordering::SeqCst);
        let err = ConnectionPool::new(manager, config(2)).await.err().unwrap();
        assert!(matches!(err, PoolError::Connect(_)));
    }

    #[tokio::test]
    async fn test_release_returns_to_idle_and_tracks_usage() {
        let manager = Arc::new(MockManager::healthy());
        let pool = ConnectionPool::new(manager, config(1)).await.unwrap();

        let conn = pool.acquire().await.unwrap();
        let first_id = conn.id;
        assert_eq!(conn.meta().unwrap().usage_count, 1);
        assert_eq!(pool.status().idle, 0);
        drop(conn);
        assert_eq!(pool.status().idle, 1);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id, first_id);
        assert_eq!(conn.meta().unwrap().usage_count, 2);
        assert!(conn.meta().unwrap().last_released.is_some());
    }

    #[tokio::test]
    async fn test_invalid_connection_is_replaced() {
        let manager = Arc::new(MockManager::healthy());
        let pool = ConnectionPool::new(manager.clone(), config(1)).await.unwrap();

        manager.healthy.store(false, Ordering::SeqCst);
        // New connections share the flag, so flip it back once the stale one
        // has been observed.
        let probe = {
            let manager = manager.clone();
            tokio::spawn(async move {
                while manager.closed.load(Ordering::SeqCst) == 0 {
                    tokio::task::yield_now().await;
                }
                manager.healthy.store(true, Ordering::SeqCst);
            })
        };

        let conn = pool.acquire().await.unwrap();
        probe.await.unwrap();
        assert_eq!(conn.id, 1);
        assert_eq!(manager.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status().size, 1);
    }

    #[tokio::test]
    async fn test_waiters_queue_and_never_exceed_max() {
        let manager = Arc::new(MockManager::healthy());
        let mut cfg = config(2);
        cfg.acquire_timeout = Duration::from_secs(5);
        let pool = ConnectionPool::new(manager.clone(), cfg).await.unwrap();

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|c| c.id) })
        };
        while pool.status().waiting == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!waiter.is_finished());
        assert_eq!(pool.status().size, 2);

        let released_id = a.id;
        drop(a);
        let got = waiter.await.unwrap().unwrap();
        assert_eq!(got, released_id);
        assert_eq!(manager.opened.load(Ordering::SeqCst), 2);
        drop(b);
    }

    #[tokio::test]
    async fn test_concurrent_load_respects_max() {
        let manager = Arc::new(MockManager::healthy());
        let mut cfg = config(3);
        cfg.acquire_timeout = Duration::from_secs(10);
        let pool = ConnectionPool::new(manager.clone(), cfg).await.unwrap();
        let in_use = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let pool = pool.clone();
            let in_use = in_use.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _conn = pool.acquire().await.unwrap();
                let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_use.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(manager.opened.load(Ordering::SeqCst), 3);
        assert_eq!(pool.status().idle, 3);
    }

    #[tokio::test]
    async fn test_acquire_timeout_removes_waiter() {
        let manager = Arc::new(MockManager::healthy());
        let pool = ConnectionPool::new(manager, config(1)).await.unwrap();
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, PoolError::AcquireTimeout(_)));
        assert_eq!(pool.status().waiting, 0);
    }

    #[tokio::test]
    async fn test_health_check_recycles_idle() {
        let manager = Arc::new(MockManager::healthy());
        let mut cfg = config(2);
        cfg.idle_timeout = Duration::from_secs(1);
        let pool = ConnectionPool::new(manager.clone(), cfg).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let report = pool.health_check().await.unwrap();
        assert_eq!(report.recycled, 2);
        assert_eq!(report.created, 2);
        assert_eq!(pool.status().size, 2);
        assert_eq!(manager.opened.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_health_check_reports_exhaustion() {
        let manager = Arc::new(MockManager::healthy());
        let mut cfg = config(1);
        cfg.idle_timeout = Duration::from_secs(1);
        let pool = ConnectionPool::new(manager.clone(), cfg).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1100)).await;
        manager.fail_connect.store(true, Ordering::SeqCst);
        let err = pool.health_check().await.unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { live: 0, target: 1 }));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_waiters_and_is_idempotent() {
        let manager = Arc::new(MockManager::healthy());
        let mut cfg = config(1);
        cfg.acquire_timeout = Duration::from_secs(5);
        let pool = ConnectionPool::new(manager.clone(), cfg).await.unwrap();
        let held = pool.acquire().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire().await.map(|_| ()) })
        };
        while pool.status().waiting == 0 {
            tokio::task::yield_now().await;
        }

        pool.shutdown().await;
        pool.shutdown().await;
        assert!(matches!(waiter.await.unwrap(), Err(PoolError::Closed)));
        assert!(matches!(pool.acquire().await, Err(PoolError::Closed)));

        drop(held);
        // Close of the released connection runs on a spawned task.
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.status().size, 0);
    }
}
