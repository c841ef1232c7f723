//! ConnectionPool - DB コネクションプール
//!
//! # 設計
//! - プロセスごとに 1 つだけ作成し、シャットダウン時に `close()` する
//! - 同時貸し出し数は `max_connections` 個の Semaphore permit で制限
//! - 貸し出しは `PooledConnection`（RAII guard）で行い、どの経路で抜けても返却される
//! - 不健全なコネクションは返却時に破棄し、次の `acquire()` で補充する
//!
//! ```ignore
//! let pool = ConnectionPool::connect(factory, PoolConfig::default()).await?;
//! let mut conn = pool.acquire().await?;
//! conn.execute("SELECT 1", &[]).await?;
//! conn.release(true);
//! ```

mod guard;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

pub use self::guard::PooledConnection;
use crate::domain::TaskError;
use crate::ports::{Connection, ConnectionFactory, DbError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections opened eagerly by `connect()`.
    pub min_connections: u32,
    /// Hard cap on connections open at the same time.
    pub max_connections: u32,
    /// How long `acquire()` waits for a free slot before `Exhausted`.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("invalid pool config: {0}")]
    InvalidConfig(String),

    #[error("failed to initialize pool: {0}")]
    Init(DbError),

    #[error("no connection available within {0:?}")]
    Exhausted(Duration),

    #[error("failed to open connection: {0}")]
    Connect(DbError),

    #[error("pool is closed")]
    Closed,
}

impl From<PoolError> for TaskError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted(waited) => TaskError::PoolExhausted(waited),
            PoolError::InvalidConfig(_) => TaskError::Fatal(err.to_string()),
            PoolError::Init(_) | PoolError::Connect(_) | PoolError::Closed => {
                TaskError::InfrastructureTransient(err.to_string())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub idle: usize,
    pub in_use: usize,
    pub open: u32,
    pub max: u32,
    pub closed: bool,
}

pub(crate) struct PoolInner {
    factory: Arc<dyn ConnectionFactory>,
    config: PoolConfig,
    idle: Mutex<VecDeque<Box<dyn Connection>>>,
    permits: Arc<Semaphore>,
    open: AtomicU32,
    closed: AtomicBool,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Box<dyn Connection>>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called by the guard when a lease ends.
    pub(crate) fn give_back(&self, conn: Box<dyn Connection>, healthy: bool) {
        if healthy && !self.closed.load(Ordering::Acquire) {
            self.idle().push_back(conn);
            return;
        }
        drop(conn);
        let open = self.open.fetch_sub(1, Ordering::AcqRel) - 1;
        if healthy {
            debug!(open, "connection returned after close, discarded");
        } else {
            warn!(open, "discarded unhealthy connection");
        }
    }
}

/// Bounded pool of database connections shared by every worker slot.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create the pool and pre-warm `min_connections`.
    ///
    /// Failure here is fatal for worker startup.
    pub async fn connect(
        factory: Arc<dyn ConnectionFactory>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        if config.max_connections == 0 {
            return Err(PoolError::InvalidConfig(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if config.min_connections > config.max_connections {
            return Err(PoolError::InvalidConfig(format!(
                "min_connections ({}) exceeds max_connections ({})",
                config.min_connections, config.max_connections
            )));
        }

        let mut idle = VecDeque::with_capacity(config.max_connections as usize);
        for _ in 0..config.min_connections {
            let conn = factory.connect().await.map_err(PoolError::Init)?;
            idle.push_back(conn);
        }

        info!(
            min = config.min_connections,
            max = config.max_connections,
            acquire_timeout_ms = config.acquire_timeout.as_millis() as u64,
            "connection pool initialized"
        );

        let inner = PoolInner {
            factory,
            permits: Arc::new(Semaphore::new(config.max_connections as usize)),
            open: AtomicU32::new(idle.len() as u32),
            idle: Mutex::new(idle),
            closed: AtomicBool::new(false),
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Borrow a connection, waiting up to `acquire_timeout` for a free slot.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(PoolError::Closed);
        }

        let timeout = self.inner.config.acquire_timeout;
        let permit =
            match tokio::time::timeout(timeout, Arc::clone(&self.inner.permits).acquire_owned())
                .await
            {
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => return Err(PoolError::Closed),
                Err(_) => {
                    warn!(
                        waited_ms = timeout.as_millis() as u64,
                        max = self.inner.config.max_connections,
                        "connection pool exhausted"
                    );
                    return Err(PoolError::Exhausted(timeout));
                }
            };

        let reused = self.inner.idle().pop_front();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                // permit is released on the error path when it goes out of scope
                let conn = self
                    .inner
                    .factory
                    .connect()
                    .await
                    .map_err(PoolError::Connect)?;
                let open = self.inner.open.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(open, "opened new pooled connection");
                conn
            }
        };

        Ok(PooledConnection::new(conn, permit, Arc::clone(&self.inner)))
    }

    /// Stop lending and drop every idle handle.
    ///
    /// Connections still leased are dropped when their guard is released.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.permits.close();

        let drained: Vec<_> = self.inner.idle().drain(..).collect();
        let dropped = drained.len() as u32;
        drop(drained);
        let open = self.inner.open.fetch_sub(dropped, Ordering::AcqRel) - dropped;

        info!(closed_idle = dropped, still_leased = open, "connection pool closed");
    }

    pub fn status(&self) -> PoolStatus {
        let closed = self.inner.closed.load(Ordering::Acquire);
        let max = self.inner.config.max_connections;
        let in_use = if closed {
            0
        } else {
            (max as usize).saturating_sub(self.inner.permits.available_permits())
        };
        PoolStatus {
            idle: self.inner.idle().len(),
            in_use,
            open: self.inner.open.load(Ordering::Acquire),
            max,
            closed,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }
}
