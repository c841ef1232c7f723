use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;

use super::PoolInner;
use crate::ports::Connection;

/// Exclusive lease on one pooled connection.
///
/// Returned to the pool on drop. A lease marked unhealthy is discarded
/// instead and replaced by a later `acquire()`.
pub struct PooledConnection {
    conn: Option<Box<dyn Connection>>,
    healthy: bool,
    pool: Arc<PoolInner>,
    // dropped after `conn` is handed back, so a waiter sees the idle handle
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub(super) fn new(
        conn: Box<dyn Connection>,
        permit: OwnedSemaphorePermit,
        pool: Arc<PoolInner>,
    ) -> Self {
        Self {
            conn: Some(conn),
            healthy: true,
            pool,
            _permit: permit,
        }
    }

    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }

    /// End the lease explicitly.
    pub fn release(mut self, healthy: bool) {
        self.healthy = self.healthy && healthy;
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_deref()
            .expect("connection is present until the lease ends")
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_deref_mut()
            .expect("connection is present until the lease ends")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.give_back(conn, self.healthy);
        }
    }
}
