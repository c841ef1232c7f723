//! WorkerContext - プロセス全体で共有する実行資源
//!
//! 起動時に 1 度だけ作成され、シャットダウンで破棄されます。
//! グローバル変数の代わりに明示的に handler へ渡します。

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use crate::domain::{TaskError, TaskId, TaskType};
use crate::pool::ConnectionPool;
use crate::ports::database::is_dml;
use crate::ports::{Cache, Clock, IdGenerator, QueryResult, SqlValue};

pub struct WorkerContext {
    pool: ConnectionPool,
    cache: Arc<dyn Cache>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    simulated_work: Duration,
}

impl WorkerContext {
    pub fn new(
        pool: ConnectionPool,
        cache: Arc<dyn Cache>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        simulated_work: Duration,
    ) -> Self {
        Self {
            pool,
            cache,
            clock,
            ids,
            simulated_work,
        }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    pub fn cache(&self) -> &dyn Cache {
        self.cache.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn ids(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    /// Stand-in for the business work a task performs.
    pub async fn simulate_work(&self) {
        if !self.simulated_work.is_zero() {
            tokio::time::sleep(self.simulated_work).await;
        }
    }

    /// Run one statement on a pooled connection.
    ///
    /// DML is committed before the connection goes back. On failure the
    /// statement is rolled back; a transient failure retires the connection.
    pub async fn run_query(&self, sql: &str, params: &[SqlValue]) -> Result<QueryResult, TaskError> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            warn!(query = sql, error = %e, "could not acquire connection");
            TaskError::from(e)
        })?;

        let result = match conn.execute(sql, params).await {
            Ok(result) if is_dml(sql) => conn.commit().await.map(|()| result),
            other => other,
        };

        match result {
            Ok(result) => {
                conn.release(true);
                Ok(result)
            }
            Err(err) => {
                error!(query = sql, error = %err, "database query failed");
                if let Err(rollback_err) = conn.rollback().await {
                    warn!(error = %rollback_err, "rollback failed");
                    conn.mark_unhealthy();
                }
                conn.release(!err.is_transient());
                Err(err.into())
            }
        }
    }
}

/// What a handler knows about the attempt it is running.
pub struct TaskContext<'a> {
    pub worker: &'a WorkerContext,
    pub worker_id: usize,
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub attempt_number: u32,
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::impls::{InMemoryCache, InMemoryDatabase};
    use crate::pool::PoolConfig;
    use crate::ports::{DbError, FixedClock, UlidGenerator};

    async fn context(db: &InMemoryDatabase) -> WorkerContext {
        let pool = ConnectionPool::connect(
            Arc::new(db.clone()),
            PoolConfig {
                min_connections: 1,
                max_connections: 2,
                acquire_timeout: Duration::from_secs(1),
            },
        )
        .await
        .unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        ));
        WorkerContext::new(
            pool,
            Arc::new(InMemoryCache::new()),
            Arc::clone(&clock),
            Arc::new(UlidGenerator::new(clock)),
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn dml_is_committed_and_connection_reused() {
        let db = InMemoryDatabase::new();
        let ctx = context(&db).await;

        ctx.run_query("INSERT INTO submission (competition_id) VALUES ($1)", &[SqlValue::Int(1)])
            .await
            .unwrap();
        ctx.run_query("UPDATE submission SET email = $1", &[SqlValue::Null])
            .await
            .unwrap();

        assert_eq!(db.committed().len(), 2);
        assert_eq!(db.opened(), 1);
        assert_eq!(ctx.pool().status().idle, 1);
    }

    #[tokio::test]
    async fn transient_failure_rolls_back_and_retires_connection() {
        let db = InMemoryDatabase::new();
        let ctx = context(&db).await;
        db.fail_next_execute(DbError::ConnectionLost("server closed".into()));

        let err = ctx
            .run_query("INSERT INTO submission (competition_id) VALUES ($1)", &[SqlValue::Int(1)])
            .await
            .unwrap_err();

        assert!(err.is_retryable());
        assert_eq!(db.rollbacks(), 1);
        assert_eq!(ctx.pool().status().open, 0);
        assert_eq!(ctx.pool().status().in_use, 0);

        ctx.run_query("SELECT 1", &[]).await.unwrap();
        assert_eq!(db.opened(), 2);
    }

    #[tokio::test]
    async fn query_error_is_fatal_and_keeps_connection() {
        let db = InMemoryDatabase::new();
        let ctx = context(&db).await;
        db.fail_next_execute(DbError::Query("column \"x\" does not exist".into()));

        let err = ctx.run_query("SELECT x FROM submission", &[]).await.unwrap_err();

        assert!(!err.is_retryable());
        assert_eq!(ctx.pool().status().idle, 1);
        assert_eq!(db.opened(), 1);
    }
}
