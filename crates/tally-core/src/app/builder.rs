//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - プロセス資源（pool）は start で 1 度だけ作り、shutdown で 1 度だけ閉じる

use std::sync::Arc;

use tracing::{info, warn};

use super::context::WorkerContext;
use super::executor::TaskExecutor;
use super::handlers::{SubmissionHandler, WinnerTriggerHandler};
use super::producer::TaskProducer;
use super::status::StatusReport;
use super::worker_loop::{Dispatcher, WorkerGroup};
use crate::config::{ConfigError, WorkerConfig};
use crate::domain::{SlotState, TaskError};
use crate::pool::{ConnectionPool, PoolError};
use crate::ports::{
    Broker, BrokerError, Cache, Clock, ConnectionFactory, IdGenerator, ResultStore, SystemClock,
    UlidGenerator,
};
use crate::queue::{QueueRouter, Topology};
use crate::retry::RetryEngine;
use crate::typed::{Handler, Handlers, Submission, WinnerTrigger};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new()
///     .broker(broker)
///     .database(db)
///     .cache(cache)
///     .results(results)
///     .config(config)
///     .build()?;
/// let running = app.start().await?;
/// ```
///
/// # Fail-fast 設計
/// - 必須の協調者（broker / database / cache / results）が欠けていれば BuildError
/// - 設定の検証とトポロジーの検証も build() で行う
#[derive(Default)]
pub struct AppBuilder {
    broker: Option<Arc<dyn Broker>>,
    database: Option<Arc<dyn ConnectionFactory>>,
    cache: Option<Arc<dyn Cache>>,
    results: Option<Arc<dyn ResultStore>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    submission: Option<Arc<dyn Handler<Submission>>>,
    winner_trigger: Option<Arc<dyn Handler<WinnerTrigger>>>,
    topology: Option<Topology>,
    config: WorkerConfig,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing collaborators: {0:?}")]
    MissingCollaborators(Vec<&'static str>),

    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("invalid topology: {0}")]
    Topology(TaskError),
}

/// StartupError は起動時（start）のエラー。どれもプロセスにとって致命的です。
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("connection pool: {0}")]
    Pool(#[from] PoolError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn database(mut self, factory: Arc<dyn ConnectionFactory>) -> Self {
        self.database = Some(factory);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn results(mut self, results: Arc<dyn ResultStore>) -> Self {
        self.results = Some(results);
        self
    }

    /// Defaults to the system clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to ULIDs from the configured clock.
    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn submission_handler(mut self, handler: impl Handler<Submission> + 'static) -> Self {
        self.submission = Some(Arc::new(handler));
        self
    }

    pub fn winner_trigger_handler(mut self, handler: impl Handler<WinnerTrigger> + 'static) -> Self {
        self.winner_trigger = Some(Arc::new(handler));
        self
    }

    /// Defaults to `Topology::standard(config.max_priority)`.
    pub fn topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let mut missing = Vec::new();
        if self.broker.is_none() {
            missing.push("broker");
        }
        if self.database.is_none() {
            missing.push("database");
        }
        if self.cache.is_none() {
            missing.push("cache");
        }
        if self.results.is_none() {
            missing.push("results");
        }
        let (Some(broker), Some(database), Some(cache), Some(results)) =
            (self.broker, self.database, self.cache, self.results)
        else {
            return Err(BuildError::MissingCollaborators(missing));
        };

        self.config.validate()?;

        let topology = self
            .topology
            .unwrap_or_else(|| Topology::standard(self.config.max_priority));
        let router = QueueRouter::new(Arc::new(topology)).map_err(BuildError::Topology)?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let handlers = Handlers {
            submission: self.submission.unwrap_or_else(|| Arc::new(SubmissionHandler)),
            winner_trigger: self
                .winner_trigger
                .unwrap_or_else(|| Arc::new(WinnerTriggerHandler)),
        };

        Ok(App {
            config: self.config,
            broker,
            database,
            cache,
            results,
            clock,
            ids,
            handlers,
            router: Arc::new(router),
        })
    }
}

/// App は検証済みの構成。`start()` で動き出す
pub struct App {
    config: WorkerConfig,
    broker: Arc<dyn Broker>,
    database: Arc<dyn ConnectionFactory>,
    cache: Arc<dyn Cache>,
    results: Arc<dyn ResultStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    handlers: Handlers,
    router: Arc<QueueRouter>,
}

impl App {
    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Producer that publishes through this app's broker and routing.
    pub fn producer(&self) -> TaskProducer {
        TaskProducer::new(
            Arc::clone(&self.broker),
            Arc::clone(&self.router),
            Arc::clone(&self.clock),
            Arc::clone(&self.ids),
        )
    }

    /// Create the pool, then spawn the worker slots.
    pub async fn start(self) -> Result<RunningApp, StartupError> {
        let producer = self.producer();
        let config = self.config;

        if config.concurrency > config.pool.max_connections as usize {
            warn!(
                slots = config.concurrency,
                max_connections = config.pool.max_connections,
                "more worker slots than pooled connections, slots will wait on the pool"
            );
        }

        let pool = ConnectionPool::connect(self.database, config.pool_config()).await?;
        let context = WorkerContext::new(
            pool.clone(),
            self.cache,
            Arc::clone(&self.clock),
            self.ids,
            config.simulated_work(),
        );
        let retry = Arc::new(RetryEngine::new(config.retry.clone()));
        let dispatcher = Arc::new(Dispatcher {
            broker: Arc::clone(&self.broker),
            router: self.router,
            executor: Arc::new(TaskExecutor::new(Arc::new(context), self.handlers)),
            retry: Arc::clone(&retry),
            results: self.results,
            clock: self.clock,
        });
        let workers = WorkerGroup::spawn(config.concurrency, dispatcher);

        info!(slots = config.concurrency, "worker started");
        Ok(RunningApp {
            workers,
            pool,
            broker: self.broker,
            retry,
            producer,
        })
    }
}

pub struct RunningApp {
    workers: WorkerGroup,
    pool: ConnectionPool,
    broker: Arc<dyn Broker>,
    retry: Arc<RetryEngine>,
    producer: TaskProducer,
}

impl RunningApp {
    pub fn producer(&self) -> &TaskProducer {
        &self.producer
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        self.workers.slot_states()
    }

    pub async fn status(&self) -> Result<StatusReport, BrokerError> {
        Ok(StatusReport {
            queues: self.broker.counts().await?,
            pool: self.pool.status(),
            slots: self.workers.slot_states(),
            tracked_retries: self.retry.tracked(),
        })
    }

    /// Stop claiming, wait for in-flight tasks, then close the pool.
    pub async fn shutdown(self) {
        info!("shutting down worker");
        self.workers.shutdown_and_join().await;
        self.pool.close().await;
        info!("worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::domain::{Priority, TaskType};
    use crate::impls::{InMemoryCache, InMemoryDatabase, InMemoryResultStore};
    use crate::ports::{Cache, DbError, TaskResult};
    use crate::queue::InMemoryBroker;
    use crate::typed::{CompetitionId, Submission, WinnerTrigger};

    struct Backends {
        broker: InMemoryBroker,
        db: InMemoryDatabase,
        cache: InMemoryCache,
        results: InMemoryResultStore,
    }

    fn backends() -> Backends {
        Backends {
            broker: InMemoryBroker::new(Arc::new(Topology::standard(10))),
            db: InMemoryDatabase::new(),
            cache: InMemoryCache::new(),
            results: InMemoryResultStore::new(),
        }
    }

    fn builder(b: &Backends) -> AppBuilder {
        AppBuilder::new()
            .broker(Arc::new(b.broker.clone()))
            .database(Arc::new(b.db.clone()))
            .cache(Arc::new(b.cache.clone()))
            .results(Arc::new(b.results.clone()))
            .config(WorkerConfig {
                concurrency: 2,
                simulated_work_ms: 100,
                ..WorkerConfig::default()
            })
    }

    async fn wait_for_results(results: &InMemoryResultStore, n: usize) {
        while results.all().len() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[test]
    fn build_reports_every_missing_collaborator() {
        let err = AppBuilder::new()
            .cache(Arc::new(InMemoryCache::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(
            err,
            BuildError::MissingCollaborators(missing) if missing == vec!["broker", "database", "results"]
        ));
    }

    #[test]
    fn build_rejects_invalid_config() {
        let b = backends();
        let err = builder(&b)
            .config(WorkerConfig {
                concurrency: 0,
                ..WorkerConfig::default()
            })
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::InvalidConfig(ConfigError::ZeroConcurrency)));
    }

    #[test]
    fn build_rejects_incomplete_topology() {
        let b = backends();
        let err = builder(&b)
            .topology(Topology::default())
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::Topology(TaskError::UnroutableTask(_))));
    }

    #[tokio::test]
    async fn pool_init_failure_is_fatal_at_start() {
        let b = backends();
        b.db.fail_next_connect(DbError::ConnectionRefused("database:5432".into()));

        let app = builder(&b).build().unwrap();
        let err = app.start().await.err().unwrap();
        assert!(matches!(err, StartupError::Pool(PoolError::Init(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn normal_submission_survives_one_transient_database_failure() {
        let b = backends();
        b.db.fail_next_execute(DbError::ConnectionLost("server closed the connection".into()));
        let app = builder(&b).build().unwrap().start().await.unwrap();

        let env = app
            .producer()
            .enqueue(
                TaskType::NormalSubmission,
                &Submission {
                    competition_id: CompetitionId::Int(77),
                    form_data: serde_json::json!({"answer": 3}),
                    email: Some("x@y.z".into()),
                    phone_number: None,
                },
                Priority::LOWEST,
            )
            .await
            .unwrap();

        wait_for_results(&b.results, 1).await;
        let status = app.status().await.unwrap();
        app.shutdown().await;

        let record = b.results.all().remove(0);
        assert_eq!(record.task_id, env.task_id());
        assert!(matches!(record.result, TaskResult::Succeeded { attempts: 2, .. }));
        assert_eq!(b.db.committed().len(), 1);
        assert_eq!(
            b.cache
                .get("competition:77:submissions:count")
                .await
                .unwrap()
                .as_deref(),
            Some("1")
        );
        assert_eq!(status.tracked_retries, 0);
        assert_eq!(b.db.live_connections(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_winner_trigger_runs_immediately() {
        let b = backends();
        let app = builder(&b).build().unwrap().start().await.unwrap();
        let start = tokio::time::Instant::now();

        app.producer()
            .schedule_winner_trigger(
                &WinnerTrigger {
                    competition_id: CompetitionId::Int(5),
                },
                Duration::ZERO,
            )
            .await
            .unwrap();

        wait_for_results(&b.results, 1).await;
        app.shutdown().await;

        assert!(start.elapsed() < Duration::from_secs(1));
        let record = b.results.all().remove(0);
        match record.result {
            TaskResult::Succeeded { message, attempts } => {
                assert_eq!(attempts, 1);
                assert!(message.contains("cached count absent"));
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_winner_trigger_waits_for_its_delay() {
        let b = backends();
        let app = builder(&b).build().unwrap().start().await.unwrap();
        let start = tokio::time::Instant::now();

        app.producer()
            .schedule_winner_trigger(
                &WinnerTrigger {
                    competition_id: CompetitionId::Int(5),
                },
                Duration::from_secs(15),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert!(b.results.all().is_empty());
        let status = app.status().await.unwrap();
        assert_eq!(status.backlog(), 1);

        wait_for_results(&b.results, 1).await;
        assert!(start.elapsed() >= Duration::from_secs(15));
        app.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_the_pool_and_stops_every_slot() {
        let b = backends();
        let app = builder(&b).build().unwrap().start().await.unwrap();
        let pool = app.pool.clone();

        tokio::task::yield_now().await;
        let slots = app.slot_states();
        assert_eq!(slots.len(), 2);

        app.shutdown().await;
        assert!(pool.status().closed);
        assert_eq!(b.db.live_connections(), 0);
    }
}
