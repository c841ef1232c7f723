//! WorkerLoop - タスク実行ループ
//!
//! # フロー（スロットごと、prefetch = 1）
//! 1. Broker::consume() で 1 件 claim（Idle → Claimed）
//! 2. RetryEngine::begin() で試行番号を確定（同じ TaskId の並行実行は拒否）
//! 3. TaskExecutor::execute()（Executing）
//! 4. RetryEngine::decide() の結果に従って ack / 再投入 / 失敗記録（Acknowledging）

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::executor::TaskExecutor;
use crate::domain::{Decision, DeliveryAttempt, Outcome, SlotState, TaskEnvelope, TaskError};
use crate::ports::{
    Broker, BrokerError, Clock, Delivery, OutboundMessage, ResultRecord, ResultStore, TaskResult,
};
use crate::queue::QueueRouter;
use crate::retry::{Admission, RetryEngine};

const CONSUME_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Everything a slot needs to take a delivery from claim to settlement.
pub struct Dispatcher {
    pub broker: Arc<dyn Broker>,
    pub router: Arc<QueueRouter>,
    pub executor: Arc<TaskExecutor>,
    pub retry: Arc<RetryEngine>,
    pub results: Arc<dyn ResultStore>,
    pub clock: Arc<dyn Clock>,
}

/// Observable per-slot state.
#[derive(Clone)]
pub struct SlotBoard {
    states: Arc<Mutex<Vec<SlotState>>>,
}

impl SlotBoard {
    fn new(slots: usize) -> Self {
        Self {
            states: Arc::new(Mutex::new(vec![SlotState::Idle; slots])),
        }
    }

    fn set(&self, slot: usize, state: SlotState) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(s) = states.get_mut(slot) {
            *s = state;
        }
    }

    pub fn snapshot(&self) -> Vec<SlotState> {
        self.states.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Worker group handle.
/// - `request_shutdown()` でどのスロットも新しい claim をやめる
/// - 実行中のタスクは最後まで走らせてから `shutdown_and_join()` が戻る
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    board: SlotBoard,
}

impl WorkerGroup {
    /// Spawn `slots` workers.
    pub fn spawn(slots: usize, dispatcher: Arc<Dispatcher>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let board = SlotBoard::new(slots);
        let queues = dispatcher.router.consumed_queues();

        let mut joins = Vec::with_capacity(slots);
        for slot in 0..slots {
            let dispatcher = Arc::clone(&dispatcher);
            let board = board.clone();
            let queues = queues.clone();
            let mut rx = shutdown_rx.clone();

            joins.push(tokio::spawn(async move {
                worker_loop(slot, dispatcher, queues, board, &mut rx).await;
            }));
        }

        info!(slots, "worker slots started");
        Self {
            shutdown_tx,
            joins,
            board,
        }
    }

    pub fn slot_states(&self) -> Vec<SlotState> {
        self.board.snapshot()
    }

    /// Stop claiming. In-flight executions are not cancelled.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all slots.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                error!(error = %e, "worker slot ended abnormally");
            }
        }
    }
}

async fn worker_loop(
    slot: usize,
    dispatcher: Arc<Dispatcher>,
    queues: Vec<String>,
    board: SlotBoard,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        board.set(slot, SlotState::Idle);

        // consume() は待つので shutdown と競合させる
        let claimed = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            claimed = dispatcher.broker.consume(&queues) => claimed,
        };

        let delivery = match claimed {
            Ok(delivery) => delivery,
            Err(BrokerError::Closed) => break,
            Err(e) => {
                warn!(worker = slot, error = %e, "consume failed");
                tokio::time::sleep(CONSUME_ERROR_BACKOFF).await;
                continue;
            }
        };
        board.set(slot, SlotState::Claimed);
        process(slot, &dispatcher, &board, delivery).await;
    }

    board.set(slot, SlotState::Stopped);
    debug!(worker = slot, "worker slot stopped");
}

async fn process(slot: usize, dispatcher: &Arc<Dispatcher>, board: &SlotBoard, delivery: Box<dyn Delivery>) {
    let envelope = delivery.envelope().clone();
    let task_id = envelope.task_id();

    let ticket = match dispatcher.retry.begin(&envelope, delivery.retries()) {
        Admission::Execute(ticket) => ticket,
        Admission::AlreadyInFlight => {
            warn!(worker = slot, %task_id, queue = delivery.queue(), "duplicate delivery of in-flight task, skipping");
            board.set(slot, SlotState::Acknowledging);
            settle_ack(slot, delivery).await;
            return;
        }
        Admission::Exhausted { attempts_made } => {
            board.set(slot, SlotState::Acknowledging);
            let error = TaskError::RetriesExhausted {
                attempts: attempts_made,
                last_error: "delivered again after its last attempt".to_string(),
            };
            give_up(slot, dispatcher, delivery, &envelope, attempts_made, error).await;
            return;
        }
    };
    board.set(slot, SlotState::Executing);

    // runs on its own task so a panic in task code only fails this delivery
    let execution = tokio::spawn({
        let executor = Arc::clone(&dispatcher.executor);
        let envelope = envelope.clone();
        let attempt_number = ticket.attempt_number;
        async move { executor.execute(slot, &envelope, attempt_number).await }
    });
    let attempt = match execution.await {
        Ok(attempt) => attempt,
        Err(e) if e.is_panic() => {
            board.set(slot, SlotState::Acknowledging);
            let outcome = Outcome::Fatal(TaskError::Fatal(format!("task panicked: {e}")));
            if let Decision::GiveUp {
                attempts_made,
                error,
            } = dispatcher.retry.decide(task_id, &outcome)
            {
                give_up(slot, dispatcher, delivery, &envelope, attempts_made, error).await;
            }
            return;
        }
        Err(e) => {
            error!(worker = slot, %task_id, error = %e, "task execution cancelled, returning delivery");
            dispatcher.retry.abandon(task_id);
            board.set(slot, SlotState::Acknowledging);
            if let Err(e) = delivery.reject().await {
                warn!(worker = slot, %task_id, error = %e, "reject failed");
            }
            return;
        }
    };

    board.set(slot, SlotState::Acknowledging);
    let decision = dispatcher.retry.decide(task_id, &attempt.outcome);
    match decision {
        Decision::Ack { attempts_made } => {
            if let Outcome::Success(message) = &attempt.outcome {
                let result = TaskResult::Succeeded {
                    message: message.clone(),
                    attempts: attempts_made,
                };
                record(dispatcher, &envelope, result).await;
            }
            settle_ack(slot, delivery).await;
        }
        Decision::Requeue {
            delay,
            attempts_made,
        } => requeue(slot, dispatcher, delivery, envelope, &attempt, delay, attempts_made).await,
        Decision::GiveUp {
            attempts_made,
            error,
        } => give_up(slot, dispatcher, delivery, &envelope, attempts_made, error).await,
    }
}

/// Record a permanent failure, then ack.
async fn give_up(
    slot: usize,
    dispatcher: &Dispatcher,
    delivery: Box<dyn Delivery>,
    envelope: &TaskEnvelope,
    attempts_made: u32,
    error: TaskError,
) {
    error!(
        worker = slot,
        task_id = %envelope.task_id(),
        task_type = %envelope.task_type(),
        attempts = attempts_made,
        error = %error,
        "task failed permanently"
    );
    let result = TaskResult::Failed {
        error: error.to_string(),
        attempts: attempts_made,
    };
    record(dispatcher, envelope, result).await;
    settle_ack(slot, delivery).await;
}

async fn requeue(
    slot: usize,
    dispatcher: &Dispatcher,
    delivery: Box<dyn Delivery>,
    envelope: TaskEnvelope,
    attempt: &DeliveryAttempt,
    delay: Duration,
    attempts_made: u32,
) {
    let task_id = envelope.task_id();
    let route = match dispatcher.router.route(envelope.task_type()) {
        Ok(route) => route,
        Err(e) => {
            error!(worker = slot, %task_id, error = %e, "cannot route retry");
            settle_ack(slot, delivery).await;
            return;
        }
    };

    let message = OutboundMessage::new(envelope.clone())
        .with_delay(delay)
        .with_retries(attempts_made);
    match dispatcher
        .broker
        .publish(&route.exchange, &route.routing_key, message)
        .await
    {
        Ok(()) => {
            info!(
                worker = slot,
                %task_id,
                attempt = attempt.attempt_number,
                delay_ms = delay.as_millis() as u64,
                error = attempt.error_detail().unwrap_or_default(),
                "task requeued for retry"
            );
            settle_ack(slot, delivery).await;
        }
        Err(e) => {
            // the delivery goes back instead and continues from the local count
            error!(worker = slot, %task_id, error = %e, "retry publish failed, rejecting delivery");
            dispatcher.retry.restore(&envelope, attempts_made);
            if let Err(e) = delivery.reject().await {
                warn!(worker = slot, %task_id, error = %e, "reject failed");
            }
        }
    }
}

async fn record(dispatcher: &Dispatcher, envelope: &TaskEnvelope, result: TaskResult) {
    let record = ResultRecord {
        task_id: envelope.task_id(),
        task_type: envelope.task_type(),
        result,
        recorded_at: dispatcher.clock.now(),
    };
    if let Err(e) = dispatcher.results.record(record).await {
        error!(task_id = %envelope.task_id(), error = %e, "failed to record task result");
    }
}

async fn settle_ack(slot: usize, delivery: Box<dyn Delivery>) {
    if let Err(e) = delivery.ack().await {
        warn!(worker = slot, error = %e, "ack failed");
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Utc;
    use ulid::Ulid;

    use super::*;
    use crate::app::context::{TaskContext, WorkerContext};
    use crate::app::handlers::WinnerTriggerHandler;
    use crate::domain::{Priority, TaskError, TaskId, TaskType};
    use crate::impls::{InMemoryCache, InMemoryDatabase, InMemoryResultStore};
    use crate::pool::{ConnectionPool, PoolConfig};
    use crate::ports::{SystemClock, UlidGenerator};
    use crate::queue::topology::SUBMISSION_EXCHANGE;
    use crate::queue::{InMemoryBroker, Topology};
    use crate::retry::RetryPolicies;
    use crate::typed::{Handler, Handlers, Submission};

    /// Fails with a transient error for the first `failures` calls.
    struct Flaky {
        failures: Mutex<u32>,
        hold: Duration,
    }

    #[async_trait]
    impl Handler<Submission> for Flaky {
        async fn handle(&self, _ctx: &TaskContext<'_>, task: Submission) -> Result<String, TaskError> {
            tokio::time::sleep(self.hold).await;
            let mut left = self.failures.lock().unwrap();
            if *left > 0 {
                *left -= 1;
                return Err(TaskError::InfrastructureTransient("db restarting".into()));
            }
            Ok(format!("stored {}", task.competition_id))
        }
    }

    struct Harness {
        broker: InMemoryBroker,
        results: InMemoryResultStore,
        dispatcher: Arc<Dispatcher>,
    }

    async fn harness(submission: impl Handler<Submission> + 'static) -> Harness {
        let topology = Arc::new(Topology::standard(10));
        let broker = InMemoryBroker::new(Arc::clone(&topology));
        let results = InMemoryResultStore::new();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pool = ConnectionPool::connect(Arc::new(InMemoryDatabase::new()), PoolConfig::default())
            .await
            .unwrap();
        let context = WorkerContext::new(
            pool,
            Arc::new(InMemoryCache::new()),
            Arc::clone(&clock),
            Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            Duration::ZERO,
        );
        let executor = TaskExecutor::new(
            Arc::new(context),
            Handlers::new(submission, WinnerTriggerHandler),
        );
        let dispatcher = Arc::new(Dispatcher {
            broker: Arc::new(broker.clone()),
            router: Arc::new(QueueRouter::new(topology).unwrap()),
            executor: Arc::new(executor),
            retry: Arc::new(RetryEngine::new(RetryPolicies::default())),
            results: Arc::new(results.clone()),
            clock,
        });
        Harness {
            broker,
            results,
            dispatcher,
        }
    }

    fn envelope(n: u128) -> TaskEnvelope {
        TaskEnvelope::new(
            TaskId::from_ulid(Ulid(n)),
            TaskType::NormalSubmission,
            "normal_submission",
            br#"{"competitionId":1}"#.to_vec(),
            Priority::LOWEST,
            Utc::now(),
        )
    }

    async fn publish(broker: &InMemoryBroker, env: TaskEnvelope) {
        broker
            .publish(SUBMISSION_EXCHANGE, "normal_submission", OutboundMessage::new(env))
            .await
            .unwrap();
    }

    async fn wait_for_results(results: &InMemoryResultStore, n: usize) {
        while results.all().len() < n {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_then_success_takes_two_attempts() {
        let h = harness(Flaky {
            failures: Mutex::new(1),
            hold: Duration::ZERO,
        })
        .await;
        publish(&h.broker, envelope(1)).await;

        let group = WorkerGroup::spawn(1, Arc::clone(&h.dispatcher));
        let start = tokio::time::Instant::now();
        wait_for_results(&h.results, 1).await;
        group.shutdown_and_join().await;

        let record = &h.results.all()[0];
        assert!(matches!(
            record.result,
            TaskResult::Succeeded { attempts: 2, .. }
        ));
        assert!(start.elapsed() >= Duration::from_secs(5));

        let published = h.broker.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[1].retries, 1);
        assert_eq!(published[1].x_delay_ms, Some(5_000));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_recorded_as_failure() {
        let h = harness(Flaky {
            failures: Mutex::new(u32::MAX),
            hold: Duration::ZERO,
        })
        .await;
        publish(&h.broker, envelope(1)).await;

        let group = WorkerGroup::spawn(2, Arc::clone(&h.dispatcher));
        wait_for_results(&h.results, 1).await;
        group.shutdown_and_join().await;

        let failures = h.results.failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(
            &failures[0].result,
            TaskResult::Failed { attempts: 3, error } if error.contains("retries exhausted")
        ));
        assert_eq!(h.broker.published().len(), 3);
        assert_eq!(h.dispatcher.retry.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_fails_once_without_retry() {
        let h = harness(Flaky {
            failures: Mutex::new(0),
            hold: Duration::ZERO,
        })
        .await;
        let bad = TaskEnvelope::new(
            TaskId::from_ulid(Ulid(3)),
            TaskType::NormalSubmission,
            "normal_submission",
            b"{{{".to_vec(),
            Priority::LOWEST,
            Utc::now(),
        );
        publish(&h.broker, bad).await;

        let group = WorkerGroup::spawn(1, Arc::clone(&h.dispatcher));
        wait_for_results(&h.results, 1).await;
        group.shutdown_and_join().await;

        assert!(matches!(
            h.results.failures()[0].result,
            TaskResult::Failed { attempts: 1, .. }
        ));
        assert_eq!(h.broker.published().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_of_in_flight_task_is_acked_and_skipped() {
        let h = harness(Flaky {
            failures: Mutex::new(0),
            hold: Duration::from_secs(2),
        })
        .await;
        publish(&h.broker, envelope(1)).await;
        publish(&h.broker, envelope(1)).await;

        let group = WorkerGroup::spawn(2, Arc::clone(&h.dispatcher));
        wait_for_results(&h.results, 1).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        group.shutdown_and_join().await;

        let counts = h.broker.counts().await.unwrap();
        let normal = counts
            .iter()
            .find(|c| c.queue == "submission_normal_queue")
            .unwrap();
        assert_eq!(normal.acked, 2);
        assert_eq!(normal.ready, 0);
        assert!(matches!(
            h.results.all()[0].result,
            TaskResult::Succeeded { attempts: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_lets_in_flight_task_finish() {
        let h = harness(Flaky {
            failures: Mutex::new(0),
            hold: Duration::from_secs(3),
        })
        .await;
        publish(&h.broker, envelope(1)).await;

        let group = WorkerGroup::spawn(1, Arc::clone(&h.dispatcher));
        while group.slot_states()[0] != SlotState::Executing {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        group.shutdown_and_join().await;

        assert_eq!(h.results.all().len(), 1);
        assert!(!h.results.all()[0].is_failure());
    }

    struct Panics;

    #[async_trait]
    impl Handler<Submission> for Panics {
        async fn handle(&self, _ctx: &TaskContext<'_>, _task: Submission) -> Result<String, TaskError> {
            panic!("handler bug");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_task_fails_once_and_is_not_redelivered() {
        let h = harness(Panics).await;
        publish(&h.broker, envelope(1)).await;

        let group = WorkerGroup::spawn(1, Arc::clone(&h.dispatcher));
        wait_for_results(&h.results, 1).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        group.shutdown_and_join().await;

        let failures = h.results.failures();
        assert_eq!(h.results.all().len(), 1);
        assert!(matches!(
            &failures[0].result,
            TaskResult::Failed { attempts: 1, error } if error.contains("panicked")
        ));
        let counts = h.broker.counts().await.unwrap();
        let normal = counts
            .iter()
            .find(|c| c.queue == "submission_normal_queue")
            .unwrap();
        assert_eq!(normal.acked, 1);
        assert_eq!(normal.redelivered, 0);
        assert_eq!(h.dispatcher.retry.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn delivery_past_its_last_attempt_is_recorded_as_failure() {
        let h = harness(Flaky {
            failures: Mutex::new(0),
            hold: Duration::ZERO,
        })
        .await;
        h.broker
            .publish(
                SUBMISSION_EXCHANGE,
                "normal_submission",
                OutboundMessage::new(envelope(1)).with_retries(3),
            )
            .await
            .unwrap();

        let group = WorkerGroup::spawn(1, Arc::clone(&h.dispatcher));
        wait_for_results(&h.results, 1).await;
        group.shutdown_and_join().await;

        assert!(matches!(
            &h.results.failures()[0].result,
            TaskResult::Failed { attempts: 3, error } if error.contains("retries exhausted")
        ));
        assert_eq!(h.dispatcher.retry.tracked(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_task_leaves_no_retry_state_while_waiting() {
        let h = harness(Flaky {
            failures: Mutex::new(1),
            hold: Duration::ZERO,
        })
        .await;
        publish(&h.broker, envelope(1)).await;

        let group = WorkerGroup::spawn(1, Arc::clone(&h.dispatcher));
        while h.broker.published().len() < 2 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        group.shutdown_and_join().await;

        // the retry waits on the broker; nothing is held locally for it
        assert_eq!(h.dispatcher.retry.tracked(), 0);
        assert!(h.results.all().is_empty());
    }
}
