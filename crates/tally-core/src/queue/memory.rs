//! In-memory broker implementation.
//!
//! One priority heap per declared queue, plus a shared schedule of delayed
//! messages that are promoted to their queue once due. Deliveries are
//! late-ack: a delivery that is dropped without `ack` goes back on its queue.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::topology::Topology;
use crate::domain::{TaskEnvelope, TaskId};
use crate::ports::{Broker, BrokerError, Delivery, OutboundMessage, QueueCounts};

#[derive(Debug, Clone)]
struct StoredMessage {
    seq: u64,
    envelope: TaskEnvelope,
    retries: u32,
    redelivered: bool,
}

/// Ready entry. Higher priority first, then publish order.
#[derive(Debug)]
struct ReadyMessage {
    priority: u8,
    message: StoredMessage,
}

impl PartialEq for ReadyMessage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyMessage {}

impl PartialOrd for ReadyMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.message.seq.cmp(&self.message.seq))
    }
}

/// Delayed entry.
///
/// Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug)]
struct ScheduledMessage {
    due: Instant,
    queue: String,
    message: StoredMessage,
}

impl PartialEq for ScheduledMessage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScheduledMessage {}

impl PartialOrd for ScheduledMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.message.seq.cmp(&self.message.seq))
    }
}

#[derive(Debug)]
struct QueueState {
    max_priority: Option<u8>,
    ready: BinaryHeap<ReadyMessage>,
    unacked: usize,
    acked: u64,
    redelivered: u64,
}

impl QueueState {
    fn push(&mut self, message: StoredMessage) {
        // queues without max-priority ignore the field entirely
        let priority = match self.max_priority {
            Some(max) => message.envelope.priority().value().min(max),
            None => 0,
        };
        self.ready.push(ReadyMessage { priority, message });
    }
}

/// Publishes kept for inspection; older entries are dropped past this.
pub const PUBLISHED_LOG_CAPACITY: usize = 1024;

/// What a publish looked like on the wire. Kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
    pub task_id: TaskId,
    pub retries: u32,
    pub x_delay_ms: Option<u64>,
}

#[derive(Debug)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    scheduled: BinaryHeap<ScheduledMessage>,
    published: VecDeque<PublishedMessage>,
    next_seq: u64,
    cursor: usize,
    closed: bool,
}

impl BrokerState {
    /// Move delayed messages whose time has come onto their queue.
    fn promote_due(&mut self, now: Instant) {
        while let Some(entry) = self.scheduled.peek() {
            if entry.due > now {
                break;
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            if let Some(queue) = self.queues.get_mut(&entry.queue) {
                trace!(queue = %entry.queue, task_id = %entry.message.envelope.task_id(), "delayed message is due");
                queue.push(entry.message);
            }
        }
    }

    fn requeue(&mut self, queue: &str, mut message: StoredMessage) {
        if let Some(state) = self.queues.get_mut(queue) {
            state.unacked = state.unacked.saturating_sub(1);
            if self.closed {
                return;
            }
            message.redelivered = true;
            state.redelivered += 1;
            state.push(message);
        }
    }
}

struct Shared {
    topology: Arc<Topology>,
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl Shared {
    // std Mutex: deliveries settle from `Drop`, which cannot await
    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// In-process stand-in for a RabbitMQ broker with the delayed-message plugin.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new(topology: Arc<Topology>) -> Self {
        let queues = topology
            .queues
            .iter()
            .map(|q| {
                (
                    q.name.clone(),
                    QueueState {
                        max_priority: q.max_priority,
                        ready: BinaryHeap::new(),
                        unacked: 0,
                        acked: 0,
                        redelivered: 0,
                    },
                )
            })
            .collect();

        let state = BrokerState {
            queues,
            scheduled: BinaryHeap::new(),
            published: VecDeque::with_capacity(64),
            next_seq: 1,
            cursor: 0,
            closed: false,
        };
        Self {
            shared: Arc::new(Shared {
                topology,
                state: Mutex::new(state),
                notify: Notify::new(),
            }),
        }
    }

    /// Wake every consumer with `Closed`. Later publishes fail.
    pub fn close(&self) {
        self.shared.state().closed = true;
        self.shared.notify.notify_waiters();
    }

    /// The most recent publishes, oldest first, at most `PUBLISHED_LOG_CAPACITY`.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.shared.state().published.iter().cloned().collect()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError> {
        let binding = self
            .shared
            .topology
            .resolve(exchange, routing_key)
            .ok_or_else(|| BrokerError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            })?;

        {
            let mut state = self.shared.state();
            if state.closed {
                return Err(BrokerError::Closed);
            }
            if !state.queues.contains_key(&binding.queue) {
                return Err(BrokerError::UnknownQueue(binding.queue.clone()));
            }

            let x_delay_ms = message.x_delay_ms();
            let seq = state.next_seq;
            state.next_seq += 1;
            if state.published.len() == PUBLISHED_LOG_CAPACITY {
                state.published.pop_front();
            }
            state.published.push_back(PublishedMessage {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                queue: binding.queue.clone(),
                task_id: message.envelope.task_id(),
                retries: message.retries,
                x_delay_ms,
            });

            let stored = StoredMessage {
                seq,
                envelope: message.envelope,
                retries: message.retries,
                redelivered: false,
            };
            match message.delay.filter(|d| !d.is_zero()) {
                Some(delay) => {
                    debug!(queue = %binding.queue, delay_ms = x_delay_ms, "message held until due");
                    state.scheduled.push(ScheduledMessage {
                        due: Instant::now() + delay,
                        queue: binding.queue.clone(),
                        message: stored,
                    });
                }
                None => {
                    if let Some(queue) = state.queues.get_mut(&binding.queue) {
                        queue.push(stored);
                    }
                }
            }
        }

        self.shared.notify.notify_waiters();
        Ok(())
    }

    /// Cancel-safe: a message is only removed in the same poll that returns it.
    async fn consume(&self, queues: &[String]) -> Result<Box<dyn Delivery>, BrokerError> {
        loop {
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_due = {
                let mut state = self.shared.state();
                if state.closed {
                    return Err(BrokerError::Closed);
                }
                state.promote_due(Instant::now());

                let start = state.cursor;
                state.cursor = state.cursor.wrapping_add(1);
                for offset in 0..queues.len() {
                    let name = &queues[(start + offset) % queues.len()];
                    let queue = state
                        .queues
                        .get_mut(name)
                        .ok_or_else(|| BrokerError::UnknownQueue(name.clone()))?;
                    if let Some(ready) = queue.ready.pop() {
                        queue.unacked += 1;
                        return Ok(Box::new(InMemoryDelivery {
                            queue: name.clone(),
                            message: Some(ready.message),
                            shared: Arc::clone(&self.shared),
                        }));
                    }
                }

                state.scheduled.peek().map(|entry| entry.due)
            };

            match next_due {
                Some(due) => {
                    tokio::select! {
                        _ = &mut notified => {},
                        _ = tokio::time::sleep_until(due) => {},
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn counts(&self) -> Result<Vec<QueueCounts>, BrokerError> {
        let state = self.shared.state();
        let counts = self
            .shared
            .topology
            .queues
            .iter()
            .filter_map(|spec| {
                let queue = state.queues.get(&spec.name)?;
                Some(QueueCounts {
                    queue: spec.name.clone(),
                    ready: queue.ready.len(),
                    scheduled: state
                        .scheduled
                        .iter()
                        .filter(|s| s.queue == spec.name)
                        .count(),
                    unacked: queue.unacked,
                    acked: queue.acked,
                    redelivered: queue.redelivered,
                })
            })
            .collect();
        Ok(counts)
    }
}

struct InMemoryDelivery {
    queue: String,
    message: Option<StoredMessage>,
    shared: Arc<Shared>,
}

impl InMemoryDelivery {
    fn stored(&self) -> &StoredMessage {
        self.message
            .as_ref()
            .expect("message is present until the delivery is settled")
    }

    fn put_back(&mut self) {
        if let Some(message) = self.message.take() {
            self.shared.state().requeue(&self.queue, message);
            self.shared.notify.notify_waiters();
        }
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn envelope(&self) -> &TaskEnvelope {
        &self.stored().envelope
    }

    fn queue(&self) -> &str {
        &self.queue
    }

    fn retries(&self) -> u32 {
        self.stored().retries
    }

    fn redelivered(&self) -> bool {
        self.stored().redelivered
    }

    async fn ack(mut self: Box<Self>) -> Result<(), BrokerError> {
        if self.message.take().is_some() {
            let mut state = self.shared.state();
            if let Some(queue) = state.queues.get_mut(&self.queue) {
                queue.unacked = queue.unacked.saturating_sub(1);
                queue.acked += 1;
            }
        }
        Ok(())
    }

    async fn reject(mut self: Box<Self>) -> Result<(), BrokerError> {
        self.put_back();
        Ok(())
    }
}

impl Drop for InMemoryDelivery {
    fn drop(&mut self) {
        if self.message.is_some() {
            debug!(queue = %self.queue, "delivery dropped without ack, requeueing");
            self.put_back();
        }
    }
}
