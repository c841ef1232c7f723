//! Static broker topology: exchanges, queues and their bindings.

use serde::Serialize;

use crate::domain::{MAX_PRIORITY, TaskType};

pub const SUBMISSION_EXCHANGE: &str = "submission_exchange";
pub const DELAYED_WINNER_EXCHANGE: &str = "delayed_winner_exchange";

pub const SUBMISSION_NORMAL_QUEUE: &str = "submission_normal_queue";
pub const SUBMISSION_PREMIUM_QUEUE: &str = "submission_premium_queue";
pub const WINNER_GENERATION_QUEUE: &str = "competition_winner_generation_queue";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    Direct,
    /// Holds each message for its `x-delay` before routing it.
    DelayedMessage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub name: String,
    pub kind: ExchangeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueSpec {
    pub name: String,
    pub durable: bool,
    /// `None` means plain FIFO.
    pub max_priority: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueBinding {
    pub exchange: String,
    pub routing_key: String,
    pub queue: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Topology {
    pub exchanges: Vec<Exchange>,
    pub queues: Vec<QueueSpec>,
    pub bindings: Vec<QueueBinding>,
}

impl Topology {
    /// The deployment layout: two priority submission queues behind a direct
    /// exchange and the FIFO winner queue behind the delayed-message exchange.
    pub fn standard(max_priority: u8) -> Self {
        let max_priority = max_priority.min(MAX_PRIORITY);
        let mut topology = Self::default()
            .exchange(SUBMISSION_EXCHANGE, ExchangeKind::Direct)
            .exchange(DELAYED_WINNER_EXCHANGE, ExchangeKind::DelayedMessage)
            .queue(SUBMISSION_NORMAL_QUEUE, Some(max_priority))
            .queue(SUBMISSION_PREMIUM_QUEUE, Some(max_priority))
            .queue(WINNER_GENERATION_QUEUE, None);

        for task_type in TaskType::ALL {
            let (exchange, queue) = match task_type {
                TaskType::NormalSubmission => (SUBMISSION_EXCHANGE, SUBMISSION_NORMAL_QUEUE),
                TaskType::PremiumSubmission => (SUBMISSION_EXCHANGE, SUBMISSION_PREMIUM_QUEUE),
                TaskType::WinnerTrigger => (DELAYED_WINNER_EXCHANGE, WINNER_GENERATION_QUEUE),
            };
            topology = topology.bind(exchange, task_type.routing_key(), queue);
        }
        topology
    }

    pub fn exchange(mut self, name: &str, kind: ExchangeKind) -> Self {
        self.exchanges.push(Exchange {
            name: name.to_string(),
            kind,
        });
        self
    }

    /// Declare a durable queue.
    pub fn queue(mut self, name: &str, max_priority: Option<u8>) -> Self {
        self.queues.push(QueueSpec {
            name: name.to_string(),
            durable: true,
            max_priority,
        });
        self
    }

    pub fn bind(mut self, exchange: &str, routing_key: &str, queue: &str) -> Self {
        self.bindings.push(QueueBinding {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            queue: queue.to_string(),
        });
        self
    }

    pub fn exchange_kind(&self, name: &str) -> Option<ExchangeKind> {
        self.exchanges.iter().find(|e| e.name == name).map(|e| e.kind)
    }

    pub fn queue_spec(&self, name: &str) -> Option<&QueueSpec> {
        self.queues.iter().find(|q| q.name == name)
    }

    /// Physical queue for `(exchange, routing_key)`.
    pub fn resolve(&self, exchange: &str, routing_key: &str) -> Option<&QueueBinding> {
        self.bindings
            .iter()
            .find(|b| b.exchange == exchange && b.routing_key == routing_key)
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.name.clone()).collect()
    }
}
