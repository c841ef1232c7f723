//! Broker port - メッセージブローカー（RabbitMQ 相当）
//!
//! # 設計原則
//! - publish は (exchange, routing_key) で宛先キューを解決する
//! - consume は late-ack: `Delivery` を ack するまでメッセージは未確定
//! - ack されずに drop された `Delivery` は再配送される

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{TaskEnvelope, TaskError};

/// Header name the delay-capable exchange reads (milliseconds).
pub const X_DELAY_HEADER: &str = "x-delay";

/// A message on its way to an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub envelope: TaskEnvelope,

    /// Retry count carried across redeliveries, so another process continues
    /// the count instead of starting over.
    pub retries: u32,

    /// `x-delay` on a delayed-message exchange; retry countdown on a direct one.
    pub delay: Option<Duration>,
}

impl OutboundMessage {
    pub fn new(envelope: TaskEnvelope) -> Self {
        Self {
            envelope,
            retries: 0,
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Value of the `x-delay` header, if any.
    pub fn x_delay_ms(&self) -> Option<u64> {
        self.delay.map(|d| d.as_millis() as u64)
    }
}

/// Per-queue counters for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queue: String,
    pub ready: usize,
    pub scheduled: usize,
    pub unacked: usize,
    pub acked: u64,
    pub redelivered: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    #[error("no binding for exchange '{exchange}' with routing key '{routing_key}'")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },

    #[error("queue '{0}' is not declared")]
    UnknownQueue(String),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("broker is closed")]
    Closed,
}

impl From<BrokerError> for TaskError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Unroutable { .. } | BrokerError::UnknownQueue(_) => {
                TaskError::UnroutableTask(err.to_string())
            }
            BrokerError::Unavailable(_) | BrokerError::Closed => {
                TaskError::InfrastructureTransient(err.to_string())
            }
        }
    }
}

/// A claimed, not yet acknowledged message.
///
/// The worker owns this and must either `ack` or `reject`.
#[async_trait]
pub trait Delivery: Send {
    fn envelope(&self) -> &TaskEnvelope;

    /// Physical queue the message was claimed from.
    fn queue(&self) -> &str;

    fn retries(&self) -> u32;

    /// The broker already delivered this message once without an ack.
    fn redelivered(&self) -> bool;

    /// Settle: remove the message from the broker.
    async fn ack(self: Box<Self>) -> Result<(), BrokerError>;

    /// Put the message back on its queue for redelivery.
    async fn reject(self: Box<Self>) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        message: OutboundMessage,
    ) -> Result<(), BrokerError>;

    /// Wait until one message is ready on any of `queues` and claim it.
    async fn consume(&self, queues: &[String]) -> Result<Box<dyn Delivery>, BrokerError>;

    async fn counts(&self) -> Result<Vec<QueueCounts>, BrokerError>;
}
