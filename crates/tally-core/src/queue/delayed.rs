//! DelayedDispatchGateway - 遅延配送（x-delay）
//!
//! 遅延可能な exchange に bind された TaskType だけを受け付けます。
//! メッセージは遅延が過ぎるまでコンシューマから見えません。

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::router::QueueRouter;
use crate::domain::{TaskEnvelope, TaskError};
use crate::ports::{Broker, Clock, OutboundMessage};

pub struct DelayedDispatchGateway {
    broker: Arc<dyn Broker>,
    router: Arc<QueueRouter>,
    clock: Arc<dyn Clock>,
}

impl DelayedDispatchGateway {
    pub fn new(broker: Arc<dyn Broker>, router: Arc<QueueRouter>, clock: Arc<dyn Clock>) -> Self {
        Self {
            broker,
            router,
            clock,
        }
    }

    /// Publish `envelope` so it becomes visible after `delay`.
    ///
    /// Returns the envelope as published, with `delivery_not_before` stamped.
    pub async fn schedule(
        &self,
        envelope: TaskEnvelope,
        delay: Duration,
    ) -> Result<TaskEnvelope, TaskError> {
        let route = self.router.route(envelope.task_type())?;
        if !route.is_delayed() {
            return Err(TaskError::UnroutableTask(format!(
                "{} is not bound to a delayed-message exchange",
                envelope.task_type()
            )));
        }

        let offset = chrono::Duration::from_std(delay)
            .map_err(|e| TaskError::Fatal(format!("delay out of range: {e}")))?;
        let envelope = envelope.with_delivery_not_before(self.clock.now() + offset);

        let message = OutboundMessage::new(envelope.clone()).with_delay(delay);
        self.broker
            .publish(&route.exchange, &route.routing_key, message)
            .await?;

        info!(
            task_id = %envelope.task_id(),
            task_type = %envelope.task_type(),
            exchange = %route.exchange,
            delay_ms = delay.as_millis() as u64,
            "scheduled delayed task"
        );
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use ulid::Ulid;

    use super::*;
    use crate::domain::{Priority, TaskId, TaskType};
    use crate::ports::FixedClock;
    use crate::queue::memory::InMemoryBroker;
    use crate::queue::topology::{DELAYED_WINNER_EXCHANGE, Topology, WINNER_GENERATION_QUEUE};

    fn setup() -> (InMemoryBroker, DelayedDispatchGateway, Arc<FixedClock>) {
        let topology = Arc::new(Topology::standard(10));
        let broker = InMemoryBroker::new(Arc::clone(&topology));
        let router = Arc::new(QueueRouter::new(topology).unwrap());
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let gateway = DelayedDispatchGateway::new(
            Arc::new(broker.clone()),
            router,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (broker, gateway, clock)
    }

    fn envelope(task_type: TaskType) -> TaskEnvelope {
        TaskEnvelope::new(
            TaskId::from_ulid(Ulid(1)),
            task_type,
            task_type.routing_key(),
            br#"{"competitionId":42}"#.to_vec(),
            Priority::LOWEST,
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn stamps_not_before_and_sets_x_delay() {
        let (broker, gateway, clock) = setup();

        let scheduled = gateway
            .schedule(envelope(TaskType::WinnerTrigger), Duration::from_secs(15))
            .await
            .unwrap();

        assert_eq!(
            scheduled.delivery_not_before(),
            Some(clock.now() + chrono::Duration::seconds(15))
        );
        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].exchange, DELAYED_WINNER_EXCHANGE);
        assert_eq!(published[0].queue, WINNER_GENERATION_QUEUE);
        assert_eq!(published[0].x_delay_ms, Some(15_000));
    }

    #[tokio::test]
    async fn rejects_task_types_on_direct_exchanges() {
        let (broker, gateway, _) = setup();

        let err = gateway
            .schedule(envelope(TaskType::NormalSubmission), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::UnroutableTask(_)));
        assert!(broker.published().is_empty());
    }
}
