//! TaskProducer - タスクの投入側
//!
//! id と時刻は ports から取り、宛先は QueueRouter で解決します。

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::{Priority, TaskEnvelope, TaskError, TaskType};
use crate::ports::{Broker, Clock, IdGenerator, OutboundMessage};
use crate::queue::{DelayedDispatchGateway, QueueRouter};
use crate::typed::{PayloadCodec, Task, WinnerTrigger, WireBody};

#[derive(Clone)]
pub struct TaskProducer {
    broker: Arc<dyn Broker>,
    router: Arc<QueueRouter>,
    gateway: Arc<DelayedDispatchGateway>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl TaskProducer {
    pub fn new(
        broker: Arc<dyn Broker>,
        router: Arc<QueueRouter>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let gateway = Arc::new(DelayedDispatchGateway::new(
            Arc::clone(&broker),
            Arc::clone(&router),
            Arc::clone(&clock),
        ));
        Self {
            broker,
            router,
            gateway,
            clock,
            ids,
        }
    }

    fn envelope(&self, task_type: TaskType, payload: Vec<u8>, priority: Priority) -> Result<TaskEnvelope, TaskError> {
        let route = self.router.route(task_type)?;
        Ok(TaskEnvelope::new(
            self.ids.generate_task_id(),
            task_type,
            route.routing_key.clone(),
            payload,
            priority,
            self.clock.now(),
        ))
    }

    async fn publish(&self, envelope: TaskEnvelope) -> Result<TaskEnvelope, TaskError> {
        let route = self.router.route(envelope.task_type())?;
        self.broker
            .publish(
                &route.exchange,
                &route.routing_key,
                OutboundMessage::new(envelope.clone()),
            )
            .await?;
        debug!(
            task_id = %envelope.task_id(),
            task_type = %envelope.task_type(),
            priority = envelope.priority().value(),
            queue = %route.queue,
            "task enqueued"
        );
        Ok(envelope)
    }

    /// Enqueue for immediate delivery.
    pub async fn enqueue<T: Task>(
        &self,
        task_type: TaskType,
        task: &T,
        priority: Priority,
    ) -> Result<TaskEnvelope, TaskError> {
        if !T::TYPES.contains(&task_type) {
            return Err(TaskError::Fatal(format!(
                "{} is not a payload for {task_type}",
                std::any::type_name::<T>()
            )));
        }
        let payload = PayloadCodec::encode(task)?;
        let envelope = self.envelope(task_type, payload, priority)?;
        self.publish(envelope).await
    }

    /// Enqueue a body in the web application's wire format.
    pub async fn enqueue_wire(&self, body: &[u8], priority: Priority) -> Result<TaskEnvelope, TaskError> {
        let wire = WireBody::from_slice(body)?;
        let task_type = wire.task_type()?;
        let payload = wire.payload()?;
        let envelope = self.envelope(task_type, payload, priority)?;
        self.publish(envelope).await
    }

    /// Schedule winner generation once `delay` has passed.
    pub async fn schedule_winner_trigger(
        &self,
        task: &WinnerTrigger,
        delay: Duration,
    ) -> Result<TaskEnvelope, TaskError> {
        let payload = PayloadCodec::encode(task)?;
        let envelope = self.envelope(TaskType::WinnerTrigger, payload, Priority::LOWEST)?;
        self.gateway.schedule(envelope, delay).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::ports::{FixedClock, UlidGenerator};
    use crate::queue::topology::{
        DELAYED_WINNER_EXCHANGE, SUBMISSION_EXCHANGE, SUBMISSION_PREMIUM_QUEUE,
    };
    use crate::queue::{InMemoryBroker, Topology};
    use crate::typed::{CompetitionId, Submission};

    fn producer() -> (InMemoryBroker, TaskProducer) {
        let topology = Arc::new(Topology::standard(10));
        let broker = InMemoryBroker::new(Arc::clone(&topology));
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
        ));
        let producer = TaskProducer::new(
            Arc::new(broker.clone()),
            Arc::new(QueueRouter::new(topology).unwrap()),
            Arc::clone(&clock),
            Arc::new(UlidGenerator::new(clock)),
        );
        (broker, producer)
    }

    fn submission() -> Submission {
        Submission {
            competition_id: CompetitionId::Int(1),
            form_data: serde_json::json!({"q": 1}),
            email: None,
            phone_number: None,
        }
    }

    #[tokio::test]
    async fn enqueue_routes_by_task_type() {
        let (broker, producer) = producer();

        let env = producer
            .enqueue(TaskType::PremiumSubmission, &submission(), Priority::new(8).unwrap())
            .await
            .unwrap();

        let published = broker.published();
        assert_eq!(published[0].exchange, SUBMISSION_EXCHANGE);
        assert_eq!(published[0].queue, SUBMISSION_PREMIUM_QUEUE);
        assert_eq!(published[0].task_id, env.task_id());
        assert_eq!(env.routing_key(), "premium_submission");
    }

    #[tokio::test]
    async fn enqueue_rejects_payload_for_wrong_type() {
        let (broker, producer) = producer();
        let err = producer
            .enqueue(TaskType::WinnerTrigger, &submission(), Priority::LOWEST)
            .await
            .unwrap_err();
        assert!(matches!(err, TaskError::Fatal(_)));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn enqueue_wire_parses_producer_body() {
        let (_, producer) = producer();
        let body = br#"{"id":"a","task":"app.tasks.process_normal_submission","args":["{\"competitionId\":3,\"formData\":{}}"],"kwargs":{}}"#;

        let env = producer.enqueue_wire(body, Priority::LOWEST).await.unwrap();
        assert_eq!(env.task_type(), TaskType::NormalSubmission);
        assert_eq!(env.payload(), br#"{"competitionId":3,"formData":{}}"#);

        let bad = br#"{"id":"a","task":"app.tasks.unknown","args":["{}"]}"#;
        assert!(matches!(
            producer.enqueue_wire(bad, Priority::LOWEST).await,
            Err(TaskError::UnknownTaskType(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn winner_trigger_goes_through_delay_exchange() {
        let (broker, producer) = producer();

        let env = producer
            .schedule_winner_trigger(
                &WinnerTrigger {
                    competition_id: CompetitionId::Int(4),
                },
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        assert!(env.delivery_not_before().is_some());
        let published = broker.published();
        assert_eq!(published[0].exchange, DELAYED_WINNER_EXCHANGE);
        assert_eq!(published[0].x_delay_ms, Some(30_000));
    }
}
