//! QueueRouter - TaskType から (exchange, queue, routing_key) への解決
//!
//! 起動時にトポロジーを検証し、どの TaskType もちょうど 1 つの binding に
//! 一致することを保証します（fail fast）。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use super::topology::{ExchangeKind, Topology};
use crate::domain::{TaskError, TaskType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub exchange: String,
    pub queue: String,
    pub routing_key: String,
    pub exchange_kind: ExchangeKind,
}

impl Route {
    pub fn is_delayed(&self) -> bool {
        self.exchange_kind == ExchangeKind::DelayedMessage
    }
}

#[derive(Debug, Clone)]
pub struct QueueRouter {
    topology: Arc<Topology>,
    routes: HashMap<TaskType, Route>,
}

impl QueueRouter {
    pub fn new(topology: Arc<Topology>) -> Result<Self, TaskError> {
        let mut routes = HashMap::with_capacity(TaskType::ALL.len());

        for task_type in TaskType::ALL {
            let key = task_type.routing_key();
            let mut matches = topology.bindings.iter().filter(|b| b.routing_key == key);

            let Some(binding) = matches.next() else {
                return Err(TaskError::UnroutableTask(format!(
                    "no binding for routing key '{key}'"
                )));
            };
            if matches.next().is_some() {
                return Err(TaskError::UnroutableTask(format!(
                    "routing key '{key}' is bound more than once"
                )));
            }

            let exchange_kind = topology.exchange_kind(&binding.exchange).ok_or_else(|| {
                TaskError::UnroutableTask(format!("exchange '{}' is not declared", binding.exchange))
            })?;
            if topology.queue_spec(&binding.queue).is_none() {
                return Err(TaskError::UnroutableTask(format!(
                    "queue '{}' is not declared",
                    binding.queue
                )));
            }

            routes.insert(
                task_type,
                Route {
                    exchange: binding.exchange.clone(),
                    queue: binding.queue.clone(),
                    routing_key: binding.routing_key.clone(),
                    exchange_kind,
                },
            );
        }

        Ok(Self { topology, routes })
    }

    pub fn route(&self, task_type: TaskType) -> Result<&Route, TaskError> {
        self.routes
            .get(&task_type)
            .ok_or_else(|| TaskError::UnroutableTask(task_type.to_string()))
    }

    /// Route by wire task name, e.g. `app.tasks.process_premium_submission`.
    pub fn route_name(&self, task_name: &str) -> Result<&Route, TaskError> {
        let task_type: TaskType = task_name.parse()?;
        self.route(task_type)
    }

    /// Every queue a worker consumes from, in declaration order.
    pub fn consumed_queues(&self) -> Vec<String> {
        self.topology.queue_names()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }
}
