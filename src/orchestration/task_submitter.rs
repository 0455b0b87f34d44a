//! # Task Submitter
//!
//! Accepts a submission and hands it to the broker without waiting for
//! execution:
//!
//! 1. Resolve the task type (`NotRegistered` if unknown)
//! 2. Fail fast with `CircuitOpen` while the task type's breaker rejects calls
//! 3. Fail fast with a broker error if the broker connection is down
//! 4. Route to a queue, record the task as PENDING, enqueue with its eta
//!
//! Nothing is recorded or enqueued when any step fails.

use crate::error::{TaskerError, TaskerResult};
use crate::messaging::{TaskBroker, TaskMessage};
use crate::metrics;
use crate::models::{Task, TaskPriority};
use crate::orchestration::router::Router;
use crate::orchestration::task_store::TaskStore;
use crate::registry::TaskRegistry;
use crate::resilience::CircuitBreakerManager;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// One submission
#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub task_name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    /// Falls back to the task type's configured priority
    pub priority: Option<TaskPriority>,
    pub eta: Option<DateTime<Utc>>,
}

impl SubmitRequest {
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            task_name: task_name.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Map<String, Value>) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_eta(mut self, eta: DateTime<Utc>) -> Self {
        self.eta = Some(eta);
        self
    }

    /// Deliver no earlier than `countdown` from now
    pub fn with_countdown(mut self, countdown: std::time::Duration) -> Self {
        let delay = chrono::Duration::from_std(countdown).unwrap_or(chrono::Duration::zero());
        self.eta = Some(Utc::now() + delay);
        self
    }
}

#[derive(Clone)]
pub struct TaskSubmitter {
    registry: Arc<TaskRegistry>,
    breakers: CircuitBreakerManager,
    router: Router,
    broker: Arc<dyn TaskBroker>,
    store: TaskStore,
}

impl std::fmt::Debug for TaskSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSubmitter")
            .field("router", &self.router)
            .field("broker", &self.broker.provider_name())
            .finish_non_exhaustive()
    }
}

impl TaskSubmitter {
    pub fn new(
        registry: Arc<TaskRegistry>,
        breakers: CircuitBreakerManager,
        router: Router,
        broker: Arc<dyn TaskBroker>,
        store: TaskStore,
    ) -> Self {
        Self {
            registry,
            breakers,
            router,
            broker,
            store,
        }
    }

    pub async fn submit(&self, request: SubmitRequest) -> TaskerResult<Uuid> {
        let registered = self.registry.resolve(&request.task_name)?;

        if self.breakers.is_enabled() {
            let breaker = self.breakers.get_circuit_breaker(&registered.name);
            if !breaker.is_call_permitted() {
                metrics::record_circuit_rejection(&registered.name);
                warn!(
                    task_name = %registered.name,
                    state = %breaker.state(),
                    "Submission rejected by open circuit breaker"
                );
                return Err(TaskerError::CircuitOpen {
                    operation: registered.name.clone(),
                });
            }
        }

        if !self.broker.is_connected() {
            warn!(
                task_name = %registered.name,
                provider = self.broker.provider_name(),
                "Submission rejected: broker unavailable"
            );
            return Err(TaskerError::Broker(format!(
                "broker '{}' is not connected",
                self.broker.provider_name()
            )));
        }

        let priority = request.priority.unwrap_or(registered.config.priority);
        let queue = self.router.route_task(&registered.config, priority);
        let task = Task::new(
            registered.name.clone(),
            request.args,
            request.kwargs,
            priority,
            queue.clone(),
            request.eta,
        );
        let task_id = task.id;
        let message = TaskMessage::from_task(&task);

        // Record before enqueueing so a fast worker always finds the task
        self.store.insert(task);

        if let Err(e) = self.broker.enqueue(&queue, message).await {
            self.store.remove(task_id);
            warn!(
                task_id = %task_id,
                task_name = %registered.name,
                queue = %queue,
                error = %e,
                "Enqueue failed"
            );
            return Err(e.into());
        }

        metrics::record_task_submitted(&registered.name, &queue, priority.as_str());
        info!(
            task_id = %task_id,
            task_name = %registered.name,
            queue = %queue,
            priority = %priority,
            eta = ?request.eta,
            "Task submitted"
        );

        Ok(task_id)
    }
}
