//! # Task Service
//!
//! The public face of the execution core. A `TaskService` owns every
//! component (registry, breakers, result cache, task store, submitter and
//! worker pool) and is passed by reference to whatever needs it; there is no
//! module-level state.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use serde_json::json;
//! use std::time::Duration;
//! use tasker_resilient_queue::config::{TaskConfig, TaskerConfig};
//! use tasker_resilient_queue::models::TaskPriority;
//! use tasker_resilient_queue::orchestration::TaskService;
//! use tasker_resilient_queue::registry::handler_fn;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = TaskService::builder()
//!     .config(TaskerConfig::default())
//!     .task(
//!         "add",
//!         handler_fn(|_ctx, args, _kwargs| async move {
//!             let sum: i64 = args.iter().filter_map(|v| v.as_i64()).sum();
//!             Ok(json!(sum))
//!         }),
//!         TaskConfig::default(),
//!     )
//!     .build()
//!     .await?;
//! service.start().await?;
//!
//! let task_id = service
//!     .submit_task("add", vec![json!(2), json!(3)], Default::default(), Some(TaskPriority::Normal), None)
//!     .await?;
//! let outcome = service.get_task_result(task_id, Duration::from_secs(5)).await?;
//! assert_eq!(outcome.result, Some(json!(5)));
//!
//! service.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::cache::{CacheProvider, ResultCache};
use crate::config::{ConfigManager, TaskConfig, TaskerConfig};
use crate::error::{TaskerError, TaskerResult};
use crate::logging;
use crate::messaging::{InMemoryBroker, MessageState, QueueStats, TaskBroker};
use crate::models::{TaskOutcome, TaskPriority, TaskStatus};
use crate::orchestration::error_handler::ErrorHandler;
use crate::orchestration::executor::{ExecutorConfig, ExecutorContext, TaskExecutor};
use crate::orchestration::rate_limiter::RateLimiter;
use crate::orchestration::router::Router;
use crate::orchestration::task_store::{RevokeOutcome, TaskStore};
use crate::orchestration::task_submitter::{SubmitRequest, TaskSubmitter};
use crate::registry::{TaskHandler, TaskRegistry, TaskRegistryBuilder};
use crate::resilience::{
    CircuitBreakerManager, CircuitBreakerState, SystemCircuitBreakerMetrics,
};
use crate::retry::{CancellationSignal, RetryCoordinator};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

pub struct TaskService {
    config: Arc<TaskerConfig>,
    registry: Arc<TaskRegistry>,
    broker: Arc<dyn TaskBroker>,
    store: TaskStore,
    cache: ResultCache,
    breakers: CircuitBreakerManager,
    router: Router,
    submitter: TaskSubmitter,
    executor: Arc<TaskExecutor>,
    /// Set by `shutdown`, cleared by `start`
    stopped: AtomicBool,
    sweeper: Mutex<Option<(JoinHandle<()>, CancellationSignal)>>,
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService")
            .field("service_name", &self.config.service_name)
            .field("registry", &self.registry)
            .field("broker", &self.broker.provider_name())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

impl TaskService {
    pub fn builder() -> TaskServiceBuilder {
        TaskServiceBuilder::default()
    }

    /// Service over an in-memory broker with the given configuration
    pub async fn in_memory(config: TaskerConfig) -> TaskerResult<Self> {
        Self::builder().config(config).build().await
    }

    async fn assemble(
        config: TaskerConfig,
        broker: Arc<dyn TaskBroker>,
        registry: TaskRegistry,
    ) -> TaskerResult<Self> {
        config.validate()?;

        let router = Router::new(config.queues.clone());
        let queues = router.queues_in_priority_order();
        for queue in &queues {
            broker.ensure_queue(queue).await?;
        }

        let registry = Arc::new(registry);
        let store = TaskStore::new();
        let cache = ResultCache::new(
            CacheProvider::from_config(&config.cache),
            config.cache.result_ttl(),
        );
        let breakers = CircuitBreakerManager::from_config(&config.circuit_breaker);
        let error_handler = Arc::new(ErrorHandler::new(config.service_name.clone()));

        let submitter = TaskSubmitter::new(
            Arc::clone(&registry),
            breakers.clone(),
            router.clone(),
            Arc::clone(&broker),
            store.clone(),
        );

        let executor = Arc::new(TaskExecutor::new(
            ExecutorContext {
                broker: Arc::clone(&broker),
                registry: Arc::clone(&registry),
                store: store.clone(),
                cache: cache.clone(),
                breakers: breakers.clone(),
                coordinator: RetryCoordinator::new(error_handler),
                rate_limiter: RateLimiter::new(),
            },
            ExecutorConfig {
                concurrency: config.worker.concurrency,
                poll_interval: config.worker.poll_interval(),
                queues,
            },
        ));

        info!(
            service_name = %config.service_name,
            broker = broker.provider_name(),
            cache = cache.is_enabled(),
            registered_tasks = registry.len(),
            "Task service initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            registry,
            broker,
            store,
            cache,
            breakers,
            router,
            submitter,
            executor,
            stopped: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &TaskerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn broker(&self) -> &Arc<dyn TaskBroker> {
        &self.broker
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Start the worker pool and, with caching enabled, the expired result sweep
    pub async fn start(&self) -> TaskerResult<()> {
        self.stopped.store(false, Ordering::Release);
        if !self.executor.start() {
            warn!("Task service already started");
            return Ok(());
        }

        if self.cache.is_enabled() {
            let shutdown = CancellationSignal::new();
            let handle = self
                .cache
                .spawn_sweeper(self.config.cache.sweep_interval(), shutdown.clone());
            if let Some((previous, signal)) = self.sweeper.lock().replace((handle, shutdown)) {
                signal.cancel();
                previous.abort();
            }
        }
        Ok(())
    }

    /// Stop the worker pool, waiting up to the configured shutdown timeout
    /// for in-flight tasks. Later submissions fail with `ServiceStopped`.
    pub async fn shutdown(&self) -> bool {
        self.stopped.store(true, Ordering::Release);
        let graceful = self
            .executor
            .stop(self.config.worker.shutdown_timeout())
            .await;

        let sweeper = self.sweeper.lock().take();
        if let Some((handle, signal)) = sweeper {
            signal.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Result cache sweeper ended abnormally");
            }
        }

        info!(graceful = graceful, "Task service shut down");
        graceful
    }

    pub fn is_running(&self) -> bool {
        self.executor.is_running()
    }

    /// Register a task type; fails with `AlreadyRegistered` if the name is taken
    pub fn register_task(
        &self,
        name: impl Into<String>,
        handler: impl TaskHandler,
        config: TaskConfig,
    ) -> TaskerResult<()> {
        self.registry.register(name, Arc::new(handler), config)
    }

    /// Register a task type using the configured `task_defaults`
    pub fn register_task_with_defaults(
        &self,
        name: impl Into<String>,
        handler: impl TaskHandler,
    ) -> TaskerResult<()> {
        self.register_task(name, handler, self.config.task_defaults.clone())
    }

    /// Submit a task and return its id without waiting for execution.
    /// `priority` falls back to the task type's configured priority.
    pub async fn submit_task(
        &self,
        name: &str,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        priority: Option<TaskPriority>,
        eta: Option<DateTime<Utc>>,
    ) -> TaskerResult<Uuid> {
        self.submit(SubmitRequest {
            task_name: name.to_string(),
            args,
            kwargs,
            priority,
            eta,
        })
        .await
    }

    pub async fn submit(&self, request: SubmitRequest) -> TaskerResult<Uuid> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(TaskerError::ServiceStopped);
        }
        self.submitter.submit(request).await
    }

    /// Current outcome of a task, waiting up to `timeout` for it to finish.
    ///
    /// Reads the result cache first, then the task store (returning the
    /// latest snapshot if the task is still running at `timeout`), then the
    /// broker's view of the message.
    pub async fn get_task_result(&self, task_id: Uuid, timeout: Duration) -> TaskerResult<TaskOutcome> {
        if let Some(cached) = self.cache.get(task_id).await {
            return Ok(cached.to_outcome());
        }

        if let Some(outcome) = self.store.wait_for_terminal(task_id, timeout).await {
            return Ok(outcome);
        }

        match self.broker.task_state(task_id).await? {
            Some(state) => Ok(TaskOutcome {
                task_id,
                status: match state {
                    MessageState::Delayed | MessageState::Ready => TaskStatus::Pending,
                    MessageState::Reserved => TaskStatus::Started,
                },
                result: None,
                error: None,
                attempt_count: 0,
            }),
            None => Err(TaskerError::TaskNotFound(task_id)),
        }
    }

    /// Revoke a task. Returns `false` for unknown or already-finished tasks.
    /// With `terminate`, a running handler's cancellation signal fires.
    pub fn cancel_task(&self, task_id: Uuid, terminate: bool) -> bool {
        match self.store.revoke(task_id, terminate) {
            RevokeOutcome::Revoked { was_running } => {
                let details = format!("was_running={was_running} terminate={terminate}");
                logging::log_task_operation(
                    "cancel",
                    Some(task_id),
                    None,
                    None,
                    "REVOKED",
                    Some(&details),
                );
                true
            }
            RevokeOutcome::AlreadyTerminal(status) => {
                info!(task_id = %task_id, status = %status, "Cancel ignored for finished task");
                false
            }
            RevokeOutcome::NotFound => false,
        }
    }

    /// Per-queue depth and activity
    pub async fn get_queue_stats(&self) -> TaskerResult<HashMap<String, QueueStats>> {
        let mut stats = HashMap::new();
        for queue in self.router.queues_in_priority_order() {
            let queue_stats = self
                .broker
                .queue_stats(&queue)
                .await?
                .with_active(self.executor.active_count(&queue));
            stats.insert(queue, queue_stats);
        }
        Ok(stats)
    }

    /// Breaker snapshot for a task type, `None` until it has been used
    pub fn circuit_breaker_state(&self, task_name: &str) -> Option<CircuitBreakerState> {
        self.breakers.get_component_state(task_name)
    }

    pub fn circuit_breaker_metrics(&self) -> SystemCircuitBreakerMetrics {
        self.breakers.get_system_metrics()
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerManager {
        &self.breakers
    }

    pub async fn health_check(&self) -> TaskerResult<bool> {
        let broker_ok = self.broker.health_check().await?;
        let cache_ok = self.cache.health_check().await;
        Ok(broker_ok && cache_ok)
    }
}

/// Collects configuration, broker and task registrations before the
/// service starts accepting submissions
#[derive(Default)]
pub struct TaskServiceBuilder {
    config: Option<TaskerConfig>,
    broker: Option<Arc<dyn TaskBroker>>,
    registry: TaskRegistryBuilder,
}

impl TaskServiceBuilder {
    pub fn config(mut self, config: TaskerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use configuration loaded by a [`ConfigManager`]
    pub fn config_manager(self, manager: &ConfigManager) -> Self {
        self.config(manager.config().clone())
    }

    pub fn broker(mut self, broker: Arc<dyn TaskBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn task(mut self, name: impl Into<String>, handler: impl TaskHandler, config: TaskConfig) -> Self {
        self.registry = self.registry.task(name, handler, config);
        self
    }

    pub async fn build(self) -> TaskerResult<TaskService> {
        let config = self.config.unwrap_or_default();
        let registry = self.registry.queues(config.queues.clone()).build()?;
        let broker = self
            .broker
            .unwrap_or_else(|| Arc::new(InMemoryBroker::new()));
        TaskService::assemble(config, broker, registry).await
    }
}
