//! # Task Executor
//!
//! Worker pool that drains the broker. A dispatcher takes one of
//! `concurrency` execution slots, dequeues from the lanes in strict priority
//! order and spawns the task's execution holding that slot. An execution
//! gives its slot back while it sleeps through a retry backoff or a rate
//! limit wait, and takes one again before its next attempt, so waiting tasks
//! never keep the pool from serving other queues.
//!
//! Per attempt:
//!
//! 1. The task moves to STARTED (a revoked task is skipped instead)
//! 2. The task type's circuit breaker must admit the call
//! 3. The handler runs under the hard `timeout`; at `soft_timeout` its
//!    context's cancellation signal fires
//! 4. The outcome is reported to the breaker; failures are classified and
//!    either retried after backoff (status RETRY) or returned as final
//!
//! Terminal SUCCESS/FAILURE outcomes are written to the result cache before
//! the message is acknowledged.

use crate::cache::ResultCache;
use crate::error::{ErrorKind, TaskError};
use crate::logging;
use crate::messaging::{ReceiptHandle, ReceivedMessage, TaskBroker, TaskMessage};
use crate::metrics;
use crate::models::{Task, TaskOutcome, TaskStatus};
use crate::orchestration::error_handler::ErrorHandler;
use crate::orchestration::rate_limiter::RateLimiter;
use crate::orchestration::task_store::TaskStore;
use crate::registry::{RegisteredTask, TaskContext, TaskRegistry};
use crate::resilience::{CircuitBreaker, CircuitBreakerManager};
use crate::retry::{CancellationSignal, RetryCoordinator};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Everything an execution needs, shared by all of them
#[derive(Clone)]
pub struct ExecutorContext {
    pub broker: Arc<dyn TaskBroker>,
    pub registry: Arc<TaskRegistry>,
    pub store: TaskStore,
    pub cache: ResultCache,
    pub breakers: CircuitBreakerManager,
    pub coordinator: RetryCoordinator,
    pub rate_limiter: RateLimiter,
}

impl std::fmt::Debug for ExecutorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorContext")
            .field("broker", &self.broker.provider_name())
            .field("registry", &self.registry)
            .field("tracked_tasks", &self.store.len())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Executions allowed to hold a slot at once
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// Lanes in drain order
    pub queues: Vec<String>,
}

/// Decrements a queue's active count when the execution ends
struct ActiveGuard(Arc<AtomicU64>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Execution slot of one task. Empty while the task waits out a backoff or
/// a rate limit.
type Slot = Mutex<Option<OwnedSemaphorePermit>>;

pub struct TaskExecutor {
    context: ExecutorContext,
    config: ExecutorConfig,
    running: AtomicBool,
    shutdown: Mutex<Option<CancellationSignal>>,
    slots: Arc<Semaphore>,
    active: Arc<DashMap<String, Arc<AtomicU64>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    executions: Mutex<JoinSet<()>>,
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("free_slots", &self.slots.available_permits())
            .finish_non_exhaustive()
    }
}

impl TaskExecutor {
    pub fn new(context: ExecutorContext, config: ExecutorConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.concurrency));
        Self {
            context,
            config,
            running: AtomicBool::new(false),
            shutdown: Mutex::new(None),
            slots,
            active: Arc::new(DashMap::new()),
            dispatcher: Mutex::new(None),
            executions: Mutex::new(JoinSet::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Handlers currently executing tasks from `queue_name`
    pub fn active_count(&self, queue_name: &str) -> u64 {
        self.active
            .get(queue_name)
            .map(|count| count.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Spawn the dispatcher. Returns `false` if already running.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.running.swap(true, Ordering::AcqRel) {
            return false;
        }

        let shutdown = CancellationSignal::new();
        *self.shutdown.lock() = Some(shutdown.clone());

        let executor = Arc::clone(self);
        *self.dispatcher.lock() = Some(tokio::spawn(async move {
            executor.dispatch_loop(shutdown).await;
        }));

        info!(
            concurrency = self.config.concurrency,
            queues = ?self.config.queues,
            "Task executor started"
        );
        true
    }

    /// Stop dispatching, waiting up to `timeout` for in-flight executions.
    /// Returns `false` if executions had to be aborted.
    pub async fn stop(&self, timeout: Duration) -> bool {
        if !self.running.swap(false, Ordering::AcqRel) {
            return true;
        }
        if let Some(shutdown) = self.shutdown.lock().take() {
            shutdown.cancel();
        }

        let dispatcher = self.dispatcher.lock().take();
        let dispatcher_abort = dispatcher.as_ref().map(|h| h.abort_handle());

        let drained = tokio::time::timeout(timeout, async {
            if let Some(dispatcher) = dispatcher {
                if let Err(e) = dispatcher.await {
                    warn!(error = %e, "Dispatcher ended abnormally");
                }
            }
            // The dispatcher has exited, so nothing else is spawned from here on
            let mut executions = std::mem::take(&mut *self.executions.lock());
            while let Some(result) = executions.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Task execution ended abnormally");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                info!("Task executor stopped gracefully");
                true
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Executions did not finish within timeout, aborting"
                );
                if let Some(handle) = dispatcher_abort {
                    handle.abort();
                }
                self.executions.lock().abort_all();
                false
            }
        }
    }

    async fn dispatch_loop(self: Arc<Self>, shutdown: CancellationSignal) {
        debug!("Dispatcher started");

        loop {
            let permit = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            self.reap_finished();

            match self.context.broker.dequeue(&self.config.queues).await {
                Ok(Some(received)) => {
                    let executor = Arc::clone(&self);
                    self.executions.lock().spawn(async move {
                        executor.process(received, permit).await;
                    });
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Dequeue failed");
                }
            }
            drop(permit);

            // Idle wait with ability to be interrupted by shutdown
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {},
                _ = shutdown.cancelled() => break,
            }
        }

        debug!("Dispatcher stopped");
    }

    fn reap_finished(&self) {
        let mut executions = self.executions.lock();
        while let Some(result) = executions.try_join_next() {
            if let Err(e) = result {
                warn!(error = %e, "Task execution ended abnormally");
            }
        }
    }

    /// Take an execution slot back unless the task is cancelled first
    async fn reclaim_slot(&self, slot: &Slot, cancellation: &CancellationSignal) {
        let held = slot.lock().is_some();
        if held {
            return;
        }
        tokio::select! {
            permit = Arc::clone(&self.slots).acquire_owned() => {
                if let Ok(permit) = permit {
                    *slot.lock() = Some(permit);
                }
            }
            _ = cancellation.cancelled() => {}
        }
    }

    /// Run one delivered message to its terminal outcome and acknowledge it.
    /// `permit` is the execution slot the message was dequeued under.
    pub async fn process(&self, received: ReceivedMessage, permit: OwnedSemaphorePermit) {
        let ReceivedMessage {
            receipt, message, ..
        } = received;
        let task_id = message.task_id;
        let ctx = &self.context;
        let slot: Slot = Mutex::new(Some(permit));

        let cancellation = match ctx.store.cancellation(task_id) {
            Some(signal) => signal,
            None => ctx.store.insert(task_from_message(&message)),
        };

        match ctx.store.status(task_id) {
            Some(status) if status.is_terminal() => {
                debug!(
                    task_id = %task_id,
                    status = %status,
                    "Discarding message for finished or revoked task"
                );
                self.acknowledge(&receipt).await;
                return;
            }
            _ => {}
        }

        let registered = match ctx.registry.resolve(&message.task_name) {
            Ok(registered) => registered,
            Err(e) => {
                let error = ctx.coordinator.error_handler().classify(
                    &TaskError::new(ErrorKind::Internal, e.to_string()),
                    &message.task_name,
                );
                if let Some(outcome) = ctx.store.mark_failed(task_id, 0, error) {
                    self.finish(&message.task_name, &outcome, Instant::now()).await;
                }
                self.acknowledge(&receipt).await;
                return;
            }
        };

        if let Some(limit) = registered.config.parsed_rate_limit() {
            let reservation = ctx.rate_limiter.reserve(&registered.name, limit);
            let wait = reservation.wait();
            if !wait.is_zero() {
                debug!(task_id = %task_id, wait_ms = wait.as_millis() as u64, "Rate limited");
                slot.lock().take();
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {},
                    _ = cancellation.cancelled() => {
                        ctx.rate_limiter.release(&reservation);
                        debug!(task_id = %task_id, "Revoked while rate limited");
                        self.acknowledge(&receipt).await;
                        return;
                    }
                }
            }
        }

        let _active = self.track_active(&message.queue);
        let started = Instant::now();
        let breaker = ctx
            .breakers
            .is_enabled()
            .then(|| ctx.breakers.get_circuit_breaker(&registered.name));
        let policy = registered.config.retry_policy();
        let last_attempt = AtomicU32::new(0);

        let (slot, last_attempt_ref) = (&slot, &last_attempt);
        let (registered_ref, message_ref, cancellation_ref) = (&registered, &message, &cancellation);
        let breaker_ref = breaker.as_deref();

        let result = ctx
            .coordinator
            .run_with_hook(
                &registered.name,
                &policy,
                &cancellation,
                move |attempt| async move {
                    last_attempt_ref.store(attempt, Ordering::Release);
                    self.reclaim_slot(slot, cancellation_ref).await;
                    self.run_attempt(
                        registered_ref,
                        message_ref,
                        breaker_ref,
                        cancellation_ref,
                        attempt,
                    )
                    .await
                },
                |event| {
                    // Free the slot for the backoff
                    slot.lock().take();
                    ctx.store
                        .mark_retry(task_id, event.next_attempt, event.error);
                },
            )
            .await;

        let outcome = match result {
            Ok(value) => ctx
                .store
                .mark_succeeded(task_id, last_attempt.load(Ordering::Acquire), value),
            Err(failure) => {
                let attempt = failure.last_attempt();
                ctx.store.mark_failed(task_id, attempt, failure.error)
            }
        };

        if let Some(outcome) = outcome {
            self.finish(&registered.name, &outcome, started).await;
        }
        self.acknowledge(&receipt).await;
    }

    async fn run_attempt(
        &self,
        registered: &RegisteredTask,
        message: &TaskMessage,
        breaker: Option<&CircuitBreaker>,
        task_cancellation: &CancellationSignal,
        attempt: u32,
    ) -> Result<Value, TaskError> {
        let task_id = message.task_id;
        if !self.context.store.mark_started(task_id, attempt) {
            return Err(TaskError::cancelled("task was revoked before the attempt started"));
        }

        let permit = match breaker {
            Some(breaker) => match breaker.try_acquire() {
                Some(permit) => Some(permit),
                None => {
                    return Err(TaskError::new(
                        ErrorKind::CircuitOpen,
                        format!("circuit breaker is open for {}", registered.name),
                    ))
                }
            },
            None => None,
        };

        debug!(
            task_id = %task_id,
            task_name = %registered.name,
            attempt = attempt,
            trial = permit.as_ref().map(|p| p.is_trial()).unwrap_or(false),
            "Running task attempt"
        );

        let config = &registered.config;
        let attempt_cancellation = CancellationSignal::new();
        let context = TaskContext::new(
            task_id,
            registered.name.clone(),
            attempt,
            attempt_cancellation.clone(),
        );

        let guarded = async {
            let call = AssertUnwindSafe(registered.handler.call(
                context,
                message.args.clone(),
                message.kwargs.clone(),
            ))
            .catch_unwind();
            tokio::pin!(call);

            let soft_deadline = async {
                match config.soft_timeout {
                    Some(soft) => tokio::time::sleep(soft).await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::pin!(soft_deadline);
            let mut soft_fired = false;
            let mut forwarded = false;

            loop {
                tokio::select! {
                    result = &mut call => break result,
                    _ = &mut soft_deadline, if !soft_fired => {
                        soft_fired = true;
                        warn!(
                            task_id = %task_id,
                            task_name = %registered.name,
                            attempt = attempt,
                            "Soft timeout reached, signalling handler"
                        );
                        attempt_cancellation.cancel();
                    }
                    _ = task_cancellation.cancelled(), if !forwarded => {
                        forwarded = true;
                        debug!(task_id = %task_id, "Forwarding termination request to handler");
                        attempt_cancellation.cancel();
                    }
                }
            }
        };

        let outcome = match config.timeout {
            Some(hard) => match tokio::time::timeout(hard, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        task_id = %task_id,
                        task_name = %registered.name,
                        attempt = attempt,
                        timeout_ms = hard.as_millis() as u64,
                        "Hard timeout exceeded, attempt terminated"
                    );
                    if let Some(permit) = permit {
                        permit.record_failure();
                    }
                    return Err(TaskError::timeout(format!(
                        "attempt exceeded hard timeout of {:.3}s",
                        hard.as_secs_f64()
                    )));
                }
            },
            None => guarded.await,
        };

        match outcome {
            Ok(Ok(value)) => {
                if let Some(permit) = permit {
                    permit.record_success();
                }
                Ok(value)
            }
            Ok(Err(task_error)) => {
                if let Some(permit) = permit {
                    if task_error.kind == ErrorKind::Cancelled {
                        permit.release();
                    } else {
                        permit.record_failure();
                    }
                }
                Err(task_error)
            }
            Err(panic) => {
                if let Some(permit) = permit {
                    permit.record_failure();
                }
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                logging::log_error(
                    "task_executor",
                    &registered.name,
                    &format!("handler panicked: {detail}"),
                    Some(&task_id.to_string()),
                );
                Err(TaskError::system(format!("handler panicked: {detail}")))
            }
        }
    }

    /// Cache, meter and log a terminal outcome
    async fn finish(&self, task_name: &str, outcome: &TaskOutcome, started: Instant) {
        if outcome.status.is_cacheable() {
            if let Err(e) = self.context.cache.store_outcome(outcome).await {
                warn!(task_id = %outcome.task_id, error = %e, "Failed to cache task result");
            }
        }

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        metrics::record_task_completed(task_name, &outcome.status.to_string(), duration_ms);

        match outcome.status {
            TaskStatus::Success => info!(
                task_id = %outcome.task_id,
                task_name = task_name,
                attempt_count = outcome.attempt_count,
                duration_ms = duration_ms,
                "Task succeeded"
            ),
            TaskStatus::Failure => warn!(
                task_id = %outcome.task_id,
                task_name = task_name,
                attempt_count = outcome.attempt_count,
                error = ?outcome.error_message(),
                "Task failed"
            ),
            status => info!(
                task_id = %outcome.task_id,
                task_name = task_name,
                status = %status,
                "Task finished"
            ),
        }
    }

    async fn acknowledge(&self, receipt: &ReceiptHandle) {
        if let Err(e) = self.context.broker.ack(receipt).await {
            warn!(receipt = %receipt, error = %e, "Failed to acknowledge message");
        }
    }

    fn track_active(&self, queue_name: &str) -> ActiveGuard {
        let counter = self
            .active
            .entry(queue_name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .clone();
        counter.fetch_add(1, Ordering::AcqRel);
        ActiveGuard(counter)
    }
}

/// Rebuild the task record for a message submitted by another process
fn task_from_message(message: &TaskMessage) -> Task {
    let mut task = Task::new(
        message.task_name.clone(),
        message.args.clone(),
        message.kwargs.clone(),
        message.priority,
        message.queue.clone(),
        message.eta,
    );
    task.id = message.task_id;
    task.created_at = message.submitted_at;
    task
}

impl ExecutorContext {
    /// Error handler shared with the retry coordinator
    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        self.coordinator.error_handler()
    }
}
