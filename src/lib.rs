#![allow(clippy::doc_markdown)] // Allow technical terms like HALF_OPEN in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Tasker Resilient Queue
//!
//! Resilient asynchronous task execution: named task types are registered
//! with a handler and configuration, submissions are routed to priority
//! queues, and a worker pool runs each task under a retry policy, behind a
//! per-task-type circuit breaker, caching terminal results with a TTL.
//!
//! ## Architecture
//!
//! ```text
//! submit_task ─▶ TaskRegistry ─▶ CircuitBreaker ─▶ Router ─▶ TaskBroker (high/default/low)
//!                                                                   │
//! get_task_result ◀─ ResultCache ◀─ TaskExecutor ◀─ RetryCoordinator ◀┘
//! ```
//!
//! ## Module Organization
//!
//! - [`orchestration`] - [`TaskService`] facade, submitter, executor, router
//! - [`registry`] - Task handler trait and registration
//! - [`retry`] - Retry policy, backoff and the retry loop
//! - [`resilience`] - Circuit breakers and their metrics
//! - [`cache`] - TTL result cache over a pluggable backend
//! - [`messaging`] - Broker contract and the in-memory broker
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Error types and the closed set of handler error kinds
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use std::time::Duration;
//! use tasker_resilient_queue::{handler_fn, TaskConfig, TaskPriority, TaskService, TaskerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let service = TaskService::in_memory(TaskerConfig::default()).await?;
//! service.register_task(
//!     "add",
//!     handler_fn(|_ctx, args, _kwargs| async move {
//!         Ok(json!(args.iter().filter_map(|v| v.as_i64()).sum::<i64>()))
//!     }),
//!     TaskConfig::default(),
//! )?;
//! service.start().await?;
//!
//! let task_id = service
//!     .submit_task("add", vec![json!(2), json!(3)], Default::default(), Some(TaskPriority::Normal), None)
//!     .await?;
//! let outcome = service.get_task_result(task_id, Duration::from_secs(5)).await?;
//! println!("{:?}: {:?}", outcome.status, outcome.result);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod metrics;
pub mod models;
pub mod orchestration;
pub mod registry;
pub mod resilience;
pub mod retry;
pub mod utils;

pub use config::{ConfigManager, TaskConfig, TaskerConfig};
pub use error::{ErrorCategory, ErrorKind, TaskError, TaskerError, TaskerResult};
pub use messaging::{InMemoryBroker, QueueStats, TaskBroker};
pub use models::{Task, TaskOutcome, TaskPriority, TaskStatus};
pub use orchestration::{
    ErrorHandler, ErrorSeverity, StructuredError, SubmitRequest, TaskService, TaskServiceBuilder,
};
pub use registry::{handler_fn, TaskContext, TaskHandler, TaskRegistry};
pub use resilience::{CircuitBreaker, CircuitBreakerManager, CircuitState};
pub use retry::{CancellationSignal, RetryCoordinator, RetryPolicy};
