//! # Orchestration
//!
//! The task execution pipeline:
//!
//! ```text
//! submit ─▶ TaskRegistry ─▶ CircuitBreaker check ─▶ Router ─▶ TaskBroker
//!                                                                  │
//!            ResultCache ◀─ TaskExecutor ◀─ RetryCoordinator ◀─────┘
//! ```
//!
//! [`TaskService`] wires the components together and exposes the public API.

pub mod error_handler;
pub mod executor;
pub mod rate_limiter;
pub mod router;
pub mod service;
pub mod task_store;
pub mod task_submitter;

pub use error_handler::{ErrorHandler, ErrorSeverity, StructuredError};
pub use executor::{ExecutorConfig, ExecutorContext, TaskExecutor};
pub use rate_limiter::{RateLimit, RateLimiter};
pub use router::Router;
pub use service::{TaskService, TaskServiceBuilder};
pub use task_store::{RevokeOutcome, TaskStore};
pub use task_submitter::{SubmitRequest, TaskSubmitter};
