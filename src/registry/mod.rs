//! # Registry
//!
//! Task-type registration: the [`TaskHandler`] trait application code
//! implements and the [`TaskRegistry`] that resolves names to handlers and
//! their configuration.

pub mod handler;
pub mod task_registry;

pub use handler::{handler_fn, FnHandler, TaskContext, TaskHandler};
pub use task_registry::{RegisteredTask, RegistryStats, TaskRegistry, TaskRegistryBuilder};
