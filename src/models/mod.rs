//! # Models
//!
//! In-memory data model of the task execution core: the [`Task`] record, its
//! lifecycle [`TaskStatus`], submission [`TaskPriority`], and the
//! [`TaskOutcome`] snapshot returned to callers.

pub mod states;
pub mod task;

pub use states::{TaskPriority, TaskStatus};
pub use task::{Task, TaskOutcome};
