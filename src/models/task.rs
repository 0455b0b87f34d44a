//! # Task Model
//!
//! A `Task` is one submission of a registered task type. It is created by the
//! submitter, mutated only by the executor (and by cancellation), and never
//! deleted: only its cached result expires.

use super::states::{TaskPriority, TaskStatus};
use crate::orchestration::error_handler::StructuredError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub args: Vec<Value>,
    pub kwargs: Map<String, Value>,
    pub priority: TaskPriority,
    pub queue: String,
    pub status: TaskStatus,
    /// Zero-indexed: the first attempt is attempt 0
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub eta: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<StructuredError>,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
        priority: TaskPriority,
        queue: impl Into<String>,
        eta: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            args,
            kwargs,
            priority,
            queue: queue.into(),
            status: TaskStatus::Pending,
            attempt_count: 0,
            created_at: Utc::now(),
            eta,
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    /// Move to `next` if the lifecycle allows it, stamping timestamps.
    /// Returns `false` and leaves the task untouched otherwise.
    pub fn transition_to(&mut self, next: TaskStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }

        let now = Utc::now();
        if next == TaskStatus::Started && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        self.status = next;
        true
    }

    pub fn outcome(&self) -> TaskOutcome {
        TaskOutcome {
            task_id: self.id,
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            attempt_count: self.attempt_count,
        }
    }
}

/// What `get_task_result` reports for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<StructuredError>,
    pub attempt_count: u32,
}

impl TaskOutcome {
    pub fn is_ready(&self) -> bool {
        self.status.is_terminal()
    }

    /// Serialized error message such as `"ValidationError: amount must be positive"`
    pub fn error_message(&self) -> Option<String> {
        self.error.as_ref().map(|e| e.to_string())
    }
}
