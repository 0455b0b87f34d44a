//! # Task Messages
//!
//! The wire shape of a task on the broker plus the bookkeeping types the
//! broker hands back.

use super::MessagingError;
use crate::models::{Task, TaskPriority};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// A task as carried by the broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub task_id: Uuid,
    pub task_name: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub kwargs: Map<String, Value>,
    pub priority: TaskPriority,
    pub queue: String,
    /// Not deliverable before this instant
    pub eta: Option<DateTime<Utc>>,
    pub submitted_at: DateTime<Utc>,
}

impl TaskMessage {
    pub fn from_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            task_name: task.name.clone(),
            args: task.args.clone(),
            kwargs: task.kwargs.clone(),
            priority: task.priority,
            queue: task.queue.clone(),
            eta: task.eta,
            submitted_at: task.created_at,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.eta.map(|eta| eta <= now).unwrap_or(true)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(MessagingError::from)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        serde_json::from_slice(bytes).map_err(MessagingError::from)
    }
}

/// Identifies a reserved message for ack/nack
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle {
    pub queue_name: String,
    pub message_id: u64,
}

impl fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.queue_name, self.message_id)
    }
}

/// A message reserved by a consumer, pending ack
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub receipt: ReceiptHandle,
    pub message: TaskMessage,
    pub receive_count: u32,
}

/// Where a message currently sits on the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// Waiting for its eta
    Delayed,
    /// Deliverable
    Ready,
    /// Handed to a consumer, not yet acknowledged
    Reserved,
}

/// Per-queue depth snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub queue_name: String,
    /// Ready plus delayed messages
    pub pending: u64,
    /// Subset of `pending` still waiting for an eta
    pub delayed: u64,
    /// Dequeued, not yet acknowledged
    pub reserved: u64,
    /// Handlers currently executing tasks from this queue
    pub active: u64,
}

impl QueueStats {
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Self::default()
        }
    }

    pub fn with_active(mut self, active: u64) -> Self {
        self.active = active;
        self
    }
}
