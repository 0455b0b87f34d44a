//! Priority routing: maps a submission's priority to a physical queue.
//!
//! `Critical` shares the `high` lane. Workers drain lanes in strict order
//! (high, default, low), FIFO within each.

use crate::config::{QueuesConfig, TaskConfig};
use crate::models::TaskPriority;

#[derive(Debug, Clone, Default)]
pub struct Router {
    queues: QueuesConfig,
}

impl Router {
    pub fn new(queues: QueuesConfig) -> Self {
        Self { queues }
    }

    pub fn route(&self, priority: TaskPriority) -> &str {
        match priority {
            TaskPriority::Low => &self.queues.low,
            TaskPriority::Normal => &self.queues.default,
            TaskPriority::High | TaskPriority::Critical => &self.queues.high,
        }
    }

    /// Queue for a task type: its pinned `queue_name` if set, else by priority
    pub fn route_task(&self, config: &TaskConfig, priority: TaskPriority) -> String {
        config
            .queue_name
            .clone()
            .unwrap_or_else(|| self.route(priority).to_string())
    }

    /// All lanes in drain order
    pub fn queues_in_priority_order(&self) -> Vec<String> {
        self.queues.in_priority_order()
    }
}
