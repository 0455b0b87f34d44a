//! # Task Store
//!
//! In-process record of every submitted task: its [`Task`] row, the
//! cancellation signal shared with whatever attempt is running, and a
//! status channel that `get_task_result` waiters subscribe to.

use crate::models::{Task, TaskOutcome, TaskStatus};
use crate::orchestration::error_handler::StructuredError;
use crate::retry::CancellationSignal;
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct TaskRecord {
    task: Task,
    cancellation: CancellationSignal,
    status_tx: watch::Sender<TaskStatus>,
}

/// Result of a revoke request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    /// The task was pending or running and is now REVOKED
    Revoked { was_running: bool },
    /// Already SUCCESS, FAILURE or REVOKED; nothing changed
    AlreadyTerminal(TaskStatus),
    NotFound,
}

#[derive(Debug, Clone, Default)]
pub struct TaskStore {
    records: Arc<DashMap<Uuid, TaskRecord>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly submitted task
    pub fn insert(&self, task: Task) -> CancellationSignal {
        let cancellation = CancellationSignal::new();
        let (status_tx, _) = watch::channel(task.status);
        self.records.insert(
            task.id,
            TaskRecord {
                task,
                cancellation: cancellation.clone(),
                status_tx,
            },
        );
        cancellation
    }

    /// Forget a task, used when its enqueue failed
    pub fn remove(&self, task_id: Uuid) -> Option<Task> {
        self.records.remove(&task_id).map(|(_, record)| record.task)
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.records.contains_key(&task_id)
    }

    pub fn get(&self, task_id: Uuid) -> Option<Task> {
        self.records.get(&task_id).map(|r| r.task.clone())
    }

    pub fn status(&self, task_id: Uuid) -> Option<TaskStatus> {
        self.records.get(&task_id).map(|r| r.task.status)
    }

    pub fn outcome(&self, task_id: Uuid) -> Option<TaskOutcome> {
        self.records.get(&task_id).map(|r| r.task.outcome())
    }

    pub fn cancellation(&self, task_id: Uuid) -> Option<CancellationSignal> {
        self.records.get(&task_id).map(|r| r.cancellation.clone())
    }

    /// Apply `f` to the task, then publish its (possibly changed) status
    fn update<R>(&self, task_id: Uuid, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        let mut record = self.records.get_mut(&task_id)?;
        let result = f(&mut record.task);
        let status = record.task.status;
        record.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        Some(result)
    }

    /// Move to STARTED for `attempt`; `false` if the task was revoked meanwhile
    pub fn mark_started(&self, task_id: Uuid, attempt: u32) -> bool {
        self.update(task_id, |task| {
            if task.transition_to(TaskStatus::Started) {
                task.attempt_count = attempt;
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
    }

    /// Record a failed attempt that will be retried as `next_attempt`
    pub fn mark_retry(&self, task_id: Uuid, next_attempt: u32, error: &StructuredError) -> bool {
        self.update(task_id, |task| {
            if task.transition_to(TaskStatus::Retry) {
                task.attempt_count = next_attempt;
                task.error = Some(error.clone());
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
    }

    pub fn mark_succeeded(&self, task_id: Uuid, attempt: u32, result: Value) -> Option<TaskOutcome> {
        self.finish(task_id, TaskStatus::Success, attempt, |task| {
            task.result = Some(result);
            task.error = None;
        })
    }

    pub fn mark_failed(
        &self,
        task_id: Uuid,
        attempt: u32,
        error: StructuredError,
    ) -> Option<TaskOutcome> {
        self.finish(task_id, TaskStatus::Failure, attempt, |task| {
            task.error = Some(error);
        })
    }

    /// Apply a terminal status. A task revoked while its attempt was running
    /// keeps REVOKED; the returned outcome always reflects the stored state.
    fn finish(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        attempt: u32,
        apply: impl FnOnce(&mut Task),
    ) -> Option<TaskOutcome> {
        self.update(task_id, |task| {
            if task.status == TaskStatus::Retry {
                // The final attempt's STARTED was skipped (cancelled during backoff)
                task.transition_to(TaskStatus::Started);
            }
            if task.transition_to(status) {
                task.attempt_count = attempt;
                apply(task);
            } else {
                debug!(
                    task_id = %task_id,
                    current = %task.status,
                    requested = %status,
                    "Keeping existing terminal status"
                );
            }
            task.outcome()
        })
    }

    /// Revoke a task. Running tasks get their cancellation signal fired when
    /// `terminate` is set.
    pub fn revoke(&self, task_id: Uuid, terminate: bool) -> RevokeOutcome {
        let outcome = self.update(task_id, |task| {
            if task.status.is_terminal() {
                return RevokeOutcome::AlreadyTerminal(task.status);
            }
            let was_running = task.status.is_active();
            task.transition_to(TaskStatus::Revoked);
            RevokeOutcome::Revoked { was_running }
        });

        match outcome {
            Some(RevokeOutcome::Revoked { was_running }) => {
                if terminate || !was_running {
                    if let Some(signal) = self.cancellation(task_id) {
                        signal.cancel();
                    }
                }
                RevokeOutcome::Revoked { was_running }
            }
            Some(other) => other,
            None => RevokeOutcome::NotFound,
        }
    }

    /// Wait up to `timeout` for the task to become terminal, returning the
    /// latest snapshot either way. `None` for unknown ids.
    pub async fn wait_for_terminal(&self, task_id: Uuid, timeout: Duration) -> Option<TaskOutcome> {
        let mut status_rx = self.records.get(&task_id)?.status_tx.subscribe();

        let _ = tokio::time::timeout(timeout, status_rx.wait_for(|status| status.is_terminal()))
            .await;

        self.outcome(task_id)
    }

    /// Task counts keyed by status
    pub fn count_by_status(&self) -> HashMap<TaskStatus, usize> {
        let mut counts = HashMap::new();
        for record in self.records.iter() {
            *counts.entry(record.task.status).or_insert(0) += 1;
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
