//! # Task Handlers
//!
//! The trait application code implements for each task type, plus a closure
//! adapter for handlers that don't need their own type.

use crate::error::TaskError;
use crate::retry::CancellationSignal;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use uuid::Uuid;

/// Per-attempt execution context handed to a handler
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: Uuid,
    pub task_name: String,
    /// Zero-indexed attempt number
    pub attempt: u32,
    cancellation: CancellationSignal,
}

impl TaskContext {
    pub fn new(
        task_id: Uuid,
        task_name: impl Into<String>,
        attempt: u32,
        cancellation: CancellationSignal,
    ) -> Self {
        Self {
            task_id,
            task_name: task_name.into(),
            attempt,
            cancellation,
        }
    }

    /// True once the task was revoked with `terminate` or its soft timeout passed
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when cancellation is requested; select on it in long-running handlers
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    pub fn cancellation(&self) -> &CancellationSignal {
        &self.cancellation
    }
}

/// Business logic for one task type
///
/// Handlers must be idempotent: delivery is at-least-once, and a failed
/// attempt is re-run with the same arguments.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn call(
        &self,
        ctx: TaskContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError>;
}

/// Handler backed by a closure, see [`handler_fn`]
pub struct FnHandler<F, Fut> {
    func: F,
    _marker: PhantomData<fn() -> Fut>,
}

impl<F, Fut> fmt::Debug for FnHandler<F, Fut> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F, Fut>
where
    F: Fn(TaskContext, Vec<Value>, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    async fn call(
        &self,
        ctx: TaskContext,
        args: Vec<Value>,
        kwargs: Map<String, Value>,
    ) -> Result<Value, TaskError> {
        (self.func)(ctx, args, kwargs).await
    }
}

/// Wrap an async closure as a [`TaskHandler`]
///
/// ```rust
/// use serde_json::{json, Value};
/// use tasker_resilient_queue::error::TaskError;
/// use tasker_resilient_queue::registry::handler_fn;
///
/// let add = handler_fn(|_ctx, args, _kwargs| async move {
///     let a = args.first().and_then(|v| v.as_i64()).ok_or_else(|| TaskError::validation("a is required"))?;
///     let b = args.get(1).and_then(|v| v.as_i64()).ok_or_else(|| TaskError::validation("b is required"))?;
///     Ok::<Value, TaskError>(json!(a + b))
/// });
/// # let _ = add;
/// ```
pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F, Fut>
where
    F: Fn(TaskContext, Vec<Value>, Map<String, Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, TaskError>> + Send + 'static,
{
    FnHandler {
        func,
        _marker: PhantomData,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_closure_handler_receives_arguments() {
        let handler = handler_fn(|ctx: TaskContext, args: Vec<Value>, kwargs: Map<String, Value>| async move {
            Ok(json!({
                "name": ctx.task_name,
                "attempt": ctx.attempt,
                "args": args,
                "scale": kwargs.get("scale").cloned().unwrap_or(Value::Null),
            }))
        });

        let mut kwargs = Map::new();
        kwargs.insert("scale".to_string(), json!(10));
        let ctx = TaskContext::new(Uuid::new_v4(), "echo", 2, CancellationSignal::new());

        let value = handler.call(ctx, vec![json!(1)], kwargs).await.unwrap();
        assert_eq!(
            value,
            json!({"name": "echo", "attempt": 2, "args": [1], "scale": 10})
        );
    }

    #[tokio::test]
    async fn test_context_observes_cancellation() {
        let signal = CancellationSignal::new();
        let ctx = TaskContext::new(Uuid::new_v4(), "slow", 0, signal.clone());
        assert!(!ctx.is_cancelled());

        signal.cancel();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }
}
