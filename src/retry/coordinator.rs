//! Retry loop around a single logical task.
//!
//! The backoff wait suspends only the retrying task; it races the task's
//! [`CancellationSignal`] so a revoked task stops waiting immediately.

use super::{CancellationSignal, RetryPolicy};
use crate::error::TaskError;
use crate::metrics;
use crate::orchestration::error_handler::{ErrorHandler, StructuredError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Emitted between a failed attempt and the backoff wait that precedes the next one
#[derive(Debug)]
pub struct RetryEvent<'a> {
    /// Zero-indexed attempt that just failed
    pub failed_attempt: u32,
    pub next_attempt: u32,
    pub delay: Duration,
    pub error: &'a StructuredError,
}

/// Final failure after the coordinator gave up
#[derive(Debug, Clone, PartialEq)]
pub struct RetryFailure {
    pub error: StructuredError,
    /// Handler invocations made
    pub attempts: u32,
}

impl RetryFailure {
    /// Zero-indexed number of the last attempt made
    pub fn last_attempt(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    error_handler: Arc<ErrorHandler>,
}

impl RetryCoordinator {
    pub fn new(error_handler: Arc<ErrorHandler>) -> Self {
        Self { error_handler }
    }

    pub fn error_handler(&self) -> &Arc<ErrorHandler> {
        &self.error_handler
    }

    /// Run `attempt_fn` until it succeeds, fails with a non-retryable kind,
    /// or the policy's attempt budget is spent.
    pub async fn run<T, F, Fut>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        cancellation: &CancellationSignal,
        attempt_fn: F,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
    {
        self.run_with_hook(operation, policy, cancellation, attempt_fn, |_| {})
            .await
    }

    /// Like [`run`](Self::run), calling `on_retry` before each backoff wait
    pub async fn run_with_hook<T, F, Fut, H>(
        &self,
        operation: &str,
        policy: &RetryPolicy,
        cancellation: &CancellationSignal,
        mut attempt_fn: F,
        mut on_retry: H,
    ) -> Result<T, RetryFailure>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TaskError>>,
        H: FnMut(RetryEvent<'_>),
    {
        let mut attempt: u32 = 0;

        loop {
            let task_error = match attempt_fn(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(operation = operation, attempt = attempt, "Attempt succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(task_error) => task_error,
            };

            let error = self.error_handler.classify(&task_error, operation);

            if !policy.is_retryable(error.kind) {
                debug!(
                    operation = operation,
                    attempt = attempt,
                    kind = %error.kind,
                    "Non-retryable failure, giving up"
                );
                return Err(RetryFailure {
                    error,
                    attempts: attempt + 1,
                });
            }

            if !policy.has_attempts_remaining(attempt) {
                warn!(
                    operation = operation,
                    attempts = attempt + 1,
                    max_attempts = policy.max_attempts,
                    kind = %error.kind,
                    "Retry budget exhausted"
                );
                return Err(RetryFailure {
                    error,
                    attempts: attempt + 1,
                });
            }

            let delay = policy.delay_for_attempt(attempt);
            on_retry(RetryEvent {
                failed_attempt: attempt,
                next_attempt: attempt + 1,
                delay,
                error: &error,
            });
            metrics::record_task_retry(operation);

            info!(
                operation = operation,
                failed_attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                kind = %error.kind,
                "Retrying after backoff"
            );

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancellation.cancelled() => {
                    let cancelled = TaskError::cancelled("cancelled during retry backoff")
                        .with_cause(error.to_string());
                    return Err(RetryFailure {
                        error: self.error_handler.classify(&cancelled, operation),
                        attempts: attempt + 1,
                    });
                }
            }

            attempt += 1;
        }
    }
}
