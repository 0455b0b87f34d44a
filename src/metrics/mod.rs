//! # Task Execution Metrics
//!
//! OpenTelemetry instruments for submission, execution, retry, error and
//! circuit breaker activity. Instruments are created from the global meter
//! provider; installing an exporter is the embedding application's job, and
//! without one every recording is a no-op.
//!
//! ## Usage
//!
//! ```rust
//! use tasker_resilient_queue::metrics;
//!
//! metrics::record_task_submitted("send_email", "default", "normal");
//! metrics::record_task_completed("send_email", "SUCCESS", 12.5);
//! ```

use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static TASK_METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    TASK_METER
        .get_or_init(|| opentelemetry::global::meter_provider().meter("tasker-resilient-queue"))
}

// Counters

/// Total number of tasks accepted by the submitter
///
/// Labels:
/// - task_name: Registered task type
/// - queue: Queue the task was routed to
/// - priority: low, normal, high, critical
pub fn tasks_submitted_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.tasks.submitted.total")
        .with_description("Total number of tasks submitted")
        .build()
}

/// Total number of tasks that reached a terminal status
///
/// Labels:
/// - task_name: Registered task type
/// - status: SUCCESS, FAILURE, REVOKED
pub fn tasks_completed_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.tasks.completed.total")
        .with_description("Total number of tasks that reached a terminal status")
        .build()
}

/// Total number of retry attempts scheduled
///
/// Labels:
/// - task_name: Registered task type
pub fn task_retries_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.tasks.retries.total")
        .with_description("Total number of task retry attempts scheduled")
        .build()
}

/// Total number of classified handler errors
///
/// Labels:
/// - service: Configured service name
/// - severity: low, medium, high, critical
/// - category: network, database, validation, ...
/// - operation: Task name or internal operation
pub fn errors_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.errors.total")
        .with_description("Total number of classified errors")
        .build()
}

/// Total number of calls rejected by an open circuit breaker
///
/// Labels:
/// - operation: Breaker name
pub fn circuit_breaker_rejections_total() -> Counter<u64> {
    meter()
        .u64_counter("tasker.circuit_breaker.rejections.total")
        .with_description("Total number of calls rejected by an open circuit breaker")
        .build()
}

// Histograms

/// Task execution duration in milliseconds, all attempts and backoff included
///
/// Labels:
/// - task_name: Registered task type
/// - status: SUCCESS, FAILURE, REVOKED
pub fn task_execution_duration() -> Histogram<f64> {
    meter()
        .f64_histogram("tasker.tasks.execution.duration")
        .with_description("Task execution duration in milliseconds")
        .with_unit("ms")
        .build()
}

// Recording helpers

pub fn record_task_submitted(task_name: &str, queue: &str, priority: &str) {
    tasks_submitted_total().add(
        1,
        &[
            KeyValue::new("task_name", task_name.to_string()),
            KeyValue::new("queue", queue.to_string()),
            KeyValue::new("priority", priority.to_string()),
        ],
    );
}

pub fn record_task_completed(task_name: &str, status: &str, duration_ms: f64) {
    let labels = [
        KeyValue::new("task_name", task_name.to_string()),
        KeyValue::new("status", status.to_string()),
    ];
    tasks_completed_total().add(1, &labels);
    task_execution_duration().record(duration_ms, &labels);
}

pub fn record_task_retry(task_name: &str) {
    task_retries_total().add(1, &[KeyValue::new("task_name", task_name.to_string())]);
}

pub fn record_error(service: &str, severity: &str, category: &str, operation: &str) {
    errors_total().add(
        1,
        &[
            KeyValue::new("service", service.to_string()),
            KeyValue::new("severity", severity.to_string()),
            KeyValue::new("category", category.to_string()),
            KeyValue::new("operation", operation.to_string()),
        ],
    );
}

pub fn record_circuit_rejection(operation: &str) {
    circuit_breaker_rejections_total().add(1, &[KeyValue::new("operation", operation.to_string())]);
}
