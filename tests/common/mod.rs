//! Shared helpers for service-level integration tests
#![allow(dead_code)]

use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasker_resilient_queue::{
    handler_fn, InMemoryBroker, TaskConfig, TaskError, TaskService, TaskerConfig,
};
use tracing::Level;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_test_writer()
        .try_init();
}

/// Fast-polling configuration with the given breaker threshold
pub fn test_config(failure_threshold: u32) -> TaskerConfig {
    let mut config = TaskerConfig::default();
    config.service_name = "integration".to_string();
    config.worker.concurrency = 2;
    config.worker.poll_interval_ms = 5;
    config.worker.shutdown_timeout_seconds = 5;
    config.circuit_breaker.failure_threshold = failure_threshold;
    config.circuit_breaker.recovery_timeout = Duration::from_secs(60);
    config
}

/// Task config with fast, deterministic backoff
pub fn fast_retry_config(max_retries: u32) -> TaskConfig {
    TaskConfig {
        max_retries,
        base_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(80),
        jitter: false,
        timeout: Some(Duration::from_secs(5)),
        ..Default::default()
    }
}

pub struct TestService {
    pub service: TaskService,
    pub broker: Arc<InMemoryBroker>,
}

pub async fn create_service(config: TaskerConfig) -> TestService {
    init_test_logging();
    let broker = Arc::new(InMemoryBroker::new());
    let service = TaskService::builder()
        .config(config)
        .broker(broker.clone())
        .build()
        .await
        .expect("service should build");
    TestService { service, broker }
}

/// Register `name` as a handler that counts calls and always fails with `error`
pub fn register_failing(
    service: &TaskService,
    name: &str,
    config: TaskConfig,
    error: TaskError,
) -> Arc<AtomicU32> {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    service
        .register_task(
            name,
            handler_fn(move |_ctx, _args, _kwargs| {
                let counter = Arc::clone(&counter);
                let error = error.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<Value, _>(error)
                }
            }),
            config,
        )
        .expect("registration should succeed");
    calls
}

pub fn register_add(service: &TaskService, config: TaskConfig) {
    service
        .register_task(
            "add",
            handler_fn(|_ctx, args: Vec<Value>, _kwargs| async move {
                let a = args
                    .first()
                    .and_then(Value::as_i64)
                    .ok_or_else(|| TaskError::validation("a must be an integer"))?;
                let b = args
                    .get(1)
                    .and_then(Value::as_i64)
                    .ok_or_else(|| TaskError::validation("b must be an integer"))?;
                Ok::<Value, TaskError>(json!(a + b))
            }),
            config,
        )
        .expect("registration should succeed");
}

pub fn no_kwargs() -> Map<String, Value> {
    Map::new()
}
