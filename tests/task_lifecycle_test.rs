//! End-to-end task lifecycle through the public service API

mod common;

use common::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasker_resilient_queue::{
    handler_fn, ErrorKind, TaskConfig, TaskError, TaskPriority, TaskStatus, TaskerError,
};
use tracing::info;

#[tokio::test]
async fn test_add_task_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let TestService { service, .. } = create_service(test_config(5)).await;
    register_add(
        &service,
        TaskConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            ..Default::default()
        },
    );
    service.start().await?;

    info!("🧪 Submitting add(2, 3)");
    let task_id = service
        .submit_task(
            "add",
            vec![json!(2), json!(3)],
            no_kwargs(),
            Some(TaskPriority::Normal),
            None,
        )
        .await?;

    let outcome = service
        .get_task_result(task_id, Duration::from_secs(5))
        .await?;
    assert_eq!(outcome.status, TaskStatus::Success);
    assert_eq!(outcome.result, Some(json!(5)));
    assert_eq!(outcome.attempt_count, 0);
    assert!(outcome.error.is_none());

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_validation_error_fails_without_retry() -> Result<(), Box<dyn std::error::Error>> {
    let TestService { service, .. } = create_service(test_config(5)).await;
    let calls = register_failing(
        &service,
        "validate",
        fast_retry_config(3),
        TaskError::validation("amount must be positive"),
    );
    service.start().await?;

    let task_id = service
        .submit_task("validate", vec![], no_kwargs(), None, None)
        .await?;
    let outcome = service
        .get_task_result(task_id, Duration::from_secs(5))
        .await?;

    assert_eq!(outcome.status, TaskStatus::Failure);
    assert_eq!(outcome.attempt_count, 0);
    let message = outcome.error_message().unwrap_or_default();
    assert!(message.contains("ValidationError"), "unexpected error: {message}");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_network_error_retries_until_exhausted() -> Result<(), Box<dyn std::error::Error>> {
    let TestService { service, .. } = create_service(test_config(5)).await;
    let calls = register_failing(
        &service,
        "fetch",
        fast_retry_config(2),
        TaskError::network("connection reset"),
    );
    service.start().await?;

    let task_id = service
        .submit_task("fetch", vec![], no_kwargs(), None, None)
        .await?;
    let outcome = service
        .get_task_result(task_id, Duration::from_secs(5))
        .await?;

    assert_eq!(outcome.status, TaskStatus::Failure);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.attempt_count, 2);
    let message = outcome.error_message().unwrap_or_default();
    assert!(message.contains("NetworkError"), "unexpected error: {message}");

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unregistered_task_is_rejected_without_enqueue() -> Result<(), Box<dyn std::error::Error>>
{
    let TestService { service, .. } = create_service(test_config(5)).await;
    let before = service.get_queue_stats().await?;

    let result = service
        .submit_task("does_not_exist", vec![], no_kwargs(), None, None)
        .await;
    assert_eq!(
        result,
        Err(TaskerError::NotRegistered {
            name: "does_not_exist".to_string()
        })
    );

    assert_eq!(service.get_queue_stats().await?, before);
    Ok(())
}

#[tokio::test]
async fn test_cancel_finished_task_returns_false() -> Result<(), Box<dyn std::error::Error>> {
    let TestService { service, .. } = create_service(test_config(5)).await;
    register_add(&service, TaskConfig::default());
    service.start().await?;

    let task_id = service
        .submit_task("add", vec![json!(1), json!(1)], no_kwargs(), None, None)
        .await?;
    let outcome = service
        .get_task_result(task_id, Duration::from_secs(5))
        .await?;
    assert_eq!(outcome.status, TaskStatus::Success);

    assert!(!service.cancel_task(task_id, true));
    let again = service
        .get_task_result(task_id, Duration::from_millis(10))
        .await?;
    assert_eq!(again.status, TaskStatus::Success);

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_cancel_pending_task_never_runs() -> Result<(), Box<dyn std::error::Error>> {
    let TestService { service, broker } = create_service(test_config(5)).await;
    let calls = register_failing(
        &service,
        "never",
        fast_retry_config(0),
        TaskError::system("should not run"),
    );

    let task_id = service
        .submit_task("never", vec![], no_kwargs(), None, None)
        .await?;
    assert!(service.cancel_task(task_id, false));
    assert!(!service.cancel_task(task_id, false));

    service.start().await?;
    // Give a worker time to dequeue and discard the message
    for _ in 0..100 {
        if broker.queue_length("default").await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let outcome = service
        .get_task_result(task_id, Duration::from_millis(10))
        .await?;
    assert_eq!(outcome.status, TaskStatus::Revoked);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(broker.queue_length("default").await, 0);

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_terminate_running_task_signals_handler() -> Result<(), Box<dyn std::error::Error>> {
    let TestService { service, .. } = create_service(test_config(5)).await;
    let started = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicBool::new(false));

    let (started_flag, observed_flag) = (Arc::clone(&started), Arc::clone(&observed));
    service.register_task(
        "long_running",
        handler_fn(move |ctx, _args, _kwargs| {
            let started = Arc::clone(&started_flag);
            let observed = Arc::clone(&observed_flag);
            async move {
                started.store(true, Ordering::SeqCst);
                tokio::select! {
                    _ = ctx.cancelled() => {
                        observed.store(true, Ordering::SeqCst);
                        Err::<Value, _>(TaskError::cancelled("stopped on request"))
                    }
                    _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(json!("finished")),
                }
            }
        }),
        fast_retry_config(3),
    )?;
    service.start().await?;

    let task_id = service
        .submit_task("long_running", vec![], no_kwargs(), None, None)
        .await?;
    for _ in 0..200 {
        if started.load(Ordering::SeqCst) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(started.load(Ordering::SeqCst), "handler never started");

    assert!(service.cancel_task(task_id, true));
    let outcome = service
        .get_task_result(task_id, Duration::from_secs(5))
        .await?;
    assert_eq!(outcome.status, TaskStatus::Revoked);

    // Wait for the worker to wind down before checking the handler saw the signal
    assert!(service.shutdown().await);
    assert!(observed.load(Ordering::SeqCst));

    // Cooperative cancellation is not a dependency failure
    let breaker = service.circuit_breaker_state("long_running").unwrap();
    assert_eq!(breaker.consecutive_failures, 0);
    Ok(())
}

#[tokio::test]
async fn test_hard_timeout_fails_task() -> Result<(), Box<dyn std::error::Error>> {
    let TestService { service, .. } = create_service(test_config(5)).await;
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    service.register_task(
        "stuck",
        handler_fn(move |_ctx, _args, _kwargs| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(json!("too late"))
            }
        }),
        TaskConfig {
            timeout: Some(Duration::from_millis(100)),
            ..fast_retry_config(3)
        },
    )?;
    service.start().await?;

    let task_id = service.submit_task("stuck", vec![], no_kwargs(), None, None).await?;
    let outcome = service
        .get_task_result(task_id, Duration::from_secs(5))
        .await?;

    assert_eq!(outcome.status, TaskStatus::Failure);
    let error = outcome.error.expect("timeout error recorded");
    assert_eq!(error.kind, ErrorKind::Timeout);
    assert_eq!(error.error_type, "TimeoutError");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_soft_timeout_lets_handler_wind_down() -> Result<(), Box<dyn std::error::Error>> {
    let TestService { service, .. } = create_service(test_config(5)).await;
    service.register_task(
        "report",
        handler_fn(|ctx, _args, _kwargs| async move {
            tokio::select! {
                _ = ctx.cancelled() => Ok(json!({"partial": true})),
                _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(json!({"partial": false})),
            }
        }),
        TaskConfig {
            timeout: Some(Duration::from_secs(5)),
            soft_timeout: Some(Duration::from_millis(50)),
            ..fast_retry_config(0)
        },
    )?;
    service.start().await?;

    let task_id = service.submit_task("report", vec![], no_kwargs(), None, None).await?;
    let outcome = service
        .get_task_result(task_id, Duration::from_secs(5))
        .await?;

    assert_eq!(outcome.status, TaskStatus::Success);
    assert_eq!(outcome.result, Some(json!({"partial": true})));

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_panicking_handler_fails_task() -> Result<(), Box<dyn std::error::Error>> {
    let TestService { service, .. } = create_service(test_config(5)).await;
    service.register_task(
        "explode",
        handler_fn(|_ctx, args: Vec<Value>, _kwargs| async move {
            if args.is_empty() {
                panic!("no arguments");
            }
            Ok(json!(null))
        }),
        fast_retry_config(0),
    )?;
    service.start().await?;

    let task_id = service.submit_task("explode", vec![], no_kwargs(), None, None).await?;
    let outcome = service
        .get_task_result(task_id, Duration::from_secs(5))
        .await?;

    assert_eq!(outcome.status, TaskStatus::Failure);
    let message = outcome.error_message().unwrap_or_default();
    assert!(message.contains("panicked"), "unexpected error: {message}");

    // The worker survives the panic and keeps serving
    assert!(service.is_running());
    service.shutdown().await;
    Ok(())
}
