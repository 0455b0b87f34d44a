//! Circuit breaker behavior as seen through task submission and execution

mod common;

use common::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasker_resilient_queue::{
    handler_fn, CircuitState, ErrorKind, TaskError, TaskStatus, TaskerError,
};
use tracing::info;

#[tokio::test]
async fn test_breaker_opens_after_threshold_and_rejects_submissions(
) -> Result<(), Box<dyn std::error::Error>> {
    let TestService { service, .. } = create_service(test_config(5)).await;
    let calls = register_failing(
        &service,
        "charge_card",
        fast_retry_config(0),
        TaskError::network("connection refused by payment gateway"),
    );
    service.start().await?;

    for i in 0..5 {
        let task_id = service
            .submit_task("charge_card", vec![json!(i)], no_kwargs(), None, None)
            .await?;
        let outcome = service
            .get_task_result(task_id, Duration::from_secs(5))
            .await?;
        assert_eq!(outcome.status, TaskStatus::Failure);
    }
    info!("🔌 Five failures recorded, breaker should be open");

    let breaker = service.circuit_breaker_state("charge_card").unwrap();
    assert_eq!(breaker.state, CircuitState::Open);
    assert_eq!(breaker.consecutive_failures, 5);

    let rejected = service
        .submit_task("charge_card", vec![json!(6)], no_kwargs(), None, None)
        .await;
    assert_eq!(
        rejected,
        Err(TaskerError::CircuitOpen {
            operation: "charge_card".to_string()
        })
    );
    assert_eq!(calls.load(Ordering::SeqCst), 5);

    let metrics = service.circuit_breaker_metrics();
    assert_eq!(metrics.count_by_state().get(&CircuitState::Open), Some(&1));
    assert_eq!(metrics.total_failures(), 5);

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_breaker_opened_while_queued_fails_without_calling_handler(
) -> Result<(), Box<dyn std::error::Error>> {
    let TestService { service, .. } = create_service(test_config(5)).await;
    let calls = register_failing(
        &service,
        "sync_inventory",
        fast_retry_config(3),
        TaskError::external("unreachable"),
    );

    let task_id = service
        .submit_task("sync_inventory", vec![], no_kwargs(), None, None)
        .await?;
    service
        .circuit_breakers()
        .get_circuit_breaker("sync_inventory")
        .force_open();
    service.start().await?;

    let outcome = service
        .get_task_result(task_id, Duration::from_secs(5))
        .await?;
    assert_eq!(outcome.status, TaskStatus::Failure);
    let error = outcome.error.expect("circuit open error recorded");
    assert_eq!(error.kind, ErrorKind::CircuitOpen);
    assert_eq!(error.error_type, "CircuitOpenError");
    // Circuit-open is not retried
    assert_eq!(outcome.attempt_count, 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_breaker_recovers_after_successful_trial() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = test_config(2);
    config.circuit_breaker.recovery_timeout = Duration::from_millis(100);
    let TestService { service, .. } = create_service(config).await;

    let healthy = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&healthy);
    service.register_task(
        "fetch_rates",
        handler_fn(move |_ctx, _args, _kwargs| {
            let healthy = flag.load(Ordering::SeqCst);
            async move {
                if healthy {
                    Ok(json!({"usd": 1.0}))
                } else {
                    Err::<Value, _>(TaskError::network("upstream unavailable"))
                }
            }
        }),
        fast_retry_config(0),
    )?;
    service.start().await?;

    for _ in 0..2 {
        let task_id = service
            .submit_task("fetch_rates", vec![], no_kwargs(), None, None)
            .await?;
        service
            .get_task_result(task_id, Duration::from_secs(5))
            .await?;
    }
    assert_eq!(
        service.circuit_breaker_state("fetch_rates").unwrap().state,
        CircuitState::Open
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    healthy.store(true, Ordering::SeqCst);

    let task_id = service
        .submit_task("fetch_rates", vec![], no_kwargs(), None, None)
        .await?;
    let outcome = service
        .get_task_result(task_id, Duration::from_secs(5))
        .await?;
    assert_eq!(outcome.status, TaskStatus::Success);

    let breaker = service.circuit_breaker_state("fetch_rates").unwrap();
    assert_eq!(breaker.state, CircuitState::Closed);
    assert_eq!(breaker.consecutive_failures, 0);

    service.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_breakers_are_isolated_per_task_type() -> Result<(), Box<dyn std::error::Error>> {
    let TestService { service, .. } = create_service(test_config(1)).await;
    register_failing(
        &service,
        "flaky",
        fast_retry_config(0),
        TaskError::database("deadlock detected"),
    );
    register_add(&service, fast_retry_config(0));
    service.start().await?;

    let failing = service.submit_task("flaky", vec![], no_kwargs(), None, None).await?;
    service
        .get_task_result(failing, Duration::from_secs(5))
        .await?;
    assert!(matches!(
        service.submit_task("flaky", vec![], no_kwargs(), None, None).await,
        Err(TaskerError::CircuitOpen { .. })
    ));

    let ok = service
        .submit_task("add", vec![json!(4), json!(4)], no_kwargs(), None, None)
        .await?;
    let outcome = service.get_task_result(ok, Duration::from_secs(5)).await?;
    assert_eq!(outcome.result, Some(json!(8)));

    service.shutdown().await;
    Ok(())
}
