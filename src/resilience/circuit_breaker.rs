//! # Circuit Breaker Implementation
//!
//! Per-operation fault isolation with three states: Closed (calls pass
//! through), Open (calls are rejected without running) and Half-Open (exactly
//! one trial call is admitted to test recovery).
//!
//! State transitions and the half-open trial slot are decided under a short
//! synchronous lock that is never held across an `.await`. Call counters are
//! lock-free atomics so the hot path only takes the lock for admission and
//! outcome recording.

use crate::metrics as telemetry;
use crate::resilience::{CircuitBreakerConfig, CircuitBreakerMetrics};
use crate::utils::serde::duration_secs;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Lock-free atomic counters for circuit breaker metrics
#[derive(Debug)]
struct AtomicCircuitBreakerMetrics {
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    rejected_count: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl AtomicCircuitBreakerMetrics {
    fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            rejected_count: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    #[inline]
    fn record_success(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_failure(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    #[inline]
    fn record_rejection(&self) {
        self.rejected_count.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self, state: CircuitState, consecutive_failures: u32) -> CircuitBreakerMetrics {
        let total_calls = self.total_calls.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        let failure_count = self.failure_count.load(Ordering::Relaxed);
        let total_duration_nanos = self.total_duration_nanos.load(Ordering::Relaxed);

        let (failure_rate, success_rate, average_duration) = if total_calls > 0 {
            (
                failure_count as f64 / total_calls as f64,
                success_count as f64 / total_calls as f64,
                Duration::from_nanos(total_duration_nanos / total_calls),
            )
        } else {
            (0.0, 0.0, Duration::ZERO)
        };

        CircuitBreakerMetrics {
            total_calls,
            success_count,
            failure_count,
            rejected_count: self.rejected_count.load(Ordering::Relaxed),
            consecutive_failures,
            total_duration: Duration::from_nanos(total_duration_nanos),
            current_state: state,
            failure_rate,
            success_rate,
            average_duration,
        }
    }
}

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed,
    /// Failure mode - all calls fail fast without executing
    Open,
    /// Testing recovery - a single trial call is allowed
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during circuit breaker operation
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, rejecting all calls
    #[error("Circuit breaker is open for {component}")]
    CircuitOpen { component: String },

    /// Operation failed and was recorded
    #[error("Operation failed: {0}")]
    OperationFailed(E),
}

/// Serializable point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub operation_name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub failure_threshold: u32,
    #[serde(with = "duration_secs")]
    pub recovery_timeout: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    /// Bumped on every transition; outcomes from an older generation are stale
    generation: u64,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            opened_at_wall: None,
            trial_in_flight: false,
            generation: 0,
        }
    }

    fn recovery_elapsed(&self, recovery_timeout: Duration) -> bool {
        self.opened_at
            .map(|opened_at| opened_at.elapsed() >= recovery_timeout)
            .unwrap_or(true)
    }

    fn move_to(&mut self, state: CircuitState) {
        self.state = state;
        self.generation += 1;
        self.trial_in_flight = false;
        match state {
            CircuitState::Open => {
                self.opened_at = Some(Instant::now());
                self.opened_at_wall = Some(Utc::now());
            }
            CircuitState::Closed => {
                self.consecutive_failures = 0;
                self.opened_at = None;
                self.opened_at_wall = None;
            }
            CircuitState::HalfOpen => {}
        }
    }
}

/// Admission ticket for one guarded call.
///
/// Report the outcome with [`record_success`](Self::record_success) or
/// [`record_failure`](Self::record_failure). A permit dropped without an
/// outcome frees the half-open trial slot without moving the breaker.
#[must_use = "a permit should record the outcome of the call it admitted"]
#[derive(Debug)]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    started: Instant,
    settled: bool,
}

impl CallPermit<'_> {
    /// Whether this call is the half-open recovery trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker
            .on_success(self.generation, self.started.elapsed());
    }

    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker
            .on_failure(self.generation, self.started.elapsed());
    }

    /// Give the permit back without counting the call either way
    pub fn release(self) {}
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.on_abandoned(self.generation);
        }
    }
}

/// Core circuit breaker implementation
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Operation name for logging and metrics
    name: String,

    config: CircuitBreakerConfig,

    inner: Mutex<BreakerInner>,

    metrics: AtomicCircuitBreakerMetrics,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        debug!(
            component = %name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis() as u64,
            "Circuit breaker initialized"
        );

        Self {
            name,
            config,
            inner: Mutex::new(BreakerInner::new()),
            metrics: AtomicCircuitBreakerMetrics::new(),
        }
    }

    /// Current stored state. An open breaker whose recovery window has
    /// elapsed still reports `Open` until the next admission moves it.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Whether a call made now could be admitted. Takes no trial slot and
    /// changes no state.
    pub fn is_call_permitted(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner.recovery_elapsed(self.config.recovery_timeout),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    /// Ask to make a call. `None` means the call is rejected.
    pub fn try_acquire(&self) -> Option<CallPermit<'_>> {
        let admitted = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => Some((inner.generation, false)),
                CircuitState::Open if inner.recovery_elapsed(self.config.recovery_timeout) => {
                    inner.move_to(CircuitState::HalfOpen);
                    inner.trial_in_flight = true;
                    info!(
                        component = %self.name,
                        "Circuit breaker half-open (admitting trial call)"
                    );
                    Some((inner.generation, true))
                }
                CircuitState::HalfOpen if !inner.trial_in_flight => {
                    inner.trial_in_flight = true;
                    Some((inner.generation, true))
                }
                CircuitState::Open | CircuitState::HalfOpen => None,
            }
        };

        match admitted {
            Some((generation, trial)) => Some(CallPermit {
                breaker: self,
                generation,
                trial,
                started: Instant::now(),
                settled: false,
            }),
            None => {
                self.metrics.record_rejection();
                telemetry::record_circuit_rejection(&self.name);
                debug!(component = %self.name, "Call rejected by open circuit breaker");
                None
            }
        }
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, T, E, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(permit) = self.try_acquire() else {
            return Err(CircuitBreakerError::CircuitOpen {
                component: self.name.clone(),
            });
        };

        let result = operation().await;
        match &result {
            Ok(_) => permit.record_success(),
            Err(_) => permit.record_failure(),
        }

        result.map_err(CircuitBreakerError::OperationFailed)
    }

    fn on_success(&self, generation: u64, duration: Duration) {
        self.metrics.record_success(duration);

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        match inner.state {
            CircuitState::Closed => inner.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                inner.move_to(CircuitState::Closed);
                info!(component = %self.name, "Circuit breaker closed (recovered)");
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, generation: u64, duration: Duration) {
        self.metrics.record_failure(duration);

        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.move_to(CircuitState::Open);
                    error!(
                        component = %self.name,
                        consecutive_failures = inner.consecutive_failures,
                        failure_threshold = self.config.failure_threshold,
                        recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                        "Circuit breaker opened (failing fast)"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                inner.move_to(CircuitState::Open);
                warn!(component = %self.name, "Trial call failed, circuit breaker re-opened");
            }
            CircuitState::Open => {}
        }
    }

    fn on_abandoned(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation && inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    /// Force circuit to open state (for emergency situations)
    pub fn force_open(&self) {
        warn!(component = %self.name, "Circuit breaker forced open");
        self.inner.lock().move_to(CircuitState::Open);
    }

    /// Force circuit to closed state (for emergency recovery)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "Circuit breaker forced closed");
        self.inner.lock().move_to(CircuitState::Closed);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let (state, consecutive_failures) = {
            let inner = self.inner.lock();
            (inner.state, inner.consecutive_failures)
        };
        self.metrics.snapshot(state, consecutive_failures)
    }

    pub fn snapshot(&self) -> CircuitBreakerState {
        let inner = self.inner.lock();
        CircuitBreakerState {
            operation_name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            opened_at: inner.opened_at_wall,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout: self.config.recovery_timeout,
        }
    }

    /// Check if circuit is healthy (closed state with low failure rate)
    pub fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }
}
