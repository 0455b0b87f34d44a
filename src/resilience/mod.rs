//! # Resilience
//!
//! Circuit breakers guarding task execution, one per operation name.

pub mod circuit_breaker;
pub mod config;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerError, CircuitBreakerState, CircuitState,
};
pub use config::CircuitBreakerConfig;
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
