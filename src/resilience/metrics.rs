//! # Circuit Breaker Metrics
//!
//! Point-in-time metrics for one breaker and an aggregate over all of them,
//! used for health reporting and log summaries.

use crate::resilience::CircuitState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Metrics for a single circuit breaker instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    /// Total number of calls that ran (rejections excluded)
    pub total_calls: u64,

    pub success_count: u64,

    pub failure_count: u64,

    /// Calls turned away without running
    pub rejected_count: u64,

    pub consecutive_failures: u32,

    /// Total duration of all operations
    pub total_duration: Duration,

    pub current_state: CircuitState,

    /// Calculated failure rate (0.0 to 1.0)
    pub failure_rate: f64,

    /// Calculated success rate (0.0 to 1.0)
    pub success_rate: f64,

    pub average_duration: Duration,
}

impl CircuitBreakerMetrics {
    /// Create new metrics instance with zero values
    pub fn new() -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            rejected_count: 0,
            consecutive_failures: 0,
            total_duration: Duration::ZERO,
            current_state: CircuitState::Closed,
            failure_rate: 0.0,
            success_rate: 0.0,
            average_duration: Duration::ZERO,
        }
    }

    /// Check if metrics indicate healthy operation
    pub fn is_healthy(&self) -> bool {
        match self.current_state {
            // Too few calls to judge a failure rate
            CircuitState::Closed if self.total_calls < 10 => true,
            CircuitState::Closed => self.failure_rate < 0.1,
            CircuitState::Open => false,
            CircuitState::HalfOpen => true,
        }
    }

    /// Get human-readable state description
    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "Healthy - Normal operation",
            CircuitState::Open => "Failing - Rejecting all calls",
            CircuitState::HalfOpen => "Recovering - Testing system health",
        }
    }

    /// Format metrics for logging
    pub fn format_summary(&self) -> String {
        format!(
            "State: {} | Calls: {} | Success: {:.1}% | Failures: {} | Rejected: {} | Avg Duration: {}ms",
            self.state_description(),
            self.total_calls,
            self.success_rate * 100.0,
            self.failure_count,
            self.rejected_count,
            self.average_duration.as_millis()
        )
    }
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// System-wide circuit breaker metrics aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    /// Metrics for individual circuit breakers by operation name
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,

    pub collected_at: DateTime<Utc>,
}

impl SystemCircuitBreakerMetrics {
    pub fn new() -> Self {
        Self {
            circuit_breakers: HashMap::new(),
            collected_at: Utc::now(),
        }
    }

    pub fn add_circuit_breaker(&mut self, name: String, metrics: CircuitBreakerMetrics) {
        self.circuit_breakers.insert(name, metrics);
        self.collected_at = Utc::now();
    }

    /// Get count of circuit breakers by state
    pub fn count_by_state(&self) -> HashMap<CircuitState, usize> {
        let mut counts = HashMap::new();
        for metrics in self.circuit_breakers.values() {
            *counts.entry(metrics.current_state).or_insert(0) += 1;
        }
        counts
    }

    /// Get list of unhealthy circuit breakers
    pub fn unhealthy_circuits(&self) -> Vec<(&String, &CircuitBreakerMetrics)> {
        self.circuit_breakers
            .iter()
            .filter(|(_, metrics)| !metrics.is_healthy())
            .collect()
    }

    /// Calculate system-wide health score (0.0 to 1.0)
    pub fn health_score(&self) -> f64 {
        if self.circuit_breakers.is_empty() {
            return 1.0;
        }

        let healthy_count = self
            .circuit_breakers
            .values()
            .filter(|metrics| metrics.is_healthy())
            .count();

        healthy_count as f64 / self.circuit_breakers.len() as f64
    }

    pub fn total_calls(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.total_calls).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.failure_count).sum()
    }

    pub fn total_rejections(&self) -> u64 {
        self.circuit_breakers.values().map(|m| m.rejected_count).sum()
    }

    pub fn system_failure_rate(&self) -> f64 {
        let total_calls = self.total_calls();
        if total_calls == 0 {
            return 0.0;
        }
        self.total_failures() as f64 / total_calls as f64
    }

    /// Format summary for logging
    pub fn format_summary(&self) -> String {
        let state_counts = self.count_by_state();
        let count = |state: CircuitState| state_counts.get(&state).copied().unwrap_or(0);

        format!(
            "Circuit Breakers: {} total | {} closed | {} open | {} half-open | Health: {:.1}% | System failure rate: {:.2}%",
            self.circuit_breakers.len(),
            count(CircuitState::Closed),
            count(CircuitState::Open),
            count(CircuitState::HalfOpen),
            self.health_score() * 100.0,
            self.system_failure_rate() * 100.0
        )
    }
}

impl Default for SystemCircuitBreakerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics_in(state: CircuitState, total: u64, failures: u64) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: total,
            success_count: total - failures,
            failure_count: failures,
            current_state: state,
            failure_rate: if total == 0 { 0.0 } else { failures as f64 / total as f64 },
            ..CircuitBreakerMetrics::new()
        }
    }

    #[test]
    fn test_health_by_state_and_rate() {
        assert!(metrics_in(CircuitState::Closed, 5, 4).is_healthy());
        assert!(!metrics_in(CircuitState::Closed, 100, 50).is_healthy());
        assert!(!metrics_in(CircuitState::Open, 0, 0).is_healthy());
        assert!(metrics_in(CircuitState::HalfOpen, 10, 10).is_healthy());
    }

    #[test]
    fn test_system_aggregation() {
        let mut system = SystemCircuitBreakerMetrics::new();
        system.add_circuit_breaker("a".into(), metrics_in(CircuitState::Closed, 20, 0));
        system.add_circuit_breaker("b".into(), metrics_in(CircuitState::Open, 20, 10));

        assert_eq!(system.total_calls(), 40);
        assert_eq!(system.health_score(), 0.5);
        assert_eq!(system.count_by_state()[&CircuitState::Open], 1);
        assert_eq!(system.unhealthy_circuits().len(), 1);
        assert!(system.format_summary().contains("2 total"));
    }
}
