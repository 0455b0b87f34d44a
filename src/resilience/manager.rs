//! # Circuit Breaker Manager
//!
//! One breaker per operation name, created lazily on first use with the
//! operation's configured override or the section defaults.

use crate::config::CircuitBreakerConfig;
use crate::resilience::{
    CircuitBreaker, CircuitBreakerMetrics, CircuitBreakerState, CircuitState,
    SystemCircuitBreakerMetrics,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CircuitBreakerManager {
    /// Collection of circuit breakers by operation name
    circuit_breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,

    config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        info!(
            enabled = config.enabled,
            failure_threshold = config.failure_threshold,
            overrides = config.component_configs.len(),
            "Initializing circuit breaker manager"
        );

        Self {
            circuit_breakers: Arc::new(RwLock::new(HashMap::new())),
            config: config.clone(),
        }
    }

    /// Whether calls should be guarded at all
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Get or create circuit breaker for an operation
    pub fn get_circuit_breaker(&self, operation: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.circuit_breakers.read();
            if let Some(breaker) = breakers.get(operation) {
                return Arc::clone(breaker);
            }
        }

        let mut breakers = self.circuit_breakers.write();

        // Double-check pattern (another thread might have created it)
        if let Some(breaker) = breakers.get(operation) {
            return Arc::clone(breaker);
        }

        let breaker = Arc::new(CircuitBreaker::new(
            operation,
            self.config.config_for_component(operation),
        ));
        breakers.insert(operation.to_string(), Arc::clone(&breaker));

        info!(
            component = operation,
            total_circuit_breakers = breakers.len(),
            "Created new circuit breaker"
        );

        breaker
    }

    /// Existing breaker for an operation, without creating one
    pub fn get(&self, operation: &str) -> Option<Arc<CircuitBreaker>> {
        self.circuit_breakers.read().get(operation).cloned()
    }

    pub fn list_components(&self) -> Vec<String> {
        self.circuit_breakers.read().keys().cloned().collect()
    }

    pub fn get_component_metrics(&self, operation: &str) -> Option<CircuitBreakerMetrics> {
        self.get(operation).map(|breaker| breaker.metrics())
    }

    pub fn get_component_state(&self, operation: &str) -> Option<CircuitBreakerState> {
        self.get(operation).map(|breaker| breaker.snapshot())
    }

    pub fn get_system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let mut system_metrics = SystemCircuitBreakerMetrics::new();
        for (name, breaker) in self.circuit_breakers.read().iter() {
            system_metrics.add_circuit_breaker(name.clone(), breaker.metrics());
        }
        system_metrics
    }

    /// Force open all circuit breakers (emergency stop)
    pub fn force_open_all(&self) {
        warn!("Forcing all circuit breakers open");
        for breaker in self.circuit_breakers.read().values() {
            breaker.force_open();
        }
    }

    /// Force close all circuit breakers (emergency recovery)
    pub fn force_close_all(&self) {
        warn!("Forcing all circuit breakers closed");
        for breaker in self.circuit_breakers.read().values() {
            breaker.force_closed();
        }
    }

    pub fn get_state_summary(&self) -> HashMap<CircuitState, usize> {
        self.get_system_metrics().count_by_state()
    }

    pub fn system_health_score(&self) -> f64 {
        self.get_system_metrics().health_score()
    }
}
