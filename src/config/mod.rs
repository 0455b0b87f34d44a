//! # Configuration System
//!
//! Typed configuration for the task execution core. Values are loaded by
//! [`ConfigManager`] from TOML files plus `TASKER__`-prefixed environment
//! variables, and every section is validated before use.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tasker_resilient_queue::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let breaker = manager.config().circuit_breaker.config_for_component("send_email");
//! println!("failure threshold: {}", breaker.failure_threshold);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::models::TaskPriority;
use crate::orchestration::rate_limiter::RateLimit;
use crate::resilience;
use crate::retry::RetryPolicy;
use crate::utils::serde::{duration_secs, option_duration_secs};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring `tasker.toml`
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskerConfig {
    /// Service name used to label metrics and structured error records
    pub service_name: String,

    /// Defaults applied to task types registered without explicit config
    pub task_defaults: TaskConfig,

    /// Circuit breaker settings for task execution
    pub circuit_breaker: CircuitBreakerConfig,

    /// Worker pool settings
    pub worker: WorkerConfig,

    /// Result cache settings
    pub cache: CacheConfig,

    /// Physical queue names per priority lane
    pub queues: QueuesConfig,
}

impl Default for TaskerConfig {
    fn default() -> Self {
        Self {
            service_name: "tasker".to_string(),
            task_defaults: TaskConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            worker: WorkerConfig::default(),
            cache: CacheConfig::default(),
            queues: QueuesConfig::default(),
        }
    }
}

impl TaskerConfig {
    /// Validate every section
    pub fn validate(&self) -> ConfigResult<()> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigurationError::invalid_value(
                "service_name",
                &self.service_name,
                "must not be empty",
            ));
        }

        self.task_defaults.validate()?;
        self.circuit_breaker.validate()?;
        self.worker.validate()?;
        self.cache.validate()?;
        self.queues.validate()?;
        Ok(())
    }
}

/// Per-task-type execution configuration. Immutable once a task type is registered.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Retries after the first attempt; the handler runs at most `max_retries + 1` times
    pub max_retries: u32,

    #[serde(with = "duration_secs")]
    pub base_delay: Duration,

    #[serde(with = "duration_secs")]
    pub max_delay: Duration,

    pub backoff_multiplier: f64,

    pub jitter: bool,

    /// Hard limit per attempt
    #[serde(with = "option_duration_secs")]
    pub timeout: Option<Duration>,

    /// Cooperative cancellation point per attempt, must be below `timeout`
    #[serde(with = "option_duration_secs")]
    pub soft_timeout: Option<Duration>,

    /// Priority used when a submission does not specify one
    pub priority: TaskPriority,

    /// Start-rate limit such as `"10/s"`, `"100/m"` or `"500/h"`
    pub rate_limit: Option<String>,

    /// Pins the task type to one lane regardless of submission priority
    pub queue_name: Option<String>,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            jitter: true,
            timeout: Some(Duration::from_secs(300)),
            soft_timeout: None,
            priority: TaskPriority::Normal,
            rate_limit: None,
            queue_name: None,
        }
    }
}

impl TaskConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.base_delay > self.max_delay {
            return Err(ConfigurationError::invalid_value(
                "base_delay",
                format!("{:?}", self.base_delay),
                format!("must not exceed max_delay ({:?})", self.max_delay),
            ));
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "backoff_multiplier",
                self.backoff_multiplier.to_string(),
                "must be a finite number >= 1.0",
            ));
        }

        if let Some(timeout) = self.timeout {
            if timeout.is_zero() {
                return Err(ConfigurationError::invalid_value(
                    "timeout",
                    "0",
                    "must be greater than 0",
                ));
            }
            if let Some(soft) = self.soft_timeout {
                if soft >= timeout {
                    return Err(ConfigurationError::invalid_value(
                        "soft_timeout",
                        format!("{soft:?}"),
                        format!("must be below timeout ({timeout:?})"),
                    ));
                }
            }
        }

        if let Some(rate_limit) = &self.rate_limit {
            RateLimit::parse(rate_limit).map_err(|reason| {
                ConfigurationError::invalid_value("rate_limit", rate_limit, reason)
            })?;
        }

        Ok(())
    }

    /// Retry policy derived from this task configuration
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries.saturating_add(1),
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            exponential_base: self.backoff_multiplier,
            jitter: self.jitter,
            ..RetryPolicy::default()
        }
    }

    /// Parsed rate limit, `None` when unset or unparseable
    pub fn parsed_rate_limit(&self) -> Option<RateLimit> {
        self.rate_limit
            .as_deref()
            .and_then(|rate| RateLimit::parse(rate).ok())
    }
}

/// Circuit breaker configuration with per-operation overrides
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Whether task execution is guarded by circuit breakers
    pub enabled: bool,

    /// Consecutive failures before a breaker opens
    pub failure_threshold: u32,

    /// Time an open breaker waits before admitting a trial call
    #[serde(with = "duration_secs")]
    pub recovery_timeout: Duration,

    /// Overrides keyed by operation name
    pub component_configs: HashMap<String, CircuitBreakerComponentConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            component_configs: HashMap::new(),
        }
    }
}

/// Override for a single operation's breaker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CircuitBreakerComponentConfig {
    pub failure_threshold: u32,
    #[serde(with = "duration_secs")]
    pub recovery_timeout: Duration,
}

impl CircuitBreakerConfig {
    /// Get configuration for a specific operation
    pub fn config_for_component(&self, component_name: &str) -> resilience::CircuitBreakerConfig {
        match self.component_configs.get(component_name) {
            Some(component) => resilience::CircuitBreakerConfig {
                failure_threshold: component.failure_threshold,
                recovery_timeout: component.recovery_timeout,
            },
            None => resilience::CircuitBreakerConfig {
                failure_threshold: self.failure_threshold,
                recovery_timeout: self.recovery_timeout,
            },
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let defaults = self.config_for_component("");
        defaults
            .validate()
            .map_err(|reason| ConfigurationError::invalid_value("circuit_breaker", "default", reason))?;

        for name in self.component_configs.keys() {
            self.config_for_component(name).validate().map_err(|reason| {
                ConfigurationError::invalid_value(
                    format!("circuit_breaker.component_configs.{name}"),
                    name,
                    reason,
                )
            })?;
        }
        Ok(())
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of tasks allowed to execute at once
    pub concurrency: usize,
    /// Idle wait between empty dequeue attempts
    pub poll_interval_ms: u64,
    /// How long shutdown waits for in-flight tasks
    pub shutdown_timeout_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 50,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.concurrency",
                "0",
                "must be greater than 0",
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "worker.poll_interval_ms",
                "0",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Result cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub result_ttl_seconds: u64,
    /// How often expired results are swept out while the service runs
    pub sweep_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            result_ttl_seconds: 3600,
            sweep_interval_ms: 60_000,
        }
    }
}

impl CacheConfig {
    pub fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.enabled && self.result_ttl_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.result_ttl_seconds",
                "0",
                "must be greater than 0 when the cache is enabled",
            ));
        }
        if self.enabled && self.sweep_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "cache.sweep_interval_ms",
                "0",
                "must be greater than 0 when the cache is enabled",
            ));
        }
        Ok(())
    }
}

/// Physical queue names for each priority lane
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueuesConfig {
    pub low: String,
    pub default: String,
    pub high: String,
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            low: "low".to_string(),
            default: "default".to_string(),
            high: "high".to_string(),
        }
    }
}

impl QueuesConfig {
    /// Queue names in the order workers drain them
    pub fn in_priority_order(&self) -> Vec<String> {
        vec![self.high.clone(), self.default.clone(), self.low.clone()]
    }

    pub fn contains(&self, queue_name: &str) -> bool {
        queue_name == self.high || queue_name == self.default || queue_name == self.low
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let names = [&self.high, &self.default, &self.low];
        for name in names {
            if name.trim().is_empty() {
                return Err(ConfigurationError::invalid_value(
                    "queues",
                    name.as_str(),
                    "queue names must not be empty",
                ));
            }
        }
        if self.high == self.default || self.default == self.low || self.high == self.low {
            return Err(ConfigurationError::invalid_value(
                "queues",
                format!("{}/{}/{}", self.high, self.default, self.low),
                "queue names must be distinct",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TaskerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_task_config_rejects_base_delay_above_max() {
        let config = TaskConfig {
            base_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_task_config_rejects_soft_timeout_at_or_above_timeout() {
        let config = TaskConfig {
            timeout: Some(Duration::from_secs(5)),
            soft_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_task_config_rejects_bad_rate_limit() {
        let config = TaskConfig {
            rate_limit: Some("ten per second".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_policy_derivation() {
        let config = TaskConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            ..Default::default()
        };
        let policy = config.retry_policy();

        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.base_delay, Duration::from_millis(100));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_component_override_lookup() {
        let mut config = CircuitBreakerConfig::default();
        config.component_configs.insert(
            "payments".to_string(),
            CircuitBreakerComponentConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(5),
            },
        );

        assert_eq!(config.config_for_component("payments").failure_threshold, 2);
        assert_eq!(config.config_for_component("other").failure_threshold, 5);
    }

    #[test]
    fn test_queue_names_must_be_distinct() {
        let queues = QueuesConfig {
            low: "shared".to_string(),
            default: "shared".to_string(),
            high: "high".to_string(),
        };
        assert!(queues.validate().is_err());
    }
}
