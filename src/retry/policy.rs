use crate::error::{ErrorKind, TaskerError, TaskerResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Rules governing re-attempts after a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total handler invocations allowed, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
    /// When non-empty, only these kinds are retried
    pub retryable_kinds: HashSet<ErrorKind>,
    /// Kinds that fail immediately without consuming retry budget
    pub non_retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            retryable_kinds: HashSet::new(),
            non_retryable_kinds: Self::default_non_retryable_kinds(),
        }
    }
}

impl RetryPolicy {
    /// Validation and authentication failures will not succeed on a rerun;
    /// timeouts, cancellations and breaker rejections end the task outright.
    pub fn default_non_retryable_kinds() -> HashSet<ErrorKind> {
        [
            ErrorKind::InvalidInput,
            ErrorKind::MissingField,
            ErrorKind::ConstraintViolation,
            ErrorKind::Unauthorized,
            ErrorKind::Forbidden,
            ErrorKind::Timeout,
            ErrorKind::Cancelled,
            ErrorKind::CircuitOpen,
        ]
        .into_iter()
        .collect()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Mark a kind retryable, removing it from the non-retryable set
    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.non_retryable_kinds.remove(&kind);
        self.retryable_kinds.insert(kind);
        self
    }

    /// Mark a kind non-retryable, removing it from the retryable set
    pub fn never_retry(mut self, kind: ErrorKind) -> Self {
        self.retryable_kinds.remove(&kind);
        self.non_retryable_kinds.insert(kind);
        self
    }

    pub fn validate(&self) -> TaskerResult<()> {
        if self.max_attempts == 0 {
            return Err(TaskerError::InvalidPolicy(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(TaskerError::InvalidPolicy(format!(
                "base_delay {:?} exceeds max_delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        if !self.exponential_base.is_finite() || self.exponential_base < 1.0 {
            return Err(TaskerError::InvalidPolicy(format!(
                "exponential_base must be a finite number >= 1.0, got {}",
                self.exponential_base
            )));
        }

        let mut overlap: Vec<&str> = self
            .retryable_kinds
            .intersection(&self.non_retryable_kinds)
            .map(|kind| kind.as_str())
            .collect();
        if !overlap.is_empty() {
            overlap.sort_unstable();
            return Err(TaskerError::InvalidPolicy(format!(
                "kinds both retryable and non-retryable: {}",
                overlap.join(", ")
            )));
        }

        Ok(())
    }

    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        if self.non_retryable_kinds.contains(&kind) {
            return false;
        }
        self.retryable_kinds.is_empty() || self.retryable_kinds.contains(&kind)
    }

    /// Whether another attempt may follow the zero-indexed `attempt`
    pub fn has_attempts_remaining(&self, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts
    }

    /// `min(base_delay * exponential_base^attempt, max_delay)`, before jitter
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let seconds = self.base_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let max_seconds = self.max_delay.as_secs_f64();

        if !seconds.is_finite() || seconds >= max_seconds {
            self.max_delay
        } else {
            Duration::from_secs_f64(seconds.max(0.0))
        }
    }

    /// Delay to wait after the zero-indexed `attempt` failed. With jitter the
    /// capped delay is scaled by a uniform factor in `[0.5, 1.0]`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.capped_delay(attempt);
        if self.jitter {
            delay.mul_f64(0.5 + fastrand::f64() * 0.5)
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn create_test_policy() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(5)
            .with_delays(Duration::from_millis(100), Duration::from_secs(1))
            .with_jitter(false)
    }

    #[test]
    fn test_default_policy_is_valid() {
        assert!(RetryPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let policy = create_test_policy();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_overlapping_kind_sets_are_rejected() {
        let mut policy = create_test_policy();
        policy.retryable_kinds.insert(ErrorKind::Timeout);

        let error = policy.validate().unwrap_err();
        assert!(matches!(error, TaskerError::InvalidPolicy(msg) if msg.contains("timeout")));
    }

    #[test]
    fn test_retryable_membership() {
        let policy = create_test_policy();
        assert!(policy.is_retryable(ErrorKind::ConnectionReset));
        assert!(policy.is_retryable(ErrorKind::Unknown));
        assert!(!policy.is_retryable(ErrorKind::InvalidInput));
        assert!(!policy.is_retryable(ErrorKind::CircuitOpen));

        let narrowed = policy.retry_on(ErrorKind::DatabaseQuery);
        assert!(narrowed.is_retryable(ErrorKind::DatabaseQuery));
        assert!(!narrowed.is_retryable(ErrorKind::ConnectionReset));
        assert!(narrowed.validate().is_ok());
    }

    #[test]
    fn test_attempt_budget() {
        let policy = create_test_policy().with_max_attempts(3);
        assert!(policy.has_attempts_remaining(0));
        assert!(policy.has_attempts_remaining(1));
        assert!(!policy.has_attempts_remaining(2));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        assert!(create_test_policy().with_max_attempts(0).validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_max(
            base_ms in 1u64..5_000,
            extra_ms in 0u64..60_000,
            exponential_base in 1.0f64..10.0,
            attempt in 0u32..200,
            jitter in any::<bool>(),
        ) {
            let policy = RetryPolicy {
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(base_ms + extra_ms),
                exponential_base,
                jitter,
                ..RetryPolicy::default()
            };
            prop_assert!(policy.delay_for_attempt(attempt) <= policy.max_delay);
        }

        #[test]
        fn prop_capped_delay_is_monotonic(
            base_ms in 1u64..1_000,
            exponential_base in 1.0f64..4.0,
            attempt in 0u32..64,
        ) {
            let policy = RetryPolicy {
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_secs(120),
                exponential_base,
                ..RetryPolicy::default()
            };
            prop_assert!(policy.capped_delay(attempt) <= policy.capped_delay(attempt + 1));
        }

        #[test]
        fn prop_jitter_stays_in_half_to_full_range(attempt in 0u32..10) {
            let policy = RetryPolicy {
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_secs(30),
                jitter: true,
                ..RetryPolicy::default()
            };
            let ceiling = policy.capped_delay(attempt);
            let delay = policy.delay_for_attempt(attempt);
            prop_assert!(delay <= ceiling);
            prop_assert!(delay >= ceiling.mul_f64(0.5));
        }
    }
}
