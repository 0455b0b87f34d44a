use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle states
///
/// `Pending → Started → (Success | Failure | Revoked)`, with `Retry` as a
/// transient marker between a failed attempt and the next `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Submitted and waiting in a queue
    Pending,
    /// A worker is running an attempt
    Started,
    /// Between a failed attempt and the next one
    Retry,
    /// Handler returned a result
    Success,
    /// Retries exhausted, non-retryable failure, or timeout
    Failure,
    /// Cancelled by a caller
    Revoked,
}

impl TaskStatus {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Revoked)
    }

    /// Terminal outcomes that are written to the result cache
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Success | Self::Failure)
    }

    /// Check if this is an active state (a worker owns the task)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Started | Self::Retry)
    }

    /// Whether moving from `self` to `next` follows the lifecycle graph
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Started)
                | (Pending, Revoked)
                | (Started, Success)
                | (Started, Failure)
                | (Started, Retry)
                | (Started, Revoked)
                | (Retry, Started)
                | (Retry, Revoked)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Started => write!(f, "STARTED"),
            Self::Retry => write!(f, "RETRY"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Failure => write!(f, "FAILURE"),
            Self::Revoked => write!(f, "REVOKED"),
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "STARTED" => Ok(Self::Started),
            "RETRY" => Ok(Self::Retry),
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "REVOKED" => Ok(Self::Revoked),
            _ => Err(format!("Invalid task status: {s}")),
        }
    }
}

/// Submission priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Invalid task priority: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failure.is_terminal());
        assert!(TaskStatus::Revoked.is_terminal());
        assert!(!TaskStatus::Retry.is_terminal());
        assert!(!TaskStatus::Revoked.is_cacheable());
    }

    #[test]
    fn test_lifecycle_graph() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Started));
        assert!(TaskStatus::Started.can_transition_to(TaskStatus::Retry));
        assert!(TaskStatus::Retry.can_transition_to(TaskStatus::Started));

        // Retry is never terminal: it cannot jump straight to an outcome
        assert!(!TaskStatus::Retry.can_transition_to(TaskStatus::Success));
        assert!(!TaskStatus::Pending.can_transition_to(TaskStatus::Success));
        assert!(!TaskStatus::Success.can_transition_to(TaskStatus::Revoked));
    }

    #[test]
    fn test_status_round_trip_through_strings() {
        assert_eq!("retry".parse::<TaskStatus>(), Ok(TaskStatus::Retry));
        assert_eq!(TaskStatus::Failure.to_string(), "FAILURE");
        assert_eq!(
            serde_json::to_string(&TaskStatus::Success).unwrap(),
            "\"SUCCESS\""
        );
    }

    #[test]
    fn test_priority_parsing() {
        assert_eq!("CRITICAL".parse::<TaskPriority>(), Ok(TaskPriority::Critical));
        assert!("urgent".parse::<TaskPriority>().is_err());
        assert_eq!(TaskPriority::default(), TaskPriority::Normal);
    }
}
