//! # Error Types
//!
//! Two families of errors live here:
//!
//! - [`TaskerError`]: failures of the task execution core itself (registration,
//!   submission, broker connectivity, configuration).
//! - [`TaskError`]: failures produced by task handlers. Every handler failure is
//!   mapped into the closed [`ErrorKind`] enum so retry decisions are made over
//!   kinds rather than over concrete error types.

use crate::cache::CacheError;
use crate::config::ConfigurationError;
use crate::messaging::MessagingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskerError {
    #[error("Task type not registered: {name}")]
    NotRegistered { name: String },
    #[error("Task type already registered: {name}")]
    AlreadyRegistered { name: String },
    #[error("Circuit breaker is open for {operation}")]
    CircuitOpen { operation: String },
    #[error("Broker error: {0}")]
    Broker(String),
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("Invalid retry policy: {0}")]
    InvalidPolicy(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Cache error: {0}")]
    Cache(String),
    #[error("Task service is stopped")]
    ServiceStopped,
}

impl From<serde_json::Error> for TaskerError {
    fn from(error: serde_json::Error) -> Self {
        TaskerError::Serialization(error.to_string())
    }
}

impl From<MessagingError> for TaskerError {
    fn from(error: MessagingError) -> Self {
        TaskerError::Broker(error.to_string())
    }
}

impl From<ConfigurationError> for TaskerError {
    fn from(error: ConfigurationError) -> Self {
        TaskerError::Configuration(error.to_string())
    }
}

impl From<CacheError> for TaskerError {
    fn from(error: CacheError) -> Self {
        TaskerError::Cache(error.to_string())
    }
}

pub type TaskerResult<T> = std::result::Result<T, TaskerError>;

/// Closed set of failure kinds a handler can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    // Network
    ConnectionRefused,
    ConnectionReset,
    DnsResolution,
    NetworkTimeout,
    // Database
    DatabaseConnection,
    DatabaseQuery,
    Deadlock,
    ConstraintViolation,
    // Authentication
    Unauthorized,
    Forbidden,
    // Validation
    InvalidInput,
    MissingField,
    // External dependencies
    ExternalApi,
    RateLimited,
    ServiceUnavailable,
    CircuitOpen,
    // System
    OutOfMemory,
    DiskFull,
    Internal,
    // Execution control
    Timeout,
    Cancelled,
    Unknown,
}

/// Primary error categories used for classification and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Network,
    Database,
    Authentication,
    Validation,
    ExternalDependency,
    System,
    Timeout,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::DnsResolution
            | ErrorKind::NetworkTimeout => ErrorCategory::Network,
            ErrorKind::DatabaseConnection
            | ErrorKind::DatabaseQuery
            | ErrorKind::Deadlock
            | ErrorKind::ConstraintViolation => ErrorCategory::Database,
            ErrorKind::Unauthorized | ErrorKind::Forbidden => ErrorCategory::Authentication,
            ErrorKind::InvalidInput | ErrorKind::MissingField => ErrorCategory::Validation,
            ErrorKind::ExternalApi
            | ErrorKind::RateLimited
            | ErrorKind::ServiceUnavailable
            | ErrorKind::CircuitOpen => ErrorCategory::ExternalDependency,
            ErrorKind::OutOfMemory | ErrorKind::DiskFull | ErrorKind::Internal => {
                ErrorCategory::System
            }
            ErrorKind::Timeout => ErrorCategory::Timeout,
            ErrorKind::Cancelled => ErrorCategory::Cancelled,
            ErrorKind::Unknown => ErrorCategory::Unknown,
        }
    }

    /// Caller-visible error type name, e.g. `"ValidationError"`.
    ///
    /// Circuit breaker rejections get their own name so callers can tell a
    /// degraded dependency apart from a failing task.
    pub fn error_type(&self) -> &'static str {
        match self {
            ErrorKind::CircuitOpen => "CircuitOpenError",
            other => other.category().error_type(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::ConnectionReset => "connection_reset",
            ErrorKind::DnsResolution => "dns_resolution",
            ErrorKind::NetworkTimeout => "network_timeout",
            ErrorKind::DatabaseConnection => "database_connection",
            ErrorKind::DatabaseQuery => "database_query",
            ErrorKind::Deadlock => "deadlock",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::MissingField => "missing_field",
            ErrorKind::ExternalApi => "external_api",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::OutOfMemory => "out_of_memory",
            ErrorKind::DiskFull => "disk_full",
            ErrorKind::Internal => "internal",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ErrorCategory {
    pub fn error_type(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "NetworkError",
            ErrorCategory::Database | ErrorCategory::ExternalDependency => "DependencyError",
            ErrorCategory::Authentication => "AuthenticationError",
            ErrorCategory::Validation => "ValidationError",
            ErrorCategory::System => "SystemError",
            ErrorCategory::Timeout => "TimeoutError",
            ErrorCategory::Cancelled => "CancelledError",
            ErrorCategory::Unknown => "UnknownError",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Database => "database",
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Validation => "validation",
            ErrorCategory::ExternalDependency => "external_dependency",
            ErrorCategory::System => "system",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by a task handler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{kind}: {message}")]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
    /// Messages of underlying causes, outermost first
    #[serde(default)]
    pub causes: Vec<String>,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            causes: Vec::new(),
        }
    }

    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.causes.push(cause.into());
        self
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConnectionReset, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DatabaseQuery, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ExternalApi, message)
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(error: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            message: error.to_string(),
            causes: error.chain().skip(1).map(|cause| cause.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_categories() {
        assert_eq!(ErrorKind::DnsResolution.category(), ErrorCategory::Network);
        assert_eq!(ErrorKind::Deadlock.category(), ErrorCategory::Database);
        assert_eq!(ErrorKind::MissingField.category(), ErrorCategory::Validation);
        assert_eq!(ErrorKind::OutOfMemory.category(), ErrorCategory::System);
        assert_eq!(
            ErrorKind::RateLimited.category(),
            ErrorCategory::ExternalDependency
        );
    }

    #[test]
    fn test_error_type_names() {
        assert_eq!(ErrorKind::InvalidInput.error_type(), "ValidationError");
        assert_eq!(ErrorKind::DatabaseQuery.error_type(), "DependencyError");
        assert_eq!(ErrorKind::ExternalApi.error_type(), "DependencyError");
        assert_eq!(ErrorKind::CircuitOpen.error_type(), "CircuitOpenError");
    }

    #[test]
    fn test_anyhow_conversion_keeps_cause_chain() {
        let error = anyhow::anyhow!("socket closed").context("fetch failed");
        let task_error = TaskError::from(error);

        assert_eq!(task_error.kind, ErrorKind::Unknown);
        assert_eq!(task_error.message, "fetch failed");
        assert_eq!(task_error.causes, vec!["socket closed".to_string()]);
    }

    #[test]
    fn test_task_error_display() {
        let error = TaskError::validation("amount must be positive");
        assert_eq!(error.to_string(), "invalid_input: amount must be positive");
    }
}
