//! # Error Handler
//!
//! Turns raw handler failures into [`StructuredError`] records: the kind is
//! refined from message heuristics when the handler reported
//! [`ErrorKind::Unknown`], a severity is assigned by category and sub-type,
//! and every classification is counted and logged at a matching level.
//!
//! The resulting record drives both the retry decision and the error callers
//! see on a terminal failure.

use crate::error::{ErrorCategory, ErrorKind, TaskError};
use crate::metrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info, warn};
use uuid::Uuid;

/// How urgently a failure needs attention
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure, as stored on the task and in the result cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub error_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Caller-visible name such as `ValidationError` or `CircuitOpenError`
    pub error_type: String,
    pub kind: ErrorKind,
    pub category: ErrorCategory,
    pub severity: ErrorSeverity,
    pub operation: String,
    pub message: String,
    #[serde(default)]
    pub cause_chain: Vec<String>,
}

impl StructuredError {
    pub fn is_circuit_open(&self) -> bool {
        self.kind == ErrorKind::CircuitOpen
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

/// Keyword heuristics, checked in order against the lowercased message and
/// causes of a failure that did not declare a kind.
const KEYWORD_RULES: &[(&[&str], ErrorKind)] = &[
    (&["out of memory", "memoryerror", "oom-kill", "oomkilled"], ErrorKind::OutOfMemory),
    (&["disk full", "no space left"], ErrorKind::DiskFull),
    (&["connection refused"], ErrorKind::ConnectionRefused),
    (&["connection reset", "broken pipe"], ErrorKind::ConnectionReset),
    (&["dns", "name resolution"], ErrorKind::DnsResolution),
    (&["deadlock"], ErrorKind::Deadlock),
    (
        &["constraint", "duplicate key", "unique violation"],
        ErrorKind::ConstraintViolation,
    ),
    (&["database", "sql", "query failed"], ErrorKind::DatabaseQuery),
    (&["unauthorized", "unauthenticated", "401"], ErrorKind::Unauthorized),
    (&["forbidden", "permission denied", "403"], ErrorKind::Forbidden),
    (&["rate limit", "too many requests", "429"], ErrorKind::RateLimited),
    (&["service unavailable", "503"], ErrorKind::ServiceUnavailable),
    (&["timed out", "timeout"], ErrorKind::NetworkTimeout),
    (
        &["invalid", "validation", "missing", "required"],
        ErrorKind::InvalidInput,
    ),
    (&["connection", "network", "socket"], ErrorKind::ConnectionReset),
    (&["api error", "upstream", "bad gateway", "502"], ErrorKind::ExternalApi),
];

/// Classifies handler failures and reports them
#[derive(Debug, Clone)]
pub struct ErrorHandler {
    service_name: String,
}

impl ErrorHandler {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Classify `error` raised by `operation`, emitting a metric and a log
    /// entry whose level follows the severity.
    pub fn classify(&self, error: &TaskError, operation: &str) -> StructuredError {
        let structured = Self::build_record(error, operation);
        self.report(&structured);
        structured
    }

    /// Classification without side effects
    pub fn build_record(error: &TaskError, operation: &str) -> StructuredError {
        let kind = Self::refine_kind(error);
        let category = kind.category();

        StructuredError {
            error_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            error_type: kind.error_type().to_string(),
            kind,
            category,
            severity: Self::severity_for(kind),
            operation: operation.to_string(),
            message: error.message.clone(),
            cause_chain: error.causes.clone(),
        }
    }

    /// Declared kinds are trusted; `Unknown` is narrowed by keyword.
    pub fn refine_kind(error: &TaskError) -> ErrorKind {
        if error.kind != ErrorKind::Unknown {
            return error.kind;
        }

        let haystack = std::iter::once(error.message.as_str())
            .chain(error.causes.iter().map(String::as_str))
            .map(str::to_lowercase)
            .collect::<Vec<_>>()
            .join(" | ");

        KEYWORD_RULES
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|keyword| haystack.contains(keyword)))
            .map(|(_, kind)| *kind)
            .unwrap_or(ErrorKind::Unknown)
    }

    /// Severity by category, with system resource exhaustion always critical
    pub fn severity_for(kind: ErrorKind) -> ErrorSeverity {
        match kind {
            ErrorKind::OutOfMemory | ErrorKind::DiskFull => ErrorSeverity::Critical,
            ErrorKind::Internal
            | ErrorKind::DatabaseConnection
            | ErrorKind::Unauthorized
            | ErrorKind::Forbidden
            | ErrorKind::ServiceUnavailable => ErrorSeverity::High,
            ErrorKind::InvalidInput
            | ErrorKind::MissingField
            | ErrorKind::RateLimited
            | ErrorKind::Cancelled => ErrorSeverity::Low,
            _ => ErrorSeverity::Medium,
        }
    }

    fn report(&self, structured: &StructuredError) {
        metrics::record_error(
            &self.service_name,
            structured.severity.as_str(),
            structured.category.as_str(),
            &structured.operation,
        );

        match structured.severity {
            ErrorSeverity::Critical | ErrorSeverity::High => error!(
                error_id = %structured.error_id,
                service = %self.service_name,
                operation = %structured.operation,
                error_type = %structured.error_type,
                kind = %structured.kind,
                category = %structured.category,
                severity = %structured.severity,
                message = %structured.message,
                "Task error classified"
            ),
            ErrorSeverity::Medium => warn!(
                error_id = %structured.error_id,
                service = %self.service_name,
                operation = %structured.operation,
                error_type = %structured.error_type,
                kind = %structured.kind,
                category = %structured.category,
                severity = %structured.severity,
                message = %structured.message,
                "Task error classified"
            ),
            ErrorSeverity::Low => info!(
                error_id = %structured.error_id,
                service = %self.service_name,
                operation = %structured.operation,
                error_type = %structured.error_type,
                kind = %structured.kind,
                category = %structured.category,
                severity = %structured.severity,
                message = %structured.message,
                "Task error classified"
            ),
        }
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new("tasker")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_kind_is_kept() {
        let error = TaskError::new(ErrorKind::Deadlock, "invalid state");
        assert_eq!(ErrorHandler::refine_kind(&error), ErrorKind::Deadlock);
    }

    #[test]
    fn test_unknown_kind_refined_by_keywords() {
        let cases = [
            ("Connection refused by 10.0.0.4:5432", ErrorKind::ConnectionRefused),
            ("request timed out after 30s", ErrorKind::NetworkTimeout),
            ("MemoryError: cannot allocate", ErrorKind::OutOfMemory),
            ("duplicate key value violates unique constraint", ErrorKind::ConstraintViolation),
            ("HTTP 429 Too Many Requests", ErrorKind::RateLimited),
            ("field 'email' is required", ErrorKind::InvalidInput),
            ("something odd happened", ErrorKind::Unknown),
        ];

        for (message, expected) in cases {
            let error = TaskError::new(ErrorKind::Unknown, message);
            assert_eq!(ErrorHandler::refine_kind(&error), expected, "{message}");
        }
    }

    #[test]
    fn test_causes_participate_in_refinement() {
        let error = TaskError::new(ErrorKind::Unknown, "sync failed").with_cause("broken pipe");
        assert_eq!(ErrorHandler::refine_kind(&error), ErrorKind::ConnectionReset);
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(ErrorHandler::severity_for(ErrorKind::OutOfMemory), ErrorSeverity::Critical);
        assert_eq!(ErrorHandler::severity_for(ErrorKind::Internal), ErrorSeverity::High);
        assert_eq!(ErrorHandler::severity_for(ErrorKind::ConnectionReset), ErrorSeverity::Medium);
        assert_eq!(ErrorHandler::severity_for(ErrorKind::InvalidInput), ErrorSeverity::Low);
    }

    #[test]
    fn test_classify_builds_caller_visible_record() {
        let handler = ErrorHandler::new("billing");
        let error = TaskError::validation("amount must be positive").with_cause("amount=-3");
        let structured = handler.classify(&error, "charge_card");

        assert_eq!(structured.error_type, "ValidationError");
        assert_eq!(structured.category, ErrorCategory::Validation);
        assert_eq!(structured.severity, ErrorSeverity::Low);
        assert_eq!(structured.operation, "charge_card");
        assert_eq!(structured.cause_chain, vec!["amount=-3".to_string()]);
        assert_eq!(structured.to_string(), "ValidationError: amount must be positive");
    }

    #[test]
    fn test_structured_error_serializes_with_category_and_severity() {
        let structured =
            ErrorHandler::build_record(&TaskError::database("relation missing"), "report");
        let json = serde_json::to_value(&structured).unwrap();

        assert_eq!(json["error_type"], "DependencyError");
        assert_eq!(json["category"], "database");
        assert_eq!(json["severity"], "medium");
    }
}
