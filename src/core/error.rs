//! Structured error types.
//!
//! Every failure that can reach a caller is classified by category and code
//! so that the CLI, the HTTP layer, and the bounded worker protocol all agree
//! on what went wrong. Errors are serializable because they cross the worker
//! result channel unchanged.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Error category for classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Configuration loading or validation errors
    Config,
    /// Unknown host ids
    Host,
    /// No provider accepts a URI
    Provider,
    /// Motif syntax or query validation errors
    Query,
    /// Unknown aggregation kind or malformed arguments
    Aggregation,
    /// Timeouts and resource exhaustion in bounded workers
    Limits,
    /// File or object-storage failures inside a provider
    Backend,
    /// System-level errors (IO, process, serialization)
    System,
    /// User input errors
    User,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Host => write!(f, "host"),
            Self::Provider => write!(f, "provider"),
            Self::Query => write!(f, "query"),
            Self::Aggregation => write!(f, "aggregation"),
            Self::Limits => write!(f, "limits"),
            Self::Backend => write!(f, "backend"),
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
        }
    }
}

/// Structured error with full context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotifStudioError {
    /// Error category for classification.
    pub category: ErrorCategory,
    /// Unique error code within category.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Component that originated the error.
    pub origin: String,
    /// Whether retrying with different input could succeed.
    pub recoverable: bool,
    /// Hint for recovery action.
    pub recovery_hint: Option<String>,
    /// Additional context key-value pairs.
    pub context: HashMap<String, String>,
}

impl MotifStudioError {
    /// Creates a new error with the given parameters.
    #[must_use]
    pub fn new(
        category: ErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            origin: origin.into(),
            recoverable: false,
            recovery_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets whether the error is recoverable.
    #[must_use]
    pub fn recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }

    /// Sets the recovery hint.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.recovery_hint = Some(hint.into());
        self
    }

    /// Adds context to the error.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(
        code: impl Into<String>,
        message: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCategory::Config, code, message, origin)
    }

    /// Creates a system error.
    #[must_use]
    pub fn system(
        code: impl Into<String>,
        message: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCategory::System, code, message, origin)
    }

    /// Creates a user input error.
    #[must_use]
    pub fn user(
        code: impl Into<String>,
        message: impl Into<String>,
        origin: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCategory::User, code, message, origin).recoverable(true)
    }

    /// No listing (public or unlisted) carries this id.
    #[must_use]
    pub fn host_not_found(host_id: &str, origin: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Host,
            "host_not_found",
            format!("No host found with ID {host_id}"),
            origin,
        )
        .recoverable(true)
        .with_context("host_id", host_id)
    }

    /// The host resolved to a URI that no registered provider accepts.
    #[must_use]
    pub fn provider_not_found(uri: &str, origin: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Provider,
            "provider_not_found",
            format!("No provider accepts URI {uri}"),
            origin,
        )
        .with_context("uri", uri)
        .with_hint("Check the `providers` section of the configuration")
    }

    /// Creates a query validation error.
    #[must_use]
    pub fn invalid_query(message: impl Into<String>, origin: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Query, "invalid_query", message, origin).recoverable(true)
    }

    /// Creates an aggregation directive error.
    #[must_use]
    pub fn invalid_aggregation(message: impl Into<String>, origin: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Aggregation, "invalid_aggregation", message, origin)
            .recoverable(true)
    }

    /// A bounded worker exceeded its wall-clock deadline.
    #[must_use]
    pub fn timed_out(after: Duration, origin: impl Into<String>) -> Self {
        Self::new(
            ErrorCategory::Limits,
            "query_timed_out",
            format!("Query timed out after {:.1} seconds", after.as_secs_f64()),
            origin,
        )
        .recoverable(true)
    }

    /// A bounded worker died without reporting a result.
    #[must_use]
    pub fn resource_exhausted(limit_bytes: Option<u64>, origin: impl Into<String>) -> Self {
        let message = match limit_bytes {
            Some(bytes) => format!("Query exceeded its memory limit of {bytes} bytes"),
            None => "Query worker exited without producing a result".to_string(),
        };
        Self::new(ErrorCategory::Limits, "resource_exhausted", message, origin).recoverable(true)
    }

    /// Creates a backend IO error.
    #[must_use]
    pub fn backend_io(message: impl Into<String>, origin: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Backend, "backend_io", message, origin)
    }

    /// Returns true for the two "not found" errors that callers report as 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code.ends_with("not_found")
    }
}

impl std::fmt::Display for MotifStudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}] {}", self.category, self.code, self.message)
    }
}

impl std::error::Error for MotifStudioError {}

impl From<std::io::Error> for MotifStudioError {
    fn from(err: std::io::Error) -> Self {
        Self::backend_io(err.to_string(), "io")
    }
}

/// Result type using `MotifStudioError`.
pub type Result<T> = std::result::Result<T, MotifStudioError>;

/// Exit codes for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    NotFound = 2,
    Conflict = 3,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}
