//! Error taxonomy for message processing.
//!
//! Every per-message failure is captured *into* the message rather than
//! returned past the pipeline boundary. [`PipelineError`] is the value a
//! middleware stage returns; the engine converts it into a [`MessageError`]
//! and the matching terminal [`ProcessingStatus`].
//!
//! | Kind | Terminal status |
//! |------|-----------------|
//! | `HandlerNotFound` | Rejected |
//! | `CannotResolve` | Rejected |
//! | `ArgumentBindingError` | Rejected |
//! | `ValidationFailed` | Rejected |
//! | `HandlerExecutionError` | Failed |
//! | `Cancelled` | Failed |
//! | `ConfigurationError` | never per-message, raised at construction |

use crate::message::ProcessingStatus;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A single violated validation constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Field the constraint is declared on.
    pub field: String,
    /// Short rule name (`required`, `max_length`, ...).
    pub rule: String,
    /// Human readable explanation.
    pub message: String,
}

impl Violation {
    /// Create a new violation.
    #[must_use]
    pub fn new(
        field: impl Into<String>,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            rule: rule.into(),
            message: message.into(),
        }
    }
}

/// Aggregate of every constraint a message violated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors(pub Vec<Violation>);

impl ValidationErrors {
    /// Returns `true` when no constraint was violated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the violations.
    pub fn iter(&self) -> impl Iterator<Item = &Violation> {
        self.0.iter()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for violation in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{}: {}", violation.field, violation.message)?;
        }
        Ok(())
    }
}

/// Stable classification of a [`PipelineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No registry entry and no self-handling fast path.
    HandlerNotFound,
    /// The resolver could not satisfy a type or one of its dependencies.
    CannotResolve,
    /// A dynamic invocation argument could not be coerced.
    ArgumentBinding,
    /// One or more declared constraints were violated.
    ValidationFailed,
    /// The handler raised during business logic.
    HandlerExecution,
    /// Invalid configuration detected while building a pipeline.
    Configuration,
    /// Processing was cancelled before reaching a terminal status.
    Cancelled,
}

impl ErrorKind {
    /// The kind name stored as a record's error type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::HandlerNotFound => "HandlerNotFound",
            Self::CannotResolve => "CannotResolve",
            Self::ArgumentBinding => "ArgumentBindingError",
            Self::ValidationFailed => "ValidationFailed",
            Self::HandlerExecution => "HandlerExecutionError",
            Self::Configuration => "ConfigurationError",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Terminal status a message receives when a stage fails with this kind.
    #[must_use]
    pub const fn terminal_status(self) -> ProcessingStatus {
        match self {
            Self::HandlerNotFound
            | Self::CannotResolve
            | Self::ArgumentBinding
            | Self::ValidationFailed
            | Self::Configuration => ProcessingStatus::Rejected,
            Self::HandlerExecution | Self::Cancelled => ProcessingStatus::Failed,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by pipeline stages and pipeline construction.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No handler is registered for the message type.
    #[error("Handler not found for message type: {message_type}")]
    HandlerNotFound {
        /// The message type that had no handler.
        message_type: String,
    },

    /// The resolver could not produce an instance.
    #[error("Cannot resolve {type_name}: {reason}")]
    CannotResolve {
        /// The type that could not be resolved.
        type_name: String,
        /// Why resolution failed.
        reason: String,
    },

    /// A dynamic argument could not be coerced into the parameter type.
    #[error("Cannot bind argument `{parameter}` of {method}: {reason}")]
    ArgumentBinding {
        /// Fully qualified method (`Owner.method`).
        method: String,
        /// Parameter name.
        parameter: String,
        /// Coercion failure description.
        reason: String,
    },

    /// Declared validation constraints were violated.
    #[error("Validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    /// The handler returned an error or panicked.
    #[error("Handler execution failed: {0:#}")]
    HandlerExecution(anyhow::Error),

    /// Invalid pipeline configuration (fatal at construction time).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The cancellation token fired before the message reached a terminal status.
    #[error("Message processing was cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::HandlerNotFound { .. } => ErrorKind::HandlerNotFound,
            Self::CannotResolve { .. } => ErrorKind::CannotResolve,
            Self::ArgumentBinding { .. } => ErrorKind::ArgumentBinding,
            Self::ValidationFailed(_) => ErrorKind::ValidationFailed,
            Self::HandlerExecution(_) => ErrorKind::HandlerExecution,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Terminal status a message receives for this error.
    #[must_use]
    pub const fn terminal_status(&self) -> ProcessingStatus {
        self.kind().terminal_status()
    }

    /// Serializable diagnostics for this error.
    #[must_use]
    pub fn details(&self) -> ErrorDetails {
        let causes = match self {
            Self::HandlerExecution(error) => error.chain().skip(1).map(ToString::to_string).collect(),
            _ => Vec::new(),
        };
        let violations = match self {
            Self::ValidationFailed(errors) => errors.0.clone(),
            _ => Vec::new(),
        };
        ErrorDetails {
            kind: self.kind().as_str().to_string(),
            message: self.to_string(),
            causes,
            violations,
        }
    }
}

/// Serializable form of a captured error, kept for diagnostics and replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Error kind name.
    pub kind: String,
    /// Top-level message.
    pub message: String,
    /// Source chain, outermost first (handler errors only).
    pub causes: Vec<String>,
    /// Violated constraints (validation errors only).
    pub violations: Vec<Violation>,
}

/// Error information attached to a rejected or failed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageError {
    /// Error kind name (see [`ErrorKind::as_str`]).
    pub error_type: String,
    /// Human readable message.
    pub message: String,
    /// Captured error object.
    pub details: ErrorDetails,
}

impl From<&PipelineError> for MessageError {
    fn from(error: &PipelineError) -> Self {
        Self {
            error_type: error.kind().as_str().to_string(),
            message: error.to_string(),
            details: error.details(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_errors_reject_and_execution_errors_fail() {
        let not_found = PipelineError::HandlerNotFound {
            message_type: "CreateTask".into(),
        };
        assert_eq!(not_found.terminal_status(), ProcessingStatus::Rejected);

        let failed = PipelineError::HandlerExecution(anyhow::anyhow!("boom"));
        assert_eq!(failed.terminal_status(), ProcessingStatus::Failed);
        assert_eq!(failed.kind().as_str(), "HandlerExecutionError");
    }

    #[test]
    fn handler_error_details_keep_the_source_chain() {
        let root = anyhow::anyhow!("connection refused").context("loading project");
        let error = PipelineError::HandlerExecution(root);
        let details = error.details();

        assert_eq!(details.kind, "HandlerExecutionError");
        assert!(details.message.contains("loading project"));
        assert_eq!(details.causes, vec!["connection refused".to_string()]);
    }

    #[test]
    fn validation_errors_list_every_violation() {
        let errors = ValidationErrors(vec![
            Violation::new("first_name", "required", "is required"),
            Violation::new("email", "pattern", "is not a valid email"),
        ]);
        let error = PipelineError::ValidationFailed(errors);

        let display = error.to_string();
        assert!(display.contains("first_name: is required"));
        assert!(display.contains("email: is not a valid email"));
        assert_eq!(error.details().violations.len(), 2);
    }
}
