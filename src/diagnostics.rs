//! User-facing diagnostics.
//!
//! Engine operations return diagnostics instead of failing outright so that
//! one instance's problem never hides another's. Only the CLI turns "any
//! error diagnostic" into a failing exit code.

use std::fmt;

use serde::Serialize;

use crate::error::{ApiError, ApplyError, EngineError};
use crate::schema::SchemaViolation;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The operation failed.
    Error,
    /// The operation succeeded but something deserves attention.
    Warning,
}

/// A message about one instance or attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Severity.
    pub severity: Severity,
    /// One-line summary.
    pub summary: String,
    /// Longer explanation.
    pub detail: String,
    /// Attribute path, when the problem is local to one attribute.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Instance address, when the problem concerns one instance.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl Diagnostic {
    /// Creates an error diagnostic.
    #[must_use]
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            path: None,
            address: None,
        }
    }

    /// Creates a warning diagnostic.
    #[must_use]
    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(summary, detail)
        }
    }

    /// Attaches an instance address.
    #[must_use]
    pub fn at(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Attaches an attribute path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Converts a schema violation.
    #[must_use]
    pub fn from_violation(violation: &SchemaViolation) -> Self {
        Self::error(
            format!("Invalid configuration: {}", violation.kind),
            format!("expected {}, got {}", violation.expected, violation.actual),
        )
        .with_path(violation.path.to_string())
    }

    /// Converts a remote API failure.
    #[must_use]
    pub fn from_api_error(error: &ApiError) -> Self {
        let summary = match error {
            ApiError::NotFound { .. } => "Resource not found",
            ApiError::Conflict { .. } => "Resource already exists",
            ApiError::Unauthorized { .. } => "Authentication failed",
            ApiError::Rejected { .. } => "Request rejected",
            ApiError::RetriesExhausted { .. } => "Remote call failed after retries",
            ApiError::Cancelled => "Operation cancelled",
            _ => "Remote call failed",
        };
        Self::error(summary, error.to_string())
    }

    /// Converts an apply failure.
    #[must_use]
    pub fn from_apply_error(error: &ApplyError) -> Self {
        let (severity, summary) = match error {
            ApplyError::ResourceDisappeared { .. } => (Severity::Warning, "Resource disappeared"),
            ApplyError::DependencyFailed { .. } => (Severity::Error, "Skipped"),
            _ => (Severity::Error, "Apply failed"),
        };
        Self {
            severity,
            ..Self::error(summary, error.to_string())
        }
    }

    /// Converts any engine error.
    #[must_use]
    pub fn from_error(error: &EngineError) -> Self {
        match error {
            EngineError::Api(e) => Self::from_api_error(e),
            EngineError::Apply(e) => Self::from_apply_error(e),
            EngineError::Config(e) => Self::error("Invalid configuration", e.to_string()),
            EngineError::Plan(e) => Self::error("Planning failed", e.to_string()),
            EngineError::State(e) => Self::error("State error", e.to_string()),
            other => Self::error("Internal error", other.to_string()),
        }
    }

    /// The warning emitted when a managed resource is gone remotely.
    #[must_use]
    pub fn disappeared(address: &str, id: &str) -> Self {
        Self::from_apply_error(&ApplyError::ResourceDisappeared {
            address: address.to_string(),
            id: id.to_string(),
        })
        .at(address)
    }

    /// Returns true for errors.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// Returns true if any diagnostic is an error.
#[must_use]
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{level}: {}", self.summary)?;
        if let Some(address) = &self.address {
            write!(f, " [{address}]")?;
        }
        if let Some(path) = &self.path {
            write!(f, " at {path}")?;
        }
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        Ok(())
    }
}
