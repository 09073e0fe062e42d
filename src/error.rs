//! Error types for the costform reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of the resource
//! lifecycle: configuration loading, schema validation, planning, the remote
//! API, state storage, and apply.

use std::path::PathBuf;
use thiserror::Error;

use crate::schema::AttrPath;

/// The main error type for the costform engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Remote API errors.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Apply errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Attribute tree conversion errors.
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The workspace file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The workspace file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// A resource or data source kind that the registry does not know.
    #[error("Unknown kind: {kind}")]
    UnknownKind {
        /// The unrecognized kind string.
        kind: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Remote API errors.
///
/// `NotFound` and `Conflict` are distinct signals the engine branches on;
/// `Timeout`, `Server`, `RateLimited` and `Network` are transient and retried.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The addressed resource does not exist (HTTP 404).
    #[error("Resource not found (HTTP 404): {path}")]
    NotFound {
        /// Request path that returned 404.
        path: String,
    },

    /// An equivalent resource already exists (HTTP 409).
    #[error("Conflict (HTTP 409): {message}")]
    Conflict {
        /// Error message from the API.
        message: String,
    },

    /// Credentials were rejected.
    #[error("Authentication failed (HTTP {status}): {message}")]
    Unauthorized {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// The request was rejected as invalid (other 4xx).
    #[error("Request rejected (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Rate limited.
    #[error("API rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Server-side failure (5xx).
    #[error("Server error (HTTP {status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// The call did not complete within its deadline.
    #[error("Timed out after {timeout_secs}s: {operation}")]
    Timeout {
        /// Operation that timed out.
        operation: String,
        /// Deadline in seconds.
        timeout_secs: u64,
    },

    /// Network error.
    #[error("Network error: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the API.
    #[error("Invalid response from API: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// A create succeeded but its response could not be decoded.
    #[error("Created '{id}' but its response is unreadable: {message}")]
    UnreadableRecord {
        /// Remote identity taken from the raw response.
        id: String,
        /// Description of the decoding failure.
        message: String,
    },

    /// Transient failures persisted past the attempt cap.
    #[error("Failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The last error observed.
        last: Box<ApiError>,
    },

    /// A collection endpoint handed back a continuation token it had already issued.
    #[error("Pagination did not progress: continuation token '{token}' repeated")]
    PaginationLoop {
        /// The repeated token.
        token: String,
    },

    /// The operation was cancelled before it was issued.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A tree disagrees with its schema. Indicates an engine bug.
    #[error("Malformed attribute tree at '{path}': {message}")]
    Malformed {
        /// Path of the offending node.
        path: AttrPath,
        /// Description of the mismatch.
        message: String,
    },

    /// An instance references an address that is not configured.
    #[error("Unresolved reference '{reference}' in {address}")]
    UnresolvedReference {
        /// Address of the referencing instance.
        address: String,
        /// The reference text.
        reference: String,
    },

    /// References form a cycle.
    #[error("Dependency cycle detected: {cycle}")]
    DependencyCycle {
        /// Description of the cycle.
        cycle: String,
    },
}

/// Apply errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A managed resource vanished between refresh and mutation.
    #[error("{address} (id {id}) disappeared outside of management")]
    ResourceDisappeared {
        /// Instance address.
        address: String,
        /// Remote identity that is gone.
        id: String,
    },

    /// An update or delete was planned for an instance without identity.
    #[error("{address} has no remote identity")]
    MissingIdentity {
        /// Instance address.
        address: String,
    },

    /// A dependency of this instance failed, so it was not attempted.
    #[error("{address} skipped: dependency {dependency} did not apply")]
    DependencyFailed {
        /// Instance address.
        address: String,
        /// Address of the failed dependency.
        dependency: String,
    },

    /// The encoder refused a tree, e.g. one still carrying unknown values.
    #[error("Cannot encode {address}: {message}")]
    Encode {
        /// Instance address.
        address: String,
        /// Description of the problem.
        message: String,
    },

    /// Apply was aborted.
    #[error("Apply aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

/// A tree could not be converted between its JSON and attribute forms.
#[derive(Debug, Clone, Error)]
#[error("{path}: {message}")]
pub struct CodecError {
    /// Path of the offending node.
    pub path: AttrPath,
    /// Description of the problem.
    pub message: String,
}

/// Result type alias for costform operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Api(e) => e.is_transient(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns true if this is the remote not-found signal.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Api(ApiError::NotFound { .. }))
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Api(ApiError::RateLimited { retry_after_secs }) => Some(*retry_after_secs),
            Self::Api(ApiError::Network { .. } | ApiError::Timeout { .. }) => Some(5),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ApiError {
    /// Classifies a non-success HTTP status into an error.
    #[must_use]
    pub fn from_status(status: u16, path: &str, message: impl Into<String>, retry_after_secs: Option<u64>) -> Self {
        let message = message.into();
        match status {
            404 => Self::NotFound {
                path: path.to_string(),
            },
            409 => Self::Conflict { message },
            429 => Self::RateLimited {
                retry_after_secs: retry_after_secs.unwrap_or(DEFAULT_RETRY_AFTER_SECS),
            },
            401 | 403 => Self::Unauthorized { status, message },
            500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an invalid-response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Returns true for failures the retry loop may repeat.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Server { .. } | Self::RateLimited { .. } | Self::Network { .. }
        )
    }

    /// Returns true if this is the canonical not-found signal.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns the server's retry-after hint, if any.
    #[must_use]
    pub const fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

impl CodecError {
    /// Creates a codec error at the given path.
    #[must_use]
    pub fn new(path: &AttrPath, message: impl Into<String>) -> Self {
        Self {
            path: path.clone(),
            message: message.into(),
        }
    }
}

impl PlanError {
    /// Creates a malformed-tree error at the given path.
    #[must_use]
    pub fn malformed(path: &AttrPath, message: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.clone(),
            message: message.into(),
        }
    }
}

/// Retry-after used when a 429 response carries no usable hint.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
