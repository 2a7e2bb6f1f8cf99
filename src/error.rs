//! Error types for the Convergent reconciliation engine.
//!
//! This module provides the error hierarchy for every stage of a
//! reconciliation cycle: configuration, schema lookup and validation,
//! remote API calls, cycle orchestration and the local journal.

use std::path::PathBuf;
use thiserror::Error;

use crate::planner::Delta;

/// The main error type for the Convergent engine.
#[derive(Debug, Error)]
pub enum ConvergentError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Schema lookup and validation errors.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Remote API errors.
    #[error("Remote API error: {0}")]
    Remote(#[from] RemoteError),

    /// Reconciliation cycle errors.
    #[error("Reconciliation error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Journal errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

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
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
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

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of entry (resource, kind, ...).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },
}

/// Schema registry and desired-state validation errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// No schema is registered for the kind.
    #[error("Unknown resource kind: {kind}")]
    UnknownKind {
        /// The requested kind.
        kind: String,
    },

    /// A desired-state document does not conform to the schema.
    #[error("Schema mismatch for {kind} at '{path}': {message}")]
    SchemaMismatch {
        /// Resource kind.
        kind: String,
        /// Offending field path.
        path: String,
        /// Description of the mismatch.
        message: String,
    },

    /// A schema was rejected at registration time.
    #[error("Invalid schema for {kind}: {message}")]
    InvalidSchema {
        /// Resource kind.
        kind: String,
        /// Description of the problem.
        message: String,
    },

    /// The process-wide registry was installed twice.
    #[error("The global schema registry is already installed")]
    AlreadyInstalled,
}

/// Remote API errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The remote identifier does not resolve.
    #[error("{kind} not found: {remote_id}")]
    NotFound {
        /// Resource kind.
        kind: String,
        /// Remote identifier.
        remote_id: String,
    },

    /// The remote rejected the request permanently (validation, permissions).
    #[error("Request rejected by remote ({status}): {message}")]
    ApplyRejected {
        /// HTTP-style status code.
        status: u16,
        /// Error message from the remote.
        message: String,
    },

    /// The remote reported a conflicting concurrent write.
    #[error("Remote conflict: {message}")]
    RemoteConflict {
        /// Error message from the remote.
        message: String,
    },

    /// Authentication with the remote failed.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// Transient network-level failure.
    #[error("Network error communicating with remote: {message}")]
    Network {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from the remote.
    #[error("Invalid response from remote: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },

    /// A long-running operation did not finish within the maximum wait.
    #[error("Timed out after {waited_secs}s waiting for {operation} (last status: {last_status})")]
    OperationTimeout {
        /// Operation name or awaited condition.
        operation: String,
        /// Seconds waited before giving up.
        waited_secs: u64,
        /// Last status reported by the remote.
        last_status: String,
    },
}

/// Phase of a destroy-and-recreate replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplacePhase {
    /// The old object was being deleted.
    Delete,
    /// The old object is gone and the new one was being created.
    Create,
}

/// Reconciliation cycle errors.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// A replacement stopped between delete and create.
    #[error("Replace of '{remote_id}' interrupted during {phase} phase: {reason}")]
    PartialReplace {
        /// Remote identifier.
        remote_id: String,
        /// Phase in which the replacement stopped.
        phase: ReplacePhase,
        /// Underlying cause.
        reason: String,
    },

    /// Desired and observed state still differ after convergence was expected.
    #[error("Drift detected for {kind} '{remote_id}': {delta}")]
    DriftDetected {
        /// Resource kind.
        kind: String,
        /// Remote identifier.
        remote_id: String,
        /// The remaining delta.
        delta: Delta,
    },

    /// A resource still exists after it was destroyed.
    #[error("{kind} '{remote_id}' still exists after destroy")]
    NotDestroyed {
        /// Resource kind.
        kind: String,
        /// Remote identifier.
        remote_id: String,
    },

    /// The plan classification differs from what the caller expected.
    #[error("Expected plan '{expected}' for '{resource}', got '{actual}'")]
    UnexpectedPlan {
        /// Resource identifier.
        resource: String,
        /// Expected action.
        expected: String,
        /// Actual action.
        actual: String,
    },

    /// The cycle was cancelled between poll iterations.
    #[error("Reconciliation of '{remote_id}' was cancelled")]
    Cancelled {
        /// Remote identifier.
        remote_id: String,
    },
}

/// Journal errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// The journal is corrupted.
    #[error("Journal is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// The journal could not be written.
    #[error("Failed to write journal: {message}")]
    WriteFailed {
        /// Description of the failure.
        message: String,
    },

    /// Serialization error.
    #[error("Journal serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// Journal version mismatch.
    #[error("Journal version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected journal version.
        expected: String,
        /// Found journal version.
        found: String,
    },
}

/// Result type alias for Convergent operations.
pub type Result<T> = std::result::Result<T, ConvergentError>;

impl ConvergentError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is transient and the call may be retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Network { .. }))
    }

    /// Returns true if the remote reported the resource as missing.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::NotFound { .. }))
    }

    /// Returns true if the error stems from cooperative cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Reconcile(ReconcileError::Cancelled { .. }))
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

    /// Creates a validation error without a specific field.
    #[must_use]
    pub fn validation_general(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: None,
        }
    }
}

impl SchemaError {
    /// Creates a schema mismatch error.
    #[must_use]
    pub fn mismatch(kind: &str, path: &str, message: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            kind: kind.to_string(),
            path: path.to_string(),
            message: message.into(),
        }
    }

    /// Creates an invalid schema error.
    #[must_use]
    pub fn invalid(kind: &str, message: impl Into<String>) -> Self {
        Self::InvalidSchema {
            kind: kind.to_string(),
            message: message.into(),
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

impl RemoteError {
    /// Creates a rejection error.
    #[must_use]
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::ApplyRejected {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: &str, remote_id: &str) -> Self {
        Self::NotFound {
            kind: kind.to_string(),
            remote_id: remote_id.to_string(),
        }
    }
}

impl std::fmt::Display for ReplacePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::Create => write!(f, "create"),
        }
    }
}
