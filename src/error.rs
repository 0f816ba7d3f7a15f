//! Error types for testvault
//!
//! Every failure of the store, the lock layer and the repositories surfaces
//! as one of these variants. Nothing is swallowed below the repository layer.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use vaultpath::EntityKind;

/// The main error type for testvault operations
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Domain Errors
    // ==========================================================================
    #[error("{kind} '{id}' not found in project '{project}'")]
    NotFound {
        kind: EntityKind,
        project: String,
        id: String,
    },

    #[error("{kind} '{id}' already exists in project '{project}'")]
    AlreadyExists {
        kind: EntityKind,
        project: String,
        id: String,
    },

    #[error("{kind} '{id}' cannot be changed: {message}")]
    InvalidState {
        kind: EntityKind,
        id: String,
        message: String,
    },

    // ==========================================================================
    // Document Errors
    // ==========================================================================
    #[error("Corrupt document at '{path}': {message}")]
    CorruptDocument { path: String, message: String },

    #[error("I/O failure on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==========================================================================
    // Lock / Transaction Errors
    // ==========================================================================
    #[error("Transaction aborted while locking '{resource}': {reason}")]
    TransactionAborted { resource: String, reason: String },

    #[error("Lock acquisition on '{resource}' was cancelled")]
    LockCancelled { resource: String },

    #[error("Timed out after {waited:?} waiting for lock on '{resource}'")]
    LockTimeout { resource: String, waited: Duration },

    #[error("Cannot upgrade a held read lock on '{resource}' to a write lock")]
    LockUpgrade { resource: String },

    // ==========================================================================
    // Validation Errors
    // ==========================================================================
    #[error("Invalid {kind} '{value}': {reason}")]
    InvalidIdentifier {
        kind: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("Reserved name '{name}' cannot be used")]
    ReservedName { name: String },

    #[error(transparent)]
    Path(#[from] vaultpath::ParseError),

    #[error("Invalid regex pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    // ==========================================================================
    // Configuration Errors
    // ==========================================================================
    #[error("Invalid configuration at '{path}': {message}")]
    Config { path: PathBuf, message: String },
}

/// Result type alias for testvault operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::CorruptDocument {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn not_found(kind: EntityKind, project: &str, id: &str) -> Self {
        Error::NotFound {
            kind,
            project: project.to_string(),
            id: id.to_string(),
        }
    }

    /// Returns a user-friendly suggestion for fixing the error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::NotFound { .. } => Some("Check the project and entity id"),
            Error::CorruptDocument { .. } => {
                Some("Repair or remove the document, then run: testvault reconcile")
            }
            Error::LockTimeout { .. } => {
                Some("Raise lock_timeout_ms in .testvault/config.yaml or retry later")
            }
            Error::InvalidIdentifier { .. } => {
                Some("Use only letters, numbers, underscores, and hyphens")
            }
            _ => None,
        }
    }

    /// Returns true if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::AlreadyExists { .. }
                | Error::LockCancelled { .. }
                | Error::LockTimeout { .. }
                | Error::TransactionAborted { .. }
                | Error::InvalidIdentifier { .. }
                | Error::InvalidPattern { .. }
        )
    }
}

impl From<crate::validation::ValidationError> for Error {
    fn from(err: crate::validation::ValidationError) -> Self {
        match err {
            crate::validation::ValidationError::InvalidIdentifier(value, reason) => {
                Error::InvalidIdentifier {
                    kind: "identifier",
                    value,
                    reason,
                }
            }
            crate::validation::ValidationError::TooLong(value, _max) => Error::InvalidIdentifier {
                kind: "identifier",
                value,
                reason: "exceeds maximum length",
            },
            crate::validation::ValidationError::Empty => Error::InvalidIdentifier {
                kind: "identifier",
                value: String::new(),
                reason: "cannot be empty",
            },
            crate::validation::ValidationError::Reserved(name) => Error::ReservedName { name },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::not_found(EntityKind::Test, "p1", "t-9");
        assert_eq!(err.to_string(), "test 't-9' not found in project 'p1'");
    }

    #[test]
    fn test_error_suggestion() {
        let err = Error::corrupt("projects/p1/tests/_index.json", "expected value");
        assert!(err.suggestion().is_some());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_lock_errors_are_recoverable() {
        let err = Error::LockTimeout {
            resource: "projects/p1/tests/_index.json".into(),
            waited: Duration::from_millis(10),
        };
        assert!(err.is_recoverable());
    }
}
