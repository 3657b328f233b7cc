//! Error types for shapedb
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Two layers:
//! - [`StorageError`]: failures reported by the storage capability (connection,
//!   transaction, duplicate key). Propagated unchanged by the engine.
//! - [`Error`]: the engine taxonomy. Validation errors are always returned as
//!   `Err`, never folded into `Option`/`bool` sentinels.

use crate::types::DocumentId;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for storage capability operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// A single reason a value failed schema validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path of the offending value, relative to the validated root
    pub path: String,
    /// Human-readable description
    pub message: String,
}

impl ValidationIssue {
    /// Create an issue at the given path
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationIssue {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Prefix this issue's path with a parent segment
    pub fn nested_under(mut self, parent: &str) -> Self {
        self.path = if self.path.is_empty() {
            parent.to_string()
        } else if parent.is_empty() {
            self.path
        } else {
            format!("{}.{}", parent, self.path)
        };
        self
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

fn join_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors reported by the storage capability
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Multi-document transactions are not available on this deployment
    #[error("transactions are not supported by this deployment")]
    TransactionsUnsupported,

    /// The transaction was aborted by the storage engine
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    /// A session was used out of order (e.g. commit without start)
    #[error("invalid session state: {0}")]
    InvalidSessionState(String),

    /// A unique index rejected the write
    #[error("duplicate key in {collection} on index {index}")]
    DuplicateKey {
        /// Collection name
        collection: String,
        /// Index name
        index: String,
    },

    /// The filter or update could not be interpreted
    #[error("malformed request: {0}")]
    Malformed(String),

    /// Connection-level failure
    #[error("connection error: {0}")]
    Connection(String),

    /// The storage layer timed out
    #[error("operation timed out")]
    Timeout,

    /// Anything else
    #[error("storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Whether the failure is transient (worth retrying at the caller's discretion)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StorageError::TransactionAborted(_) | StorageError::Connection(_) | StorageError::Timeout
        )
    }
}

/// Error types for the schema-path engine
#[derive(Debug, Error)]
pub enum Error {
    /// A query/update/index/transform path is absent from the flattened path map
    #[error("unknown path '{path}' in collection '{collection}'")]
    UnknownPath {
        /// Collection name
        collection: String,
        /// Offending dotted path
        path: String,
    },

    /// A value failed validation against its governing schema
    #[error("schema violation in '{collection}'{}: {}", path_suffix(.path), join_issues(.issues))]
    SchemaViolation {
        /// Collection name
        collection: String,
        /// Dotted path that was validated, `None` for whole documents
        path: Option<String>,
        /// Reasons reported by the schema
        issues: Vec<ValidationIssue>,
    },

    /// Optimistic retries were exhausted
    #[error("concurrent modification of {id} in '{collection}' after {attempts} attempts")]
    ConcurrentModification {
        /// Collection name
        collection: String,
        /// Contended document
        id: DocumentId,
        /// Number of attempts made
        attempts: usize,
    },

    /// The schema contains a construct the path engine cannot represent
    #[error("unsupported schema construct '{construct}' at '{path}'")]
    UnsupportedSchemaConstruct {
        /// Dotted path where the construct appears (empty for the root)
        path: String,
        /// Name of the construct
        construct: String,
    },

    /// The schema declares the storage identity field
    #[error("collection '{collection}' declares the reserved identity field")]
    IdentityFieldCollision {
        /// Collection name
        collection: String,
    },

    /// The schema is structurally unusable as a collection schema
    #[error("invalid schema for '{collection}': {reason}")]
    InvalidSchema {
        /// Collection name
        collection: String,
        /// Why it was rejected
        reason: String,
    },

    /// No collection with this name was registered
    #[error("unknown collection '{0}'")]
    UnknownCollection(String),

    /// The transform request is malformed
    #[error("invalid transform: {0}")]
    InvalidTransform(String),

    /// A document located for a transform disappeared before commit
    #[error("document {id} in '{collection}' vanished during transform")]
    DocumentVanished {
        /// Collection name
        collection: String,
        /// Document that disappeared
        id: DocumentId,
    },

    /// Storage-layer failure, propagated unchanged
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration could not be loaded or is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

fn path_suffix(path: &Option<String>) -> String {
    match path {
        Some(p) => format!(" at '{}'", p),
        None => String::new(),
    }
}

impl Error {
    /// Build a schema violation for a whole document
    pub fn document_violation(collection: &str, issues: Vec<ValidationIssue>) -> Self {
        Error::SchemaViolation {
            collection: collection.to_string(),
            path: None,
            issues,
        }
    }

    /// Build a schema violation for a value at a dotted path
    pub fn path_violation(collection: &str, path: &str, issues: Vec<ValidationIssue>) -> Self {
        Error::SchemaViolation {
            collection: collection.to_string(),
            path: Some(path.to_string()),
            issues,
        }
    }

    /// Build an unknown-path error
    pub fn unknown_path(collection: &str, path: impl Into<String>) -> Self {
        Error::UnknownPath {
            collection: collection.to_string(),
            path: path.into(),
        }
    }

    /// Validation failures signal a caller contract breach and are never retried
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::UnknownPath { .. } | Error::SchemaViolation { .. } | Error::InvalidTransform(_)
        )
    }

    /// Optimistic-concurrency exhaustion
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::ConcurrentModification { .. })
    }

    /// Failure originating in the storage capability
    pub fn is_storage(&self) -> bool {
        matches!(self, Error::Storage(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
