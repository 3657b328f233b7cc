//! Core types for shapedb
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: Unified value enum for document data (with explicit `Undefined`)
//! - Document / DocumentId: stored documents and their identity
//! - DottedPath: parsed dotted paths (`address.city`, `point.0`)
//! - SetUnsetPatch: partial updates as assign/remove path sets
//! - Error / StorageError: error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod patch;
pub mod path;
pub mod types;
pub mod value;

pub use error::{Error, Result, StorageError, StorageResult, ValidationIssue};
pub use patch::{
    get_at_path, remove_at_path, set_at_path, strip_undefined, strip_undefined_fields,
    SetUnsetPatch,
};
pub use path::{DottedPath, PathParseError, PathSegment, MAX_PATH_LENGTH};
pub use types::{document_id, Document, DocumentId, ID_FIELD};
pub use value::Value;
