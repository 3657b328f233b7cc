//! Identity and document types
//!
//! - [`DocumentId`]: opaque, server-generated document identity
//! - [`Document`]: ordered map of field name to [`Value`]
//! - [`ID_FIELD`]: the storage-reserved identity field name

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Name of the storage-assigned identity field
///
/// Collection schemas must never declare it; it is appended implicitly
/// for read-path validation only.
pub const ID_FIELD: &str = "_id";

/// A document: field name to value, ordered for deterministic iteration
pub type Document = BTreeMap<String, Value>;

/// Unique identifier for a stored document
///
/// Generated by the storage layer on insert. Comparable and hashable, and
/// distinct from any user-declared field type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocumentId(Uuid);

impl DocumentId {
    /// Create a new random document ID
    pub fn new() -> Self {
        DocumentId(Uuid::new_v4())
    }

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        DocumentId(Uuid::from_bytes(bytes))
    }

    /// Get the underlying UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DocumentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DocumentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(DocumentId)
    }
}

/// Read the identity of a stored document, if present
pub fn document_id(doc: &Document) -> Option<DocumentId> {
    match doc.get(ID_FIELD) {
        Some(Value::Id(id)) => Some(*id),
        _ => None,
    }
}

/// Build a document from key/value pairs
///
/// ```
/// use shapedb_core::{doc, Value};
///
/// let d = doc! { "name" => "alice", "age" => 30i64 };
/// assert_eq!(d.get("age"), Some(&Value::Int(30)));
/// ```
#[macro_export]
macro_rules! doc {
    () => {
        $crate::Document::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut d = $crate::Document::new();
        $(
            d.insert(::std::string::String::from($key), $crate::Value::from($value));
        )+
        d
    }};
}
