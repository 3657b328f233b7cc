//! shapedb - schema-checked paths and transforms over a document store
//!
//! Every collection is declared with a schema. The schema is flattened once
//! into a map of dotted paths, and every query, update, index and transform
//! is checked against that map before anything reaches storage.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use shapedb::{doc, CollectionDef, Database, MemoryStore, Schema, ShapeConfig, TransformOptions, TransformSpec, Value};
//!
//! let db = Database::open(
//!     Arc::new(MemoryStore::new()),
//!     vec![CollectionDef::new("posts", Schema::object([
//!         ("title", Schema::string()),
//!         ("tags", Schema::array(Schema::string())),
//!     ]))],
//!     ShapeConfig::default(),
//! ).await?;
//!
//! let posts = db.collection("posts")?;
//! posts.insert_one(doc! { "title" => "hello", "tags" => vec!["a"] }).await?;
//!
//! let spec = TransformSpec::new().path("tags", |tags| {
//!     let mut tags = tags.as_array().cloned().unwrap_or_default();
//!     tags.push(Value::from("b"));
//!     Value::Array(tags)
//! });
//! posts.transform_one(&doc! { "title" => "hello" }, &spec, TransformOptions::new()).await?;
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | `shapedb-core` | values, documents, dotted paths, patches, errors |
//! | `shapedb-schema` | schema descriptors and validation |
//! | `shapedb-storage` | storage capability traits and the in-memory store |
//! | `shapedb-engine` | flattening, verification, transforms, the facade |

pub use shapedb_core::{
    doc, Document, DocumentId, DottedPath, Error, Result, SetUnsetPatch, StorageError,
    StorageResult, ValidationIssue, Value, ID_FIELD,
};
pub use shapedb_engine::{
    flatten, BackupConfig, BackupReader, Collection, CollectionDef, Database, PathMap,
    ShapeConfig, TransactionSupport, TransformManyResult, TransformOptions, TransformOutcome,
    TransformSpec, TransformStrategy,
};
pub use shapedb_schema::Schema;
pub use shapedb_storage::{
    DeleteResult, DocumentStore, FindOptions, IndexSpec, MemoryStore, Session, SortOrder,
    UpdateOptions, UpdateResult,
};
