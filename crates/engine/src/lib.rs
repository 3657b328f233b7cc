//! Schema-path engine for shapedb
//!
//! This crate sits between callers and the storage capability:
//! - paths: flatten a collection schema into dotted path → governing schema
//! - registry: per-collection schema, path map and derived metadata
//! - verify / split: check sparse queries and updates, split set/unset
//! - transform: read-modify-write with transactional or optimistic commit
//! - database: the facade owning registries, config and warnings
//! - backup: archive export, verification and retention
//!
//! Storage never sees a path or value that the collection schema has not
//! approved.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backup;
pub mod database;
pub mod paths;
pub mod registry;
pub mod split;
pub mod transform;
pub mod verify;
pub mod warn;

pub use backup::{BackupContents, BackupManager, BackupManifest, BackupReader};
pub use database::{
    BackupConfig, Collection, CollectionDef, Database, ShapeConfig, TransformStrategy,
    CONFIG_FILE_NAME,
};
pub use paths::{flatten, PathMap};
pub use registry::CollectionRegistry;
pub use split::{split, split_assignments, touches_identity};
pub use transform::{
    DocumentTransform, PathTransform, TransactionSupport, TransformManyResult, TransformOptions,
    TransformOutcome, TransformSpec,
};
pub use verify::{Verifier, VerifyMode};
pub use warn::WarnOnce;
