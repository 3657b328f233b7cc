//! Storage capability for shapedb
//!
//! This crate defines what the engine needs from a document database and
//! ships one implementation of it:
//! - `DocumentStore` / `Session`: async traits for CRUD, indexes and
//!   multi-document transactions
//! - `MemoryStore`: DashMap-sharded collections with undo-log transactions
//! - `filter`: the equality/comparison filter subset the engine emits
//!
//! # Deployments
//!
//! `MemoryStore::new()` behaves like a replica set (transactions available);
//! `MemoryStore::standalone()` behaves like a single node and rejects
//! `start_transaction`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod filter;
pub mod memory;
pub mod traits;

pub use memory::{MemorySession, MemoryStore, ID_INDEX};
pub use traits::{
    DeleteResult, DocumentStore, FindOptions, IndexSpec, Session, SortOrder, UpdateOptions,
    UpdateResult,
};
