//! Storage capability traits
//!
//! This module defines the narrow surface the engine requires from a
//! document database. Every method is a suspension point; implementations
//! own their own pooling and may be shared across concurrent callers.

use async_trait::async_trait;
use shapedb_core::{Document, DocumentId, SetUnsetPatch, StorageResult};

/// Sort direction for finds and index keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    /// Smallest first
    Ascending,
    /// Largest first
    Descending,
}

impl SortOrder {
    fn as_suffix(self) -> &'static str {
        match self {
            SortOrder::Ascending => "1",
            SortOrder::Descending => "-1",
        }
    }
}

/// Options for `find` / `find_one`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Maximum documents to return
    pub limit: Option<usize>,
    /// Documents to skip before returning
    pub skip: usize,
    /// Sort keys, applied in order
    pub sort: Vec<(String, SortOrder)>,
}

impl FindOptions {
    /// Create default options (no limit, no skip, storage order)
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit the number of results
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip leading results
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Add a sort key
    pub fn sort_by(mut self, path: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((path.into(), order));
        self
    }
}

/// Options for `update_one` / `update_many`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Insert a document built from the filter and `set` when nothing matches
    pub upsert: bool,
}

impl UpdateOptions {
    /// Options with upsert enabled
    pub fn upsert() -> Self {
        UpdateOptions { upsert: true }
    }
}

/// Outcome of an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UpdateResult {
    /// Documents matched by the filter
    pub matched_count: u64,
    /// Documents actually changed
    pub modified_count: u64,
    /// Whether the write was acknowledged
    pub acknowledged: bool,
    /// Identity of the inserted document, for upserts that inserted
    pub upserted_id: Option<DocumentId>,
}

/// Outcome of a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteResult {
    /// Documents removed
    pub deleted_count: u64,
}

/// Index declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Indexed dotted paths with direction
    pub keys: Vec<(String, SortOrder)>,
    /// Reject duplicate key tuples
    pub unique: bool,
    /// Explicit name; derived from keys when absent
    pub name: Option<String>,
}

impl IndexSpec {
    /// Single-field ascending index
    pub fn ascending(path: impl Into<String>) -> Self {
        IndexSpec {
            keys: vec![(path.into(), SortOrder::Ascending)],
            unique: false,
            name: None,
        }
    }

    /// Compound index
    pub fn compound(keys: impl IntoIterator<Item = (String, SortOrder)>) -> Self {
        IndexSpec {
            keys: keys.into_iter().collect(),
            unique: false,
            name: None,
        }
    }

    /// Mark unique
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Set an explicit name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Effective index name (`path_1_other_-1` when not set explicitly)
    pub fn index_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self
                .keys
                .iter()
                .map(|(path, order)| format!("{}_{}", path, order.as_suffix()))
                .collect::<Vec<_>>()
                .join("_"),
        }
    }

    /// Indexed paths
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(|(p, _)| p.as_str())
    }
}

/// Document database capability
///
/// Filters are documents keyed by dotted path; see the `filter` module for
/// the operator subset understood by the in-memory implementation.
/// Updates are always expressed as a [`SetUnsetPatch`].
///
/// Thread safety: All methods must be safe to call concurrently
/// (requires Send + Sync).
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert one document, returning its server-generated identity
    ///
    /// # Errors
    ///
    /// Returns an error if a unique index rejects the document or the
    /// storage operation fails.
    async fn insert_one(&self, collection: &str, doc: Document) -> StorageResult<DocumentId>;

    /// Insert several documents in order
    ///
    /// Stops at the first failure; earlier documents remain inserted.
    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> StorageResult<Vec<DocumentId>>;

    /// First document matching the filter
    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> StorageResult<Option<Document>>;

    /// All documents matching the filter (cursor drained eagerly)
    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> StorageResult<Vec<Document>>;

    /// Apply a patch to the first matching document
    async fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        patch: &SetUnsetPatch,
        options: UpdateOptions,
    ) -> StorageResult<UpdateResult>;

    /// Apply a patch to every matching document
    async fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        patch: &SetUnsetPatch,
        options: UpdateOptions,
    ) -> StorageResult<UpdateResult>;

    /// Remove the first matching document
    async fn delete_one(&self, collection: &str, filter: &Document) -> StorageResult<DeleteResult>;

    /// Remove every matching document
    async fn delete_many(&self, collection: &str, filter: &Document) -> StorageResult<DeleteResult>;

    /// Create an index, returning its name
    ///
    /// Creating an index that already exists with the same spec is a no-op.
    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StorageResult<String>;

    /// Names of existing indexes on a collection
    async fn list_indexes(&self, collection: &str) -> StorageResult<Vec<String>>;

    /// Names of collections holding data or indexes
    async fn collection_names(&self) -> StorageResult<Vec<String>>;

    /// Start a session for multi-statement transactions
    async fn start_session(&self) -> StorageResult<Box<dyn Session>>;
}

/// A storage session
///
/// Sessions are owned by exactly one operation and never shared. Dropping a
/// session with an open transaction aborts it.
#[async_trait]
pub trait Session: Send {
    /// Begin a multi-document transaction
    ///
    /// # Errors
    ///
    /// `StorageError::TransactionsUnsupported` when the deployment cannot
    /// run transactions.
    async fn start_transaction(&mut self) -> StorageResult<()>;

    /// Whether a transaction is open
    fn in_transaction(&self) -> bool;

    /// `find_one` within the session
    async fn find_one(
        &mut self,
        collection: &str,
        filter: &Document,
    ) -> StorageResult<Option<Document>>;

    /// `insert_one` within the session
    async fn insert_one(&mut self, collection: &str, doc: Document) -> StorageResult<DocumentId>;

    /// `update_one` within the session
    async fn update_one(
        &mut self,
        collection: &str,
        filter: &Document,
        patch: &SetUnsetPatch,
        options: UpdateOptions,
    ) -> StorageResult<UpdateResult>;

    /// `delete_many` within the session
    async fn delete_many(&mut self, collection: &str, filter: &Document)
        -> StorageResult<DeleteResult>;

    /// Make the transaction's writes durable and visible
    async fn commit_transaction(&mut self) -> StorageResult<()>;

    /// Discard the transaction's writes
    async fn abort_transaction(&mut self) -> StorageResult<()>;
}
