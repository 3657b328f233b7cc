//! In-memory document store
//!
//! [`MemoryStore`] implements [`DocumentStore`] over DashMap-sharded
//! collections. It exists so the engine can run against a real storage
//! capability in tests and embedded use without an external server.
//!
//! # Concurrency
//!
//! - Every operation yields to the runtime before touching data, so
//!   concurrent callers interleave the way they would against a server
//! - A single operation on one collection is atomic (it holds the shard)
//! - Writes are serialized through one write lock; a session with an open
//!   transaction holds that lock until commit or abort
//!
//! Transactions keep an undo log of before-images. Abort (explicit, or by
//! dropping the session) replays the log in reverse. Writes inside an open
//! transaction are visible to other readers before commit.
//!
//! # Deployments
//!
//! - [`MemoryStore::new`]: transactions available
//! - [`MemoryStore::standalone`]: `start_transaction` fails with
//!   `StorageError::TransactionsUnsupported`, like a single-node server

use crate::filter::{self, values_equal};
use crate::traits::{
    DeleteResult, DocumentStore, FindOptions, IndexSpec, Session, SortOrder, UpdateOptions,
    UpdateResult,
};
use async_trait::async_trait;
use dashmap::DashMap;
use shapedb_core::{
    document_id, strip_undefined_fields, Document, DocumentId, DottedPath, SetUnsetPatch,
    StorageError, StorageResult, Value, ID_FIELD,
};
use std::cmp::Ordering;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace, warn};

/// Name reported for the implicit identity index
pub const ID_INDEX: &str = "_id_";

#[derive(Debug, Default)]
struct CollectionData {
    docs: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

#[derive(Debug)]
struct UndoEntry {
    collection: String,
    id: DocumentId,
    before: Option<Document>,
}

#[derive(Debug)]
struct StoreInner {
    collections: DashMap<String, CollectionData>,
    transactions: bool,
    write_lock: Arc<Mutex<()>>,
}

/// DashMap-backed document store
///
/// Cloning is cheap and clones share data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store that supports transactions
    pub fn new() -> Self {
        Self::with_transactions(true)
    }

    /// Create an empty store that rejects transactions
    pub fn standalone() -> Self {
        Self::with_transactions(false)
    }

    fn with_transactions(transactions: bool) -> Self {
        MemoryStore {
            inner: Arc::new(StoreInner {
                collections: DashMap::new(),
                transactions,
                write_lock: Arc::new(Mutex::new(())),
            }),
        }
    }

    /// Whether sessions can start transactions
    pub fn supports_transactions(&self) -> bool {
        self.inner.transactions
    }

    /// Number of documents in a collection (0 if it does not exist)
    pub fn count(&self, collection: &str) -> usize {
        self.inner
            .collections
            .get(collection)
            .map(|data| data.docs.len())
            .unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreInner {
    fn insert(
        &self,
        collection: &str,
        mut doc: Document,
        undo: Option<&mut Vec<UndoEntry>>,
    ) -> StorageResult<DocumentId> {
        let id = match doc.get(ID_FIELD) {
            None => {
                let id = DocumentId::new();
                doc.insert(ID_FIELD.to_string(), Value::Id(id));
                id
            }
            Some(Value::Id(id)) => *id,
            Some(other) => {
                return Err(StorageError::Malformed(format!(
                    "{} must be an identity, got {}",
                    ID_FIELD,
                    other.type_name()
                )))
            }
        };
        strip_undefined_fields(&mut doc);

        let mut data = self.collections.entry(collection.to_string()).or_default();
        if data.docs.iter().any(|d| document_id(d) == Some(id)) {
            return Err(duplicate(collection, ID_INDEX));
        }
        check_unique(collection, &data, &doc, None)?;
        data.docs.push(doc);
        if let Some(undo) = undo {
            undo.push(UndoEntry {
                collection: collection.to_string(),
                id,
                before: None,
            });
        }
        Ok(id)
    }

    fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> StorageResult<Vec<Document>> {
        let Some(data) = self.collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut found = Vec::new();
        for doc in &data.docs {
            if filter::matches(doc, filter)? {
                found.push(doc.clone());
            }
        }
        drop(data);

        if !options.sort.is_empty() {
            found.sort_by(|a, b| compare_by(a, b, &options.sort));
        }
        Ok(found
            .into_iter()
            .skip(options.skip)
            .take(options.limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn update(
        &self,
        collection: &str,
        filter: &Document,
        patch: &SetUnsetPatch,
        options: UpdateOptions,
        multi: bool,
        mut undo: Option<&mut Vec<UndoEntry>>,
    ) -> StorageResult<UpdateResult> {
        validate_patch(patch)?;

        let mut data = self.collections.entry(collection.to_string()).or_default();
        let mut targets = Vec::new();
        for (pos, doc) in data.docs.iter().enumerate() {
            if filter::matches(doc, filter)? {
                targets.push(pos);
                if !multi {
                    break;
                }
            }
        }

        let mut result = UpdateResult {
            acknowledged: true,
            ..UpdateResult::default()
        };
        for pos in targets {
            result.matched_count += 1;
            let mut updated = data.docs[pos].clone();
            patch.apply_to(&mut updated);
            strip_undefined_fields(&mut updated);
            if updated == data.docs[pos] {
                continue;
            }
            check_unique(collection, &data, &updated, Some(pos))?;
            let before = std::mem::replace(&mut data.docs[pos], updated);
            if let (Some(log), Some(id)) = (undo.as_mut(), document_id(&before)) {
                log.push(UndoEntry {
                    collection: collection.to_string(),
                    id,
                    before: Some(before),
                });
            }
            result.modified_count += 1;
        }

        if result.matched_count == 0 && options.upsert {
            let mut doc = filter::upsert_seed(filter);
            patch.apply_to(&mut doc);
            let id = match doc.get(ID_FIELD) {
                Some(Value::Id(id)) => *id,
                Some(other) => {
                    return Err(StorageError::Malformed(format!(
                        "{} must be an identity, got {}",
                        ID_FIELD,
                        other.type_name()
                    )))
                }
                None => {
                    let id = DocumentId::new();
                    doc.insert(ID_FIELD.to_string(), Value::Id(id));
                    id
                }
            };
            strip_undefined_fields(&mut doc);
            if data.docs.iter().any(|d| document_id(d) == Some(id)) {
                return Err(duplicate(collection, ID_INDEX));
            }
            check_unique(collection, &data, &doc, None)?;
            data.docs.push(doc);
            if let Some(log) = undo.as_mut() {
                log.push(UndoEntry {
                    collection: collection.to_string(),
                    id,
                    before: None,
                });
            }
            result.upserted_id = Some(id);
        }
        Ok(result)
    }

    fn delete(
        &self,
        collection: &str,
        filter: &Document,
        multi: bool,
        mut undo: Option<&mut Vec<UndoEntry>>,
    ) -> StorageResult<DeleteResult> {
        let Some(mut data) = self.collections.get_mut(collection) else {
            return Ok(DeleteResult::default());
        };
        let mut targets = Vec::new();
        for (pos, doc) in data.docs.iter().enumerate() {
            if filter::matches(doc, filter)? {
                targets.push(pos);
                if !multi {
                    break;
                }
            }
        }
        let deleted_count = targets.len() as u64;
        for pos in targets.into_iter().rev() {
            let before = data.docs.remove(pos);
            if let (Some(log), Some(id)) = (undo.as_mut(), document_id(&before)) {
                log.push(UndoEntry {
                    collection: collection.to_string(),
                    id,
                    before: Some(before),
                });
            }
        }
        Ok(DeleteResult { deleted_count })
    }

    fn create_index(&self, collection: &str, index: &IndexSpec) -> StorageResult<String> {
        if index.keys.is_empty() {
            return Err(StorageError::Malformed(
                "index must have at least one key".to_string(),
            ));
        }
        let name = index.index_name();
        if name == ID_INDEX {
            return Ok(name);
        }

        let mut data = self.collections.entry(collection.to_string()).or_default();
        if let Some(existing) = data.indexes.iter().find(|i| i.index_name() == name) {
            if existing.keys == index.keys && existing.unique == index.unique {
                return Ok(name);
            }
            return Err(StorageError::Malformed(format!(
                "index '{}' already exists with different options",
                name
            )));
        }
        if index.unique {
            let keys: Vec<Vec<Value>> = data.docs.iter().map(|d| index_key(index, d)).collect();
            for (i, key) in keys.iter().enumerate() {
                if keys[i + 1..].iter().any(|other| keys_equal(key, other)) {
                    return Err(duplicate(collection, &name));
                }
            }
        }
        data.indexes.push(index.clone());
        debug!(collection, index = %name, unique = index.unique, "Created index");
        Ok(name)
    }

    fn rollback(&self, undo: Vec<UndoEntry>) {
        for entry in undo.into_iter().rev() {
            let mut data = self.collections.entry(entry.collection).or_default();
            let pos = data
                .docs
                .iter()
                .position(|d| document_id(d) == Some(entry.id));
            match (pos, entry.before) {
                (Some(pos), None) => {
                    data.docs.remove(pos);
                }
                (Some(pos), Some(before)) => data.docs[pos] = before,
                (None, Some(before)) => data.docs.push(before),
                (None, None) => {}
            }
        }
    }
}

fn duplicate(collection: &str, index: &str) -> StorageError {
    StorageError::DuplicateKey {
        collection: collection.to_string(),
        index: index.to_string(),
    }
}

fn index_key(index: &IndexSpec, doc: &Document) -> Vec<Value> {
    index
        .paths()
        .map(|path| {
            filter::resolve(doc, path)
                .first()
                .map(|v| (*v).clone())
                .unwrap_or(Value::Null)
        })
        .collect()
}

fn keys_equal(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
}

fn check_unique(
    collection: &str,
    data: &CollectionData,
    candidate: &Document,
    skip: Option<usize>,
) -> StorageResult<()> {
    for index in data.indexes.iter().filter(|i| i.unique) {
        let key = index_key(index, candidate);
        let clash = data
            .docs
            .iter()
            .enumerate()
            .filter(|(pos, _)| Some(*pos) != skip)
            .any(|(_, other)| keys_equal(&index_key(index, other), &key));
        if clash {
            return Err(duplicate(collection, &index.index_name()));
        }
    }
    Ok(())
}

fn validate_patch(patch: &SetUnsetPatch) -> StorageResult<()> {
    let mut parsed = Vec::new();
    for path in patch.paths() {
        if path == ID_FIELD || path.starts_with("_id.") {
            return Err(StorageError::Malformed(format!(
                "cannot modify immutable field '{}'",
                ID_FIELD
            )));
        }
        let p = DottedPath::parse(path)
            .map_err(|e| StorageError::Malformed(format!("bad update path '{}': {}", path, e)))?;
        parsed.push(p);
    }
    for (i, a) in parsed.iter().enumerate() {
        if let Some(b) = parsed[i + 1..].iter().find(|b| a.overlaps(b)) {
            return Err(StorageError::Malformed(format!(
                "updating '{}' would conflict with '{}'",
                a, b
            )));
        }
    }
    Ok(())
}

fn compare_by(a: &Document, b: &Document, sort: &[(String, SortOrder)]) -> Ordering {
    for (path, order) in sort {
        let left = filter::resolve(a, path).first().copied();
        let right = filter::resolve(b, path).first().copied();
        let ordering = match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(l), Some(r)) => l.compare(r).unwrap_or(Ordering::Equal),
        };
        let ordering = match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert_one(&self, collection: &str, doc: Document) -> StorageResult<DocumentId> {
        tokio::task::yield_now().await;
        let _write = self.inner.write_lock.lock().await;
        self.inner.insert(collection, doc, None)
    }

    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<Document>,
    ) -> StorageResult<Vec<DocumentId>> {
        tokio::task::yield_now().await;
        let _write = self.inner.write_lock.lock().await;
        docs.into_iter()
            .map(|doc| self.inner.insert(collection, doc, None))
            .collect()
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> StorageResult<Option<Document>> {
        tokio::task::yield_now().await;
        let options = options.clone().with_limit(1);
        Ok(self.inner.find(collection, filter, &options)?.into_iter().next())
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> StorageResult<Vec<Document>> {
        tokio::task::yield_now().await;
        self.inner.find(collection, filter, options)
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        patch: &SetUnsetPatch,
        options: UpdateOptions,
    ) -> StorageResult<UpdateResult> {
        tokio::task::yield_now().await;
        let _write = self.inner.write_lock.lock().await;
        self.inner.update(collection, filter, patch, options, false, None)
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        patch: &SetUnsetPatch,
        options: UpdateOptions,
    ) -> StorageResult<UpdateResult> {
        tokio::task::yield_now().await;
        let _write = self.inner.write_lock.lock().await;
        self.inner.update(collection, filter, patch, options, true, None)
    }

    async fn delete_one(&self, collection: &str, filter: &Document) -> StorageResult<DeleteResult> {
        tokio::task::yield_now().await;
        let _write = self.inner.write_lock.lock().await;
        self.inner.delete(collection, filter, false, None)
    }

    async fn delete_many(&self, collection: &str, filter: &Document) -> StorageResult<DeleteResult> {
        tokio::task::yield_now().await;
        let _write = self.inner.write_lock.lock().await;
        self.inner.delete(collection, filter, true, None)
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StorageResult<String> {
        tokio::task::yield_now().await;
        let _write = self.inner.write_lock.lock().await;
        self.inner.create_index(collection, index)
    }

    async fn list_indexes(&self, collection: &str) -> StorageResult<Vec<String>> {
        tokio::task::yield_now().await;
        let mut names = vec![ID_INDEX.to_string()];
        if let Some(data) = self.inner.collections.get(collection) {
            names.extend(data.indexes.iter().map(IndexSpec::index_name));
        }
        Ok(names)
    }

    async fn collection_names(&self) -> StorageResult<Vec<String>> {
        tokio::task::yield_now().await;
        let mut names: Vec<String> = self
            .inner
            .collections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn start_session(&self) -> StorageResult<Box<dyn Session>> {
        tokio::task::yield_now().await;
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
            txn: None,
            undo: Vec::new(),
        }))
    }
}

/// Session over a [`MemoryStore`]
pub struct MemorySession {
    inner: Arc<StoreInner>,
    txn: Option<OwnedMutexGuard<()>>,
    undo: Vec<UndoEntry>,
}

impl MemorySession {
    fn require_transaction(&self, action: &str) -> StorageResult<()> {
        if self.txn.is_none() {
            return Err(StorageError::InvalidSessionState(format!(
                "cannot {}: no transaction in progress",
                action
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn start_transaction(&mut self) -> StorageResult<()> {
        tokio::task::yield_now().await;
        if !self.inner.transactions {
            return Err(StorageError::TransactionsUnsupported);
        }
        if self.txn.is_some() {
            return Err(StorageError::InvalidSessionState(
                "transaction already in progress".to_string(),
            ));
        }
        let guard = Arc::clone(&self.inner.write_lock).lock_owned().await;
        self.txn = Some(guard);
        self.undo.clear();
        trace!("Transaction started");
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    async fn find_one(
        &mut self,
        collection: &str,
        filter: &Document,
    ) -> StorageResult<Option<Document>> {
        tokio::task::yield_now().await;
        let options = FindOptions::new().with_limit(1);
        Ok(self.inner.find(collection, filter, &options)?.into_iter().next())
    }

    async fn insert_one(&mut self, collection: &str, doc: Document) -> StorageResult<DocumentId> {
        tokio::task::yield_now().await;
        if self.txn.is_some() {
            return self.inner.insert(collection, doc, Some(&mut self.undo));
        }
        let _write = self.inner.write_lock.lock().await;
        self.inner.insert(collection, doc, None)
    }

    async fn update_one(
        &mut self,
        collection: &str,
        filter: &Document,
        patch: &SetUnsetPatch,
        options: UpdateOptions,
    ) -> StorageResult<UpdateResult> {
        tokio::task::yield_now().await;
        if self.txn.is_some() {
            return self
                .inner
                .update(collection, filter, patch, options, false, Some(&mut self.undo));
        }
        let _write = self.inner.write_lock.lock().await;
        self.inner.update(collection, filter, patch, options, false, None)
    }

    async fn delete_many(
        &mut self,
        collection: &str,
        filter: &Document,
    ) -> StorageResult<DeleteResult> {
        tokio::task::yield_now().await;
        if self.txn.is_some() {
            return self
                .inner
                .delete(collection, filter, true, Some(&mut self.undo));
        }
        let _write = self.inner.write_lock.lock().await;
        self.inner.delete(collection, filter, true, None)
    }

    async fn commit_transaction(&mut self) -> StorageResult<()> {
        tokio::task::yield_now().await;
        self.require_transaction("commit")?;
        self.undo.clear();
        self.txn = None;
        trace!("Transaction committed");
        Ok(())
    }

    async fn abort_transaction(&mut self) -> StorageResult<()> {
        tokio::task::yield_now().await;
        self.require_transaction("abort")?;
        self.inner.rollback(std::mem::take(&mut self.undo));
        self.txn = None;
        trace!("Transaction aborted");
        Ok(())
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if self.txn.is_some() {
            warn!(
                writes = self.undo.len(),
                "Session dropped with an open transaction, rolling back"
            );
            self.inner.rollback(std::mem::take(&mut self.undo));
            self.txn = None;
        }
    }
}
