//! Database facade
//!
//! The facade owns one [`CollectionRegistry`] per declared collection and
//! wires the verifier, splitter and transform engine in front of the
//! storage capability. Nothing reaches storage without passing through the
//! collection's path map first.
//!
//! ## Opening
//!
//! ```text
//! Database::open(store, [CollectionDef..], config)
//!     ├─ validate config
//!     ├─ build registries (fail fast: identity collisions, non-object roots,
//!     │  unsupported constructs, indexes on unknown paths)
//!     └─ create declared indexes (failures logged, facade still usable)
//! ```
//!
//! ## Operations
//!
//! | Operation | Checked before storage |
//! |-----------|------------------------|
//! | `insert_one` / `insert_many` | full document parse |
//! | `find_one` / `find_many` | query keys and values, sort paths |
//! | `update_one` / `update_many` | query, split set/unset patch, upsert document |
//! | `delete_one` / `delete_many` | query |
//! | `transform_one` / `transform_many` | transform targets, query, every computed patch |
//! | `create_index` | index paths |
//!
//! Once-per-facade warnings (query operator pass-through, identity writes)
//! are tracked per `Database`, so two facades in one process warn
//! independently.

pub mod config;

pub use config::{BackupConfig, ShapeConfig, TransformStrategy, CONFIG_FILE_NAME};

use crate::backup::BackupManager;
use crate::paths::PathMap;
use crate::registry::CollectionRegistry;
use crate::split::{split, touches_identity};
use crate::transform::{
    TransactionSupport, TransformContext, TransformEngine, TransformManyResult, TransformOptions,
    TransformOutcome, TransformSpec,
};
use crate::verify::Verifier;
use crate::warn::WarnOnce;
use shapedb_core::{Document, DocumentId, Error, Result, ID_FIELD};
use shapedb_schema::Schema;
use shapedb_storage::filter::upsert_seed;
use shapedb_storage::{
    DeleteResult, DocumentStore, FindOptions, IndexSpec, UpdateOptions, UpdateResult,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

const IDENTITY_WRITE_WARNING: &str = "identity-write";

// ============================================================================
// Collection Declarations
// ============================================================================

/// A collection to register when the facade opens
#[derive(Debug, Clone)]
pub struct CollectionDef {
    name: String,
    schema: Schema,
    indexes: Vec<IndexSpec>,
}

impl CollectionDef {
    /// Declare a collection with its schema
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        CollectionDef {
            name: name.into(),
            schema,
            indexes: Vec::new(),
        }
    }

    /// Declare an index
    pub fn index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }
}

// ============================================================================
// Database
// ============================================================================

struct DatabaseInner {
    store: Arc<dyn DocumentStore>,
    registries: BTreeMap<String, Arc<CollectionRegistry>>,
    config: ShapeConfig,
    transforms: TransformEngine,
    warnings: WarnOnce,
}

/// Schema-aware facade over a document store
///
/// Cheap to clone; clones share registries, the capability probe and the
/// once-per-facade warning set.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use shapedb_core::doc;
/// use shapedb_engine::{CollectionDef, Database, ShapeConfig};
/// use shapedb_schema::Schema;
/// use shapedb_storage::MemoryStore;
///
/// # tokio_test_block(async {
/// let db = Database::open(
///     Arc::new(MemoryStore::new()),
///     vec![CollectionDef::new("users", Schema::object([("name", Schema::string())]))],
///     ShapeConfig::default(),
/// )
/// .await
/// .unwrap();
/// let users = db.collection("users").unwrap();
/// users.insert_one(doc! { "name" => "ada" }).await.unwrap();
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Build registries for every collection and return the facade
    ///
    /// # Errors
    ///
    /// - `Config` for invalid configuration
    /// - `InvalidSchema` for duplicate names or non-object roots
    /// - `IdentityFieldCollision`, `UnsupportedSchemaConstruct`,
    ///   `UnknownPath` from registry construction
    pub async fn open(
        store: Arc<dyn DocumentStore>,
        collections: Vec<CollectionDef>,
        config: ShapeConfig,
    ) -> Result<Database> {
        config.validate()?;

        let mut registries = BTreeMap::new();
        for def in collections {
            if registries.contains_key(&def.name) {
                return Err(Error::InvalidSchema {
                    collection: def.name,
                    reason: "collection declared twice".to_string(),
                });
            }
            let registry = CollectionRegistry::new(def.name.clone(), def.schema, def.indexes)?;
            registries.insert(def.name, Arc::new(registry));
        }

        let transforms = TransformEngine::new(
            config.strategy,
            config.probe_collection.clone(),
            config.max_retries,
            config.max_backoff_ms,
        );
        let db = Database {
            inner: Arc::new(DatabaseInner {
                store,
                registries,
                config,
                transforms,
                warnings: WarnOnce::new(),
            }),
        };

        if db.inner.config.create_indexes {
            db.create_declared_indexes().await;
        }
        info!(
            collections = db.inner.registries.len(),
            strategy = ?db.inner.config.strategy,
            "Opened shapedb facade"
        );
        Ok(db)
    }

    async fn create_declared_indexes(&self) {
        for registry in self.inner.registries.values() {
            for index in registry.indexes() {
                if let Err(e) = self.inner.store.create_index(registry.name(), index).await {
                    warn!(
                        collection = %registry.name(),
                        index = %index.index_name(),
                        error = %e,
                        "Failed to create declared index"
                    );
                }
            }
        }
    }

    /// Handle for a registered collection
    ///
    /// # Errors
    ///
    /// `UnknownCollection` if the name was not declared at open.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        let registry = self
            .inner
            .registries
            .get(name)
            .ok_or_else(|| Error::UnknownCollection(name.to_string()))?;
        Ok(Collection {
            inner: Arc::clone(&self.inner),
            registry: Arc::clone(registry),
        })
    }

    /// Names of registered collections, sorted
    pub fn collection_names(&self) -> Vec<&str> {
        self.inner.registries.keys().map(String::as_str).collect()
    }

    /// Flattened path map of one collection
    pub fn path_map(&self, name: &str) -> Result<&PathMap<Schema>> {
        self.inner
            .registries
            .get(name)
            .map(|r| r.paths())
            .ok_or_else(|| Error::UnknownCollection(name.to_string()))
    }

    /// Flattened path maps of every collection
    pub fn path_maps(&self) -> BTreeMap<&str, &PathMap<Schema>> {
        self.inner
            .registries
            .iter()
            .map(|(name, r)| (name.as_str(), r.paths()))
            .collect()
    }

    /// Cached result of the transaction capability probe
    ///
    /// `Unknown` until the first transform under the `auto` strategy.
    pub fn transaction_support(&self) -> TransactionSupport {
        self.inner.transforms.transaction_support()
    }

    /// Active configuration
    pub fn config(&self) -> &ShapeConfig {
        &self.inner.config
    }

    /// Keys of the once-per-facade warnings emitted so far
    pub fn emitted_warnings(&self) -> Vec<String> {
        self.inner.warnings.emitted()
    }

    /// Export every registered collection to a backup archive
    ///
    /// Returns `false` on any failure (logged) or when no backup directory
    /// is configured.
    pub async fn backup(&self) -> bool {
        let names: Vec<&str> = self.collection_names();
        BackupManager::new(self.inner.config.backup.clone())
            .run(self.inner.store.as_ref(), &names)
            .await
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("collections", &self.collection_names())
            .field("config", &self.inner.config)
            .finish()
    }
}

// ============================================================================
// Collection Handle
// ============================================================================

/// Operations on one registered collection
#[derive(Clone)]
pub struct Collection {
    inner: Arc<DatabaseInner>,
    registry: Arc<CollectionRegistry>,
}

impl Collection {
    /// Collection name
    pub fn name(&self) -> &str {
        self.registry.name()
    }

    /// Flattened path map
    pub fn path_map(&self) -> &PathMap<Schema> {
        self.registry.paths()
    }

    fn verifier(&self) -> Verifier<'_> {
        Verifier::new(&self.registry, &self.inner.warnings)
    }

    fn store(&self) -> &dyn DocumentStore {
        self.inner.store.as_ref()
    }

    fn warn_identity_write(&self) {
        if self.inner.warnings.first(IDENTITY_WRITE_WARNING) {
            warn!(
                collection = %self.name(),
                "Writes to {} are ignored; identities are assigned by storage",
                ID_FIELD
            );
        }
    }

    fn prepare_insert(&self, doc: &Document) -> Result<Document> {
        let mut body = doc.clone();
        if body.remove(ID_FIELD).is_some() {
            self.warn_identity_write();
        }
        self.registry.validate_insert(&body)
    }

    /// Validate and insert one document
    pub async fn insert_one(&self, doc: Document) -> Result<DocumentId> {
        let parsed = self.prepare_insert(&doc)?;
        Ok(self.store().insert_one(self.name(), parsed).await?)
    }

    /// Validate every document, then insert them all
    ///
    /// Nothing is written if any document fails validation.
    pub async fn insert_many(&self, docs: Vec<Document>) -> Result<Vec<DocumentId>> {
        let parsed = docs
            .iter()
            .map(|doc| self.prepare_insert(doc))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.store().insert_many(self.name(), parsed).await?)
    }

    fn verify_find(&self, query: &Document, options: &FindOptions) -> Result<Document> {
        for (path, _) in &options.sort {
            if path != ID_FIELD {
                self.registry.governing(path)?;
            }
        }
        self.verifier().verify_query(query)
    }

    /// First matching document, parsed against the collection schema
    pub async fn find_one(&self, query: &Document, options: &FindOptions) -> Result<Option<Document>> {
        let filter = self.verify_find(query, options)?;
        match self.store().find_one(self.name(), &filter, options).await? {
            Some(doc) => Ok(Some(self.registry.parse_stored(&doc)?)),
            None => Ok(None),
        }
    }

    /// Every matching document, parsed against the collection schema
    pub async fn find_many(&self, query: &Document, options: &FindOptions) -> Result<Vec<Document>> {
        let filter = self.verify_find(query, options)?;
        self.store()
            .find(self.name(), &filter, options)
            .await?
            .iter()
            .map(|doc| self.registry.parse_stored(doc))
            .collect()
    }

    /// Apply a sparse update to the first matching document
    ///
    /// `Value::Undefined` leaves become unsets; nested objects become dotted
    /// paths. Every path and value is checked before the storage call.
    pub async fn update_one(
        &self,
        query: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        self.update(query, update, options, false).await
    }

    /// Apply a sparse update to every matching document
    pub async fn update_many(
        &self,
        query: &Document,
        update: &Document,
        options: UpdateOptions,
    ) -> Result<UpdateResult> {
        self.update(query, update, options, true).await
    }

    async fn update(
        &self,
        query: &Document,
        update: &Document,
        options: UpdateOptions,
        many: bool,
    ) -> Result<UpdateResult> {
        let verifier = self.verifier();
        let filter = verifier.verify_query(query)?;
        if touches_identity(update) {
            self.warn_identity_write();
        }
        let patch = verifier.verify_patch(&split(update))?;

        if patch.is_empty() {
            let matched = self.count_matches(&filter, many).await?;
            return Ok(UpdateResult {
                matched_count: matched,
                modified_count: 0,
                acknowledged: true,
                upserted_id: None,
            });
        }

        if options.upsert
            && self
                .store()
                .find_one(self.name(), &filter, &FindOptions::new())
                .await?
                .is_none()
        {
            let mut seeded = upsert_seed(&filter);
            seeded.remove(ID_FIELD);
            patch.apply_to(&mut seeded);
            self.registry.validate_insert(&seeded)?;
        }

        let result = if many {
            self.store()
                .update_many(self.name(), &filter, &patch, options)
                .await?
        } else {
            self.store()
                .update_one(self.name(), &filter, &patch, options)
                .await?
        };
        Ok(result)
    }

    async fn count_matches(&self, filter: &Document, many: bool) -> Result<u64> {
        if many {
            let found = self
                .store()
                .find(self.name(), filter, &FindOptions::new())
                .await?;
            Ok(found.len() as u64)
        } else {
            let found = self
                .store()
                .find_one(self.name(), filter, &FindOptions::new())
                .await?;
            Ok(u64::from(found.is_some()))
        }
    }

    /// Remove the first matching document
    pub async fn delete_one(&self, query: &Document) -> Result<DeleteResult> {
        let filter = self.verifier().verify_query(query)?;
        Ok(self.store().delete_one(self.name(), &filter).await?)
    }

    /// Remove every matching document
    pub async fn delete_many(&self, query: &Document) -> Result<DeleteResult> {
        let filter = self.verifier().verify_query(query)?;
        Ok(self.store().delete_many(self.name(), &filter).await?)
    }

    fn transform_context(&self) -> TransformContext<'_> {
        TransformContext {
            store: self.store(),
            registry: &self.registry,
            warnings: &self.inner.warnings,
        }
    }

    /// Read-modify-write the first matching document
    ///
    /// Returns `Ok(None)` when nothing matches.
    ///
    /// # Errors
    ///
    /// - `UnknownPath` / `InvalidTransform` for a bad spec (before storage)
    /// - `SchemaViolation` for a poisoned snapshot or invalid output
    /// - `ConcurrentModification` when optimistic attempts run out
    /// - `DocumentVanished` when the document is deleted mid-transaction
    pub async fn transform_one(
        &self,
        query: &Document,
        spec: &TransformSpec,
        options: TransformOptions,
    ) -> Result<Option<TransformOutcome>> {
        self.inner
            .transforms
            .transform_one(&self.transform_context(), query, spec, &options)
            .await
    }

    /// Transform every matching document, one at a time
    pub async fn transform_many(
        &self,
        query: &Document,
        spec: &TransformSpec,
        options: TransformOptions,
    ) -> Result<TransformManyResult> {
        self.inner
            .transforms
            .transform_many(&self.transform_context(), query, spec, &options)
            .await
    }

    /// Create an index after checking its paths
    pub async fn create_index(&self, index: &IndexSpec) -> Result<String> {
        self.registry.check_index(index)?;
        Ok(self.store().create_index(self.name(), index).await?)
    }

    /// Create every index declared for this collection
    pub async fn create_indexes(&self) -> Result<Vec<String>> {
        let mut names = Vec::with_capacity(self.registry.indexes().len());
        for index in self.registry.indexes() {
            names.push(self.store().create_index(self.name(), index).await?);
        }
        Ok(names)
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name())
            .finish()
    }
}
