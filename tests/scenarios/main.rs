//! End-to-end scenarios through the public `shapedb` surface

#[path = "../common/mod.rs"]
mod common;

use async_trait::async_trait;
use common::*;
use proptest::prelude::*;
use shapedb::{
    doc, BackupReader, CollectionDef, Database, DeleteResult, Document, DocumentId, DocumentStore,
    Error, FindOptions, IndexSpec, MemoryStore, Schema, Session, SetUnsetPatch, ShapeConfig,
    StorageResult, TransformOptions, TransformSpec, TransformStrategy, UpdateOptions, UpdateResult,
    Value,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Scenario A-C: insert, transform, update
// ============================================================================

#[tokio::test]
async fn scenario_a_insert_then_find() {
    let (db, _) = open_memory(TransformStrategy::Auto).await;
    let users = users(&db);
    users.insert_one(ada()).await.unwrap();

    let found = users
        .find_one(&doc! { "name" => "ada" }, &FindOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(array_len(&found, "roles"), 1);
    assert!(found.contains_key("_id"));
}

#[tokio::test]
async fn scenario_b_transform_appends() {
    for strategy in [TransformStrategy::Transactional, TransformStrategy::Optimistic] {
        let (db, _) = open_memory(strategy).await;
        let users = users(&db);
        users.insert_one(ada()).await.unwrap();

        let spec = TransformSpec::new().path("roles", |v| push(v, "editor"));
        users
            .transform_one(&doc! { "name" => "ada" }, &spec, TransformOptions::new())
            .await
            .unwrap()
            .unwrap();

        let found = users
            .find_one(&doc! { "name" => "ada" }, &FindOptions::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            found.get("roles"),
            Some(&Value::from(vec!["admin", "editor"]))
        );
    }
}

#[tokio::test]
async fn scenario_c_update_many_sets_and_unsets() {
    init_tracing();
    let store = MemoryStore::new();
    let db = Database::open(
        Arc::new(store.clone()),
        vec![CollectionDef::new(
            "carts",
            Schema::object([
                ("owner", Schema::string()),
                ("items", Schema::array(Schema::string()).optional()),
                ("saved", Schema::array(Schema::string()).optional()),
            ]),
        )],
        ShapeConfig::default(),
    )
    .await
    .unwrap();
    let carts = db.collection("carts").unwrap();
    carts
        .insert_one(doc! { "owner" => "ada", "items" => vec!["book"] })
        .await
        .unwrap();

    let result = carts
        .update_many(
            &doc! { "owner" => "ada" },
            &doc! { "saved" => vec!["lamp"], "items" => Value::Undefined },
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.modified_count, 1);

    let found = carts
        .find_one(&doc! { "owner" => "ada" }, &FindOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert!(!found.contains_key("items"));
    assert_eq!(array_len(&found, "saved"), 1);
}

// ============================================================================
// Scenario D / P3: unknown paths never reach storage
// ============================================================================

/// Counts every storage call, delegating to a memory store
#[derive(Default)]
struct CountingStore {
    inner: MemoryStore,
    calls: AtomicUsize,
}

impl CountingStore {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    async fn insert_one(&self, collection: &str, doc: Document) -> StorageResult<DocumentId> {
        self.touch();
        self.inner.insert_one(collection, doc).await
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> StorageResult<Vec<DocumentId>> {
        self.touch();
        self.inner.insert_many(collection, docs).await
    }

    async fn find_one(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> StorageResult<Option<Document>> {
        self.touch();
        self.inner.find_one(collection, filter, options).await
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> StorageResult<Vec<Document>> {
        self.touch();
        self.inner.find(collection, filter, options).await
    }

    async fn update_one(
        &self,
        collection: &str,
        filter: &Document,
        patch: &SetUnsetPatch,
        options: UpdateOptions,
    ) -> StorageResult<UpdateResult> {
        self.touch();
        self.inner.update_one(collection, filter, patch, options).await
    }

    async fn update_many(
        &self,
        collection: &str,
        filter: &Document,
        patch: &SetUnsetPatch,
        options: UpdateOptions,
    ) -> StorageResult<UpdateResult> {
        self.touch();
        self.inner.update_many(collection, filter, patch, options).await
    }

    async fn delete_one(&self, collection: &str, filter: &Document) -> StorageResult<DeleteResult> {
        self.touch();
        self.inner.delete_one(collection, filter).await
    }

    async fn delete_many(&self, collection: &str, filter: &Document) -> StorageResult<DeleteResult> {
        self.touch();
        self.inner.delete_many(collection, filter).await
    }

    async fn create_index(&self, collection: &str, index: &IndexSpec) -> StorageResult<String> {
        self.touch();
        self.inner.create_index(collection, index).await
    }

    async fn list_indexes(&self, collection: &str) -> StorageResult<Vec<String>> {
        self.touch();
        self.inner.list_indexes(collection).await
    }

    async fn collection_names(&self) -> StorageResult<Vec<String>> {
        self.touch();
        self.inner.collection_names().await
    }

    async fn start_session(&self) -> StorageResult<Box<dyn Session>> {
        self.touch();
        self.inner.start_session().await
    }
}

fn is_unknown(result: Result<impl std::fmt::Debug, Error>, path: &str) -> bool {
    matches!(result, Err(Error::UnknownPath { path: ref p, .. }) if p == path)
}

#[tokio::test]
async fn scenario_d_typo_query_touches_nothing() {
    let store = Arc::new(CountingStore::default());
    let db = open_users(store.clone(), TransformStrategy::Auto).await;
    let users = users(&db);
    users.insert_one(ada()).await.unwrap();
    let before = store.calls();

    let err = users
        .find_one(&doc! { "profile.cty" => "paris" }, &FindOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownPath { ref path, .. } if path == "profile.cty"));

    let err = users
        .delete_many(&doc! { "nmae" => "ada" })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownPath { .. }));

    assert_eq!(store.calls(), before);
    assert_eq!(store.inner.count("users"), 1);
}

async fn every_operation_rejects(path: &str) {
    let store = Arc::new(CountingStore::default());
    let db = open_users(store.clone(), TransformStrategy::Auto).await;
    let users = users(&db);
    let before = store.calls();

    let mut query = Document::new();
    query.insert(path.to_string(), Value::from("x"));
    let mut update = Document::new();
    update.insert(path.to_string(), Value::from("x"));
    let mut unset = Document::new();
    unset.insert(path.to_string(), Value::Undefined);
    let spec = TransformSpec::new().path(path, |v| v);
    let sorted = FindOptions::new().sort_by(path, shapedb::SortOrder::Ascending);

    assert!(is_unknown(users.find_one(&query, &FindOptions::new()).await, path));
    assert!(is_unknown(users.find_many(&Document::new(), &sorted).await, path));
    assert!(is_unknown(users.update_one(&Document::new(), &update, UpdateOptions::default()).await, path));
    assert!(is_unknown(users.update_many(&Document::new(), &unset, UpdateOptions::upsert()).await, path));
    assert!(is_unknown(users.delete_one(&query).await, path));
    assert!(is_unknown(users.create_index(&IndexSpec::ascending(path)).await, path));
    assert!(is_unknown(users.transform_one(&Document::new(), &spec, TransformOptions::new()).await, path));
    assert!(is_unknown(users.transform_many(&Document::new(), &spec, TransformOptions::new()).await, path));

    assert_eq!(store.calls(), before, "storage touched for {}", path);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_unknown_paths_never_reach_storage(path in "[a-z]{1,6}(\\.[a-z0-9]{1,4}){0,2}") {
        let known = common::users_schema();
        let map = shapedb_engine::flatten(&known).unwrap();
        prop_assume!(!map.contains(&path));

        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(every_operation_rejects(&path));
    }
}

// ============================================================================
// Scenario E / P4: concurrent transforms
// ============================================================================

#[tokio::test]
async fn scenario_e_concurrent_optimistic_transforms() {
    let store = MemoryStore::standalone();
    let db = open_users(Arc::new(store), TransformStrategy::Auto).await;
    let users = users(&db);
    users.insert_one(ada()).await.unwrap();

    let left = {
        let users = users.clone();
        tokio::spawn(async move {
            let spec = TransformSpec::new().path("roles", |v| push(v, "left"));
            users
                .transform_one(&doc! { "name" => "ada" }, &spec, TransformOptions::new().with_max_retries(3))
                .await
        })
    };
    let right = {
        let users = users.clone();
        tokio::spawn(async move {
            let spec = TransformSpec::new().path("roles", |v| push(v, "right"));
            users
                .transform_one(&doc! { "name" => "ada" }, &spec, TransformOptions::new().with_max_retries(3))
                .await
        })
    };

    let mut succeeded = Vec::new();
    for result in [left.await.unwrap(), right.await.unwrap()] {
        match result {
            Ok(Some(outcome)) => succeeded.push(array_len(&outcome.updated, "roles")),
            Err(Error::ConcurrentModification { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    let found = users
        .find_one(&doc! { "name" => "ada" }, &FindOptions::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(array_len(&found, "roles"), 1 + succeeded.len());
    if succeeded.len() == 2 {
        succeeded.sort_unstable();
        assert_eq!(succeeded, vec![2, 3]);
    }
}

#[tokio::test]
async fn p4_disjoint_paths_under_contention() {
    for (store, strategy) in [
        (MemoryStore::new(), TransformStrategy::Transactional),
        (MemoryStore::standalone(), TransformStrategy::Optimistic),
    ] {
        let db = open_users(Arc::new(store), strategy).await;
        let users = users(&db);
        users
            .insert_one(doc! {
                "name" => "ada",
                "email" => "ada@example.com",
                "roles" => Vec::<String>::new(),
                "badges" => Vec::<String>::new(),
            })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..6 {
            let users = users.clone();
            handles.push(tokio::spawn(async move {
                let field = if i % 2 == 0 { "roles" } else { "badges" };
                let spec = TransformSpec::new().path(field, |v| push(v, "x"));
                users
                    .transform_one(&doc! { "name" => "ada" }, &spec, TransformOptions::new().with_max_retries(32))
                    .await
            }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap().unwrap();
            // the snapshot each transform saw was a whole committed state
            assert!(array_len(&outcome.updated, "roles") <= 3);
            assert!(array_len(&outcome.updated, "badges") <= 3);
        }

        let found = users
            .find_one(&doc! { "name" => "ada" }, &FindOptions::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(array_len(&found, "roles"), 3, "{:?}", strategy);
        assert_eq!(array_len(&found, "badges"), 3, "{:?}", strategy);
    }
}

// ============================================================================
// Facade surfaces
// ============================================================================

#[tokio::test]
async fn nested_update_and_upsert() {
    let (db, store) = open_memory(TransformStrategy::Auto).await;
    let users = users(&db);
    users.insert_one(ada()).await.unwrap();

    users
        .update_one(
            &doc! { "name" => "ada" },
            &doc! { "profile" => doc! { "city" => "paris", "zip" => "75001" } },
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    users
        .update_one(
            &doc! { "profile.city" => "paris" },
            &doc! { "profile.zip" => Value::Undefined },
            UpdateOptions::default(),
        )
        .await
        .unwrap();
    let found = users
        .find_one(&doc! { "name" => "ada" }, &FindOptions::new())
        .await
        .unwrap()
        .unwrap();
    let profile = found.get("profile").and_then(Value::as_object).unwrap();
    assert_eq!(profile.get("city"), Some(&Value::from("paris")));
    assert!(!profile.contains_key("zip"));

    let upserted = users
        .update_one(
            &doc! { "name" => "bob", "email" => "bob@example.com" },
            &doc! { "roles" => vec!["viewer"] },
            UpdateOptions::upsert(),
        )
        .await
        .unwrap();
    assert!(upserted.upserted_id.is_some());
    assert_eq!(store.count("users"), 2);
}

#[tokio::test]
async fn identity_field_rejected_in_schema() {
    let err = Database::open(
        Arc::new(MemoryStore::new()),
        vec![CollectionDef::new("bad", Schema::object([("_id", Schema::string())]))],
        ShapeConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::IdentityFieldCollision { .. }));

    let err = Database::open(
        Arc::new(MemoryStore::new()),
        vec![CollectionDef::new("bad", Schema::object([("m", Schema::map(Schema::int()))]))],
        ShapeConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::UnsupportedSchemaConstruct { ref path, .. } if path == "m"));
}

#[tokio::test]
async fn index_failure_does_not_block_open() {
    let store = MemoryStore::new();
    store.insert_one("users", ada()).await.unwrap();
    store.insert_one("users", ada()).await.unwrap();

    let db = Database::open(
        Arc::new(store.clone()),
        vec![CollectionDef::new("users", users_schema()).index(IndexSpec::ascending("email").unique())],
        ShapeConfig::default(),
    )
    .await
    .unwrap();
    let found = users(&db)
        .find_many(&doc! { "email" => "ada@example.com" }, &FindOptions::new())
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
}

#[tokio::test]
async fn backup_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut config = ShapeConfig::load_or_create(dir.path()).unwrap();
    config.backup.directory = Some(dir.path().join("backups"));
    config.backup.retain = 1;

    let store = MemoryStore::new();
    let db = Database::open(
        Arc::new(store),
        vec![CollectionDef::new("users", users_schema())],
        config,
    )
    .await
    .unwrap();
    users(&db).insert_one(ada()).await.unwrap();

    assert!(db.backup().await);
    assert!(db.backup().await);

    let archives = shapedb_engine::backup::list_archives(&dir.path().join("backups")).unwrap();
    assert_eq!(archives.len(), 1);
    let contents = BackupReader::read(&archives[0]).unwrap();
    let docs = contents.collections.get("users").unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].get("name"), Some(&Value::from("ada")));
}
