//! Shared test utilities for the end-to-end suites.
//!
//! Import with `#[path = "../common/mod.rs"] mod common;` from a suite's main.rs.

#![allow(dead_code)]

use shapedb::{
    doc, Collection, CollectionDef, Database, Document, DocumentStore, MemoryStore, Schema,
    ShapeConfig, TransformStrategy, Value,
};
use std::sync::{Arc, Once};

static INIT_TRACING: Once = Once::new();

/// Install a fmt subscriber once per test binary.
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// Schema used by the scenarios: a user with a required array of roles and
/// an optional array of badges.
pub fn users_schema() -> Schema {
    Schema::object([
        ("name", Schema::string()),
        ("email", Schema::string()),
        ("roles", Schema::array(Schema::string())),
        ("badges", Schema::array(Schema::string()).optional()),
        (
            "profile",
            Schema::object([
                ("city", Schema::string()),
                ("zip", Schema::string().optional()),
            ])
            .optional(),
        ),
    ])
}

pub fn config(strategy: TransformStrategy) -> ShapeConfig {
    ShapeConfig {
        strategy,
        ..ShapeConfig::default()
    }
}

/// Open a facade with the `users` collection over the given store.
pub async fn open_users(store: Arc<dyn DocumentStore>, strategy: TransformStrategy) -> Database {
    init_tracing();
    Database::open(
        store,
        vec![CollectionDef::new("users", users_schema())],
        config(strategy),
    )
    .await
    .expect("open facade")
}

/// Open over a fresh in-memory store that supports transactions.
pub async fn open_memory(strategy: TransformStrategy) -> (Database, MemoryStore) {
    let store = MemoryStore::new();
    let db = open_users(Arc::new(store.clone()), strategy).await;
    (db, store)
}

pub fn ada() -> Document {
    doc! {
        "name" => "ada",
        "email" => "ada@example.com",
        "roles" => vec!["admin"],
    }
}

pub fn users(db: &Database) -> Collection {
    db.collection("users").expect("users collection")
}

pub fn array_len(doc: &Document, field: &str) -> usize {
    doc.get(field).and_then(Value::as_array).map_or(0, Vec::len)
}

pub fn push(value: Value, item: &str) -> Value {
    let mut items = value.as_array().cloned().unwrap_or_default();
    items.push(Value::from(item));
    Value::Array(items)
}
