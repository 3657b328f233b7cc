//! Per-collection schema registry
//!
//! A [`CollectionRegistry`] is built once per declared collection when the
//! database opens. Construction fails fast on anything that would otherwise
//! surface as a request-time surprise: non-object roots, unsupported schema
//! constructs, a declared identity field, and indexes on unknown paths.

use crate::paths::{flatten, PathMap};
use shapedb_core::{
    strip_undefined_fields, Document, Error, Result, ValidationIssue, ID_FIELD,
};
use shapedb_schema::{Schema, SchemaKind, SchemaShape};
use shapedb_storage::IndexSpec;

/// Schema, flattened paths and derived metadata for one collection
#[derive(Debug, Clone)]
pub struct CollectionRegistry {
    name: String,
    schema: Schema,
    read_schema: Schema,
    paths: PathMap<Schema>,
    has_optional_fields: bool,
    indexes: Vec<IndexSpec>,
}

impl CollectionRegistry {
    /// Build the registry for a collection
    ///
    /// # Errors
    ///
    /// - `InvalidSchema` if the root is not an object (or a union of objects)
    /// - `UnsupportedSchemaConstruct` from flattening
    /// - `IdentityFieldCollision` if the schema declares `_id`
    /// - `UnknownPath` if an index references a path the schema lacks
    pub fn new(name: impl Into<String>, schema: Schema, indexes: Vec<IndexSpec>) -> Result<Self> {
        let name = name.into();
        let root = schema.unwrapped();
        let root_ok = match root.kind() {
            SchemaKind::Object => true,
            SchemaKind::Union => root
                .branches()
                .iter()
                .all(|b| b.unwrapped().kind() == SchemaKind::Object),
            _ => false,
        };
        if !root_ok {
            return Err(Error::InvalidSchema {
                collection: name,
                reason: format!(
                    "root schema must be an object, found {}",
                    root.construct_name()
                ),
            });
        }

        let paths = flatten(&schema)?;
        if paths.contains(ID_FIELD) {
            return Err(Error::IdentityFieldCollision { collection: name });
        }

        let read_schema = with_identity(root).ok_or_else(|| Error::InvalidSchema {
            collection: name.clone(),
            reason: "root schema must be an object".to_string(),
        })?;
        let has_optional_fields = paths.iter().any(|(_, s)| s.accepts_absent());

        for index in &indexes {
            for path in index.paths() {
                if path != ID_FIELD && !paths.contains(path) {
                    return Err(Error::unknown_path(&name, path));
                }
            }
        }

        Ok(CollectionRegistry {
            name,
            schema,
            read_schema,
            paths,
            has_optional_fields,
            indexes,
        })
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema for inserts and updates (no identity field)
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Schema for documents read back from storage (identity appended)
    pub fn read_schema(&self) -> &Schema {
        &self.read_schema
    }

    /// Flattened path map
    pub fn paths(&self) -> &PathMap<Schema> {
        &self.paths
    }

    /// Whether any path accepts absence
    ///
    /// When true, parsed output may carry explicit `Undefined` values that
    /// must be stripped before a write.
    pub fn has_optional_fields(&self) -> bool {
        self.has_optional_fields
    }

    /// Declared indexes
    pub fn indexes(&self) -> &[IndexSpec] {
        &self.indexes
    }

    /// Governing schema for a path
    ///
    /// # Errors
    ///
    /// `UnknownPath` if the path is not in the flattened map.
    pub fn governing(&self, path: &str) -> Result<&Schema> {
        self.paths
            .get(path)
            .ok_or_else(|| Error::unknown_path(&self.name, path))
    }

    /// Reject index specs that reference unknown paths
    pub fn check_index(&self, index: &IndexSpec) -> Result<()> {
        for path in index.paths() {
            if path != ID_FIELD {
                self.governing(path)?;
            }
        }
        Ok(())
    }

    /// Validate a document for insertion
    ///
    /// Returns the parsed document (defaults applied, unknown keys
    /// stripped) ready for storage.
    pub fn validate_insert(&self, doc: &Document) -> Result<Document> {
        let mut parsed = self
            .schema
            .parse_document(doc)
            .map_err(|e| Error::document_violation(&self.name, e.issues))?;
        if self.has_optional_fields {
            strip_undefined_fields(&mut parsed);
        }
        Ok(parsed)
    }

    /// Parse a stored document, identity included
    pub fn parse_stored(&self, doc: &Document) -> Result<Document> {
        self.read_schema
            .parse_document(doc)
            .map_err(|e| Error::document_violation(&self.name, e.issues))
    }

    /// Parse a stored document without its identity
    ///
    /// Used for transform snapshots: a stored document that fails this is
    /// poisoned and surfaces as a schema violation.
    pub fn parse_snapshot(&self, doc: &Document) -> Result<Document> {
        let mut body = doc.clone();
        body.remove(ID_FIELD);
        let mut parsed = self
            .schema
            .parse_document(&body)
            .map_err(|e| Error::document_violation(&self.name, e.issues))?;
        if self.has_optional_fields {
            strip_undefined_fields(&mut parsed);
        }
        Ok(parsed)
    }

    /// Schema violation for a single path
    pub(crate) fn path_violation(&self, path: &str, issues: Vec<ValidationIssue>) -> Error {
        Error::path_violation(&self.name, path, issues)
    }
}

fn with_identity(root: &Schema) -> Option<Schema> {
    match root {
        Schema::Object(_) => root.with_field(ID_FIELD, Schema::id()),
        Schema::Union(branches) => branches
            .iter()
            .map(|b| with_identity(b.unwrapped()))
            .collect::<Option<Vec<_>>>()
            .map(Schema::union),
        Schema::DiscriminatedUnion(du) => du
            .branches()
            .iter()
            .map(|b| with_identity(b.unwrapped()))
            .collect::<Option<Vec<_>>>()
            .map(|branches| Schema::discriminated_union(du.discriminator(), branches)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapedb_core::{doc, DocumentId, Value};

    fn user_schema() -> Schema {
        Schema::object([
            ("name", Schema::string()),
            ("email", Schema::string()),
            ("age", Schema::int().optional()),
        ])
    }

    #[test]
    fn test_registry_basics() {
        let reg = CollectionRegistry::new("users", user_schema(), vec![]).unwrap();
        assert_eq!(reg.name(), "users");
        assert!(reg.has_optional_fields());
        assert!(reg.governing("email").is_ok());
        assert!(matches!(reg.governing("emial"), Err(Error::UnknownPath { .. })));
    }

    #[test]
    fn test_no_optional_fields() {
        let schema = Schema::object([("a", Schema::string())]);
        let reg = CollectionRegistry::new("c", schema, vec![]).unwrap();
        assert!(!reg.has_optional_fields());
    }

    #[test]
    fn test_identity_collision_fails_fast() {
        let schema = Schema::object([("_id", Schema::string())]);
        let err = CollectionRegistry::new("c", schema, vec![]).unwrap_err();
        assert!(matches!(err, Error::IdentityFieldCollision { .. }));
    }

    #[test]
    fn test_non_object_root_rejected() {
        let err = CollectionRegistry::new("c", Schema::string(), vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
        let err = CollectionRegistry::new("c", Schema::array(Schema::int()), vec![]).unwrap_err();
        assert!(matches!(err, Error::InvalidSchema { .. }));
    }

    #[test]
    fn test_union_of_objects_root_accepted() {
        let schema = Schema::discriminated_union(
            "type",
            [
                Schema::object([("type", Schema::literal("a")), ("x", Schema::int())]),
                Schema::object([("type", Schema::literal("b")), ("y", Schema::int())]),
            ],
        );
        let reg = CollectionRegistry::new("events", schema, vec![]).unwrap();
        let stored = doc! { "_id" => DocumentId::new(), "type" => "b", "y" => 2i64 };
        let parsed = reg.parse_stored(&stored).unwrap();
        assert!(parsed.contains_key("_id"));
    }

    #[test]
    fn test_unknown_index_path_rejected() {
        let err = CollectionRegistry::new(
            "users",
            user_schema(),
            vec![IndexSpec::ascending("emali")],
        )
        .unwrap_err();
        assert!(matches!(err, Error::UnknownPath { ref path, .. } if path == "emali"));
        assert!(CollectionRegistry::new("users", user_schema(), vec![IndexSpec::ascending("_id")]).is_ok());
    }

    #[test]
    fn test_validate_insert_strips_unknown_and_undefined() {
        let reg = CollectionRegistry::new("users", user_schema(), vec![]).unwrap();
        let out = reg
            .validate_insert(&doc! {
                "name" => "a",
                "email" => "a@x",
                "age" => Value::Undefined,
                "extra" => true,
            })
            .unwrap();
        assert!(!out.contains_key("age"));
        assert!(!out.contains_key("extra"));

        let err = reg.validate_insert(&doc! { "name" => "a" }).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation { path: None, .. }));
    }

    #[test]
    fn test_read_schema_requires_identity() {
        let reg = CollectionRegistry::new("users", user_schema(), vec![]).unwrap();
        let stored = doc! { "_id" => DocumentId::new(), "name" => "a", "email" => "e" };
        assert!(reg.parse_stored(&stored).unwrap().contains_key("_id"));
        let snapshot = reg.parse_snapshot(&stored).unwrap();
        assert!(!snapshot.contains_key("_id"));
        let missing = doc! { "name" => "a", "email" => "e" };
        assert!(reg.parse_stored(&missing).is_err());
    }
}
