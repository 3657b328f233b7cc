//! Query and update verification
//!
//! Every key of a sparse object is resolved against the collection's path
//! map before anything reaches storage. Unknown paths fail closed.
//!
//! | Mode | Checked |
//! |------|---------|
//! | `Query` | scalar, date, null and array values against the governing schema (or its array element schema) |
//! | `Set` | the value parses against the governing schema |
//! | `Unset` | the governing schema accepts absence |
//!
//! In `Query` mode, object-valued entries are presumed to be storage
//! operators and pass through unvalidated; the first time this happens on a
//! facade a warning is logged. The identity field bypasses path checks.

use crate::registry::CollectionRegistry;
use crate::warn::WarnOnce;
use shapedb_core::{strip_undefined, Document, Result, SetUnsetPatch, Value, ID_FIELD};
use shapedb_schema::{Schema, SchemaShape};
use std::collections::{BTreeMap, BTreeSet};
use tracing::warn;

/// What a sparse object is being verified for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    /// Filter document
    Query,
    /// Values to assign
    Set,
    /// Paths to remove
    Unset,
}

const QUERY_OPERATOR_WARNING: &str = "query-operator-passthrough";

/// Resolves sparse objects against one collection's path map
pub struct Verifier<'a> {
    registry: &'a CollectionRegistry,
    warnings: &'a WarnOnce,
}

impl<'a> Verifier<'a> {
    /// Create a verifier for a collection
    pub fn new(registry: &'a CollectionRegistry, warnings: &'a WarnOnce) -> Self {
        Verifier { registry, warnings }
    }

    /// Verify a sparse object in the given mode
    ///
    /// For `Unset`, values are ignored; only keys matter.
    pub fn verify(&self, sparse: &Document, mode: VerifyMode) -> Result<Document> {
        match mode {
            VerifyMode::Query => self.verify_query(sparse),
            VerifyMode::Set => self.verify_set(sparse),
            VerifyMode::Unset => {
                let unset: BTreeSet<String> = sparse.keys().cloned().collect();
                self.verify_unset(&unset)?;
                Ok(sparse.clone())
            }
        }
    }

    /// Verify a filter document
    ///
    /// `$and` / `$or` / `$nor` sub-filters are verified recursively; other
    /// top-level operators pass through.
    pub fn verify_query(&self, filter: &Document) -> Result<Document> {
        for (key, value) in filter {
            if key == ID_FIELD || key.starts_with("_id.") {
                continue;
            }
            if key.starts_with('$') {
                match (key.as_str(), value) {
                    ("$and" | "$or" | "$nor", Value::Array(items)) => {
                        for item in items {
                            if let Value::Object(sub) = item {
                                self.verify_query(sub)?;
                            }
                        }
                    }
                    _ => self.warn_passthrough(key),
                }
                continue;
            }

            let governing = self.registry.governing(key)?;
            match value {
                Value::Object(_) => self.warn_passthrough(key),
                Value::Null if governing.accepts(&Value::Null) || governing.accepts_absent() => {}
                scalar => {
                    if !query_accepts(governing, scalar) {
                        let issues = match governing.safe_parse(scalar).into_result() {
                            Err(e) => e.issues,
                            Ok(_) => Vec::new(),
                        };
                        return Err(self.registry.path_violation(key, issues));
                    }
                }
            }
        }
        Ok(filter.clone())
    }

    /// Verify and normalize values to assign
    ///
    /// Each value is parsed against its governing schema; the parsed form
    /// (defaults applied, unknown keys stripped) is returned.
    pub fn verify_set(&self, set: &BTreeMap<String, Value>) -> Result<BTreeMap<String, Value>> {
        let mut out = BTreeMap::new();
        for (path, value) in set {
            let governing = self.registry.governing(path)?;
            let mut parsed = governing
                .parse(value)
                .map_err(|e| self.registry.path_violation(path, e.issues))?;
            if self.registry.has_optional_fields() {
                strip_undefined(&mut parsed);
            }
            out.insert(path.clone(), parsed);
        }
        Ok(out)
    }

    /// Verify that every path may be removed
    pub fn verify_unset(&self, unset: &BTreeSet<String>) -> Result<()> {
        for path in unset {
            let governing = self.registry.governing(path)?;
            if let Err(e) = governing.parse(&Value::Undefined) {
                return Err(self.registry.path_violation(path, e.issues));
            }
        }
        Ok(())
    }

    /// Verify both halves of a patch, returning it with normalized `set` values
    pub fn verify_patch(&self, patch: &SetUnsetPatch) -> Result<SetUnsetPatch> {
        let set = self.verify_set(&patch.set)?;
        self.verify_unset(&patch.unset)?;
        Ok(SetUnsetPatch {
            set,
            unset: patch.unset.clone(),
        })
    }

    fn warn_passthrough(&self, key: &str) {
        if self.warnings.first(QUERY_OPERATOR_WARNING) {
            warn!(
                collection = %self.registry.name(),
                key,
                "Query operators are passed through without validation"
            );
        }
    }
}

/// Equality against an array field matches its elements, so a query value
/// may satisfy either the field schema or its element schema.
fn query_accepts(governing: &Schema, value: &Value) -> bool {
    if governing.accepts(value) {
        return true;
    }
    match governing.unwrapped() {
        Schema::Array(element) => element.accepts(value),
        Schema::Union(_) | Schema::DiscriminatedUnion(_) => {
            governing.unwrapped().branches().iter().any(|b| query_accepts(b, value))
        }
        _ => false,
    }
}
