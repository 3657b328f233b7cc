//! Transform engine
//!
//! A transform is a read-modify-write on one document: locate it, parse a
//! snapshot, run caller-supplied pure functions over paths (or the whole
//! document), revalidate, and commit the resulting set/unset patch so no
//! concurrent transform on the same document can clobber it.
//!
//! # Lifecycle
//!
//! ```text
//! check spec ─► verify query ─► Locate ─► Snapshot ─► Apply ─► Revalidate ─► Commit
//!                                 ▲                                            │
//!                                 └──────── optimistic conflict (retry) ◄──────┘
//! ```
//!
//! # Strategies
//!
//! | Strategy | Commit | Conflict handling |
//! |----------|--------|-------------------|
//! | Transactional | session transaction, re-fetch by id inside it | storage isolation |
//! | Optimistic | conditional update on the full snapshot | retry up to `max_retries` attempts |
//!
//! With `strategy = "auto"` the first transform runs a capability probe and
//! pins the choice for the facade's lifetime.
//!
//! Transforms never see each other's output: every path function receives
//! the value from the snapshot, and targets may not overlap.

mod optimistic;
mod probe;
mod transactional;

pub use probe::TransactionSupport;

use crate::database::config::TransformStrategy;
use crate::registry::CollectionRegistry;
use crate::split::split_assignments;
use crate::verify::Verifier;
use crate::warn::WarnOnce;
use probe::CapabilityProbe;
use shapedb_core::{
    document_id, get_at_path, strip_undefined_fields, Document, DocumentId, DottedPath, Error,
    Result, SetUnsetPatch, StorageError, Value, ID_FIELD,
};
use shapedb_schema::SchemaShape;
use shapedb_storage::{DocumentStore, FindOptions, UpdateResult};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Function applied to the current value at a path
///
/// Receives `Value::Undefined` when the path is absent; returning
/// `Value::Undefined` removes the path.
pub type PathTransform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Function applied to the whole document (identity excluded)
pub type DocumentTransform = Arc<dyn Fn(Document) -> Document + Send + Sync>;

#[derive(Clone)]
enum Step {
    Path { path: String, apply: PathTransform },
    Document(DocumentTransform),
}

/// The transforms to run against each located document
///
/// # Example
///
/// ```
/// use shapedb_core::Value;
/// use shapedb_engine::TransformSpec;
///
/// let spec = TransformSpec::new()
///     .path("visits", |v| Value::Int(v.as_int().unwrap_or(0) + 1))
///     .path("tags", |v| {
///         let mut tags = v.as_array().cloned().unwrap_or_default();
///         tags.push(Value::from("seen"));
///         Value::Array(tags)
///     });
/// assert_eq!(spec.targets(), vec!["visits", "tags"]);
/// ```
#[derive(Clone, Default)]
pub struct TransformSpec {
    steps: Vec<Step>,
}

impl TransformSpec {
    /// Empty spec
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform the value at a dotted path
    pub fn path<F>(mut self, path: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.steps.push(Step::Path {
            path: path.into(),
            apply: Arc::new(f),
        });
        self
    }

    /// Transform the whole document
    ///
    /// Cannot be combined with path transforms.
    pub fn document<F>(mut self, f: F) -> Self
    where
        F: Fn(Document) -> Document + Send + Sync + 'static,
    {
        self.steps.push(Step::Document(Arc::new(f)));
        self
    }

    /// Declared targets; the whole document is reported as `""`
    pub fn targets(&self) -> Vec<&str> {
        self.steps
            .iter()
            .map(|step| match step {
                Step::Path { path, .. } => path.as_str(),
                Step::Document(_) => "",
            })
            .collect()
    }

    /// Whether no transform was declared
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Reject specs that cannot be applied, before touching storage
    ///
    /// # Errors
    ///
    /// - `InvalidTransform` for an empty spec or overlapping targets
    /// - `UnknownPath` for a target missing from the path map
    pub fn check(&self, registry: &CollectionRegistry) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::InvalidTransform("no transforms given".to_string()));
        }
        let whole = self
            .steps
            .iter()
            .filter(|s| matches!(s, Step::Document(_)))
            .count();
        if whole > 0 && self.steps.len() > 1 {
            return Err(Error::InvalidTransform(
                "a whole-document transform cannot be combined with other transforms".to_string(),
            ));
        }

        let mut targets: Vec<(&str, DottedPath)> = Vec::new();
        for step in &self.steps {
            let Step::Path { path, .. } = step else {
                continue;
            };
            registry.governing(path)?;
            let parsed =
                DottedPath::parse(path).map_err(|_| Error::unknown_path(registry.name(), path))?;
            if let Some((other, _)) = targets.iter().find(|(_, p)| p.overlaps(&parsed)) {
                return Err(Error::InvalidTransform(format!(
                    "transform targets '{}' and '{}' overlap",
                    other, path
                )));
            }
            targets.push((path, parsed));
        }
        Ok(())
    }

    /// Run the transforms against a snapshot, producing an unverified patch
    fn apply(&self, registry: &CollectionRegistry, previous: &Document) -> Result<SetUnsetPatch> {
        let mut assignments = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            match step {
                Step::Path { path, apply } => {
                    let parsed = DottedPath::parse(path)
                        .map_err(|_| Error::unknown_path(registry.name(), path))?;
                    let current = get_at_path(previous, &parsed)
                        .cloned()
                        .unwrap_or(Value::Undefined);
                    assignments.push((path.clone(), apply(current)));
                }
                Step::Document(apply) => {
                    let mut produced = registry
                        .schema()
                        .parse_document(&apply(previous.clone()))
                        .map_err(|e| Error::document_violation(registry.name(), e.issues))?;
                    strip_undefined_fields(&mut produced);
                    for key in registry.paths().top_level() {
                        match (previous.get(key), produced.remove(key)) {
                            (_, Some(value)) => assignments.push((key.to_string(), value)),
                            (Some(_), None) => assignments.push((key.to_string(), Value::Undefined)),
                            (None, None) => {}
                        }
                    }
                }
            }
        }
        Ok(split_assignments(assignments))
    }
}

impl fmt::Debug for TransformSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformSpec")
            .field("targets", &self.targets())
            .finish()
    }
}

/// Per-call transform options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransformOptions {
    /// Total optimistic attempts; `None` uses the configured default
    pub max_retries: Option<usize>,
    /// Collect per-document outcomes in `transform_many`
    pub detailed: bool,
}

impl TransformOptions {
    /// Default options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the optimistic attempt budget
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Collect per-document outcomes
    pub fn detailed(mut self) -> Self {
        self.detailed = true;
        self
    }
}

/// Result of transforming one document
#[derive(Debug, Clone, PartialEq)]
pub struct TransformOutcome {
    /// Transformed document
    pub id: DocumentId,
    /// Parsed snapshot before the transform
    pub previous: Document,
    /// Parsed document after the transform
    pub updated: Document,
    /// Storage result of the write
    pub result: UpdateResult,
}

/// Aggregate result of `transform_many`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformManyResult {
    /// Documents transformed
    pub matched: u64,
    /// Documents whose stored contents changed
    pub modified: u64,
    /// Writes the storage layer did not acknowledge
    pub not_acknowledged: u64,
    /// Documents whose optimistic attempts were exhausted
    pub conflicted: Vec<DocumentId>,
    /// Per-document outcomes, when requested
    pub details: Option<Vec<TransformOutcome>>,
}

/// Snapshot plus the verified patch derived from it
#[derive(Debug)]
pub(crate) struct Plan {
    pub(crate) id: DocumentId,
    pub(crate) previous: Document,
    pub(crate) updated: Document,
    pub(crate) patch: SetUnsetPatch,
}

impl Plan {
    /// Snapshot, apply, revalidate
    pub(crate) fn build(
        registry: &CollectionRegistry,
        warnings: &WarnOnce,
        spec: &TransformSpec,
        stored: &Document,
    ) -> Result<Plan> {
        let id = document_id(stored).ok_or_else(|| {
            Error::Storage(StorageError::Malformed(format!(
                "stored document in '{}' has no {}",
                registry.name(),
                ID_FIELD
            )))
        })?;
        let previous = registry.parse_snapshot(stored)?;

        // No-ops go first: returning `Undefined` for a path under an absent
        // optional parent is not an unset and must not be verified as one.
        let mut raw = spec.apply(registry, &previous)?;
        drop_no_ops(&mut raw, &previous);
        let mut patch = Verifier::new(registry, warnings).verify_patch(&raw)?;
        drop_no_ops(&mut patch, &previous);

        let mut updated = previous.clone();
        patch.apply_to(&mut updated);
        let mut updated = registry
            .schema()
            .parse_document(&updated)
            .map_err(|e| Error::document_violation(registry.name(), e.issues))?;
        if registry.has_optional_fields() {
            strip_undefined_fields(&mut updated);
        }

        Ok(Plan {
            id,
            previous,
            updated,
            patch,
        })
    }

    /// Outcome for a plan whose patch was empty (nothing written)
    pub(crate) fn unchanged(self) -> TransformOutcome {
        TransformOutcome {
            id: self.id,
            previous: self.previous,
            updated: self.updated,
            result: UpdateResult {
                matched_count: 1,
                modified_count: 0,
                acknowledged: true,
                upserted_id: None,
            },
        }
    }

    pub(crate) fn committed(self, result: UpdateResult) -> TransformOutcome {
        TransformOutcome {
            id: self.id,
            previous: self.previous,
            updated: self.updated,
            result,
        }
    }
}

fn drop_no_ops(patch: &mut SetUnsetPatch, previous: &Document) {
    patch.set.retain(|path, value| {
        DottedPath::parse(path)
            .map(|p| get_at_path(previous, &p) != Some(value))
            .unwrap_or(true)
    });
    patch.unset.retain(|path| {
        DottedPath::parse(path)
            .map(|p| get_at_path(previous, &p).is_some())
            .unwrap_or(true)
    });
}

/// Everything a transform needs from the facade
pub(crate) struct TransformContext<'a> {
    pub(crate) store: &'a dyn DocumentStore,
    pub(crate) registry: &'a CollectionRegistry,
    pub(crate) warnings: &'a WarnOnce,
}

/// Strategy selection and per-facade retry settings
pub(crate) struct TransformEngine {
    strategy: TransformStrategy,
    probe: CapabilityProbe,
    max_retries: usize,
    max_backoff_ms: u64,
}

impl TransformEngine {
    pub(crate) fn new(
        strategy: TransformStrategy,
        probe_collection: String,
        max_retries: usize,
        max_backoff_ms: u64,
    ) -> Self {
        TransformEngine {
            strategy,
            probe: CapabilityProbe::new(probe_collection),
            max_retries,
            max_backoff_ms,
        }
    }

    /// Cached probe outcome
    pub(crate) fn transaction_support(&self) -> TransactionSupport {
        self.probe.state()
    }

    /// Strategy used for commits, probing on first use when automatic
    pub(crate) async fn resolve_strategy(&self, store: &dyn DocumentStore) -> TransformStrategy {
        match self.strategy {
            TransformStrategy::Auto => match self.probe.resolve(store).await {
                TransactionSupport::Supported => TransformStrategy::Transactional,
                _ => TransformStrategy::Optimistic,
            },
            fixed => fixed,
        }
    }

    fn attempts(&self, options: &TransformOptions) -> Result<usize> {
        let attempts = options.max_retries.unwrap_or(self.max_retries);
        if attempts == 0 {
            return Err(Error::InvalidTransform(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(attempts)
    }

    /// Transform the first document matching `query`
    ///
    /// Returns `Ok(None)` when nothing matches.
    pub(crate) async fn transform_one(
        &self,
        ctx: &TransformContext<'_>,
        query: &Document,
        spec: &TransformSpec,
        options: &TransformOptions,
    ) -> Result<Option<TransformOutcome>> {
        spec.check(ctx.registry)?;
        let attempts = self.attempts(options)?;
        let filter = Verifier::new(ctx.registry, ctx.warnings).verify_query(query)?;
        let strategy = self.resolve_strategy(ctx.store).await;
        self.run(ctx, &filter, spec, strategy, attempts).await
    }

    /// Transform every document matching `query`, one at a time
    ///
    /// Identities are collected before the first write. A validation error
    /// aborts the batch; exhausted optimistic attempts are recorded in
    /// `conflicted` and the batch continues.
    pub(crate) async fn transform_many(
        &self,
        ctx: &TransformContext<'_>,
        query: &Document,
        spec: &TransformSpec,
        options: &TransformOptions,
    ) -> Result<TransformManyResult> {
        spec.check(ctx.registry)?;
        let attempts = self.attempts(options)?;
        let filter = Verifier::new(ctx.registry, ctx.warnings).verify_query(query)?;
        let strategy = self.resolve_strategy(ctx.store).await;

        let ids: Vec<DocumentId> = ctx
            .store
            .find(ctx.registry.name(), &filter, &FindOptions::new())
            .await?
            .iter()
            .filter_map(document_id)
            .collect();

        let mut summary = TransformManyResult {
            details: options.detailed.then(Vec::new),
            ..TransformManyResult::default()
        };
        for id in ids {
            let by_id = single_id_filter(id);
            match self.run(ctx, &by_id, spec, strategy, attempts).await {
                Ok(Some(outcome)) => {
                    summary.matched += 1;
                    summary.modified += outcome.result.modified_count;
                    if !outcome.result.acknowledged {
                        summary.not_acknowledged += 1;
                    }
                    if let Some(details) = summary.details.as_mut() {
                        details.push(outcome);
                    }
                }
                Ok(None) | Err(Error::DocumentVanished { .. }) => {
                    debug!(collection = %ctx.registry.name(), id = %id, "Document gone before transform");
                }
                Err(e) if e.is_conflict() => summary.conflicted.push(id),
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    async fn run(
        &self,
        ctx: &TransformContext<'_>,
        filter: &Document,
        spec: &TransformSpec,
        strategy: TransformStrategy,
        attempts: usize,
    ) -> Result<Option<TransformOutcome>> {
        match strategy {
            TransformStrategy::Transactional => transactional::run(ctx, filter, spec).await,
            TransformStrategy::Optimistic | TransformStrategy::Auto => {
                optimistic::run(ctx, filter, spec, attempts, self.max_backoff_ms).await
            }
        }
    }
}

pub(crate) fn single_id_filter(id: DocumentId) -> Document {
    let mut filter = Document::new();
    filter.insert(ID_FIELD.to_string(), Value::Id(id));
    filter
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapedb_core::doc;
    use shapedb_schema::Schema;

    fn registry() -> CollectionRegistry {
        CollectionRegistry::new(
            "posts",
            Schema::object([
                ("title", Schema::string()),
                ("tags", Schema::array(Schema::string())),
                ("views", Schema::int().default(0i64)),
                ("meta", Schema::object([("lang", Schema::string())]).optional()),
                ("point", Schema::tuple([Schema::number(), Schema::number()]).optional()),
            ]),
            vec![],
        )
        .unwrap()
    }

    fn stored() -> Document {
        doc! {
            "_id" => DocumentId::new(),
            "title" => "hello",
            "tags" => vec!["a"],
            "meta" => doc! { "lang" => "en" },
        }
    }

    fn push_tag(tag: &'static str) -> impl Fn(Value) -> Value + Send + Sync {
        move |v| {
            let mut tags = v.as_array().cloned().unwrap_or_default();
            tags.push(Value::from(tag));
            Value::Array(tags)
        }
    }

    #[test]
    fn test_check_rejects_unknown_and_overlapping_targets() {
        let reg = registry();
        let unknown = TransformSpec::new().path("titel", |v| v);
        assert!(matches!(unknown.check(&reg), Err(Error::UnknownPath { .. })));

        let overlap = TransformSpec::new().path("meta", |v| v).path("meta.lang", |v| v);
        assert!(matches!(overlap.check(&reg), Err(Error::InvalidTransform(_))));

        let mixed = TransformSpec::new().path("title", |v| v).document(|d| d);
        assert!(matches!(mixed.check(&reg), Err(Error::InvalidTransform(_))));

        assert!(matches!(TransformSpec::new().check(&reg), Err(Error::InvalidTransform(_))));
        assert!(TransformSpec::new().path("title", |v| v).path("tags", |v| v).check(&reg).is_ok());
    }

    #[test]
    fn test_plan_path_transforms_read_snapshot() {
        let reg = registry();
        let warnings = WarnOnce::new();
        let spec = TransformSpec::new()
            .path("tags", push_tag("b"))
            .path("views", |v| Value::Int(v.as_int().unwrap_or(0) + 1));
        let plan = Plan::build(&reg, &warnings, &spec, &stored()).unwrap();

        assert_eq!(plan.previous.get("views"), Some(&Value::Int(0)));
        assert_eq!(plan.patch.set.get("views"), Some(&Value::Int(1)));
        assert_eq!(
            plan.updated.get("tags"),
            Some(&Value::from(vec!["a", "b"]))
        );
        assert!(!plan.updated.contains_key("_id"));
    }

    #[test]
    fn test_plan_undefined_output_unsets() {
        let reg = registry();
        let warnings = WarnOnce::new();
        let spec = TransformSpec::new().path("meta", |_| Value::Undefined);
        let plan = Plan::build(&reg, &warnings, &spec, &stored()).unwrap();
        assert!(plan.patch.unset.contains("meta"));
        assert!(!plan.updated.contains_key("meta"));
    }

    #[test]
    fn test_plan_invalid_output_is_violation() {
        let reg = registry();
        let warnings = WarnOnce::new();
        let spec = TransformSpec::new().path("title", |_| Value::Int(3));
        let err = Plan::build(&reg, &warnings, &spec, &stored()).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation { path: Some(ref p), .. } if p == "title"));

        let remove_required = TransformSpec::new().path("title", |_| Value::Undefined);
        assert!(Plan::build(&reg, &warnings, &remove_required, &stored()).is_err());
    }

    #[test]
    fn test_plan_identity_transform_is_empty() {
        let reg = registry();
        let warnings = WarnOnce::new();
        let spec = TransformSpec::new().path("title", |v| v);
        let plan = Plan::build(&reg, &warnings, &spec, &stored()).unwrap();
        assert!(plan.patch.is_empty());
        let outcome = plan.unchanged();
        assert_eq!(outcome.result.matched_count, 1);
        assert_eq!(outcome.result.modified_count, 0);
    }

    #[test]
    fn test_plan_untouched_path_under_absent_parent_is_empty() {
        let reg = CollectionRegistry::new(
            "users",
            Schema::object([
                ("name", Schema::string()),
                ("profile", Schema::object([("city", Schema::string())]).optional()),
            ]),
            vec![],
        )
        .unwrap();
        let warnings = WarnOnce::new();
        let stored = doc! { "_id" => DocumentId::new(), "name" => "ada" };
        let spec = TransformSpec::new().path("profile.city", |v| v);
        let plan = Plan::build(&reg, &warnings, &spec, &stored).unwrap();
        assert!(plan.patch.is_empty());
        assert_eq!(plan.updated, plan.previous);
    }

    #[test]
    fn test_plan_whole_document_transform() {
        let reg = registry();
        let warnings = WarnOnce::new();
        let spec = TransformSpec::new().document(|mut d| {
            d.insert("title".to_string(), Value::from("renamed"));
            d.remove("meta");
            d
        });
        let plan = Plan::build(&reg, &warnings, &spec, &stored()).unwrap();
        assert_eq!(plan.patch.set.get("title"), Some(&Value::from("renamed")));
        assert!(plan.patch.unset.contains("meta"));
        assert!(!plan.patch.set.contains_key("tags"));
    }

    #[test]
    fn test_plan_poisoned_snapshot_fails() {
        let reg = registry();
        let warnings = WarnOnce::new();
        let poisoned = doc! { "_id" => DocumentId::new(), "title" => 5i64, "tags" => vec!["a"] };
        let spec = TransformSpec::new().path("tags", push_tag("x"));
        let err = Plan::build(&reg, &warnings, &spec, &poisoned).unwrap_err();
        assert!(matches!(err, Error::SchemaViolation { path: None, .. }));
    }

    #[test]
    fn test_plan_tuple_index_target() {
        let reg = registry();
        let warnings = WarnOnce::new();
        let mut doc = stored();
        doc.insert("point".to_string(), Value::from(vec![1.0, 2.0]));
        let spec = TransformSpec::new().path("point.1", |v| Value::Float(v.as_f64().unwrap_or(0.0) * 2.0));
        let plan = Plan::build(&reg, &warnings, &spec, &doc).unwrap();
        assert_eq!(plan.patch.set.get("point.1"), Some(&Value::Float(4.0)));
        assert_eq!(plan.updated.get("point"), Some(&Value::from(vec![1.0, 4.0])));
    }

    #[test]
    fn test_options_builder() {
        let opts = TransformOptions::new().with_max_retries(5).detailed();
        assert_eq!(opts.max_retries, Some(5));
        assert!(opts.detailed);
    }
}
