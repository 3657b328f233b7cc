//! Schema descriptors and builders
//!
//! A [`Schema`] is an immutable, cheaply clonable type descriptor. Composite
//! nodes share their children through `Arc`, so cloning a schema (which the
//! path engine does for every flattened path) never deep-copies the tree.
//!
//! # Examples
//!
//! ```
//! use shapedb_schema::Schema;
//!
//! let user = Schema::object([
//!     ("name", Schema::string()),
//!     ("age", Schema::int().optional()),
//!     ("tags", Schema::array(Schema::string()).default(Vec::<String>::new())),
//!     ("point", Schema::tuple([Schema::number(), Schema::number()]).nullable()),
//! ]);
//! assert!(user.is_object());
//! ```

use shapedb_core::Value;
use std::fmt;
use std::sync::Arc;

/// Predicate used by [`Schema::refine`]
pub type RefinementFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Object schema: ordered named fields
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    pub(crate) fields: Vec<(String, Schema)>,
    pub(crate) strict: bool,
}

impl ObjectSchema {
    /// Declared fields, in declaration order
    pub fn fields(&self) -> &[(String, Schema)] {
        &self.fields
    }

    /// Look up a declared field
    pub fn field(&self, name: &str) -> Option<&Schema> {
        self.fields.iter().find(|(k, _)| k == name).map(|(_, s)| s)
    }

    /// Whether unknown keys are rejected (otherwise they are stripped)
    pub fn is_strict(&self) -> bool {
        self.strict
    }
}

/// Union whose branch is selected by a literal-valued tag field
#[derive(Debug, Clone, PartialEq)]
pub struct DiscriminatedUnion {
    pub(crate) discriminator: String,
    pub(crate) branches: Vec<Schema>,
}

impl DiscriminatedUnion {
    /// Name of the tag field
    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    /// Alternative branches
    pub fn branches(&self) -> &[Schema] {
        &self.branches
    }
}

/// Wrapper that substitutes a value when the input is absent
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultSchema {
    pub(crate) inner: Schema,
    pub(crate) value: Value,
}

/// Wrapper that adds a custom check after the inner schema succeeds
#[derive(Clone)]
pub struct Refinement {
    pub(crate) inner: Schema,
    pub(crate) message: String,
    pub(crate) check: RefinementFn,
}

impl fmt::Debug for Refinement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refinement")
            .field("inner", &self.inner)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

// Predicates compare by identity: two refinements are the same only if they
// share the same closure allocation.
impl PartialEq for Refinement {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.check, &other.check)
            && self.message == other.message
            && self.inner == other.inner
    }
}

/// A composable document type descriptor
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    /// UTF-8 string
    String,
    /// Int or Float
    Number,
    /// Int only
    Int,
    /// Boolean
    Boolean,
    /// UTC timestamp
    Date,
    /// Storage identity
    Id,
    /// Anything, including absence
    Any,
    /// Exactly this value
    Literal(Value),
    /// One of a fixed set of strings
    Enum(Arc<Vec<String>>),
    /// Object with named fields
    Object(Arc<ObjectSchema>),
    /// Homogeneous array
    Array(Arc<Schema>),
    /// Fixed-arity positional array
    Tuple(Arc<Vec<Schema>>),
    /// First matching alternative
    Union(Arc<Vec<Schema>>),
    /// Alternative selected by tag field
    DiscriminatedUnion(Arc<DiscriminatedUnion>),
    /// Accepts absence
    Optional(Arc<Schema>),
    /// Accepts null
    Nullable(Arc<Schema>),
    /// Substitutes a value for absence
    Default(Arc<DefaultSchema>),
    /// Custom check after the inner schema
    Refine(Arc<Refinement>),
    /// String-keyed map with homogeneous values
    Map(Arc<Schema>),
    /// Array of unique values
    Set(Arc<Schema>),
    /// Value must satisfy both schemas
    Intersection(Arc<(Schema, Schema)>),
    /// Callable (never satisfied by stored data)
    Function,
    /// Only absence
    Void,
    /// Arbitrary-precision integer
    BigInt,
}

impl Schema {
    /// String schema
    pub fn string() -> Self {
        Schema::String
    }

    /// Number schema (Int or Float)
    pub fn number() -> Self {
        Schema::Number
    }

    /// Integer schema
    pub fn int() -> Self {
        Schema::Int
    }

    /// Boolean schema
    pub fn boolean() -> Self {
        Schema::Boolean
    }

    /// Date schema
    pub fn date() -> Self {
        Schema::Date
    }

    /// Identity schema
    pub fn id() -> Self {
        Schema::Id
    }

    /// Accept-anything schema
    pub fn any() -> Self {
        Schema::Any
    }

    /// Literal schema
    pub fn literal(value: impl Into<Value>) -> Self {
        Schema::Literal(value.into())
    }

    /// String enum schema
    pub fn enumeration<I, S>(options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Schema::Enum(Arc::new(options.into_iter().map(Into::into).collect()))
    }

    /// Object schema; unknown keys are stripped on parse
    pub fn object<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Schema)>,
        K: Into<String>,
    {
        Schema::Object(Arc::new(ObjectSchema {
            fields: fields.into_iter().map(|(k, s)| (k.into(), s)).collect(),
            strict: false,
        }))
    }

    /// Array schema
    pub fn array(element: Schema) -> Self {
        Schema::Array(Arc::new(element))
    }

    /// Tuple schema
    pub fn tuple(items: impl IntoIterator<Item = Schema>) -> Self {
        Schema::Tuple(Arc::new(items.into_iter().collect()))
    }

    /// Union schema
    pub fn union(branches: impl IntoIterator<Item = Schema>) -> Self {
        Schema::Union(Arc::new(branches.into_iter().collect()))
    }

    /// Discriminated union schema; each branch should be an object whose
    /// `discriminator` field is a literal
    pub fn discriminated_union(
        discriminator: impl Into<String>,
        branches: impl IntoIterator<Item = Schema>,
    ) -> Self {
        Schema::DiscriminatedUnion(Arc::new(DiscriminatedUnion {
            discriminator: discriminator.into(),
            branches: branches.into_iter().collect(),
        }))
    }

    /// Map schema
    pub fn map(values: Schema) -> Self {
        Schema::Map(Arc::new(values))
    }

    /// Set schema
    pub fn set(element: Schema) -> Self {
        Schema::Set(Arc::new(element))
    }

    /// Intersection schema
    pub fn intersection(left: Schema, right: Schema) -> Self {
        Schema::Intersection(Arc::new((left, right)))
    }

    /// Function schema
    pub fn function() -> Self {
        Schema::Function
    }

    /// Void schema
    pub fn void() -> Self {
        Schema::Void
    }

    /// BigInt schema
    pub fn bigint() -> Self {
        Schema::BigInt
    }

    /// Wrap to accept absence
    pub fn optional(self) -> Self {
        Schema::Optional(Arc::new(self))
    }

    /// Wrap to accept null
    pub fn nullable(self) -> Self {
        Schema::Nullable(Arc::new(self))
    }

    /// Wrap to substitute `value` for absence
    pub fn default(self, value: impl Into<Value>) -> Self {
        Schema::Default(Arc::new(DefaultSchema {
            inner: self,
            value: value.into(),
        }))
    }

    /// Wrap with a custom check
    pub fn refine<F>(self, message: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Schema::Refine(Arc::new(Refinement {
            inner: self,
            message: message.into(),
            check: Arc::new(check),
        }))
    }

    /// Reject unknown keys instead of stripping them (objects only)
    pub fn strict(self) -> Self {
        match self {
            Schema::Object(obj) => Schema::Object(Arc::new(ObjectSchema {
                fields: obj.fields.clone(),
                strict: true,
            })),
            other => other,
        }
    }

    /// Whether this is an object schema (without unwrapping)
    pub fn is_object(&self) -> bool {
        matches!(self, Schema::Object(_))
    }

    /// Object descriptor, if this is an object schema
    pub fn as_object(&self) -> Option<&ObjectSchema> {
        match self {
            Schema::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Return a copy of this object schema with one more field
    ///
    /// Returns `None` if this is not an object schema.
    pub fn with_field(&self, name: impl Into<String>, schema: Schema) -> Option<Schema> {
        let obj = self.as_object()?;
        let mut fields = obj.fields.clone();
        fields.push((name.into(), schema));
        Some(Schema::Object(Arc::new(ObjectSchema {
            fields,
            strict: obj.strict,
        })))
    }

    /// Strip optional/nullable/default/refinement wrappers
    pub fn unwrapped(&self) -> &Schema {
        let mut current = self;
        loop {
            current = match current {
                Schema::Optional(inner) | Schema::Nullable(inner) => inner.as_ref(),
                Schema::Default(d) => &d.inner,
                Schema::Refine(r) => &r.inner,
                other => return other,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_children() {
        let s = Schema::object([("a", Schema::string())]);
        let c = s.clone();
        match (&s, &c) {
            (Schema::Object(a), Schema::Object(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_unwrapped_strips_all_wrappers() {
        let s = Schema::string()
            .refine("non-empty", |v| v.as_str().is_some_and(|s| !s.is_empty()))
            .nullable()
            .default("x")
            .optional();
        assert_eq!(s.unwrapped(), &Schema::String);
    }

    #[test]
    fn test_refinement_equality_is_identity() {
        let a = Schema::int().refine("positive", |v| v.as_int().is_some_and(|i| i > 0));
        let b = Schema::int().refine("positive", |v| v.as_int().is_some_and(|i| i > 0));
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_with_field() {
        let s = Schema::object([("a", Schema::string())]);
        let extended = s.with_field("_id", Schema::id()).unwrap();
        assert!(extended.as_object().unwrap().field("_id").is_some());
        assert!(s.as_object().unwrap().field("_id").is_none());
        assert!(Schema::string().with_field("x", Schema::id()).is_none());
    }

    #[test]
    fn test_strict_only_affects_objects() {
        assert!(Schema::object([("a", Schema::string())]).strict().as_object().unwrap().is_strict());
        assert_eq!(Schema::string().strict(), Schema::String);
    }
}
