//! Structural introspection of schemas
//!
//! The path engine never matches on a concrete schema type. It walks schemas
//! through [`SchemaShape`], which exposes just enough structure to unwrap
//! wrappers and descend into containers. Adapting another schema library
//! means implementing this trait for its type.

use crate::schema::Schema;
use std::fmt;
use std::sync::Arc;

/// Structural category of a schema node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SchemaKind {
    /// Named fields
    Object,
    /// Homogeneous elements (a leaf for path purposes)
    Array,
    /// Fixed positional items
    Tuple,
    /// Alternatives (plain or discriminated)
    Union,
    /// Accepts absence
    Optional,
    /// Accepts null
    Nullable,
    /// Default or refinement wrapper; does not change storage shape
    Effects,
    /// Leaf value
    Scalar,
    /// Construct the path engine cannot represent
    Unsupported,
}

impl SchemaKind {
    /// Whether this kind wraps exactly one inner schema
    pub fn is_wrapper(self) -> bool {
        matches!(
            self,
            SchemaKind::Optional | SchemaKind::Nullable | SchemaKind::Effects
        )
    }
}

/// Introspection capability required by the path engine
pub trait SchemaShape: Clone + PartialEq + fmt::Debug {
    /// Structural category
    fn kind(&self) -> SchemaKind;

    /// Declared fields of an object (empty otherwise)
    fn fields(&self) -> &[(String, Self)];

    /// Element schema of an array
    fn element(&self) -> Option<&Self>;

    /// Positional items of a tuple (empty otherwise)
    fn items(&self) -> &[Self];

    /// Alternatives of a union (empty otherwise)
    fn branches(&self) -> &[Self];

    /// Wrapped schema of an optional/nullable/effects node
    fn inner(&self) -> Option<&Self>;

    /// The same wrapper around a different inner schema
    ///
    /// Non-wrappers return `inner` unchanged.
    fn rewrap(&self, inner: Self) -> Self;

    /// Build a flat union of alternatives
    fn union_of(branches: Vec<Self>) -> Self;

    /// Human-readable construct name for diagnostics
    fn construct_name(&self) -> &'static str;

    /// Whether absence is accepted
    fn accepts_absent(&self) -> bool;
}

impl SchemaShape for Schema {
    fn kind(&self) -> SchemaKind {
        match self {
            Schema::Object(_) => SchemaKind::Object,
            Schema::Array(_) => SchemaKind::Array,
            Schema::Tuple(_) => SchemaKind::Tuple,
            Schema::Union(_) | Schema::DiscriminatedUnion(_) => SchemaKind::Union,
            Schema::Optional(_) => SchemaKind::Optional,
            Schema::Nullable(_) => SchemaKind::Nullable,
            Schema::Default(_) | Schema::Refine(_) => SchemaKind::Effects,
            Schema::String
            | Schema::Number
            | Schema::Int
            | Schema::Boolean
            | Schema::Date
            | Schema::Id
            | Schema::Any
            | Schema::Literal(_)
            | Schema::Enum(_) => SchemaKind::Scalar,
            Schema::Map(_)
            | Schema::Set(_)
            | Schema::Intersection(_)
            | Schema::Function
            | Schema::Void
            | Schema::BigInt => SchemaKind::Unsupported,
        }
    }

    fn fields(&self) -> &[(String, Self)] {
        match self {
            Schema::Object(obj) => obj.fields.as_slice(),
            _ => &[],
        }
    }

    fn element(&self) -> Option<&Self> {
        match self {
            Schema::Array(element) => Some(element.as_ref()),
            _ => None,
        }
    }

    fn items(&self) -> &[Self] {
        match self {
            Schema::Tuple(items) => items.as_slice(),
            _ => &[],
        }
    }

    fn branches(&self) -> &[Self] {
        match self {
            Schema::Union(branches) => branches.as_slice(),
            Schema::DiscriminatedUnion(du) => du.branches.as_slice(),
            _ => &[],
        }
    }

    fn inner(&self) -> Option<&Self> {
        match self {
            Schema::Optional(inner) | Schema::Nullable(inner) => Some(inner.as_ref()),
            Schema::Default(d) => Some(&d.inner),
            Schema::Refine(r) => Some(&r.inner),
            _ => None,
        }
    }

    fn rewrap(&self, inner: Self) -> Self {
        match self {
            Schema::Optional(_) => Schema::Optional(Arc::new(inner)),
            Schema::Nullable(_) => Schema::Nullable(Arc::new(inner)),
            Schema::Default(d) => inner.default(d.value.clone()),
            Schema::Refine(r) => {
                let mut refined = (**r).clone();
                refined.inner = inner;
                Schema::Refine(Arc::new(refined))
            }
            _ => inner,
        }
    }

    fn union_of(branches: Vec<Self>) -> Self {
        let mut flat = Vec::with_capacity(branches.len());
        for branch in branches {
            match branch {
                Schema::Union(nested) => flat.extend(nested.iter().cloned()),
                other => flat.push(other),
            }
        }
        Schema::Union(Arc::new(flat))
    }

    fn construct_name(&self) -> &'static str {
        match self {
            Schema::String => "string",
            Schema::Number => "number",
            Schema::Int => "int",
            Schema::Boolean => "boolean",
            Schema::Date => "date",
            Schema::Id => "id",
            Schema::Any => "any",
            Schema::Literal(_) => "literal",
            Schema::Enum(_) => "enum",
            Schema::Object(_) => "object",
            Schema::Array(_) => "array",
            Schema::Tuple(_) => "tuple",
            Schema::Union(_) => "union",
            Schema::DiscriminatedUnion(_) => "discriminated union",
            Schema::Optional(_) => "optional",
            Schema::Nullable(_) => "nullable",
            Schema::Default(_) => "default",
            Schema::Refine(_) => "refinement",
            Schema::Map(_) => "map",
            Schema::Set(_) => "set",
            Schema::Intersection(_) => "intersection",
            Schema::Function => "function",
            Schema::Void => "void",
            Schema::BigInt => "bigint",
        }
    }

    fn accepts_absent(&self) -> bool {
        Schema::accepts_absent(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapedb_core::Value;

    #[test]
    fn test_kinds() {
        assert_eq!(Schema::string().kind(), SchemaKind::Scalar);
        assert_eq!(Schema::string().optional().kind(), SchemaKind::Optional);
        assert_eq!(Schema::string().default("x").kind(), SchemaKind::Effects);
        assert_eq!(
            Schema::discriminated_union("k", Vec::<Schema>::new()).kind(),
            SchemaKind::Union
        );
        assert_eq!(Schema::map(Schema::int()).kind(), SchemaKind::Unsupported);
    }

    #[test]
    fn test_union_of_flattens_nested_unions() {
        let u = Schema::union_of(vec![
            Schema::union([Schema::int(), Schema::string()]),
            Schema::boolean(),
        ]);
        assert_eq!(u.branches().len(), 3);
        assert!(u.branches().iter().all(|b| b.kind() == SchemaKind::Scalar));
    }

    #[test]
    fn test_rewrap_preserves_wrapper() {
        let opt = Schema::string().optional();
        let rewrapped = opt.rewrap(Schema::int());
        assert_eq!(rewrapped, Schema::int().optional());
        assert!(rewrapped.accepts_absent());

        let defaulted = Schema::int().default(1i64);
        let rewrapped = defaulted.rewrap(Schema::number());
        assert_eq!(rewrapped.parse(&Value::Undefined).unwrap(), Value::Int(1));

        assert_eq!(Schema::string().rewrap(Schema::int()), Schema::int());
    }

    #[test]
    fn test_accessors() {
        let obj = Schema::object([("a", Schema::int())]);
        assert_eq!(obj.fields().len(), 1);
        assert!(obj.items().is_empty());
        let arr = Schema::array(Schema::int());
        assert_eq!(arr.element(), Some(&Schema::Int));
        let tup = Schema::tuple([Schema::int(), Schema::int()]);
        assert_eq!(tup.items().len(), 2);
        assert_eq!(Schema::int().optional().inner(), Some(&Schema::Int));
    }
}
