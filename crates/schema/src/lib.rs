//! Schema capability for shapedb
//!
//! Collection documents are described by composable [`Schema`] values:
//! scalars, objects, arrays, tuples, unions, and the optional / nullable /
//! default / refinement wrappers. This crate provides:
//! - Builders for schema trees
//! - `parse` / `safe_parse` validation with per-path issues
//! - [`SchemaShape`]: the structural introspection the path engine walks

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod schema;
pub mod shape;
pub mod validate;

pub use schema::{DefaultSchema, DiscriminatedUnion, ObjectSchema, Refinement, RefinementFn, Schema};
pub use shape::{SchemaKind, SchemaShape};
pub use validate::{ParseError, ParseResult};
