//! Schema flattening
//!
//! Depth-first walk over a schema with an explicit stack, so pathological
//! nesting depth cannot exhaust the call stack. Results are collected in a
//! local accumulator and returned once the stack is empty.
//!
//! Wrappers (optional, nullable, defaults, refinements) are looked through
//! to decide how to descend, but the wrapped schema is what gets stored, so
//! validators still see optionality. Union branches are pushed at the
//! union's own path with the union's wrapper chain re-applied to each.

use super::PathMap;
use shapedb_core::{DottedPath, Error, Result};
use shapedb_schema::{SchemaKind, SchemaShape};

struct Frame<S> {
    schema: S,
    path: String,
    /// False for array element schemas: checked for support, never stored
    record: bool,
}

/// Build the path map for a schema
///
/// # Errors
///
/// `Error::UnsupportedSchemaConstruct` if any reachable node (including
/// array elements) is a construct the engine cannot represent.
pub fn flatten<S: SchemaShape>(root: &S) -> Result<PathMap<S>> {
    let mut map = PathMap::default();
    let mut stack = vec![Frame {
        schema: root.clone(),
        path: String::new(),
        record: true,
    }];

    while let Some(frame) = stack.pop() {
        let (core, wrappers) = unwrap(&frame.schema);

        match core.kind() {
            SchemaKind::Union => {
                if frame.record && !frame.path.is_empty() {
                    map.native_unions.insert(frame.path.clone());
                }
                for branch in core.branches().iter().rev() {
                    stack.push(Frame {
                        schema: rewrap(&wrappers, branch.clone()),
                        path: frame.path.clone(),
                        record: frame.record,
                    });
                }
                continue;
            }
            SchemaKind::Unsupported => {
                return Err(Error::UnsupportedSchemaConstruct {
                    path: frame.path,
                    construct: core.construct_name().to_string(),
                });
            }
            _ => {}
        }

        if frame.record && !frame.path.is_empty() {
            record(&mut map, &frame.path, frame.schema.clone());
        }

        match core.kind() {
            SchemaKind::Object => {
                for (key, child) in core.fields().iter().rev() {
                    stack.push(Frame {
                        schema: child.clone(),
                        path: DottedPath::join(&frame.path, key),
                        record: frame.record,
                    });
                }
            }
            SchemaKind::Tuple => {
                for (index, item) in core.items().iter().enumerate().rev() {
                    stack.push(Frame {
                        schema: item.clone(),
                        path: DottedPath::join(&frame.path, &index.to_string()),
                        record: frame.record,
                    });
                }
            }
            SchemaKind::Array => {
                if let Some(element) = core.element() {
                    stack.push(Frame {
                        schema: element.clone(),
                        path: DottedPath::join(&frame.path, "$"),
                        record: false,
                    });
                }
            }
            _ => {}
        }
    }

    Ok(map)
}

/// Strip wrappers; returns the structural core and the wrappers, outermost first
fn unwrap<S: SchemaShape>(schema: &S) -> (&S, Vec<&S>) {
    let mut wrappers = Vec::new();
    let mut current = schema;
    while current.kind().is_wrapper() {
        match current.inner() {
            Some(inner) => {
                wrappers.push(current);
                current = inner;
            }
            None => break,
        }
    }
    (current, wrappers)
}

fn rewrap<S: SchemaShape>(wrappers: &[&S], inner: S) -> S {
    wrappers
        .iter()
        .rev()
        .fold(inner, |acc, wrapper| wrapper.rewrap(acc))
}

/// Store a schema at a path, merging with any existing entry
///
/// Merges always produce one flat union; identical alternatives are kept once.
fn record<S: SchemaShape>(map: &mut PathMap<S>, path: &str, schema: S) {
    let Some(existing) = map.entries.get_mut(path) else {
        map.entries.insert(path.to_string(), schema);
        return;
    };
    if *existing == schema {
        return;
    }
    let mut branches = if existing.kind() == SchemaKind::Union {
        existing.branches().to_vec()
    } else {
        vec![existing.clone()]
    };
    if branches.contains(&schema) {
        return;
    }
    branches.push(schema);
    *existing = S::union_of(branches);
}
