//! Set/unset patches and path-addressed document helpers
//!
//! A [`SetUnsetPatch`] expresses a partial update as "assign these paths"
//! plus "remove these paths", since the storage update language has no
//! single assign-or-remove operator. A path never appears in both halves.
//!
//! The helpers here apply patches with the same semantics the storage layer
//! uses, so the engine can compute the post-update document before commit:
//! - `set` creates intermediate objects as needed; an index segment on an
//!   array pads with `Null`
//! - `unset` removes an object field; on an array position it stores `Null`

use crate::path::{DottedPath, PathSegment};
use crate::types::Document;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};

/// The result of splitting a sparse update object
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetUnsetPatch {
    /// Dotted path → value to assign
    pub set: BTreeMap<String, Value>,
    /// Dotted paths to remove
    pub unset: BTreeSet<String>,
}

impl SetUnsetPatch {
    /// Create an empty patch
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the patch contains no operations
    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// All paths touched by the patch
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.set
            .keys()
            .map(String::as_str)
            .chain(self.unset.iter().map(String::as_str))
    }

    /// Apply to a document in place
    ///
    /// Paths that fail to parse are skipped; patches built by the engine only
    /// contain validated paths.
    pub fn apply_to(&self, doc: &mut Document) {
        for (path, value) in &self.set {
            if let Ok(p) = DottedPath::parse(path) {
                set_at_path(doc, &p, value.clone());
            }
        }
        for path in &self.unset {
            if let Ok(p) = DottedPath::parse(path) {
                remove_at_path(doc, &p);
            }
        }
    }
}

/// Get a reference to the value at a dotted path
///
/// Returns `None` if any segment is missing. The root path is not
/// addressable through a [`Document`]; use the document itself.
pub fn get_at_path<'a>(doc: &'a Document, path: &DottedPath) -> Option<&'a Value> {
    let (first, rest) = path.segments().split_first()?;
    let mut current = doc.get(&segment_key(first))?;
    for seg in rest {
        current = match (current, seg) {
            (Value::Object(obj), seg) => obj.get(&segment_key(seg))?,
            (Value::Array(items), PathSegment::Index(i)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Assign a value at a dotted path, creating intermediate objects
pub fn set_at_path(doc: &mut Document, path: &DottedPath, value: Value) {
    let Some((first, rest)) = path.segments().split_first() else {
        return;
    };
    let key = segment_key(first);
    if rest.is_empty() {
        doc.insert(key, value);
        return;
    }
    let slot = doc.entry(key).or_insert(Value::Undefined);
    set_in_value(slot, rest, value);
}

fn set_in_value(target: &mut Value, segments: &[PathSegment], value: Value) {
    let Some((seg, rest)) = segments.split_first() else {
        *target = value;
        return;
    };
    match (target, seg) {
        (Value::Array(items), PathSegment::Index(i)) => {
            if items.len() <= *i {
                items.resize(*i + 1, Value::Null);
            }
            set_in_value(&mut items[*i], rest, value);
        }
        (Value::Object(obj), seg) => {
            let slot = obj.entry(segment_key(seg)).or_insert(Value::Undefined);
            set_in_value(slot, rest, value);
        }
        (other, seg) => {
            let mut obj = Document::new();
            let mut slot = Value::Undefined;
            set_in_value(&mut slot, rest, value);
            obj.insert(segment_key(seg), slot);
            *other = Value::Object(obj);
        }
    }
}

/// Remove the value at a dotted path
///
/// Returns the removed value. Array positions are nulled rather than
/// removed, matching storage semantics.
pub fn remove_at_path(doc: &mut Document, path: &DottedPath) -> Option<Value> {
    let (last, parents) = path.segments().split_last()?;
    if parents.is_empty() {
        return doc.remove(&segment_key(last));
    }
    let (first, middle) = parents.split_first()?;
    let mut current = doc.get_mut(&segment_key(first))?;
    for seg in middle {
        current = match (current, seg) {
            (Value::Object(obj), seg) => obj.get_mut(&segment_key(seg))?,
            (Value::Array(items), PathSegment::Index(i)) => items.get_mut(*i)?,
            _ => return None,
        };
    }
    match (current, last) {
        (Value::Object(obj), seg) => obj.remove(&segment_key(seg)),
        (Value::Array(items), PathSegment::Index(i)) => {
            items.get_mut(*i).map(|slot| std::mem::replace(slot, Value::Null))
        }
        _ => None,
    }
}

/// Recursively remove explicit `Undefined` values
///
/// Object fields holding `Undefined` are dropped. Inside arrays, `Undefined`
/// elements become `Null` so positions are preserved.
pub fn strip_undefined(value: &mut Value) {
    match value {
        Value::Object(obj) => strip_undefined_fields(obj),
        Value::Array(items) => {
            for item in items.iter_mut() {
                if item.is_undefined() {
                    *item = Value::Null;
                } else {
                    strip_undefined(item);
                }
            }
        }
        _ => {}
    }
}

/// [`strip_undefined`] for a whole document
pub fn strip_undefined_fields(doc: &mut Document) {
    doc.retain(|_, v| !v.is_undefined());
    for v in doc.values_mut() {
        strip_undefined(v);
    }
}

fn segment_key(seg: &PathSegment) -> String {
    match seg {
        PathSegment::Key(k) => k.clone(),
        PathSegment::Index(i) => i.to_string(),
    }
}
