//! Set/unset splitting
//!
//! Storage cannot persist "undefined", so a sparse update whose leaves may
//! be `Value::Undefined` ("remove this field") is split into a set map and
//! an unset set keyed by dotted path.
//!
//! Only plain nested objects are descended. Arrays and dates are atomic
//! leaves: an `Undefined` inside an array cannot become an unset, because
//! storage has no sparse removal at an array position. The top-level
//! identity field is never included; callers decide how to report it.

use shapedb_core::{Document, DottedPath, SetUnsetPatch, Value, ID_FIELD};

/// Split a sparse update object
pub fn split(update: &Document) -> SetUnsetPatch {
    let mut patch = SetUnsetPatch::new();
    split_into("", update, &mut patch);
    patch
}

/// Whether the update names the identity field at the top level
pub fn touches_identity(update: &Document) -> bool {
    update.contains_key(ID_FIELD)
}

/// Split already-addressed assignments without descending into values
///
/// Each value replaces whatever is stored at its path; `Undefined` removes
/// it. Transform outputs use this, since a transform returns the complete
/// new value for its path.
pub fn split_assignments<I>(assignments: I) -> SetUnsetPatch
where
    I: IntoIterator<Item = (String, Value)>,
{
    let mut patch = SetUnsetPatch::new();
    for (path, value) in assignments {
        if value.is_undefined() {
            patch.unset.insert(path);
        } else {
            patch.set.insert(path, value);
        }
    }
    patch
}

/// Returns whether anything was written to `patch`
fn split_into(prefix: &str, object: &Document, patch: &mut SetUnsetPatch) -> bool {
    let mut wrote = false;
    for (key, value) in object {
        if prefix.is_empty() && key == ID_FIELD {
            continue;
        }
        let path = DottedPath::join(prefix, key);
        match value {
            Value::Undefined => {
                patch.unset.insert(path);
            }
            Value::Object(child) if has_meaningful_key(child) => {
                if !split_into(&path, child, patch) {
                    patch.set.insert(path, value.clone());
                }
            }
            other => {
                patch.set.insert(path, other.clone());
            }
        }
        wrote = true;
    }
    wrote
}

fn has_meaningful_key(object: &Document) -> bool {
    object.values().any(|v| !v.is_undefined())
}
