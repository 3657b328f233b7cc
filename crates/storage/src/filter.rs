//! Filter evaluation for the in-memory store
//!
//! Filters are documents keyed by dotted path. A path resolves against a
//! document with array fan-out: `tags.name` visits the `name` field of
//! every object in `tags`, and a numeric segment addresses one position.
//!
//! | Form | Matches when |
//! |------|--------------|
//! | `{path: v}` | a resolved value equals `v`, or is an array containing `v` |
//! | `{path: null}` | the path is missing or resolves to null |
//! | `{path: {$eq/$ne: v}}` | equality / its negation |
//! | `{path: {$gt/$gte/$lt/$lte: v}}` | an ordered comparison holds |
//! | `{path: {$in/$nin: [..]}}` | equality with any / none of the options |
//! | `{path: {$exists: bool}}` | the path resolves / does not resolve |
//! | `{$and/$or/$nor: [filter, ..]}` | all / any / none of the sub-filters match |
//!
//! Numbers compare across integer and float representations.

use shapedb_core::{set_at_path, Document, DottedPath, StorageError, StorageResult, Value};
use std::cmp::Ordering;

/// Evaluate a filter against a document
///
/// # Errors
///
/// Returns `StorageError::Malformed` for unknown operators or operator
/// arguments of the wrong shape.
pub fn matches(doc: &Document, filter: &Document) -> StorageResult<bool> {
    for (key, condition) in filter {
        let ok = match key.as_str() {
            "$and" => {
                let mut all = true;
                for sub in sub_filters(key, condition)? {
                    if !matches(doc, sub)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            "$or" => {
                let mut any = false;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        any = true;
                        break;
                    }
                }
                any
            }
            "$nor" => {
                let mut none = true;
                for sub in sub_filters(key, condition)? {
                    if matches(doc, sub)? {
                        none = false;
                        break;
                    }
                }
                none
            }
            op if op.starts_with('$') => {
                return Err(StorageError::Malformed(format!(
                    "unknown top-level operator '{}'",
                    op
                )))
            }
            path => {
                let resolved = resolve(doc, path);
                match operator_document(condition) {
                    Some(ops) => {
                        let mut all = true;
                        for (op, arg) in ops {
                            if !evaluate_operator(&resolved, op, arg)? {
                                all = false;
                                break;
                            }
                        }
                        all
                    }
                    None => equals_any(&resolved, condition),
                }
            }
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Build the base document for an upsert from a filter's equality conditions
///
/// Plain `{path: v}` and `{path: {$eq: v}}` entries (including those nested
/// under `$and`) are assigned; every other condition is ignored.
pub fn upsert_seed(filter: &Document) -> Document {
    let mut seed = Document::new();
    collect_seed(filter, &mut seed);
    seed
}

fn collect_seed(filter: &Document, seed: &mut Document) {
    for (key, condition) in filter {
        if key == "$and" {
            if let Some(items) = condition.as_array() {
                for item in items {
                    if let Some(sub) = item.as_object() {
                        collect_seed(sub, seed);
                    }
                }
            }
            continue;
        }
        if key.starts_with('$') {
            continue;
        }
        let value = match operator_document(condition) {
            Some(ops) => match ops.get("$eq") {
                Some(v) => v.clone(),
                None => continue,
            },
            None => condition.clone(),
        };
        if let Ok(path) = DottedPath::parse(key) {
            set_at_path(seed, &path, value);
        }
    }
}

/// Values reachable at a dotted path, with array fan-out
pub fn resolve<'a>(doc: &'a Document, path: &str) -> Vec<&'a Value> {
    let segments: Vec<&str> = path.split('.').collect();
    let mut out = Vec::new();
    if let Some((first, rest)) = segments.split_first() {
        if let Some(value) = doc.get(*first) {
            collect(value, rest, &mut out);
        }
    }
    out
}

fn collect<'a>(current: &'a Value, rest: &[&str], out: &mut Vec<&'a Value>) {
    let Some((segment, tail)) = rest.split_first() else {
        out.push(current);
        return;
    };
    match current {
        Value::Object(obj) => {
            if let Some(next) = obj.get(*segment) {
                collect(next, tail, out);
            }
        }
        Value::Array(items) => {
            if let Ok(idx) = segment.parse::<usize>() {
                if let Some(next) = items.get(idx) {
                    collect(next, tail, out);
                }
            }
            for item in items {
                if item.is_object() {
                    collect(item, rest, out);
                }
            }
        }
        _ => {}
    }
}

fn sub_filters<'a>(op: &str, condition: &'a Value) -> StorageResult<Vec<&'a Document>> {
    let items = condition
        .as_array()
        .ok_or_else(|| StorageError::Malformed(format!("{} expects an array", op)))?;
    items
        .iter()
        .map(|item| {
            item.as_object()
                .ok_or_else(|| StorageError::Malformed(format!("{} expects filter documents", op)))
        })
        .collect()
}

fn operator_document(condition: &Value) -> Option<&Document> {
    match condition {
        Value::Object(obj) if !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')) => Some(obj),
        _ => None,
    }
}

fn evaluate_operator(resolved: &[&Value], op: &str, arg: &Value) -> StorageResult<bool> {
    let result = match op {
        "$eq" => equals_any(resolved, arg),
        "$ne" => !equals_any(resolved, arg),
        "$gt" => compares_any(resolved, arg, |o| o == Ordering::Greater),
        "$gte" => compares_any(resolved, arg, |o| o != Ordering::Less),
        "$lt" => compares_any(resolved, arg, |o| o == Ordering::Less),
        "$lte" => compares_any(resolved, arg, |o| o != Ordering::Greater),
        "$in" => in_options(resolved, op, arg)?,
        "$nin" => !in_options(resolved, op, arg)?,
        "$exists" => {
            let wanted = arg
                .as_bool()
                .ok_or_else(|| StorageError::Malformed("$exists expects a boolean".to_string()))?;
            resolved.is_empty() != wanted
        }
        other => {
            return Err(StorageError::Malformed(format!(
                "unknown operator '{}'",
                other
            )))
        }
    };
    Ok(result)
}

fn in_options(resolved: &[&Value], op: &str, arg: &Value) -> StorageResult<bool> {
    let options = arg
        .as_array()
        .ok_or_else(|| StorageError::Malformed(format!("{} expects an array", op)))?;
    Ok(options.iter().any(|option| equals_any(resolved, option)))
}

fn equals_any(resolved: &[&Value], expected: &Value) -> bool {
    if expected.is_null() && resolved.is_empty() {
        return true;
    }
    resolved.iter().any(|candidate| {
        values_equal(candidate, expected)
            || candidate
                .as_array()
                .is_some_and(|items| items.iter().any(|item| values_equal(item, expected)))
    })
}

fn compares_any(resolved: &[&Value], bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    resolved.iter().any(|candidate| {
        let direct = candidate.compare(bound).is_some_and(&accept);
        direct
            || candidate.as_array().is_some_and(|items| {
                items
                    .iter()
                    .any(|item| item.compare(bound).is_some_and(&accept))
            })
    })
}

/// Equality used by filters and unique indexes
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_number() && b.is_number() {
        return a.compare(b) == Some(Ordering::Equal);
    }
    match (a, b) {
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y)
                    .all(|((lk, lv), (rk, rv))| lk == rk && values_equal(lv, rv))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapedb_core::doc;

    fn sample() -> Document {
        doc! {
            "name" => "alice",
            "age" => 30i64,
            "tags" => vec!["a", "b"],
            "address" => doc! { "city" => "paris" },
            "items" => vec![
                Value::Object(doc! { "sku" => "x", "qty" => 1i64 }),
                Value::Object(doc! { "sku" => "y", "qty" => 5i64 }),
            ],
        }
    }

    fn check(filter: Document) -> bool {
        matches(&sample(), &filter).unwrap()
    }

    #[test]
    fn test_equality_and_nested_paths() {
        assert!(check(doc! { "name" => "alice" }));
        assert!(!check(doc! { "name" => "bob" }));
        assert!(check(doc! { "address.city" => "paris" }));
        assert!(check(doc! { "age" => 30.0 }));
    }

    #[test]
    fn test_array_contains_and_fan_out() {
        assert!(check(doc! { "tags" => "b" }));
        assert!(check(doc! { "items.sku" => "y" }));
        assert!(check(doc! { "items.1.qty" => 5i64 }));
        assert!(!check(doc! { "items.0.qty" => 5i64 }));
    }

    #[test]
    fn test_null_matches_missing() {
        assert!(check(doc! { "missing" => Value::Null }));
        assert!(!check(doc! { "name" => Value::Null }));
    }

    #[test]
    fn test_comparison_operators() {
        assert!(check(doc! { "age" => doc! { "$gt" => 18i64, "$lte" => 30i64 } }));
        assert!(!check(doc! { "age" => doc! { "$lt" => 30i64 } }));
        assert!(check(doc! { "items.qty" => doc! { "$gte" => 5i64 } }));
    }

    #[test]
    fn test_set_membership_and_existence() {
        assert!(check(doc! { "name" => doc! { "$in" => vec!["bob", "alice"] } }));
        assert!(check(doc! { "name" => doc! { "$nin" => vec!["bob"] } }));
        assert!(check(doc! { "address" => doc! { "$exists" => true } }));
        assert!(check(doc! { "nickname" => doc! { "$exists" => false } }));
        assert!(check(doc! { "name" => doc! { "$ne" => "bob" } }));
    }

    #[test]
    fn test_logical_operators() {
        let or = doc! { "$or" => vec![
            Value::Object(doc! { "name" => "bob" }),
            Value::Object(doc! { "age" => 30i64 }),
        ] };
        assert!(check(or));
        let and = doc! { "$and" => vec![
            Value::Object(doc! { "name" => "alice" }),
            Value::Object(doc! { "age" => 31i64 }),
        ] };
        assert!(!check(and));
        let nor = doc! { "$nor" => vec![Value::Object(doc! { "name" => "bob" })] };
        assert!(check(nor));
    }

    #[test]
    fn test_unknown_operator_is_malformed() {
        let err = matches(&sample(), &doc! { "age" => doc! { "$regex" => "x" } }).unwrap_err();
        assert!(matches!(err, StorageError::Malformed(_)));
        assert!(matches(&sample(), &doc! { "$where" => "1" }).is_err());
    }

    #[test]
    fn test_object_equality_is_literal() {
        assert!(check(doc! { "address" => doc! { "city" => "paris" } }));
        assert!(!check(doc! { "address" => doc! { "city" => "rome" } }));
    }

    #[test]
    fn test_upsert_seed() {
        let filter = doc! {
            "name" => "carol",
            "address.city" => "rome",
            "age" => doc! { "$gt" => 3i64 },
            "role" => doc! { "$eq" => "admin" },
        };
        let seed = upsert_seed(&filter);
        assert_eq!(seed.get("name"), Some(&Value::from("carol")));
        assert_eq!(seed.get("role"), Some(&Value::from("admin")));
        assert!(seed.get("age").is_none());
        assert_eq!(
            seed.get("address"),
            Some(&Value::Object(doc! { "city" => "rome" }))
        );
    }
}
