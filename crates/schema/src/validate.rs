//! Parsing values against schemas
//!
//! `parse` both validates and normalizes: defaults are substituted, unknown
//! object keys are stripped (or rejected for strict objects), and the
//! matching union branch's output is returned.
//!
//! Object parsing keeps keys that were explicitly present in the input even
//! when their parsed value is `Undefined`. Callers that persist parsed output
//! must strip those (see `shapedb_core::strip_undefined`).

use crate::schema::Schema;
use shapedb_core::{Document, ValidationIssue, Value};
use std::fmt;
use thiserror::Error;

/// Validation failure with every reported issue
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}", render(.issues))]
pub struct ParseError {
    /// Reasons the value was rejected
    pub issues: Vec<ValidationIssue>,
}

fn render(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of [`Schema::safe_parse`]
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    /// Parsed (normalized) value
    Success(Value),
    /// Validation failed
    Failure(Vec<ValidationIssue>),
}

impl ParseResult {
    /// Whether parsing succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, ParseResult::Success(_))
    }

    /// Convert into a `Result`
    pub fn into_result(self) -> Result<Value, ParseError> {
        match self {
            ParseResult::Success(v) => Ok(v),
            ParseResult::Failure(issues) => Err(ParseError { issues }),
        }
    }
}

type Checked = Result<Value, Vec<ValidationIssue>>;

fn fail(message: impl Into<String>) -> Checked {
    Err(vec![ValidationIssue::new("", message)])
}

fn expected(what: &str, got: &Value) -> Checked {
    fail(format!("expected {}, received {}", what, got.type_name()))
}

impl Schema {
    /// Validate and normalize a value
    pub fn parse(&self, value: &Value) -> Result<Value, ParseError> {
        self.check(value).map_err(|issues| ParseError { issues })
    }

    /// Validate without an error type
    pub fn safe_parse(&self, value: &Value) -> ParseResult {
        match self.check(value) {
            Ok(v) => ParseResult::Success(v),
            Err(issues) => ParseResult::Failure(issues),
        }
    }

    /// Whether the value is accepted
    pub fn accepts(&self, value: &Value) -> bool {
        self.check(value).is_ok()
    }

    /// Whether absence (an unset field) is accepted
    pub fn accepts_absent(&self) -> bool {
        self.accepts(&Value::Undefined)
    }

    /// Parse an object-valued document
    pub fn parse_document(&self, doc: &Document) -> Result<Document, ParseError> {
        match self.parse(&Value::Object(doc.clone()))? {
            Value::Object(out) => Ok(out),
            other => Err(ParseError {
                issues: vec![ValidationIssue::new(
                    "",
                    format!("expected object, received {}", other.type_name()),
                )],
            }),
        }
    }

    pub(crate) fn check(&self, value: &Value) -> Checked {
        // Wrappers decide absence/null before the inner type sees the value.
        match self {
            Schema::Optional(inner) => {
                return match value {
                    Value::Undefined => Ok(Value::Undefined),
                    v => inner.check(v),
                }
            }
            Schema::Nullable(inner) => {
                return match value {
                    Value::Null => Ok(Value::Null),
                    v => inner.check(v),
                }
            }
            Schema::Default(d) => {
                return match value {
                    Value::Undefined => Ok(d.value.clone()),
                    v => d.inner.check(v),
                }
            }
            Schema::Refine(r) => {
                let out = r.inner.check(value)?;
                return if (r.check)(&out) { Ok(out) } else { fail(r.message.clone()) };
            }
            // Absence is decided per branch
            Schema::Union(branches) => return check_union(branches, value),
            Schema::Any => return Ok(value.clone()),
            Schema::Void => {
                return match value {
                    Value::Undefined => Ok(Value::Undefined),
                    v => expected("void", v),
                }
            }
            _ => {}
        }

        if value.is_undefined() {
            return fail("required");
        }

        match (self, value) {
            (Schema::String, Value::String(_)) => Ok(value.clone()),
            (Schema::String, v) => expected("string", v),
            (Schema::Number, Value::Int(_) | Value::Float(_)) => Ok(value.clone()),
            (Schema::Number, v) => expected("number", v),
            (Schema::Int, Value::Int(_)) | (Schema::BigInt, Value::Int(_)) => Ok(value.clone()),
            (Schema::Int, v) => expected("integer", v),
            (Schema::BigInt, v) => expected("bigint", v),
            (Schema::Boolean, Value::Bool(_)) => Ok(value.clone()),
            (Schema::Boolean, v) => expected("boolean", v),
            (Schema::Date, Value::Date(_)) => Ok(value.clone()),
            (Schema::Date, v) => expected("date", v),
            (Schema::Id, Value::Id(_)) => Ok(value.clone()),
            (Schema::Id, v) => expected("id", v),
            (Schema::Function, v) => expected("function", v),
            (Schema::Literal(lit), v) => {
                if lit == v {
                    Ok(v.clone())
                } else {
                    fail(format!("expected literal {}, received {}", lit, v))
                }
            }
            (Schema::Enum(options), Value::String(s)) => {
                if options.iter().any(|o| o == s) {
                    Ok(value.clone())
                } else {
                    fail(format!(
                        "invalid enum value '{}', expected one of [{}]",
                        s,
                        options.join(", ")
                    ))
                }
            }
            (Schema::Enum(_), v) => expected("enum string", v),
            (Schema::Object(obj), Value::Object(input)) => {
                let mut out = Document::new();
                let mut issues = Vec::new();
                for (key, field) in &obj.fields {
                    let present = input.get(key);
                    match field.check(present.unwrap_or(&Value::Undefined)) {
                        Ok(v) => {
                            if !v.is_undefined() || present.is_some() {
                                out.insert(key.clone(), v);
                            }
                        }
                        Err(errs) => issues.extend(errs.into_iter().map(|e| e.nested_under(key))),
                    }
                }
                if obj.strict {
                    for key in input.keys() {
                        if obj.field(key).is_none() {
                            issues.push(ValidationIssue::new(key.clone(), "unrecognized key"));
                        }
                    }
                }
                if issues.is_empty() {
                    Ok(Value::Object(out))
                } else {
                    Err(issues)
                }
            }
            (Schema::Object(_), v) => expected("object", v),
            (Schema::Array(element), Value::Array(items)) => {
                let mut out = Vec::with_capacity(items.len());
                let mut issues = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    match element.check(item) {
                        Ok(v) => out.push(v),
                        Err(errs) => issues.extend(
                            errs.into_iter().map(|e| e.nested_under(&i.to_string())),
                        ),
                    }
                }
                if issues.is_empty() {
                    Ok(Value::Array(out))
                } else {
                    Err(issues)
                }
            }
            (Schema::Array(_), v) => expected("array", v),
            (Schema::Tuple(schemas), Value::Array(items)) => {
                if schemas.len() != items.len() {
                    return fail(format!(
                        "expected tuple of {} items, received {}",
                        schemas.len(),
                        items.len()
                    ));
                }
                let mut out = Vec::with_capacity(items.len());
                let mut issues = Vec::new();
                for (i, (schema, item)) in schemas.iter().zip(items).enumerate() {
                    match schema.check(item) {
                        Ok(v) => out.push(v),
                        Err(errs) => issues.extend(
                            errs.into_iter().map(|e| e.nested_under(&i.to_string())),
                        ),
                    }
                }
                if issues.is_empty() {
                    Ok(Value::Array(out))
                } else {
                    Err(issues)
                }
            }
            (Schema::Tuple(_), v) => expected("tuple", v),
            (Schema::DiscriminatedUnion(du), Value::Object(input)) => {
                let tag = input.get(&du.discriminator).unwrap_or(&Value::Undefined);
                let branch = du.branches.iter().find(|b| {
                    b.unwrapped()
                        .as_object()
                        .and_then(|o| o.field(&du.discriminator))
                        .map(|f| f.accepts(tag))
                        .unwrap_or(false)
                });
                match branch {
                    Some(b) => b.check(value),
                    None => Err(vec![ValidationIssue::new(
                        du.discriminator.clone(),
                        format!("invalid discriminator value {}", tag),
                    )]),
                }
            }
            (Schema::DiscriminatedUnion(_), v) => expected("object", v),
            (Schema::Map(values), Value::Object(input)) => {
                let mut out = Document::new();
                let mut issues = Vec::new();
                for (key, item) in input {
                    match values.check(item) {
                        Ok(v) => {
                            out.insert(key.clone(), v);
                        }
                        Err(errs) => issues.extend(errs.into_iter().map(|e| e.nested_under(key))),
                    }
                }
                if issues.is_empty() {
                    Ok(Value::Object(out))
                } else {
                    Err(issues)
                }
            }
            (Schema::Map(_), v) => expected("map", v),
            (Schema::Set(element), Value::Array(items)) => {
                let parsed = Schema::Array(element.clone()).check(value)?;
                for (i, item) in items.iter().enumerate() {
                    if items[..i].contains(item) {
                        return Err(vec![ValidationIssue::new(i.to_string(), "duplicate set element")]);
                    }
                }
                Ok(parsed)
            }
            (Schema::Set(_), v) => expected("set", v),
            (Schema::Intersection(pair), v) => {
                let left = pair.0.check(v);
                let right = pair.1.check(v);
                match (left, right) {
                    (Ok(Value::Object(mut a)), Ok(Value::Object(b))) => {
                        a.extend(b);
                        Ok(Value::Object(a))
                    }
                    (Ok(a), Ok(_)) => Ok(a),
                    (Err(mut a), Err(b)) => {
                        a.extend(b);
                        Err(a)
                    }
                    (Err(e), _) | (_, Err(e)) => Err(e),
                }
            }
            // Wrappers, plain unions, Any and Void returned above
            (Schema::Union(_), _)
            | (Schema::Optional(_), _)
            | (Schema::Nullable(_), _)
            | (Schema::Default(_), _)
            | (Schema::Refine(_), _)
            | (Schema::Any, _)
            | (Schema::Void, _) => Ok(value.clone()),
        }
    }
}

fn check_union(branches: &[Schema], value: &Value) -> Checked {
    let mut reasons = Vec::with_capacity(branches.len());
    for branch in branches {
        match branch.check(value) {
            Ok(v) => return Ok(v),
            Err(errs) => reasons.push(render(&errs)),
        }
    }
    fail(format!(
        "value did not match any union branch ({})",
        reasons.join(" | ")
    ))
}

impl fmt::Display for ParseResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseResult::Success(v) => write!(f, "ok: {}", v),
            ParseResult::Failure(issues) => write!(f, "failed: {}", render(issues)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shapedb_core::doc;

    fn user() -> Schema {
        Schema::object([
            ("name", Schema::string()),
            ("age", Schema::int().optional()),
            ("tags", Schema::array(Schema::string()).default(Vec::<String>::new())),
        ])
    }

    #[test]
    fn test_parse_applies_defaults_and_strips_unknown() {
        let out = user()
            .parse(&Value::Object(doc! { "name" => "a", "extra" => 1i64 }))
            .unwrap();
        let obj = out.as_object().unwrap();
        assert_eq!(obj.get("tags"), Some(&Value::Array(vec![])));
        assert!(!obj.contains_key("extra"));
        assert!(!obj.contains_key("age"));
    }

    #[test]
    fn test_parse_keeps_explicit_undefined() {
        let out = user()
            .parse(&Value::Object(doc! { "name" => "a", "age" => Value::Undefined }))
            .unwrap();
        assert_eq!(out.as_object().unwrap().get("age"), Some(&Value::Undefined));
    }

    #[test]
    fn test_parse_reports_nested_issue_paths() {
        let err = user()
            .parse(&Value::Object(doc! { "tags" => vec![Value::from("ok"), Value::Int(3)] }))
            .unwrap_err();
        let paths: Vec<_> = err.issues.iter().map(|i| i.path.as_str()).collect();
        assert!(paths.contains(&"name"));
        assert!(paths.contains(&"tags.1"));
    }

    #[test]
    fn test_strict_object_rejects_unknown() {
        let s = Schema::object([("a", Schema::int())]).strict();
        let err = s.parse(&Value::Object(doc! { "a" => 1i64, "b" => 2i64 })).unwrap_err();
        assert_eq!(err.issues[0].path, "b");
    }

    #[test]
    fn test_date_requires_date_value() {
        let at = chrono::Utc::now();
        assert!(Schema::date().accepts(&Value::Date(at)));
        assert!(!Schema::date().accepts(&Value::from(at.to_rfc3339())));
        assert!(Schema::date().optional().accepts(&Value::Undefined));
    }

    #[test]
    fn test_number_and_int() {
        assert!(Schema::number().accepts(&Value::Float(1.5)));
        assert!(Schema::number().accepts(&Value::Int(1)));
        assert!(!Schema::int().accepts(&Value::Float(1.0)));
    }

    #[test]
    fn test_absence_rules() {
        assert!(!Schema::string().accepts_absent());
        assert!(Schema::string().optional().accepts_absent());
        assert!(Schema::string().default("x").accepts_absent());
        assert!(!Schema::string().nullable().accepts_absent());
        assert!(Schema::string().nullable().accepts(&Value::Null));
    }

    #[test]
    fn test_tuple_arity() {
        let t = Schema::tuple([Schema::int(), Schema::string()]);
        assert!(t.accepts(&Value::from(vec![Value::Int(1), Value::from("a")])));
        assert!(!t.accepts(&Value::from(vec![Value::Int(1)])));
    }

    #[test]
    fn test_union_first_match() {
        let u = Schema::union([Schema::int(), Schema::string()]);
        assert!(u.accepts(&Value::from("a")));
        let err = u.parse(&Value::Bool(true)).unwrap_err();
        assert!(err.to_string().contains("union"));
    }

    #[test]
    fn test_union_absence_decided_by_branches() {
        let required = Schema::union([Schema::int(), Schema::string()]);
        assert!(!required.accepts_absent());
        let optional = Schema::union([Schema::int().optional(), Schema::string()]);
        assert!(optional.accepts_absent());
    }

    #[test]
    fn test_discriminated_union_selects_branch() {
        let du = Schema::discriminated_union(
            "kind",
            [
                Schema::object([("kind", Schema::literal("cat")), ("lives", Schema::int())]),
                Schema::object([("kind", Schema::literal("dog")), ("breed", Schema::string())]),
            ],
        );
        assert!(du.accepts(&Value::Object(doc! { "kind" => "dog", "breed" => "lab" })));
        assert!(!du.accepts(&Value::Object(doc! { "kind" => "dog", "lives" => 9i64 })));
        let err = du.parse(&Value::Object(doc! { "kind" => "fish" })).unwrap_err();
        assert_eq!(err.issues[0].path, "kind");
    }

    #[test]
    fn test_refinement() {
        let s = Schema::int().refine("must be positive", |v| v.as_int().is_some_and(|i| i > 0));
        assert!(s.accepts(&Value::Int(1)));
        let err = s.parse(&Value::Int(0)).unwrap_err();
        assert_eq!(err.issues[0].message, "must be positive");
    }

    #[test]
    fn test_enum_and_literal() {
        let e = Schema::enumeration(["a", "b"]);
        assert!(e.accepts(&Value::from("a")));
        assert!(!e.accepts(&Value::from("c")));
        assert!(Schema::literal(3i64).accepts(&Value::Int(3)));
        assert!(!Schema::literal(3i64).accepts(&Value::Int(4)));
    }

    #[test]
    fn test_set_rejects_duplicates() {
        let s = Schema::set(Schema::int());
        assert!(s.accepts(&Value::from(vec![1i64, 2i64])));
        assert!(!s.accepts(&Value::from(vec![1i64, 1i64])));
    }

    #[test]
    fn test_intersection_merges_objects() {
        let s = Schema::intersection(
            Schema::object([("a", Schema::int())]),
            Schema::object([("b", Schema::int())]),
        );
        let out = s.parse(&Value::Object(doc! { "a" => 1i64, "b" => 2i64 })).unwrap();
        assert_eq!(out.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_safe_parse() {
        assert!(Schema::string().safe_parse(&Value::from("x")).is_success());
        let r = Schema::string().safe_parse(&Value::Int(1));
        assert!(!r.is_success());
        assert!(r.into_result().is_err());
    }

    #[test]
    fn test_parse_document_requires_object() {
        let d = Schema::object([("a", Schema::int())]).parse_document(&doc! { "a" => 1i64 });
        assert!(d.is_ok());
    }
}
