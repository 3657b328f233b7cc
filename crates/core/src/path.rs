//! Dotted paths into documents
//!
//! A dotted path names a nested field by joining parent and child field names
//! with `.`; purely numeric segments address tuple/array positions:
//!
//! | Path | Segments |
//! |------|----------|
//! | `name` | `Key("name")` |
//! | `address.city` | `Key("address")`, `Key("city")` |
//! | `point.0` | `Key("point")`, `Index(0)` |
//!
//! The empty string is the root path.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum path length in segments
pub const MAX_PATH_LENGTH: usize = 256;

/// Error type for dotted path parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathParseError {
    /// Empty segment (leading, trailing or doubled dot)
    #[error("empty segment in path at position {0}")]
    EmptySegment(usize),
    /// Too many segments
    #[error("path length {0} exceeds maximum of {MAX_PATH_LENGTH} segments")]
    TooLong(usize),
}

/// A segment of a dotted path
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathSegment {
    /// Object field name
    Key(String),
    /// Tuple/array position
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(k) => write!(f, "{}", k),
            PathSegment::Index(i) => write!(f, "{}", i),
        }
    }
}

/// A parsed dotted path
///
/// # Examples
///
/// ```
/// use shapedb_core::DottedPath;
///
/// let city: DottedPath = "address.city".parse().unwrap();
/// let address = DottedPath::root().child_key("address");
/// assert!(address.is_ancestor_of(&city));
/// assert_eq!(city.to_string(), "address.city");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct DottedPath {
    segments: SmallVec<[PathSegment; 4]>,
}

impl DottedPath {
    /// The root path (empty)
    pub fn root() -> Self {
        DottedPath {
            segments: SmallVec::new(),
        }
    }

    /// Create a path from segments
    pub fn from_segments(segments: impl IntoIterator<Item = PathSegment>) -> Self {
        DottedPath {
            segments: segments.into_iter().collect(),
        }
    }

    /// Parse, returning an error for malformed input
    pub fn parse(s: &str) -> Result<Self, PathParseError> {
        s.parse()
    }

    /// Path segments
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Number of segments
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Whether this is the root path
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether there are no segments; companion to [`len`](Self::len)
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Append a key segment (builder pattern)
    pub fn child_key(mut self, key: impl Into<String>) -> Self {
        self.segments.push(PathSegment::Key(key.into()));
        self
    }

    /// Append an index segment (builder pattern)
    pub fn child_index(mut self, idx: usize) -> Self {
        self.segments.push(PathSegment::Index(idx));
        self
    }

    /// Parent path (None for root)
    pub fn parent(&self) -> Option<DottedPath> {
        if self.segments.is_empty() {
            None
        } else {
            let mut parent = self.clone();
            parent.segments.pop();
            Some(parent)
        }
    }

    /// First segment, if any
    pub fn first(&self) -> Option<&PathSegment> {
        self.segments.first()
    }

    /// Last segment, if any
    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Whether this path is a prefix of (or equal to) `other`
    pub fn is_ancestor_of(&self, other: &DottedPath) -> bool {
        if self.segments.len() > other.segments.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(other.segments.iter())
            .all(|(a, b)| a == b)
    }

    /// Whether one path is a prefix of the other
    ///
    /// Two writes at overlapping paths cannot be applied independently.
    pub fn overlaps(&self, other: &DottedPath) -> bool {
        self.is_ancestor_of(other) || other.is_ancestor_of(self)
    }

    /// Join a dotted-string prefix and a child key
    ///
    /// The empty prefix yields the key itself.
    pub fn join(prefix: &str, key: &str) -> String {
        if prefix.is_empty() {
            key.to_string()
        } else {
            let mut s = String::with_capacity(prefix.len() + key.len() + 1);
            s.push_str(prefix);
            s.push('.');
            s.push_str(key);
            s
        }
    }
}

impl FromStr for DottedPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(DottedPath::root());
        }

        let mut segments = SmallVec::new();
        let mut position = 0;
        for part in s.split('.') {
            if part.is_empty() {
                return Err(PathParseError::EmptySegment(position));
            }
            let segment = if part.bytes().all(|b| b.is_ascii_digit()) {
                match part.parse::<usize>() {
                    Ok(i) => PathSegment::Index(i),
                    Err(_) => PathSegment::Key(part.to_string()),
                }
            } else {
                PathSegment::Key(part.to_string())
            };
            segments.push(segment);
            position += part.len() + 1;
        }

        if segments.len() > MAX_PATH_LENGTH {
            return Err(PathParseError::TooLong(segments.len()));
        }
        Ok(DottedPath { segments })
    }
}

impl fmt::Display for DottedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", seg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_keys_and_indices() {
        let p: DottedPath = "point.0.x".parse().unwrap();
        assert_eq!(
            p.segments(),
            &[
                PathSegment::Key("point".to_string()),
                PathSegment::Index(0),
                PathSegment::Key("x".to_string()),
            ]
        );
        assert_eq!(p.to_string(), "point.0.x");
    }

    #[test]
    fn test_parse_root() {
        let root = DottedPath::parse("").unwrap();
        assert!(root.is_root());
        assert!(root.is_empty());
        assert_eq!(root.len(), 0);
        let child = root.child_index(0);
        assert!(!child.is_empty());
        assert_eq!(child.len(), 1);
    }

    #[test]
    fn test_parse_rejects_empty_segments() {
        assert_eq!(DottedPath::parse("a..b"), Err(PathParseError::EmptySegment(2)));
        assert!(DottedPath::parse(".a").is_err());
        assert!(DottedPath::parse("a.").is_err());
    }

    #[test]
    fn test_parse_rejects_too_long() {
        let long = vec!["a"; MAX_PATH_LENGTH + 1].join(".");
        assert!(matches!(DottedPath::parse(&long), Err(PathParseError::TooLong(_))));
    }

    #[test]
    fn test_overlap() {
        let a: DottedPath = "address".parse().unwrap();
        let b: DottedPath = "address.city".parse().unwrap();
        let c: DottedPath = "addressBook".parse().unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(DottedPath::root().overlaps(&c));
    }

    #[test]
    fn test_parent() {
        let p: DottedPath = "a.b".parse().unwrap();
        assert_eq!(p.parent().unwrap().to_string(), "a");
        assert_eq!(DottedPath::root().parent(), None);
    }

    #[test]
    fn test_join() {
        assert_eq!(DottedPath::join("", "a"), "a");
        assert_eq!(DottedPath::join("a.b", "c"), "a.b.c");
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn dotted() -> impl Strategy<Value = String> {
            prop::collection::vec("[a-c]{1,2}|[0-9]", 1..6).prop_map(|s| s.join("."))
        }

        proptest! {
            #[test]
            fn prop_display_reparses(text in dotted()) {
                let path = DottedPath::parse(&text).unwrap();
                prop_assert_eq!(path.to_string(), text);
            }

            #[test]
            fn prop_child_extends_parent(text in dotted(), key in "[a-z]{1,4}") {
                let parent = DottedPath::parse(&text).unwrap();
                let child = parent.clone().child_key(key);
                prop_assert!(parent.is_ancestor_of(&child));
                prop_assert!(!child.is_ancestor_of(&parent));
                prop_assert_eq!(child.parent(), Some(parent));
            }

            #[test]
            fn prop_overlap_is_symmetric(a in dotted(), b in dotted()) {
                let a = DottedPath::parse(&a).unwrap();
                let b = DottedPath::parse(&b).unwrap();
                prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
            }
        }
    }
}
