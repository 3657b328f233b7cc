//! Flattened path maps
//!
//! A [`PathMap`] maps every dotted path reachable in a collection schema to
//! the schema that governs values written there. It is built once per
//! collection by [`flatten`] and is read-only afterwards.
//!
//! | Schema at `p` | Entry at `p` | Descends into |
//! |---------------|--------------|---------------|
//! | scalar / enum / literal | the (wrapped) scalar | - |
//! | object | the (wrapped) object | `p.<field>` |
//! | tuple | the (wrapped) tuple | `p.<index>` |
//! | array | the (wrapped) array | - (arrays are leaves) |
//! | union | union of every branch | each branch at `p` |

mod flatten;

pub use flatten::flatten;

use std::collections::{BTreeMap, BTreeSet};

/// Dotted path → governing schema
#[derive(Debug, Clone, PartialEq)]
pub struct PathMap<S> {
    pub(crate) entries: BTreeMap<String, S>,
    pub(crate) native_unions: BTreeSet<String>,
}

impl<S> Default for PathMap<S> {
    fn default() -> Self {
        PathMap {
            entries: BTreeMap::new(),
            native_unions: BTreeSet::new(),
        }
    }
}

impl<S> PathMap<S> {
    /// Governing schema for a path
    pub fn get(&self, path: &str) -> Option<&S> {
        self.entries.get(path)
    }

    /// Whether the path is known
    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    /// All known paths, sorted
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// `(path, schema)` pairs, sorted by path
    pub fn iter(&self) -> impl Iterator<Item = (&str, &S)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Paths with a single segment
    pub fn top_level(&self) -> impl Iterator<Item = &str> {
        self.paths().filter(|p| !p.contains('.'))
    }

    /// Number of paths
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no path is known
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether the path is the site of a declared union
    ///
    /// Such paths are expected to hold several alternative shapes; other
    /// paths only become unions when reached through more than one branch
    /// of an enclosing union.
    pub fn is_native_union(&self, path: &str) -> bool {
        self.native_unions.contains(path)
    }
}
