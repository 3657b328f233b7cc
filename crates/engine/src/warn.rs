//! Once-per-facade warnings
//!
//! Some trust boundaries (operator pass-through in queries, ignored writes
//! to the identity field) are worth a warning the first time they are hit
//! and noise afterwards. Each `Database` owns one [`WarnOnce`], so the set
//! of emitted keys lives and dies with the facade.

use parking_lot::Mutex;
use std::collections::BTreeSet;

/// Set of warning keys already emitted
#[derive(Debug, Default)]
pub struct WarnOnce {
    emitted: Mutex<BTreeSet<String>>,
}

impl WarnOnce {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time `key` is seen, `false` afterwards
    pub fn first(&self, key: &str) -> bool {
        let mut emitted = self.emitted.lock();
        if emitted.contains(key) {
            return false;
        }
        emitted.insert(key.to_string());
        true
    }

    /// Keys emitted so far
    pub fn emitted(&self) -> Vec<String> {
        self.emitted.lock().iter().cloned().collect()
    }
}
