//! Stable vs. obfuscated name classification and identity matches.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::analysis::pipeline::SnapshotIndex;

/// Unqualified part of an internal name (`a/b/Foo` -> `Foo`).
pub fn simple_name(internal_name: &str) -> &str {
    internal_name
        .rsplit_once('/')
        .map_or(internal_name, |(_, simple)| simple)
}

/// Splits names into ones the obfuscator renames every build and ones that
/// survive unchanged. The length cutoff is configurable.
#[derive(Clone, Debug)]
pub struct NameClassifier {
    max_obfuscated_len: usize,
}

impl NameClassifier {
    pub fn new(max_obfuscated_len: usize) -> Self {
        Self { max_obfuscated_len }
    }

    pub fn is_obfuscated(&self, name: &str) -> bool {
        simple_name(name).chars().count() <= self.max_obfuscated_len
    }

    pub fn is_stable(&self, name: &str) -> bool {
        !self.is_obfuscated(name)
    }

    /// Stable old class names that exist verbatim in the new snapshot.
    pub fn fixed_class_matches(&self, old: &SnapshotIndex, new: &SnapshotIndex) -> BTreeMap<String, String> {
        let mut fixed = BTreeMap::new();
        for name in old.class_names() {
            if self.is_obfuscated(name) {
                continue;
            }
            if new.contains(name) {
                fixed.insert(name.to_string(), name.to_string());
            } else {
                warn!("Stable class {name} has no counterpart in the new snapshot");
            }
        }
        debug!("{} fixed class matches by name", fixed.len());
        fixed
    }
}

impl Default for NameClassifier {
    fn default() -> Self {
        Self::new(crate::config::MAX_OBFUSCATED_NAME_LEN)
    }
}
