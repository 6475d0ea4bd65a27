//! Per-run matching context shared by every class-matching stage.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::analysis::pipeline::SnapshotIndex;
use crate::config::MatcherConfig;
use crate::matching::mapping::MappingTable;
use crate::matching::names::NameClassifier;
use crate::matching::similarity::{class_similarity, SimilarityBreakdown};

/// Both snapshot indexes plus run-scoped caches. One context per run; it
/// never outlives the indexes it borrows.
pub struct MatchContext<'a> {
    pub config: &'a MatcherConfig,
    pub classifier: NameClassifier,
    pub old: &'a SnapshotIndex,
    pub new: &'a SnapshotIndex,
    similarity_cache: RwLock<HashMap<(usize, usize), f64>>,
}

impl<'a> MatchContext<'a> {
    pub fn new(config: &'a MatcherConfig, old: &'a SnapshotIndex, new: &'a SnapshotIndex) -> Self {
        Self {
            config,
            classifier: NameClassifier::new(config.max_obfuscated_name_len),
            old,
            new,
            similarity_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Memoized class similarity; 0.0 if either class is unknown.
    pub fn similarity(&self, old: &str, new: &str) -> f64 {
        let (Some((i, _, a)), Some((j, _, b))) = (
            self.old.fingerprints.get_full(old),
            self.new.fingerprints.get_full(new),
        ) else {
            return 0.0;
        };
        if let Some(&cached) = self.similarity_cache.read().get(&(i, j)) {
            return cached;
        }
        let value = class_similarity(a, b);
        self.similarity_cache.write().insert((i, j), value);
        value
    }

    pub fn breakdown(&self, old: &str, new: &str) -> Option<SimilarityBreakdown> {
        let a = self.old.fingerprint(old)?;
        let b = self.new.fingerprint(new)?;
        Some(SimilarityBreakdown::compute(a, b))
    }

    pub fn old_obfuscated(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.old
            .class_names()
            .filter(|name| self.classifier.is_obfuscated(name))
    }

    pub fn new_obfuscated(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.new
            .class_names()
            .filter(|name| self.classifier.is_obfuscated(name))
    }

    /// Obfuscated new classes nobody has claimed yet, in snapshot order.
    pub fn unclaimed_new(&self, table: &MappingTable) -> Vec<&'a str> {
        self.new_obfuscated()
            .filter(|name| !table.is_claimed(name))
            .collect()
    }

    pub fn is_old_constant(&self, class: &str) -> bool {
        self.old
            .evidence
            .is_constant_like(class, self.config.constant_self_refs)
    }

    pub fn is_new_constant(&self, class: &str) -> bool {
        self.new
            .evidence
            .is_constant_like(class, self.config.constant_self_refs)
    }

    pub fn old_field_count(&self, class: &str) -> usize {
        self.old.fingerprint(class).map_or(0, |fp| fp.field_count)
    }

    pub fn new_field_count(&self, class: &str) -> usize {
        self.new.fingerprint(class).map_or(0, |fp| fp.field_count)
    }
}
