//! The injective mapping table used while matching, and the finished class
//! mapping handed to collaborators.

use std::collections::BTreeMap;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::descriptor;
use crate::errors::{RemapError, RemapResult};
use crate::matching::similarity::SimilarityBreakdown;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOrigin {
    /// Stable name present in both snapshots.
    Fixed,
    /// Provided by the caller rather than inferred.
    Supplied,
    Constant,
    Anchor,
    Propagated,
    Refined,
    Validated,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Claim {
    pub new: String,
    pub score: f64,
    pub origin: MatchOrigin,
}

// ---------------------------------------------------------------------------
// MappingTable
// ---------------------------------------------------------------------------

/// Old→new class assignments under construction. The forward map and the
/// set of claimed new ids only change together, so the table stays
/// injective.
#[derive(Clone, Debug, Default)]
pub struct MappingTable {
    forward: BTreeMap<String, Claim>,
    claimed: BTreeMap<String, String>,
}

impl MappingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fix(&mut self, old: &str, new: &str) -> bool {
        self.claim(old, new, 1.0, MatchOrigin::Fixed)
    }

    /// Assign an unmapped old id to an unclaimed new id.
    pub fn claim(&mut self, old: &str, new: &str, score: f64, origin: MatchOrigin) -> bool {
        if self.forward.contains_key(old) || self.claimed.contains_key(new) {
            return false;
        }
        self.claimed.insert(new.to_string(), old.to_string());
        self.forward.insert(
            old.to_string(),
            Claim {
                new: new.to_string(),
                score,
                origin,
            },
        );
        true
    }

    /// Move a mapped, non-fixed old id to an unclaimed new id, releasing its
    /// previous target.
    pub fn reassign(&mut self, old: &str, new: &str, score: f64, origin: MatchOrigin) -> bool {
        if self.claimed.contains_key(new) || self.is_fixed(old) {
            return false;
        }
        let Some(current) = self.forward.get_mut(old) else {
            return false;
        };
        self.claimed.remove(&current.new);
        self.claimed.insert(new.to_string(), old.to_string());
        *current = Claim {
            new: new.to_string(),
            score,
            origin,
        };
        true
    }

    pub fn get(&self, old: &str) -> Option<&Claim> {
        self.forward.get(old)
    }

    pub fn new_of(&self, old: &str) -> Option<&str> {
        self.forward.get(old).map(|c| c.new.as_str())
    }

    pub fn old_of(&self, new: &str) -> Option<&str> {
        self.claimed.get(new).map(String::as_str)
    }

    pub fn is_mapped(&self, old: &str) -> bool {
        self.forward.contains_key(old)
    }

    pub fn is_claimed(&self, new: &str) -> bool {
        self.claimed.contains_key(new)
    }

    pub fn is_fixed(&self, old: &str) -> bool {
        self.forward
            .get(old)
            .is_some_and(|c| c.origin == MatchOrigin::Fixed)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Claim)> {
        self.forward.iter().map(|(old, claim)| (old.as_str(), claim))
    }

    pub fn count_origin(&self, origin: MatchOrigin) -> usize {
        self.forward.values().filter(|c| c.origin == origin).count()
    }
}

// ---------------------------------------------------------------------------
// ClassMapping
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassMatch {
    pub old: String,
    pub new: String,
    pub origin: MatchOrigin,
    /// Raw structural similarity (1.0 for fixed matches).
    pub similarity: f64,
    /// Share of dependencies that round-trip through the mapping.
    pub consistency: f64,
    pub confidence: f64,
    pub breakdown: Option<SimilarityBreakdown>,
}

/// Finished injective old→new class mapping.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ClassMapping {
    matches: BTreeMap<String, ClassMatch>,
}

impl ClassMapping {
    pub fn from_matches(matches: Vec<ClassMatch>) -> RemapResult<Self> {
        let mut table = BTreeMap::new();
        let mut targets = BTreeMap::new();
        for m in matches {
            if let Some(previous) = targets.insert(m.new.clone(), m.old.clone()) {
                return Err(RemapError::Collision(format!(
                    "{} and {} both map to {}",
                    previous, m.old, m.new
                )));
            }
            if table.contains_key(&m.old) {
                return Err(RemapError::Collision(format!("{} mapped twice", m.old)));
            }
            table.insert(m.old.clone(), m);
        }
        Ok(Self { matches: table })
    }

    /// Caller-provided pairs, e.g. a mapping from an earlier run.
    pub fn from_pairs<I, S>(pairs: I) -> RemapResult<Self>
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        let matches = pairs
            .into_iter()
            .map(|(old, new)| ClassMatch {
                old: old.into(),
                new: new.into(),
                origin: MatchOrigin::Supplied,
                similarity: 1.0,
                consistency: 1.0,
                confidence: 1.0,
                breakdown: None,
            })
            .collect();
        Self::from_matches(matches)
    }

    pub fn get(&self, old: &str) -> Option<&ClassMatch> {
        self.matches.get(old)
    }

    pub fn new_name(&self, old: &str) -> Option<&str> {
        self.matches.get(old).map(|m| m.new.as_str())
    }

    pub fn confidence(&self, old: &str) -> f64 {
        self.matches.get(old).map_or(0.0, |m| m.confidence)
    }

    pub fn len(&self) -> usize {
        self.matches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matches.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassMatch> {
        self.matches.values()
    }

    /// Plain old→new name map.
    pub fn names(&self) -> BTreeMap<String, String> {
        self.matches
            .values()
            .map(|m| (m.old.clone(), m.new.clone()))
            .collect()
    }

    pub fn remap_descriptor(&self, desc: &str) -> RemapResult<String> {
        descriptor::remap_descriptor(desc, |name| self.new_name(name))
    }

    pub fn descriptors_match(&self, old_desc: &str, new_desc: &str) -> RemapResult<bool> {
        descriptor::descriptors_match(old_desc, new_desc, |name| self.new_name(name))
    }

    pub fn to_json(&self) -> RemapResult<String> {
        Ok(serde_json::to_string_pretty(&self.matches)?)
    }

    /// SHA-256 of the canonical JSON form.
    pub fn digest(&self) -> RemapResult<String> {
        let canonical = serde_json::to_vec(&self.matches)?;
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// A mapped pair whose field users mostly disagree with the mapping.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SuspiciousMapping {
    pub old: String,
    pub new: String,
    pub agreeing: usize,
    pub total: usize,
    pub ratio: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MatchStats {
    pub old_classes: usize,
    pub new_classes: usize,
    pub fixed: usize,
    pub constants: usize,
    pub anchors: usize,
    pub propagated: usize,
    pub refined: usize,
    pub validated: usize,
    pub unmapped: usize,
    pub elapsed_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchReport {
    pub mapping: ClassMapping,
    pub warnings: Vec<SuspiciousMapping>,
    pub stats: MatchStats,
}
