//! Set, multiset and histogram overlap measures, and the weighted class and
//! method similarity built on them.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::analysis::fingerprint::{ClassFingerprint, MethodFingerprint};

// ---------------------------------------------------------------------------
// Component weights
// ---------------------------------------------------------------------------

pub const KIND_WEIGHT: f64 = 1.0;
pub const HIERARCHY_WEIGHT: f64 = 1.5;
pub const METHOD_DESCRIPTOR_WEIGHT: f64 = 2.0;
pub const OPCODE_WEIGHT: f64 = 2.0;
pub const STRING_WEIGHT: f64 = 0.5;
pub const STATIC_METHOD_WEIGHT: f64 = 1.5;
pub const FIELD_TYPE_WEIGHT: f64 = 1.5;
pub const CONSTRUCTOR_WEIGHT: f64 = 0.5;
pub const STATIC_INIT_WEIGHT: f64 = 0.2;

const SEVERE_SIZE_RATIO: f64 = 0.5;
const SEVERE_SIZE_PENALTY: f64 = 0.7;
const MILD_SIZE_RATIO: f64 = 0.7;
const MILD_SIZE_PENALTY: f64 = 0.85;

// ---------------------------------------------------------------------------
// Measures
// ---------------------------------------------------------------------------

/// |A∩B| / |A∪B|; 1.0 when both are empty.
pub fn jaccard<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let inter = a.intersection(b).count();
    let union = a.len() + b.len() - inter;
    inter as f64 / union as f64
}

/// Σmin / Σmax over the union of keys; 1.0 when both are empty.
pub fn multiset_jaccard<K: Ord>(a: &BTreeMap<K, u32>, b: &BTreeMap<K, u32>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let mut min_sum = 0u64;
    let mut max_sum = 0u64;
    for (key, &x) in a {
        let y = b.get(key).copied().unwrap_or(0);
        min_sum += x.min(y) as u64;
        max_sum += x.max(y) as u64;
    }
    for (key, &y) in b {
        if !a.contains_key(key) {
            max_sum += y as u64;
        }
    }
    if max_sum == 0 {
        1.0
    } else {
        min_sum as f64 / max_sum as f64
    }
}

/// Cosine similarity of two count vectors; 1.0 when both are empty, 0.0
/// when exactly one is.
pub fn cosine<K: Ord>(a: &BTreeMap<K, u32>, b: &BTreeMap<K, u32>) -> f64 {
    // Exact for identical vectors, where the sqrt round trip may not be.
    if a == b {
        return 1.0;
    }
    let norm = |m: &BTreeMap<K, u32>| m.values().map(|&v| (v as f64) * (v as f64)).sum::<f64>().sqrt();
    let (norm_a, norm_b) = (norm(a), norm(b));
    if norm_a == 0.0 && norm_b == 0.0 {
        return 1.0;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f64 = a
        .iter()
        .filter_map(|(k, &x)| b.get(k).map(|&y| x as f64 * y as f64))
        .sum();
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// `1 - |a-b| / max(1, a, b)`.
pub fn count_closeness(a: usize, b: usize) -> f64 {
    1.0 - a.abs_diff(b) as f64 / a.max(b).max(1) as f64
}

/// min/max, 1.0 when equal (including both zero).
pub fn size_ratio(a: usize, b: usize) -> f64 {
    if a == b {
        1.0
    } else {
        a.min(b) as f64 / a.max(b) as f64
    }
}

fn binary(equal: bool) -> f64 {
    if equal {
        1.0
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// Class similarity
// ---------------------------------------------------------------------------

/// Per-component class similarity, each in [0, 1].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimilarityBreakdown {
    pub kind: f64,
    pub hierarchy: f64,
    pub method_descriptors: f64,
    pub opcodes: f64,
    pub strings: f64,
    pub static_methods: f64,
    pub field_types: f64,
    pub constructors: f64,
    pub static_initializer: f64,
    /// Multiplier for large method or field count differences.
    pub size_penalty: f64,
}

impl SimilarityBreakdown {
    pub fn compute(a: &ClassFingerprint, b: &ClassFingerprint) -> Self {
        let method_ratio = size_ratio(a.method_count, b.method_count);
        let field_ratio = size_ratio(a.field_count, b.field_count);
        let worst = method_ratio.min(field_ratio);
        let size_penalty = if worst < SEVERE_SIZE_RATIO {
            SEVERE_SIZE_PENALTY
        } else if worst < MILD_SIZE_RATIO {
            MILD_SIZE_PENALTY
        } else {
            1.0
        };

        Self {
            kind: binary(a.kind == b.kind),
            hierarchy: jaccard(&a.hierarchy(), &b.hierarchy()),
            method_descriptors: multiset_jaccard(&a.method_descriptors, &b.method_descriptors),
            opcodes: cosine(&a.opcode_histogram, &b.opcode_histogram),
            strings: jaccard(&a.string_literals, &b.string_literals),
            static_methods: jaccard(&a.static_method_signatures, &b.static_method_signatures),
            field_types: (multiset_jaccard(&a.static_field_types, &b.static_field_types)
                + multiset_jaccard(&a.instance_field_types, &b.instance_field_types))
                / 2.0,
            constructors: count_closeness(a.constructor_count, b.constructor_count),
            static_initializer: binary(a.has_static_initializer == b.has_static_initializer),
            size_penalty,
        }
    }

    pub fn total(&self) -> f64 {
        let weighted = self.kind * KIND_WEIGHT
            + self.hierarchy * HIERARCHY_WEIGHT
            + self.method_descriptors * METHOD_DESCRIPTOR_WEIGHT
            + self.opcodes * OPCODE_WEIGHT
            + self.strings * STRING_WEIGHT
            + self.static_methods * STATIC_METHOD_WEIGHT
            + self.field_types * FIELD_TYPE_WEIGHT
            + self.constructors * CONSTRUCTOR_WEIGHT
            + self.static_initializer * STATIC_INIT_WEIGHT;
        let weights = KIND_WEIGHT
            + HIERARCHY_WEIGHT
            + METHOD_DESCRIPTOR_WEIGHT
            + OPCODE_WEIGHT
            + STRING_WEIGHT
            + STATIC_METHOD_WEIGHT
            + FIELD_TYPE_WEIGHT
            + CONSTRUCTOR_WEIGHT
            + STATIC_INIT_WEIGHT;
        (weighted / weights * self.size_penalty).clamp(0.0, 1.0)
    }
}

pub fn class_similarity(a: &ClassFingerprint, b: &ClassFingerprint) -> f64 {
    SimilarityBreakdown::compute(a, b).total()
}

// ---------------------------------------------------------------------------
// Method similarity
// ---------------------------------------------------------------------------

pub fn method_similarity(a: &MethodFingerprint, b: &MethodFingerprint) -> f64 {
    let score = binary(a.normalized_descriptor == b.normalized_descriptor) * 2.0
        + binary(a.is_static == b.is_static) * 0.5
        + cosine(&a.opcode_histogram, &b.opcode_histogram) * 2.0
        + jaccard(&a.string_literals, &b.string_literals)
        + jaccard(&a.invoked_signatures, &b.invoked_signatures) * 1.5
        + count_closeness(a.instruction_count, b.instruction_count) * 0.5;
    (score / 7.5).clamp(0.0, 1.0)
}
