//! Field resolution on top of a finished class mapping and a caller-supplied
//! method mapping.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::access::FieldAccessProfile;
use crate::analysis::pipeline::{with_pool, FieldInfo, SnapshotIndex};
use crate::config::MatcherConfig;
use crate::descriptor::{parse_field_descriptor, TypeDesc};
use crate::errors::RemapResult;
use crate::matching::mapping::ClassMapping;
use crate::matching::names::NameClassifier;
use crate::matching::select::TopK;
use crate::models::{FieldKey, MethodKey};

/// Old method → new method, produced by whoever matched the methods.
pub type MethodMapping = BTreeMap<MethodKey, MethodKey>;

/// Sibling fields reduced to `(owner, descriptor)`.
type SiblingShape = BTreeSet<(String, String)>;

const EXACT_TYPE: f64 = 1.0;
const SAME_PRIMITIVE_CATEGORY: f64 = 0.8;
const BOTH_REFERENCES: f64 = 0.6;

const SAME_OWNER_INSTANCE: f64 = 1.0;
const SAME_OWNER_STATIC: f64 = 0.6;
const WRONG_OWNER_INSTANCE: f64 = -0.2;

const USAGE_BONUS_FLOOR: f64 = 0.5;
const USAGE_BONUS: f64 = 0.1;
const NO_SIBLINGS: f64 = 0.5;
const VOLUME_SHARE: f64 = 0.5;

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Per-component field score.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FieldScoreBreakdown {
    pub type_score: f64,
    pub modifiers: f64,
    pub owner: f64,
    pub usage: f64,
    pub co_occurrence: f64,
    pub proximity: f64,
    pub volume: f64,
    pub profile: f64,
}

struct FieldWeights {
    type_score: f64,
    modifiers: f64,
    owner: f64,
    usage: f64,
    co_occurrence: f64,
    proximity: f64,
    volume: f64,
    profile: f64,
}

const PRIMITIVE_WEIGHTS: FieldWeights = FieldWeights {
    type_score: 0.10,
    modifiers: 0.05,
    owner: 0.20,
    usage: 0.30,
    co_occurrence: 0.08,
    proximity: 0.05,
    volume: 0.07,
    profile: 0.15,
};

const STATIC_WEIGHTS: FieldWeights = FieldWeights {
    type_score: 0.20,
    modifiers: 0.10,
    owner: 0.15,
    usage: 0.35,
    co_occurrence: 0.10,
    proximity: 0.0,
    volume: 0.0,
    profile: 0.10,
};

const INSTANCE_WEIGHTS: FieldWeights = FieldWeights {
    type_score: 0.18,
    modifiers: 0.05,
    owner: 0.28,
    usage: 0.27,
    co_occurrence: 0.10,
    proximity: 0.05,
    volume: 0.0,
    profile: 0.07,
};

impl FieldScoreBreakdown {
    fn weighted(&self, w: &FieldWeights) -> f64 {
        self.type_score * w.type_score
            + self.modifiers * w.modifiers
            + self.owner * w.owner
            + self.usage * w.usage
            + self.co_occurrence * w.co_occurrence
            + self.proximity * w.proximity
            + self.volume * w.volume
            + self.profile * w.profile
    }
}

/// Compatibility of an old field type with a new one, `None` if the pair
/// can never match. `remapped_old` is the old type with mapped classes
/// substituted.
pub fn type_compatibility(old: &TypeDesc, remapped_old: &TypeDesc, new: &TypeDesc) -> Option<f64> {
    if old == new || remapped_old == new {
        return Some(EXACT_TYPE);
    }
    match (old.primitive_category(), new.primitive_category()) {
        (Some(a), Some(b)) => return (a == b).then_some(SAME_PRIMITIVE_CATEGORY),
        (Some(_), None) | (None, Some(_)) => return None,
        (None, None) => {}
    }
    (old.is_reference_like() && new.is_reference_like()).then_some(BOTH_REFERENCES)
}

fn modifier_score(old: &FieldInfo, new: &FieldInfo) -> f64 {
    let mut score = 0.0;
    if old.is_static == new.is_static {
        score += 1.0;
    }
    if old.is_final == new.is_final {
        score += 0.5;
    }
    score / 1.5
}

fn jaccard_or_zero<T: Ord>(a: &BTreeSet<T>, b: &BTreeSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

fn proximity(old: &FieldInfo, new: &FieldInfo) -> f64 {
    let relative = |info: &FieldInfo| info.position as f64 / info.owner_field_count.saturating_sub(1).max(1) as f64;
    (1.0 - (relative(old) - relative(new)).abs() * 2.0).max(0.0)
}

fn profile_score(old: &FieldAccessProfile, new: &FieldAccessProfile, primitive: bool) -> f64 {
    let mut score = old.similarity(new);
    if !primitive {
        return score;
    }
    let (a, b) = (&old.patterns, &new.patterns);
    if a.counter && b.counter {
        score += 0.3;
    } else if a.flag && b.flag {
        score += 0.3;
    } else if a.index && b.index {
        score += 0.25;
    } else if a.constant && b.constant {
        score += 0.2;
    }
    score = score.min(1.0);
    if a.counter != b.counter {
        score *= 0.5;
    }
    score
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldCandidate {
    pub new: FieldKey,
    pub score: f64,
    /// Same stable name under the mapped owner.
    pub fixed: bool,
    pub breakdown: Option<FieldScoreBreakdown>,
}

/// Ranked candidates per old field, best first.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FieldResolution {
    pub candidates: BTreeMap<FieldKey, Vec<FieldCandidate>>,
}

impl FieldResolution {
    pub fn candidates_for(&self, old: &FieldKey) -> &[FieldCandidate] {
        self.candidates.get(old).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Greedy injective assignment: candidate pairs scoring above
    /// `threshold` are taken by descending score, then old key, then new key.
    pub fn assign(&self, threshold: f64) -> BTreeMap<FieldKey, FieldKey> {
        let mut pairs: Vec<(&FieldKey, &FieldCandidate)> = self
            .candidates
            .iter()
            .flat_map(|(old, list)| list.iter().map(move |c| (old, c)))
            .filter(|(_, c)| c.score > threshold)
            .collect();
        pairs.sort_by(|(a_old, a), (b_old, b)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a_old.cmp(b_old))
                .then_with(|| a.new.cmp(&b.new))
        });

        let mut assigned = BTreeMap::new();
        let mut taken = BTreeSet::new();
        for (old, candidate) in pairs {
            if assigned.contains_key(old) || taken.contains(&candidate.new) {
                continue;
            }
            taken.insert(candidate.new.clone());
            assigned.insert(old.clone(), candidate.new.clone());
        }
        assigned
    }
}

fn sibling_shapes(index: &SnapshotIndex) -> BTreeMap<FieldKey, SiblingShape> {
    index
        .field_usage
        .siblings()
        .into_iter()
        .map(|(field, siblings)| {
            let shape = siblings
                .into_iter()
                .map(|f| (f.owner, f.desc))
                .collect();
            (field, shape)
        })
        .collect()
}

/// Scores old fields against new fields. Types, remapped types and sibling
/// sets are computed once up front.
pub struct FieldResolver<'a> {
    config: &'a MatcherConfig,
    classifier: NameClassifier,
    old: &'a SnapshotIndex,
    new: &'a SnapshotIndex,
    classes: &'a ClassMapping,
    methods: &'a MethodMapping,
    old_types: BTreeMap<&'a FieldKey, TypeDesc>,
    remapped_old_types: BTreeMap<&'a FieldKey, TypeDesc>,
    new_types: BTreeMap<&'a FieldKey, TypeDesc>,
    old_siblings: BTreeMap<FieldKey, BTreeSet<FieldKey>>,
    new_siblings: BTreeMap<FieldKey, SiblingShape>,
}

impl<'a> FieldResolver<'a> {
    pub fn new(
        config: &'a MatcherConfig,
        old: &'a SnapshotIndex,
        new: &'a SnapshotIndex,
        classes: &'a ClassMapping,
        methods: &'a MethodMapping,
    ) -> RemapResult<Self> {
        let rename = |name: &str| classes.new_name(name).unwrap_or(name).to_string();
        let mut old_types = BTreeMap::new();
        let mut remapped_old_types = BTreeMap::new();
        for key in old.fields.keys() {
            let ty = parse_field_descriptor(&key.desc)?;
            remapped_old_types.insert(key, ty.map_classes(&rename));
            old_types.insert(key, ty);
        }
        let new_types = new
            .fields
            .keys()
            .map(|key| parse_field_descriptor(&key.desc).map(|ty| (key, ty)))
            .collect::<RemapResult<BTreeMap<_, _>>>()?;

        Ok(Self {
            config,
            classifier: NameClassifier::new(config.max_obfuscated_name_len),
            old,
            new,
            classes,
            methods,
            old_types,
            remapped_old_types,
            new_types,
            old_siblings: old.field_usage.siblings(),
            new_siblings: sibling_shapes(new),
        })
    }

    /// Sibling fields as `(owner, descriptor)` with old classes translated.
    fn translated_siblings(&self, old: &FieldKey) -> SiblingShape {
        let Some(siblings) = self.old_siblings.get(old) else {
            return BTreeSet::new();
        };
        siblings
            .iter()
            .map(|f| {
                let owner = self.classes.new_name(&f.owner).unwrap_or(&f.owner).to_string();
                let desc = self
                    .remapped_old_types
                    .get(f)
                    .map_or_else(|| f.desc.clone(), TypeDesc::to_descriptor);
                (owner, desc)
            })
            .collect()
    }

    fn co_occurrence(&self, translated: &SiblingShape, new: &FieldKey) -> f64 {
        let theirs = self.new_siblings.get(new).filter(|s| !s.is_empty());
        match (translated.is_empty(), theirs) {
            (true, None) => NO_SIBLINGS,
            (false, Some(theirs)) => jaccard_or_zero(translated, theirs),
            _ => 0.0,
        }
    }

    fn translated_users(&self, old: &FieldKey) -> BTreeSet<&MethodKey> {
        self.old
            .field_usage
            .methods_using(old)
            .iter()
            .filter_map(|m| self.methods.get(m))
            .collect()
    }

    /// Score one pair; `None` when the types can never match.
    pub fn score(&self, old: &FieldKey, new: &FieldKey) -> Option<(f64, FieldScoreBreakdown)> {
        let siblings = self.translated_siblings(old);
        let users = self.translated_users(old);
        self.score_with(old, new, &siblings, &users)
    }

    fn score_with(
        &self,
        old: &FieldKey,
        new: &FieldKey,
        siblings: &SiblingShape,
        translated_users: &BTreeSet<&MethodKey>,
    ) -> Option<(f64, FieldScoreBreakdown)> {
        let old_info = self.old.fields.get(old)?;
        let new_info = self.new.fields.get(new)?;
        let old_type = self.old_types.get(old)?;
        let new_type = self.new_types.get(new)?;
        let type_score =
            type_compatibility(old_type, self.remapped_old_types.get(old)?, new_type)?;

        let both_instance = !old_info.is_static && !new_info.is_static;
        let same_owner = self.classes.new_name(&old.owner) == Some(new.owner.as_str());
        let owner = if same_owner {
            let confidence = self.classes.confidence(&old.owner);
            confidence
                * if both_instance {
                    SAME_OWNER_INSTANCE
                } else {
                    SAME_OWNER_STATIC
                }
        } else if both_instance {
            WRONG_OWNER_INSTANCE
        } else {
            0.0
        };

        let old_users = self.old.field_usage.methods_using(old);
        let new_users = self.new.field_usage.methods_using(new);
        let new_user_refs: BTreeSet<&MethodKey> = new_users.iter().collect();
        let mut usage = jaccard_or_zero(translated_users, &new_user_refs);
        if usage > USAGE_BONUS_FLOOR && old_users.len() == new_users.len() {
            usage = (usage + USAGE_BONUS).min(1.0);
        }

        let primitive = old_type.is_primitive() && new_type.is_primitive();
        let volume = if primitive && !old_users.is_empty() && !new_users.is_empty() {
            old_users.len().min(new_users.len()) as f64
                / old_users.len().max(new_users.len()) as f64
                * VOLUME_SHARE
        } else {
            0.0
        };

        let profile = match (self.old.profiles.get(old), self.new.profiles.get(new)) {
            (Some(a), Some(b)) => profile_score(a, b, old_type.is_primitive()),
            _ => 0.0,
        };

        let breakdown = FieldScoreBreakdown {
            type_score,
            modifiers: modifier_score(old_info, new_info),
            owner,
            usage,
            co_occurrence: self.co_occurrence(siblings, new),
            proximity: if same_owner { proximity(old_info, new_info) } else { 0.0 },
            volume,
            profile,
        };
        let weights = if old_type.is_primitive() {
            &PRIMITIVE_WEIGHTS
        } else if old_info.is_static {
            &STATIC_WEIGHTS
        } else {
            &INSTANCE_WEIGHTS
        };
        Some((breakdown.weighted(weights), breakdown))
    }

    /// A stable-named field whose mapped owner declares the same name with
    /// the remapped descriptor.
    pub fn fixed_candidate(&self, old: &FieldKey) -> Option<FieldKey> {
        if self.classifier.is_obfuscated(&old.name) {
            return None;
        }
        let owner = self.classes.new_name(&old.owner)?;
        let desc = self.remapped_old_types.get(old)?.to_descriptor();
        let key = FieldKey::new(owner, &old.name, &desc);
        self.new.fields.contains_key(&key).then_some(key)
    }

    fn candidates_for(&self, old: &FieldKey) -> Vec<FieldCandidate> {
        if let Some(new) = self.fixed_candidate(old) {
            return vec![FieldCandidate {
                new,
                score: 1.0,
                fixed: true,
                breakdown: None,
            }];
        }
        let siblings = self.translated_siblings(old);
        let users = self.translated_users(old);
        let mut top = TopK::new(self.config.field_top_k);
        for new in self.new.fields.keys() {
            if let Some((score, breakdown)) = self.score_with(old, new, &siblings, &users) {
                top.push(score, Ranked { new, breakdown });
            }
        }
        top.into_sorted_vec()
            .into_iter()
            .map(|(score, ranked)| FieldCandidate {
                new: ranked.new.clone(),
                score,
                fixed: false,
                breakdown: Some(ranked.breakdown),
            })
            .collect()
    }

    /// Top-K candidates for every old field, scored in parallel.
    pub fn resolve(&self) -> FieldResolution {
        let start = Instant::now();
        let olds: Vec<&FieldKey> = self.old.fields.keys().collect();
        let candidates: BTreeMap<FieldKey, Vec<FieldCandidate>> = with_pool(self.config.workers, || {
            olds.par_iter()
                .map(|old| ((*old).clone(), self.candidates_for(old)))
                .collect()
        });

        let fixed = candidates
            .values()
            .filter(|list| list.first().is_some_and(|c| c.fixed))
            .count();
        let threshold = self.config.field_assign_threshold;
        let strong = candidates
            .values()
            .filter(|list| list.first().is_some_and(|c| c.score > threshold))
            .count();
        if !candidates.is_empty() && strong == 0 {
            warn!(threshold, "No field candidate scores above the assignment threshold");
        }
        for (old, list) in &candidates {
            if let Some(best) = list.first() {
                debug!(old = %old, new = %best.new, score = best.score, "Best field candidate");
            }
        }
        info!(
            old_fields = candidates.len(),
            new_fields = self.new.fields.len(),
            fixed,
            strong,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Field resolution"
        );
        FieldResolution { candidates }
    }
}

// Candidate payload ordered by new key only, so equal scores keep the
// smaller key.
struct Ranked<'k> {
    new: &'k FieldKey,
    breakdown: FieldScoreBreakdown,
}

impl PartialEq for Ranked<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.new == other.new
    }
}

impl Eq for Ranked<'_> {}

impl PartialOrd for Ranked<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked<'_> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.new.cmp(other.new)
    }
}
