//! Post-propagation passes: low-confidence refinement, constant-class
//! correction, reference validation and the consistency audit.

use tracing::{debug, info, warn};

use crate::config::{
    CONSTANT_CORRECTION_FLOOR, HEAVY_USE_MIN_FIELDS, HEAVY_USE_USERS, LOW_CONFIDENCE,
    SUSPICIOUS_AGREEMENT,
};
use crate::matching::context::MatchContext;
use crate::matching::mapping::{MappingTable, MatchOrigin, SuspiciousMapping};
use crate::matching::select::{pick_best, score_all};
use crate::matching::similarity::count_closeness;

const FIELD_TYPE_WEIGHT: f64 = 2.0;
const FIELD_USER_WEIGHT: f64 = 3.0;
const NO_EVIDENCE_CONSISTENCY: f64 = 0.5;

const BASE_SHARE: f64 = 0.3;
const CONSTANT_USER_SHARE: f64 = 0.4;
const CONSTANT_FIELD_SHARE: f64 = 0.3;
const REFERENCE_SHARE: f64 = 0.7;

const CORRECTION_USER_SHARE: f64 = 0.7;
const CORRECTION_FIELD_SHARE: f64 = 0.3;

const MISMATCH_RATIO: f64 = 0.5;
const MIN_MISMATCHES: usize = 2;

/// Share of `old`'s dependencies that round-trip through `table` into the
/// matching relation of `new`: its field types (weight 2) and its external
/// field users (weight 3). 0.5 when there is nothing to check.
pub fn mapping_consistency(ctx: &MatchContext<'_>, table: &MappingTable, old: &str, new: &str) -> f64 {
    let (old_ev, new_ev) = (&ctx.old.evidence, &ctx.new.evidence);
    let mut agreeing = 0.0;
    let mut total = 0.0;

    let new_types = new_ev.field_types_of(new);
    for ty in old_ev.field_types_of(old).iter().filter(|ty| *ty != old) {
        if table.new_of(ty).is_some_and(|mapped| new_types.contains(mapped)) {
            agreeing += FIELD_TYPE_WEIGHT;
        }
        total += FIELD_TYPE_WEIGHT;
    }

    let new_users = new_ev.field_users_of(new);
    for user in old_ev.external_field_users(old) {
        let agrees = table
            .new_of(user)
            .is_some_and(|mapped| mapped != new && new_users.contains(mapped));
        if agrees {
            agreeing += FIELD_USER_WEIGHT;
        }
        total += FIELD_USER_WEIGHT;
    }

    if total > 0.0 {
        agreeing / total
    } else {
        NO_EVIDENCE_CONSISTENCY
    }
}

fn user_agreement(ctx: &MatchContext<'_>, table: &MappingTable, old: &str, new: &str) -> Option<f64> {
    let new_users = ctx.new.evidence.field_users_of(new);
    let mut users = 0usize;
    let mut agreeing = 0usize;
    for user in ctx.old.evidence.external_field_users(old) {
        users += 1;
        if table
            .new_of(user)
            .is_some_and(|mapped| mapped != new && new_users.contains(mapped))
        {
            agreeing += 1;
        }
    }
    (users > 0).then(|| agreeing as f64 / users as f64)
}

/// Score used when searching for a replacement. Constant-like pairs are
/// judged by user agreement and field count; others by how many of their
/// field and parameter types round-trip.
pub fn comprehensive_score(ctx: &MatchContext<'_>, table: &MappingTable, old: &str, new: &str) -> f64 {
    let mut score = ctx.similarity(old, new) * BASE_SHARE;

    if ctx.is_old_constant(old) || ctx.is_new_constant(new) {
        score += user_agreement(ctx, table, old, new).unwrap_or(0.0) * CONSTANT_USER_SHARE;
        score += count_closeness(ctx.old_field_count(old), ctx.new_field_count(new))
            * CONSTANT_FIELD_SHARE;
        return score;
    }

    let (old_ev, new_ev) = (&ctx.old.evidence, &ctx.new.evidence);
    let old_refs: Vec<&str> = old_ev
        .field_types_of(old)
        .union(old_ev.param_types_of(old))
        .map(String::as_str)
        .filter(|ty| *ty != old)
        .collect();
    if old_refs.is_empty() {
        return score;
    }
    let matches = old_refs
        .iter()
        .filter(|ty| {
            table.new_of(ty).is_some_and(|mapped| {
                mapped != new
                    && (new_ev.field_types_of(new).contains(mapped)
                        || new_ev.param_types_of(new).contains(mapped))
            })
        })
        .count();
    score + matches as f64 / old_refs.len() as f64 * REFERENCE_SHARE
}

/// Move low-confidence obfuscated matches to a better unclaimed candidate.
pub fn refine(ctx: &MatchContext<'_>, table: &mut MappingTable) -> usize {
    let threshold = ctx.config.refinement_threshold();
    let mut total = 0;
    for round in 1..=ctx.config.refinement_rounds {
        let low: Vec<String> = table
            .iter()
            .filter(|(old, claim)| {
                claim.origin != MatchOrigin::Fixed
                    && ctx.classifier.is_obfuscated(old)
                    && mapping_consistency(ctx, table, old, &claim.new) < LOW_CONFIDENCE
            })
            .map(|(old, _)| old.to_string())
            .collect();
        if low.is_empty() {
            break;
        }

        let mut moved = 0;
        for old in &low {
            let candidates = ctx.unclaimed_new(table);
            let scored = score_all(&candidates, |new| {
                (comprehensive_score(ctx, table, old, new), ctx.similarity(old, new))
            });
            let Some(choice) = pick_best(scored, threshold, ctx.config.tie_margin) else {
                continue;
            };
            let from = table.new_of(old).unwrap_or_default().to_string();
            if table.reassign(old, choice.best.id, choice.best.score, MatchOrigin::Refined) {
                debug!(old = old.as_str(), from = %from, to = choice.best.id, round, "Refined");
                moved += 1;
            }
        }
        total += moved;
        if moved == 0 {
            break;
        }
    }
    info!(refined = total, "Refinement");
    total
}

/// Re-check constant-like matches against constant-like candidates by user
/// agreement and field-count closeness.
pub fn correct_constant_classes(ctx: &MatchContext<'_>, table: &mut MappingTable) -> usize {
    let pending: Vec<(String, String)> = table
        .iter()
        .filter(|(old, claim)| claim.origin != MatchOrigin::Fixed && ctx.is_old_constant(old))
        .map(|(old, claim)| (old.to_string(), claim.new.clone()))
        .collect();

    let mut corrected = 0;
    for (old, current) in pending {
        if ctx.old.evidence.external_field_user_count(&old) == 0 {
            continue;
        }
        let candidates: Vec<&str> = ctx
            .new_obfuscated()
            .filter(|new| ctx.is_new_constant(new) && (*new == current || !table.is_claimed(new)))
            .collect();
        let scored = score_all(&candidates, |new| {
            let agreement = user_agreement(ctx, table, &old, new).unwrap_or(0.0);
            let fields = count_closeness(ctx.old_field_count(&old), ctx.new_field_count(new));
            (
                agreement * CORRECTION_USER_SHARE + fields * CORRECTION_FIELD_SHARE,
                ctx.similarity(&old, new),
            )
        });
        let Some(choice) = pick_best(scored, 0.0, ctx.config.tie_margin) else {
            continue;
        };
        if choice.best.id == current || choice.best.score <= CONSTANT_CORRECTION_FLOOR {
            continue;
        }
        if table.reassign(&old, choice.best.id, choice.best.score, MatchOrigin::Constant) {
            info!(old = %old, from = %current, to = choice.best.id, "Corrected constant class");
            corrected += 1;
        }
    }
    corrected
}

/// Referenced types of `old` that are mapped, split into those found among
/// `new`'s referenced types and those that are not.
pub fn reference_agreement(
    ctx: &MatchContext<'_>,
    table: &MappingTable,
    old: &str,
    new: &str,
) -> (usize, usize) {
    let new_refs = ctx.new.evidence.referenced_types(new);
    let mut matches = 0;
    let mut mismatches = 0;
    for ty in ctx.old.evidence.referenced_types(old) {
        if let Some(mapped) = table.new_of(ty) {
            if new_refs.contains(mapped) {
                matches += 1;
            } else {
                mismatches += 1;
            }
        }
    }
    (matches, mismatches)
}

/// Reassign pairs whose references mostly disagree to an unclaimed
/// candidate that is both more similar and more consistent.
pub fn validate_references(ctx: &MatchContext<'_>, table: &mut MappingTable) -> usize {
    let mut total = 0;
    for round in 1..=ctx.config.validation_rounds {
        let olds: Vec<String> = table
            .iter()
            .filter(|(old, claim)| {
                claim.origin != MatchOrigin::Fixed && ctx.classifier.is_obfuscated(old)
            })
            .map(|(old, _)| old.to_string())
            .collect();

        let mut changed = 0;
        for old in &olds {
            let Some(current) = table.new_of(old).map(str::to_string) else {
                continue;
            };
            let (matches, mismatches) = reference_agreement(ctx, table, old, &current);
            let ratio = mismatches as f64 / (matches + mismatches).max(1) as f64;
            if ratio <= MISMATCH_RATIO || mismatches <= MIN_MISMATCHES {
                continue;
            }

            let current_similarity = ctx.similarity(old, &current);
            let candidates = ctx.unclaimed_new(table);
            let scored = score_all(&candidates, |new| {
                let similarity = ctx.similarity(old, new);
                let (better, _) = reference_agreement(ctx, table, old, new);
                let score = if better > matches { similarity } else { -1.0 };
                (score, similarity)
            });
            let Some(choice) = pick_best(scored, current_similarity, ctx.config.tie_margin) else {
                continue;
            };
            if table.reassign(old, choice.best.id, choice.best.score, MatchOrigin::Validated) {
                debug!(old = old.as_str(), from = %current, to = choice.best.id, round, "Validated");
                changed += 1;
            }
        }
        total += changed;
        if changed == 0 {
            break;
        }
    }
    info!(validated = total, "Reference validation");
    total
}

/// Heavily used obfuscated classes whose mapped field users mostly do not
/// hold a field of the mapped type. Reported, never changed.
pub fn audit(ctx: &MatchContext<'_>, table: &MappingTable) -> Vec<SuspiciousMapping> {
    let mut flagged = Vec::new();
    for (old, claim) in table.iter() {
        if claim.origin == MatchOrigin::Fixed || !ctx.classifier.is_obfuscated(old) {
            continue;
        }
        let users: Vec<&str> = ctx.old.evidence.external_field_users(old).collect();
        if users.len() <= HEAVY_USE_USERS {
            continue;
        }
        let mut total = 0;
        let mut agreeing = 0;
        for user in users {
            if let Some(mapped) = table.new_of(user) {
                total += 1;
                if ctx.new.evidence.field_types_of(mapped).contains(&claim.new) {
                    agreeing += 1;
                }
            }
        }
        if total <= HEAVY_USE_MIN_FIELDS {
            continue;
        }
        let ratio = agreeing as f64 / total as f64;
        if ratio < SUSPICIOUS_AGREEMENT {
            warn!(old, new = claim.new.as_str(), agreeing, total, "Suspicious mapping for heavily used type");
            flagged.push(SuspiciousMapping {
                old: old.to_string(),
                new: claim.new.clone(),
                agreeing,
                total,
                ratio,
            });
        }
    }
    flagged
}
