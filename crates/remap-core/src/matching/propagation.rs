//! Grows the mapping outward from anchors using already-mapped users.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::matching::context::MatchContext;
use crate::matching::mapping::{MappingTable, MatchOrigin};
use crate::matching::select::{pick_best, Choice, Scored};

pub const FIELD_USER_VOTE: f64 = 3.0;
pub const PARAM_USER_VOTE: f64 = 2.0;
pub const EVIDENCE_SHARE: f64 = 0.6;
pub const SIMILARITY_SHARE: f64 = 0.4;

/// Candidate votes for one unmapped old class, cast by its mapped users.
/// Returns the votes and the total weight the users could have cast.
pub fn neighbor_votes<'n>(
    ctx: &MatchContext<'n>,
    table: &MappingTable,
    old: &str,
) -> (BTreeMap<&'n str, f64>, f64) {
    let mut votes: BTreeMap<&'n str, f64> = BTreeMap::new();
    let mut possible = 0.0;

    let mut cast = |mapped_user: Option<&str>, weight: f64, field: bool| {
        possible += weight;
        let Some(new_user) = mapped_user else {
            return;
        };
        let new_types = if field {
            ctx.new.evidence.field_types_of(new_user)
        } else {
            ctx.new.evidence.param_types_of(new_user)
        };
        for ty in new_types {
            let Some((_, name, _)) = ctx.new.fingerprints.get_full(ty.as_str()) else {
                continue;
            };
            if table.is_claimed(name) || !ctx.classifier.is_obfuscated(name) {
                continue;
            }
            *votes.entry(name.as_str()).or_insert(0.0) += weight;
        }
    };

    for user in ctx.old.evidence.external_field_users(old) {
        cast(table.new_of(user), FIELD_USER_VOTE, true);
    }
    for user in ctx.old.evidence.external_param_users(old) {
        cast(table.new_of(user), PARAM_USER_VOTE, false);
    }
    (votes, possible)
}

fn propose<'n>(
    ctx: &MatchContext<'n>,
    table: &MappingTable,
    old: &'n str,
) -> Option<(&'n str, Choice<&'n str>)> {
    let (votes, possible) = neighbor_votes(ctx, table, old);
    if votes.is_empty() || possible <= 0.0 {
        return None;
    }
    let scored = votes.into_iter().map(|(new, vote)| {
        let similarity = ctx.similarity(old, new);
        let evidence = vote / possible;
        Scored {
            id: new,
            score: EVIDENCE_SHARE * evidence + SIMILARITY_SHARE * similarity,
            similarity,
        }
    });
    let choice = pick_best(scored, ctx.config.min_similarity, ctx.config.tie_margin)?;
    if choice.best.score > ctx.config.propagation_threshold() {
        Some((old, choice))
    } else {
        None
    }
}

/// Run propagation rounds until nothing changes or the round cap is hit.
/// Each round scores every unmapped class against a frozen view of the
/// table, then applies the proposals best first.
pub fn propagate(ctx: &MatchContext<'_>, table: &mut MappingTable) -> usize {
    let mut total = 0;
    for round in 1..=ctx.config.propagation_rounds {
        let pending: Vec<&str> = ctx
            .old_obfuscated()
            .filter(|c| !table.is_mapped(c))
            .collect();
        let frozen: &MappingTable = table;
        let mut proposals: Vec<(&str, Choice<&str>)> = pending
            .par_iter()
            .filter_map(|&old| propose(ctx, frozen, old))
            .collect();
        proposals.sort_by(|(a_old, a), (b_old, b)| {
            b.best
                .score
                .total_cmp(&a.best.score)
                .then_with(|| a_old.cmp(b_old))
        });

        let mut claimed = 0;
        for (old, choice) in proposals {
            if choice.is_ambiguous() {
                warn!(
                    old,
                    chosen = choice.best.id,
                    tied = choice.tied,
                    "Ambiguous propagated match"
                );
            }
            if table.claim(old, choice.best.id, choice.best.score, MatchOrigin::Propagated) {
                debug!(old, new = choice.best.id, score = choice.best.score, round, "Propagated");
                claimed += 1;
            }
        }
        total += claimed;
        debug!(round, claimed, "Propagation round");
        if claimed == 0 {
            break;
        }
    }
    info!(propagated = total, "Propagation");
    total
}
