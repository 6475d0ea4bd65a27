//! Seed matches: the constant-class pre-pass and high-confidence anchors.

use tracing::{debug, info, warn};

use crate::matching::context::MatchContext;
use crate::matching::mapping::{MappingTable, MatchOrigin};
use crate::matching::select::{pick_best, score_all};
use crate::matching::similarity::count_closeness;

const MANY_FIELD_TYPES: usize = 3;
const LARGE_CLASS_FIELDS: usize = 10;
const METHOD_COUNT_TOLERANCE: usize = 10;
const METHOD_COUNT_FLOOR: f64 = 0.7;
const DISTINCTIVE_USER_COUNT: usize = 3;

// ---------------------------------------------------------------------------
// Constant classes
// ---------------------------------------------------------------------------

/// Score for two constant-like classes. Method and opcode shape carry no
/// signal for them, so only user and field counts are compared.
pub fn constant_class_score(ctx: &MatchContext<'_>, old: &str, new: &str) -> f64 {
    let old_users = ctx.old.evidence.external_field_user_count(old);
    let new_users = ctx.new.evidence.external_field_user_count(new);
    let users = if old_users == new_users && old_users > 0 {
        1.0
    } else if old_users.abs_diff(new_users) <= 1 {
        0.8
    } else {
        0.0
    };
    let fields = count_closeness(ctx.old_field_count(old), ctx.new_field_count(new));
    (users * 5.0 + fields * 4.0) / 9.0
}

/// Match constant-like obfuscated classes among themselves, rarest
/// external-user count first.
pub fn match_constant_classes(ctx: &MatchContext<'_>, table: &mut MappingTable) -> usize {
    let mut olds: Vec<&str> = ctx
        .old_obfuscated()
        .filter(|c| !table.is_mapped(c) && ctx.is_old_constant(c))
        .collect();
    olds.sort_by_key(|c| (ctx.old.evidence.external_field_user_count(c), *c));

    let mut matched = 0;
    for old in olds {
        let candidates: Vec<&str> = ctx
            .unclaimed_new(table)
            .into_iter()
            .filter(|c| ctx.is_new_constant(c))
            .collect();
        let scored = score_all(&candidates, |new| {
            (constant_class_score(ctx, old, new), ctx.similarity(old, new))
        });
        let Some(choice) = pick_best(scored, ctx.config.min_similarity, ctx.config.tie_margin)
        else {
            continue;
        };
        if choice.is_ambiguous() {
            warn!(
                old,
                chosen = choice.best.id,
                tied = choice.tied,
                "Ambiguous constant class match"
            );
        }
        if table.claim(old, choice.best.id, choice.best.score, MatchOrigin::Constant) {
            debug!(old, new = choice.best.id, score = choice.best.score, "Constant class");
            matched += 1;
        }
    }
    info!(matched, "Constant class pre-pass");
    matched
}

// ---------------------------------------------------------------------------
// Anchors
// ---------------------------------------------------------------------------

/// Externally visible classes are less ambiguous, so they anchor first.
pub fn anchor_priority(ctx: &MatchContext<'_>, old: &str) -> usize {
    let evidence = &ctx.old.evidence;
    let external = (evidence.external_field_refs(old) + evidence.external_param_refs(old)) as usize;
    let static_methods = ctx.old.fingerprint(old).map_or(0, |fp| fp.static_method_count);
    external * 10 + static_methods
}

/// Fingerprint similarity combined with evidence-shape closeness.
pub fn anchor_score(ctx: &MatchContext<'_>, old: &str, new: &str) -> f64 {
    let (Some(old_fp), Some(new_fp)) = (ctx.old.fingerprint(old), ctx.new.fingerprint(new)) else {
        return 0.0;
    };
    let (old_ev, new_ev) = (&ctx.old.evidence, &ctx.new.evidence);

    let mut score = ctx.similarity(old, new) * 2.0;
    let mut weight = 2.0;

    let old_types = old_ev.field_types_of(old).len();
    let new_types = new_ev.field_types_of(new).len();
    if (old_types > MANY_FIELD_TYPES && new_types == 0)
        || (new_types > MANY_FIELD_TYPES && old_types == 0)
    {
        // One side holds many typed fields, the other none.
        weight += 10.0;
    } else if old_types > 0 || new_types > 0 {
        score += count_closeness(old_types, new_types) * 5.0;
        weight += 5.0;
    }

    if old_fp.field_count > LARGE_CLASS_FIELDS && new_fp.field_count > LARGE_CLASS_FIELDS {
        score += count_closeness(old_fp.field_count, new_fp.field_count) * 4.0;
        weight += 4.0;
    }

    let old_users = old_ev.external_field_user_count(old);
    let new_users = new_ev.external_field_user_count(new);
    if old_users > 0 && new_users > 0 {
        let closeness = count_closeness(old_users, new_users);
        let w = if old_users == new_users {
            2.0
        } else if old_users <= DISTINCTIVE_USER_COUNT {
            6.0
        } else {
            3.0
        };
        score += closeness * w;
        weight += w;
    }

    let threshold = ctx.config.constant_self_refs;
    let old_self = old_ev.self_field_refs(old);
    let new_self = new_ev.self_field_refs(new);
    if old_self > threshold && new_self > threshold {
        score += old_self.min(new_self) as f64 / old_self.max(new_self) as f64 * 0.3;
        weight += 0.3;
    }

    let mut methods = count_closeness(old_fp.method_count, new_fp.method_count);
    if old_fp.method_count.abs_diff(new_fp.method_count) <= METHOD_COUNT_TOLERANCE {
        methods = methods.max(METHOD_COUNT_FLOOR);
    }
    score += methods;
    weight += 1.0;

    score / weight
}

/// Unmapped obfuscated old classes, highest priority first, then by name.
pub fn anchor_order<'a>(ctx: &MatchContext<'a>, table: &MappingTable) -> Vec<&'a str> {
    let mut olds: Vec<(usize, &str)> = ctx
        .old_obfuscated()
        .filter(|c| !table.is_mapped(c))
        .map(|c| (anchor_priority(ctx, c), c))
        .collect();
    olds.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
    olds.into_iter().map(|(_, c)| c).collect()
}

/// Whether `old` is also the best unmapped old candidate for `new`.
fn is_mutual_best(ctx: &MatchContext<'_>, table: &MappingTable, old: &str, new: &str) -> bool {
    let olds: Vec<&str> = ctx
        .old_obfuscated()
        .filter(|c| !table.is_mapped(c))
        .collect();
    let scored = score_all(&olds, |o| (anchor_score(ctx, o, new), ctx.similarity(o, new)));
    pick_best(scored, ctx.config.min_similarity, ctx.config.tie_margin)
        .is_some_and(|choice| choice.best.id == old)
}

/// Greedy anchor assignment in priority order. A candidate must clear the
/// anchor threshold, be unclaimed, and pick `old` back as its own best.
pub fn select_anchors(ctx: &MatchContext<'_>, table: &mut MappingTable) -> usize {
    let threshold = ctx.config.anchor_threshold();
    let mut anchored = 0;
    for old in anchor_order(ctx, table) {
        let candidates = ctx.unclaimed_new(table);
        let scored = score_all(&candidates, |new| {
            (anchor_score(ctx, old, new), ctx.similarity(old, new))
        });
        let Some(choice) = pick_best(scored, ctx.config.min_similarity, ctx.config.tie_margin)
        else {
            continue;
        };
        if choice.best.score <= threshold {
            continue;
        }
        if !is_mutual_best(ctx, table, old, choice.best.id) {
            debug!(old, new = choice.best.id, "Anchor candidate prefers another class");
            continue;
        }
        if choice.is_ambiguous() {
            warn!(
                old,
                chosen = choice.best.id,
                tied = choice.tied,
                "Ambiguous anchor"
            );
        }
        if table.claim(old, choice.best.id, choice.best.score, MatchOrigin::Anchor) {
            debug!(old, new = choice.best.id, score = choice.best.score, "Anchor");
            anchored += 1;
        }
    }
    info!(anchored, threshold, "Anchor selection");
    anchored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::pipeline::build_index;
    use crate::config::MatcherConfig;
    use crate::models::{ClassKind, ClassNode, FieldNode, Snapshot};
    use crate::test_support::*;

    #[test]
    fn constant_classes_match_by_users_and_size() {
        let config = MatcherConfig::default();
        let old = build_index(
            &Snapshot::new(vec![
                constant_class("ce", 60),
                constant_class("cf", 90),
                holder("h1", &["ce"]),
                holder("h2", &["cf"]),
                holder("h3", &["cf"]),
            ])
            .unwrap(),
            &config,
        )
        .unwrap();
        let new = build_index(
            &Snapshot::new(vec![
                constant_class("xa", 90),
                constant_class("xb", 60),
                holder("h1", &["xb"]),
                holder("h2", &["xa"]),
                holder("h3", &["xa"]),
            ])
            .unwrap(),
            &config,
        )
        .unwrap();
        let ctx = MatchContext::new(&config, &old, &new);
        let mut table = MappingTable::new();
        assert_eq!(match_constant_classes(&ctx, &mut table), 2);
        assert_eq!(table.new_of("ce"), Some("xb"));
        assert_eq!(table.new_of("cf"), Some("xa"));
    }

    #[test]
    fn anchors_claim_each_new_class_once() {
        let config = MatcherConfig::default();
        let old_snapshot = Snapshot::new(vec![rich_class("eb", 3), rich_class("ab", 8)]).unwrap();
        let new_snapshot = Snapshot::new(vec![rich_class("dn", 3), rich_class("xy", 8)]).unwrap();
        let old = build_index(&old_snapshot, &config).unwrap();
        let new = build_index(&new_snapshot, &config).unwrap();
        let ctx = MatchContext::new(&config, &old, &new);
        let mut table = MappingTable::new();
        assert_eq!(select_anchors(&ctx, &mut table), 2);
        assert_eq!(table.new_of("eb"), Some("dn"));
        assert_eq!(table.new_of("ab"), Some("xy"));
    }

    #[test]
    fn anchor_score_penalizes_field_type_mismatch() {
        let config = MatcherConfig::default();
        let typed = ClassNode::new("ab", ClassKind::Class)
            .field(FieldNode::new("a", "Lc1;"))
            .field(FieldNode::new("b", "Lc2;"))
            .field(FieldNode::new("c", "Lc3;"))
            .field(FieldNode::new("d", "Lc4;"));
        let untyped = ClassNode::new("xy", ClassKind::Class)
            .field(FieldNode::new("a", "I"))
            .field(FieldNode::new("b", "I"))
            .field(FieldNode::new("c", "I"))
            .field(FieldNode::new("d", "I"));
        let mirror = ClassNode { name: "zz".into(), ..typed.clone() };
        let old = build_index(&Snapshot::new(vec![typed]).unwrap(), &config).unwrap();
        let new = build_index(&Snapshot::new(vec![untyped, mirror]).unwrap(), &config).unwrap();
        let ctx = MatchContext::new(&config, &old, &new);
        let penalized = anchor_score(&ctx, "ab", "xy");
        let aligned = anchor_score(&ctx, "ab", "zz");
        assert!(aligned > 0.9, "aligned {aligned}");
        assert!(penalized < 0.4, "penalized {penalized}");
    }

    #[test]
    fn anchors_require_a_mutual_best() {
        let config = MatcherConfig::default();
        let old_snapshot = Snapshot::new(vec![rich_class("ab", 3), rich_class("ac", 4)]).unwrap();
        let new_snapshot = Snapshot::new(vec![rich_class("xy", 4)]).unwrap();
        let old = build_index(&old_snapshot, &config).unwrap();
        let new = build_index(&new_snapshot, &config).unwrap();
        let ctx = MatchContext::new(&config, &old, &new);
        let mut table = MappingTable::new();
        select_anchors(&ctx, &mut table);
        assert_eq!(table.new_of("ac"), Some("xy"));
        assert_eq!(table.new_of("ab"), None);
    }

    fn referenced_snapshot() -> Snapshot {
        Snapshot::new(vec![
            rich_class("ab", 2),
            holder("ac", &["zz", "yy"]),
            holder("u1", &["ab"]),
            holder("u2", &["ab"]),
            holder("u3", &["ab"]),
        ])
        .unwrap()
    }

    #[test]
    fn priority_favours_classes_referenced_by_others() {
        let config = MatcherConfig::default();
        let old = build_index(&referenced_snapshot(), &config).unwrap();
        let ctx = MatchContext::new(&config, &old, &old);
        assert_eq!(anchor_priority(&ctx, "ab"), 30);
        assert_eq!(anchor_priority(&ctx, "ac"), 0);
    }

    #[test]
    fn anchors_are_visited_in_priority_order() {
        let config = MatcherConfig::default();
        let old = build_index(&referenced_snapshot(), &config).unwrap();
        let ctx = MatchContext::new(&config, &old, &old);
        let order = anchor_order(&ctx, &MappingTable::new());
        assert_eq!(order, vec!["ab", "ac", "u1", "u2", "u3"]);

        let mut table = MappingTable::new();
        table.fix("ab", "ab");
        assert_eq!(anchor_order(&ctx, &table), vec!["ac", "u1", "u2", "u3"]);
    }
}
