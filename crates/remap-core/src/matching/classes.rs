//! Class matching pipeline: fixed names, constant classes, anchors,
//! propagation, refinement, validation, audit.

use std::time::Instant;

use tracing::info;

use crate::analysis::pipeline::{with_pool, SnapshotIndex};
use crate::config::MatcherConfig;
use crate::errors::RemapResult;
use crate::matching::anchors::{match_constant_classes, select_anchors};
use crate::matching::context::MatchContext;
use crate::matching::mapping::{ClassMapping, ClassMatch, MappingTable, MatchOrigin, MatchReport, MatchStats};
use crate::matching::propagation::propagate;
use crate::matching::refinement::{
    audit, correct_constant_classes, mapping_consistency, refine, validate_references,
};
use crate::matching::similarity::count_closeness;

const CONFIDENCE_BOOST: f64 = 1.5;
const CONSTANT_CONFIDENCE_BOOST: f64 = 1.8;
const CONSTANT_FIELD_CLOSENESS: f64 = 0.9;

/// Reported confidence for a finished pair.
pub fn final_confidence(ctx: &MatchContext<'_>, old: &str, new: &str, origin: MatchOrigin, similarity: f64) -> f64 {
    if origin == MatchOrigin::Fixed {
        return 1.0;
    }
    let constant_pair = ctx.is_old_constant(old)
        && ctx.is_new_constant(new)
        && count_closeness(ctx.old_field_count(old), ctx.new_field_count(new))
            > CONSTANT_FIELD_CLOSENESS;
    let boost = if constant_pair {
        CONSTANT_CONFIDENCE_BOOST
    } else {
        CONFIDENCE_BOOST
    };
    (similarity * boost).min(1.0)
}

pub struct ClassMatcher<'c> {
    config: &'c MatcherConfig,
}

impl<'c> ClassMatcher<'c> {
    pub fn new(config: &'c MatcherConfig) -> Self {
        Self { config }
    }

    /// Produce an injective class mapping between two indexed snapshots.
    pub fn match_classes(&self, old: &SnapshotIndex, new: &SnapshotIndex) -> RemapResult<MatchReport> {
        self.config.validate()?;
        with_pool(self.config.workers, || self.run(old, new))
    }

    fn run(&self, old: &SnapshotIndex, new: &SnapshotIndex) -> RemapResult<MatchReport> {
        let start = Instant::now();
        let ctx = MatchContext::new(self.config, old, new);
        let mut table = MappingTable::new();

        let fixed = ctx.classifier.fixed_class_matches(old, new);
        for (o, n) in &fixed {
            table.fix(o, n);
        }

        let constants = match_constant_classes(&ctx, &mut table);
        let anchors = select_anchors(&ctx, &mut table);
        let propagated = propagate(&ctx, &mut table);
        let refined = refine(&ctx, &mut table);
        let corrected = correct_constant_classes(&ctx, &mut table);
        let validated = validate_references(&ctx, &mut table);
        let warnings = audit(&ctx, &table);

        let matches = table
            .iter()
            .map(|(o, claim)| {
                let similarity = if claim.origin == MatchOrigin::Fixed {
                    1.0
                } else {
                    ctx.similarity(o, &claim.new)
                };
                ClassMatch {
                    old: o.to_string(),
                    new: claim.new.clone(),
                    origin: claim.origin,
                    similarity,
                    consistency: mapping_consistency(&ctx, &table, o, &claim.new),
                    confidence: final_confidence(&ctx, o, &claim.new, claim.origin, similarity),
                    breakdown: ctx.breakdown(o, &claim.new),
                }
            })
            .collect();
        let mapping = ClassMapping::from_matches(matches)?;

        let stats = MatchStats {
            old_classes: old.len(),
            new_classes: new.len(),
            fixed: fixed.len(),
            constants: constants + corrected,
            anchors,
            propagated,
            refined,
            validated,
            unmapped: old.len().saturating_sub(mapping.len()),
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            mapped = mapping.len(),
            fixed = stats.fixed,
            constants = stats.constants,
            anchors,
            propagated,
            refined,
            validated,
            unmapped = stats.unmapped,
            suspicious = warnings.len(),
            elapsed_ms = stats.elapsed_ms,
            "Class matching complete"
        );
        Ok(MatchReport {
            mapping,
            warnings,
            stats,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::analysis::pipeline::build_index;
    use crate::models::{ClassKind, ClassNode, Snapshot};
    use crate::test_support::*;

    fn index(classes: Vec<ClassNode>, config: &MatcherConfig) -> SnapshotIndex {
        build_index(&Snapshot::new(classes).unwrap(), config).unwrap()
    }

    fn old_release(config: &MatcherConfig) -> SnapshotIndex {
        index(
            vec![
                holder("PacketWriter", &["eb", "gz"]),
                ClassNode::new("Removed", ClassKind::Class),
                rich_class("eb", 4),
                rich_class("gz", 7),
                constant_class("ce", 60),
                holder("h1", &["ce"]),
            ],
            config,
        )
    }

    fn new_release(config: &MatcherConfig) -> SnapshotIndex {
        index(
            vec![
                holder("PacketWriter", &["dn", "qa"]),
                rich_class("qa", 7),
                rich_class("dn", 4),
                constant_class("xk", 61),
                holder("h9", &["xk"]),
            ],
            config,
        )
    }

    #[test]
    fn renamed_classes_follow_their_shape() {
        let config = MatcherConfig::default();
        let (old, new) = (old_release(&config), new_release(&config));
        let report = ClassMatcher::new(&config).match_classes(&old, &new).unwrap();
        let mapping = &report.mapping;

        assert_eq!(mapping.new_name("eb"), Some("dn"));
        assert_eq!(mapping.new_name("gz"), Some("qa"));
        assert_eq!(mapping.new_name("ce"), Some("xk"));
        let eb = mapping.get("eb").unwrap();
        assert!(eb.similarity > 0.9, "similarity {}", eb.similarity);
        assert!(eb.breakdown.is_some());
        assert_eq!(mapping.get("ce").unwrap().origin, MatchOrigin::Constant);
        assert!(mapping.new_name("Removed").is_none());
    }

    #[test]
    fn stable_names_stay_fixed() {
        let config = MatcherConfig::default();
        let (old, new) = (old_release(&config), new_release(&config));
        let report = ClassMatcher::new(&config).match_classes(&old, &new).unwrap();
        let writer = report.mapping.get("PacketWriter").unwrap();
        assert_eq!(writer.new, "PacketWriter");
        assert_eq!(writer.origin, MatchOrigin::Fixed);
        assert_eq!(writer.confidence, 1.0);
        assert_eq!(report.stats.fixed, 1);
        assert_eq!(report.stats.unmapped, 1);
    }

    #[test]
    fn stable_name_wins_over_better_structural_match() {
        let config = MatcherConfig::default();
        let old = index(vec![rich_class("PacketWriter", 4)], &config);
        let new = index(
            vec![holder("PacketWriter", &["dn"]), rich_class("qz", 4)],
            &config,
        );
        let ctx = MatchContext::new(&config, &old, &new);
        assert!(ctx.similarity("PacketWriter", "qz") > ctx.similarity("PacketWriter", "PacketWriter"));

        let report = ClassMatcher::new(&config).match_classes(&old, &new).unwrap();
        let writer = report.mapping.get("PacketWriter").unwrap();
        assert_eq!(writer.new, "PacketWriter");
        assert_eq!(writer.origin, MatchOrigin::Fixed);
        assert_eq!(writer.confidence, 1.0);
        assert!(report.mapping.iter().all(|m| m.new != "qz"));
    }

    #[test]
    fn mapping_is_injective() {
        let config = MatcherConfig::default();
        let (old, new) = (old_release(&config), new_release(&config));
        let report = ClassMatcher::new(&config).match_classes(&old, &new).unwrap();
        let targets: BTreeSet<&str> = report.mapping.iter().map(|m| m.new.as_str()).collect();
        assert_eq!(targets.len(), report.mapping.len());
    }

    #[test]
    fn results_do_not_depend_on_worker_count() {
        let single = MatcherConfig {
            workers: 1,
            ..MatcherConfig::default()
        };
        let many = MatcherConfig {
            workers: 4,
            ..MatcherConfig::default()
        };
        let a = ClassMatcher::new(&single)
            .match_classes(&old_release(&single), &new_release(&single))
            .unwrap();
        let b = ClassMatcher::new(&many)
            .match_classes(&old_release(&many), &new_release(&many))
            .unwrap();
        assert_eq!(a.mapping.digest().unwrap(), b.mapping.digest().unwrap());
    }

    #[test]
    fn snapshot_matches_itself() {
        let config = MatcherConfig::default();
        let classes = vec![
            holder("Client", &["aa", "ab"]),
            rich_class("aa", 2),
            rich_class("ab", 3),
            rich_class("ac", 5),
            constant_class("ad", 70),
            holder("ae", &["ad"]),
        ];
        let snapshot = index(classes, &config);
        let report = ClassMatcher::new(&config)
            .match_classes(&snapshot, &snapshot)
            .unwrap();
        assert_eq!(report.mapping.len(), 6);
        for m in report.mapping.iter() {
            assert_eq!(m.old, m.new);
            assert_eq!(m.similarity, 1.0);
            assert_eq!(m.confidence, 1.0);
        }
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = MatcherConfig {
            min_similarity: 2.0,
            ..MatcherConfig::default()
        };
        let snapshot = index(vec![rich_class("aa", 2)], &MatcherConfig::default());
        assert!(ClassMatcher::new(&config)
            .match_classes(&snapshot, &snapshot)
            .is_err());
    }
}
