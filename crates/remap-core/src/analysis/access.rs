//! Behavioral field access profiles built from the instructions surrounding
//! every field read and write.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::models::{ClassNode, FieldKey, Instruction, MethodKey};
use crate::opcodes;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Increment,
    Decrement,
    Arithmetic,
    Comparison,
    ArrayIndex,
    BooleanCheck,
    ConstantLoad,
}

impl AccessKind {
    pub const ALL: [AccessKind; 9] = [
        AccessKind::Read,
        AccessKind::Write,
        AccessKind::Increment,
        AccessKind::Decrement,
        AccessKind::Arithmetic,
        AccessKind::Comparison,
        AccessKind::ArrayIndex,
        AccessKind::BooleanCheck,
        AccessKind::ConstantLoad,
    ];
}

/// Count of each access kind observed for one field.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AccessCounts {
    pub read: u32,
    pub write: u32,
    pub increment: u32,
    pub decrement: u32,
    pub arithmetic: u32,
    pub comparison: u32,
    pub array_index: u32,
    pub boolean_check: u32,
    pub constant_load: u32,
}

impl AccessCounts {
    pub fn get(&self, kind: AccessKind) -> u32 {
        match kind {
            AccessKind::Read => self.read,
            AccessKind::Write => self.write,
            AccessKind::Increment => self.increment,
            AccessKind::Decrement => self.decrement,
            AccessKind::Arithmetic => self.arithmetic,
            AccessKind::Comparison => self.comparison,
            AccessKind::ArrayIndex => self.array_index,
            AccessKind::BooleanCheck => self.boolean_check,
            AccessKind::ConstantLoad => self.constant_load,
        }
    }

    fn slot(&mut self, kind: AccessKind) -> &mut u32 {
        match kind {
            AccessKind::Read => &mut self.read,
            AccessKind::Write => &mut self.write,
            AccessKind::Increment => &mut self.increment,
            AccessKind::Decrement => &mut self.decrement,
            AccessKind::Arithmetic => &mut self.arithmetic,
            AccessKind::Comparison => &mut self.comparison,
            AccessKind::ArrayIndex => &mut self.array_index,
            AccessKind::BooleanCheck => &mut self.boolean_check,
            AccessKind::ConstantLoad => &mut self.constant_load,
        }
    }

    pub fn record(&mut self, kind: AccessKind) {
        *self.slot(kind) += 1;
    }

    fn absorb(&mut self, other: &AccessCounts) {
        for kind in AccessKind::ALL {
            *self.slot(kind) += other.get(kind);
        }
    }

    /// `1 - L1 / (2 * Σmax)` over all kinds; 1.0 when neither side has data.
    pub fn similarity(&self, other: &AccessCounts) -> f64 {
        let mut diff = 0.0;
        let mut total = 0.0;
        for kind in AccessKind::ALL {
            let (a, b) = (self.get(kind), other.get(kind));
            total += a.max(b) as f64;
            diff += a.abs_diff(b) as f64;
        }
        if total == 0.0 {
            1.0
        } else {
            1.0 - diff / (2.0 * total)
        }
    }
}

/// Role guesses derived from access count ratios.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AccessPatterns {
    pub counter: bool,
    pub flag: bool,
    pub index: bool,
    pub constant: bool,
    pub multiplier: bool,
}

// ---------------------------------------------------------------------------
// FieldAccessProfile
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldAccessProfile {
    pub field: FieldKey,
    pub counts: AccessCounts,
    pub read_methods: BTreeSet<MethodKey>,
    pub write_methods: BTreeSet<MethodKey>,
    pub patterns: AccessPatterns,
}

impl FieldAccessProfile {
    pub fn new(field: FieldKey) -> Self {
        Self {
            field,
            counts: AccessCounts::default(),
            read_methods: BTreeSet::new(),
            write_methods: BTreeSet::new(),
            patterns: AccessPatterns::default(),
        }
    }

    pub fn merge(&mut self, other: FieldAccessProfile) {
        self.counts.absorb(&other.counts);
        self.read_methods.extend(other.read_methods);
        self.write_methods.extend(other.write_methods);
    }

    /// Derive [`AccessPatterns`] from the accumulated counts.
    pub fn classify(&mut self) {
        let c = &self.counts;
        let desc = self.field.desc.as_str();
        self.patterns = AccessPatterns {
            counter: c.write > 0 && c.increment + c.decrement > c.write / 2,
            flag: c.boolean_check > c.read / 2 || (desc == "Z" && c.comparison > 0),
            index: c.array_index > c.read / 3,
            constant: self.write_methods.len() <= 1 && c.read > c.write * 3,
            multiplier: c.arithmetic > c.read / 2 && matches!(desc, "I" | "J"),
        };
    }

    fn read_write_ratio(&self) -> f64 {
        self.read_methods.len() as f64 / self.write_methods.len().max(1) as f64
    }

    /// Agreement of classifications, access histograms, and read/write
    /// method ratios, in [0, 1].
    pub fn similarity(&self, other: &FieldAccessProfile) -> f64 {
        let (a, b) = (&self.patterns, &other.patterns);
        let mut score = 0.0;
        let mut weight = 0.0;

        let mut pattern = |mine: bool, theirs: bool, full: f64| {
            if mine && theirs {
                score += full;
                weight += full;
            } else if mine || theirs {
                weight += full / 2.0;
            }
        };
        pattern(a.counter, b.counter, 2.0);
        pattern(a.flag, b.flag, 2.0);
        pattern(a.index, b.index, 2.0);
        pattern(a.constant, b.constant, 1.5);
        pattern(a.multiplier, b.multiplier, 1.5);

        score += self.counts.similarity(&other.counts) * 3.0;
        weight += 3.0;

        let ratio_diff = (self.read_write_ratio() - other.read_write_ratio()).abs();
        score += 1.0 / (1.0 + ratio_diff);
        weight += 1.0;

        score / weight
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Declared fields and the superclass chain of one snapshot. A field
/// reference may name a subclass as its owner; it resolves to the class that
/// actually declares the field.
#[derive(Debug, Default)]
pub struct FieldOwners {
    declared: BTreeSet<FieldKey>,
    supers: BTreeMap<String, String>,
}

impl FieldOwners {
    pub fn from_classes<'c>(classes: impl IntoIterator<Item = &'c ClassNode>) -> Self {
        let mut owners = FieldOwners::default();
        for class in classes {
            owners
                .declared
                .extend(class.fields.iter().map(|f| class.field_key(f)));
            if let Some(parent) = &class.super_name {
                owners.supers.insert(class.name.clone(), parent.clone());
            }
        }
        owners
    }

    pub fn declared(&self) -> &BTreeSet<FieldKey> {
        &self.declared
    }

    /// Declaring field for `key`, walking up from its owner. `None` for
    /// fields declared outside the snapshot.
    pub fn resolve(&self, key: &FieldKey) -> Option<FieldKey> {
        let mut owner = key.owner.as_str();
        // Bounded so a malformed cyclic hierarchy cannot loop.
        for _ in 0..=self.supers.len() {
            let candidate = FieldKey::new(owner, &key.name, &key.desc);
            if self.declared.contains(&candidate) {
                return Some(candidate);
            }
            owner = self.supers.get(owner).map(String::as_str)?;
        }
        None
    }
}

fn same_field(insn: &Instruction, target: &FieldKey, owners: &FieldOwners) -> bool {
    insn.field_key()
        .and_then(|k| owners.resolve(k))
        .is_some_and(|k| &k == target)
}

/// `get; const 1; add|sub; put` on the same field.
fn unit_step_before(
    code: &[Instruction],
    put_index: usize,
    target: &FieldKey,
    owners: &FieldOwners,
    ops: [u8; 2],
) -> bool {
    if put_index < 3 {
        return false;
    }
    let step = &code[put_index - 1];
    let unit = &code[put_index - 2];
    let load = &code[put_index - 3];
    ops.contains(&step.opcode)
        && opcodes::is_unit_const(unit.opcode)
        && same_field(load, target, owners)
}

/// Profiles for snapshot fields touched by the methods of one class.
/// Patterns are not classified yet; merge across classes first.
pub fn scan_class_accesses(
    class: &ClassNode,
    owners: &FieldOwners,
) -> BTreeMap<FieldKey, FieldAccessProfile> {
    let mut profiles: BTreeMap<FieldKey, FieldAccessProfile> = BTreeMap::new();
    for method in &class.methods {
        let method_key = class.method_key(method);
        let code = &method.instructions;
        for (i, insn) in code.iter().enumerate() {
            let Some(key) = insn.field_key().and_then(|k| owners.resolve(k)) else {
                continue;
            };
            let profile = profiles
                .entry(key.clone())
                .or_insert_with(|| FieldAccessProfile::new(key.clone()));

            if opcodes::is_field_read(insn.opcode) {
                profile.counts.record(AccessKind::Read);
                profile.read_methods.insert(method_key.clone());
                if let Some(next) = code.get(i + 1) {
                    if opcodes::is_array_load(next.opcode) {
                        profile.counts.record(AccessKind::ArrayIndex);
                    }
                    if opcodes::is_comparison(next.opcode) {
                        profile.counts.record(AccessKind::Comparison);
                    }
                    if opcodes::is_boolean_check(next.opcode) {
                        profile.counts.record(AccessKind::BooleanCheck);
                    }
                    if opcodes::is_arithmetic(next.opcode) {
                        profile.counts.record(AccessKind::Arithmetic);
                    }
                }
            } else if opcodes::is_field_write(insn.opcode) {
                profile.counts.record(AccessKind::Write);
                profile.write_methods.insert(method_key.clone());
                if unit_step_before(code, i, &key, owners, [opcodes::IADD, opcodes::LADD]) {
                    profile.counts.record(AccessKind::Increment);
                } else if unit_step_before(code, i, &key, owners, [opcodes::ISUB, opcodes::LSUB]) {
                    profile.counts.record(AccessKind::Decrement);
                }
                if let Some(prev) = i.checked_sub(1).map(|p| &code[p]) {
                    if opcodes::is_ldc(prev.opcode) || opcodes::is_small_int_const(prev.opcode) {
                        profile.counts.record(AccessKind::ConstantLoad);
                    }
                }
            }
        }
    }
    profiles
}

/// Merge per-class scans and classify. Every declared field gets a profile,
/// even if nothing touches it.
pub fn finish_profiles(
    declared: &BTreeSet<FieldKey>,
    partials: Vec<BTreeMap<FieldKey, FieldAccessProfile>>,
) -> BTreeMap<FieldKey, FieldAccessProfile> {
    let mut profiles: BTreeMap<FieldKey, FieldAccessProfile> = declared
        .iter()
        .map(|key| (key.clone(), FieldAccessProfile::new(key.clone())))
        .collect();
    for partial in partials {
        for (key, profile) in partial {
            if let Some(existing) = profiles.get_mut(&key) {
                existing.merge(profile);
            }
        }
    }
    for profile in profiles.values_mut() {
        profile.classify();
    }
    profiles
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassKind, FieldNode, MethodNode};
    use crate::opcodes::*;

    fn increment(owner: &str, name: &str) -> Vec<Instruction> {
        vec![
            Instruction::op(ALOAD_0),
            Instruction::op(DUP),
            Instruction::field(GETFIELD, owner, name, "I"),
            Instruction::op(ICONST_1),
            Instruction::op(IADD),
            Instruction::field(PUTFIELD, owner, name, "I"),
        ]
    }

    fn flag_check(owner: &str, name: &str) -> Vec<Instruction> {
        vec![
            Instruction::op(ALOAD_0),
            Instruction::field(GETFIELD, owner, name, "I"),
            Instruction::int(IFEQ, 4),
            Instruction::op(RETURN),
        ]
    }

    fn profile_of(class: &ClassNode, field: &str) -> FieldAccessProfile {
        let owners = FieldOwners::from_classes([class]);
        let partial = scan_class_accesses(class, &owners);
        let mut profiles = finish_profiles(owners.declared(), vec![partial]);
        profiles
            .remove(&FieldKey::new(&class.name, field, "I"))
            .unwrap()
    }

    fn counter_class(name: &str, times: usize) -> ClassNode {
        let mut code = Vec::new();
        for _ in 0..times {
            code.extend(increment(name, "a"));
        }
        ClassNode::new(name, ClassKind::Class)
            .field(FieldNode::new("a", "I"))
            .method(MethodNode::new("t", "()V").with_code(code))
    }

    fn flag_class(name: &str, times: usize) -> ClassNode {
        let mut code = Vec::new();
        for _ in 0..times {
            code.extend(flag_check(name, "a"));
        }
        code.extend([
            Instruction::op(ALOAD_0),
            Instruction::op(ICONST_1),
            Instruction::field(PUTFIELD, name, "a", "I"),
        ]);
        ClassNode::new(name, ClassKind::Class)
            .field(FieldNode::new("a", "I"))
            .method(MethodNode::new("t", "()V").with_code(code))
    }

    #[test]
    fn increments_classify_as_counter() {
        let profile = profile_of(&counter_class("ab", 250), "a");
        assert_eq!(profile.counts.read, 250);
        assert_eq!(profile.counts.write, 250);
        assert_eq!(profile.counts.increment, 250);
        assert!(profile.patterns.counter);
        assert!(!profile.patterns.flag);
    }

    #[test]
    fn boolean_checks_classify_as_flag() {
        let profile = profile_of(&flag_class("cd", 40), "a");
        assert_eq!(profile.counts.boolean_check, 40);
        assert_eq!(profile.counts.constant_load, 1);
        assert!(profile.patterns.flag);
        assert!(!profile.patterns.counter);
        assert!(profile.patterns.constant);
    }

    #[test]
    fn counter_prefers_counter_over_flag() {
        let old = profile_of(&counter_class("ab", 250), "a");
        let other_counter = profile_of(&counter_class("xy", 240), "a");
        let flag = profile_of(&flag_class("cd", 250), "a");
        let with_counter = old.similarity(&other_counter);
        let with_flag = old.similarity(&flag);
        assert!(
            with_counter > with_flag,
            "counter {with_counter} should beat flag {with_flag}"
        );
    }

    #[test]
    fn untouched_fields_still_get_profiles() {
        let class = ClassNode::new("ab", ClassKind::Class).field(FieldNode::new("a", "I"));
        let profile = profile_of(&class, "a");
        assert_eq!(profile.counts, AccessCounts::default());
        assert!((profile.similarity(&profile.clone()) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn decrement_and_array_index() {
        let code = vec![
            Instruction::field(GETSTATIC, "ab", "a", "I"),
            Instruction::op(ICONST_1),
            Instruction::op(ISUB),
            Instruction::field(PUTSTATIC, "ab", "a", "I"),
            Instruction::field(GETSTATIC, "ab", "a", "I"),
            Instruction::op(IALOAD),
        ];
        let class = ClassNode::new("ab", ClassKind::Class)
            .field(FieldNode::new("a", "I").with_static(true))
            .method(MethodNode::new("t", "()V").with_code(code));
        let profile = profile_of(&class, "a");
        assert_eq!(profile.counts.decrement, 1);
        assert_eq!(profile.counts.array_index, 1);
        assert!(profile.patterns.index);
    }

    #[test]
    fn subclass_owned_accesses_resolve_to_the_declaring_class() {
        let base = ClassNode::new("ab", ClassKind::Class).field(FieldNode::new("a", "I"));
        let mut code = Vec::new();
        for _ in 0..3 {
            code.extend(increment("cd", "a"));
        }
        let child = ClassNode::new("cd", ClassKind::Class)
            .extends("ab")
            .method(MethodNode::new("t", "()V").with_code(code));
        let owners = FieldOwners::from_classes([&base, &child]);

        let declared = FieldKey::new("ab", "a", "I");
        assert_eq!(owners.resolve(&FieldKey::new("cd", "a", "I")), Some(declared.clone()));
        assert_eq!(owners.resolve(&FieldKey::new("cd", "zz", "I")), None);

        let partials = vec![
            scan_class_accesses(&base, &owners),
            scan_class_accesses(&child, &owners),
        ];
        let profiles = finish_profiles(owners.declared(), partials);
        let profile = &profiles[&declared];
        assert_eq!(profile.counts.increment, 3);
        assert!(profile.patterns.counter);
        assert!(!profiles.contains_key(&FieldKey::new("cd", "a", "I")));
    }

    #[test]
    fn cyclic_hierarchy_does_not_loop() {
        let a = ClassNode::new("ab", ClassKind::Class).extends("cd");
        let b = ClassNode::new("cd", ClassKind::Class).extends("ab");
        let owners = FieldOwners::from_classes([&a, &b]);
        assert_eq!(owners.resolve(&FieldKey::new("ab", "x", "I")), None);
    }
}
