//! Type-usage evidence: which classes appear as field, parameter, and return
//! types of which other classes.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::MatcherConfig;
use crate::descriptor::{parse_field_descriptor, parse_method_descriptor, TypeDesc};
use crate::errors::RemapResult;
use crate::models::{ClassNode, Snapshot};

static EMPTY: BTreeSet<String> = BTreeSet::new();

/// Usage relations found inside a single class. Produced independently per
/// class so the scan can run in parallel, then folded into
/// [`TypeUsageEvidence`].
#[derive(Debug, Default)]
pub struct ClassUsage {
    class: String,
    field_types: BTreeSet<String>,
    param_types: BTreeSet<String>,
    return_types: BTreeSet<String>,
    self_field_refs: u32,
    self_param_refs: u32,
    /// Referenced class -> number of fields of this class typed with it.
    external_field_refs: BTreeMap<String, u32>,
    /// Referenced class -> number of parameters of this class typed with it.
    external_param_refs: BTreeMap<String, u32>,
}

fn bump(counts: &mut BTreeMap<String, u32>, key: &str) {
    *counts.entry(key.to_string()).or_insert(0) += 1;
}

impl ClassUsage {
    pub fn scan(class: &ClassNode, config: &MatcherConfig) -> RemapResult<Self> {
        let tracked = |ty: &TypeDesc| -> Option<String> {
            ty.class_name()
                .filter(|name| !config.is_platform_type(name))
                .map(str::to_string)
        };
        let mut usage = ClassUsage {
            class: class.name.clone(),
            ..ClassUsage::default()
        };

        for field in &class.fields {
            let ty = parse_field_descriptor(&field.descriptor)?;
            if let Some(name) = tracked(&ty) {
                if name == class.name {
                    usage.self_field_refs += 1;
                } else {
                    bump(&mut usage.external_field_refs, &name);
                }
                usage.field_types.insert(name);
            }
        }

        for method in &class.methods {
            let desc = parse_method_descriptor(&method.descriptor)?;
            for param in &desc.params {
                if let Some(name) = tracked(param) {
                    if name == class.name {
                        usage.self_param_refs += 1;
                    } else {
                        bump(&mut usage.external_param_refs, &name);
                    }
                    usage.param_types.insert(name);
                }
            }
            if let Some(name) = desc.ret.as_ref().and_then(tracked) {
                usage.return_types.insert(name);
            }
        }
        Ok(usage)
    }
}

// ---------------------------------------------------------------------------
// TypeUsageEvidence
// ---------------------------------------------------------------------------

/// Snapshot-wide usage graph. Read-only once built.
#[derive(Debug, Default, Serialize)]
pub struct TypeUsageEvidence {
    field_type_usages: BTreeMap<String, BTreeSet<String>>,
    param_type_usages: BTreeMap<String, BTreeSet<String>>,
    return_type_usages: BTreeMap<String, BTreeSet<String>>,
    used_as_field_type: BTreeMap<String, BTreeSet<String>>,
    used_as_param_type: BTreeMap<String, BTreeSet<String>>,
    used_as_return_type: BTreeMap<String, BTreeSet<String>>,
    co_occurrence: BTreeMap<String, BTreeSet<String>>,
    self_field_refs: BTreeMap<String, u32>,
    self_param_refs: BTreeMap<String, u32>,
    /// Keyed by the referenced class, summed over every other class.
    external_field_refs: BTreeMap<String, u32>,
    external_param_refs: BTreeMap<String, u32>,
}

fn merge_counts(target: &mut BTreeMap<String, u32>, counts: BTreeMap<String, u32>) {
    for (class, n) in counts {
        *target.entry(class).or_insert(0) += n;
    }
}

fn invert(
    target: &mut BTreeMap<String, BTreeSet<String>>,
    user: &str,
    types: &BTreeSet<String>,
) {
    for ty in types {
        target
            .entry(ty.clone())
            .or_default()
            .insert(user.to_string());
    }
}

impl TypeUsageEvidence {
    /// Sequential scan of a whole snapshot.
    pub fn build(snapshot: &Snapshot, config: &MatcherConfig) -> RemapResult<Self> {
        let usages = snapshot
            .classes()
            .map(|class| ClassUsage::scan(class, config))
            .collect::<RemapResult<Vec<_>>>()?;
        Ok(Self::from_usages(usages))
    }

    /// Fold per-class scans into the snapshot graph.
    pub fn from_usages(usages: Vec<ClassUsage>) -> Self {
        let mut evidence = TypeUsageEvidence::default();
        for usage in usages {
            let cls = usage.class;
            invert(&mut evidence.used_as_field_type, &cls, &usage.field_types);
            invert(&mut evidence.used_as_param_type, &cls, &usage.param_types);
            invert(&mut evidence.used_as_return_type, &cls, &usage.return_types);

            let seen: BTreeSet<&String> = usage
                .field_types
                .iter()
                .chain(&usage.param_types)
                .chain(&usage.return_types)
                .collect();
            for a in &seen {
                for b in &seen {
                    if a != b {
                        evidence
                            .co_occurrence
                            .entry((*a).clone())
                            .or_default()
                            .insert((*b).clone());
                    }
                }
            }

            evidence.self_field_refs.insert(cls.clone(), usage.self_field_refs);
            evidence.self_param_refs.insert(cls.clone(), usage.self_param_refs);
            merge_counts(&mut evidence.external_field_refs, usage.external_field_refs);
            merge_counts(&mut evidence.external_param_refs, usage.external_param_refs);
            evidence.field_type_usages.insert(cls.clone(), usage.field_types);
            evidence.param_type_usages.insert(cls.clone(), usage.param_types);
            evidence.return_type_usages.insert(cls, usage.return_types);
        }
        evidence
    }

    // -- Forward relations ---------------------------------------------------

    pub fn field_types_of(&self, class: &str) -> &BTreeSet<String> {
        self.field_type_usages.get(class).unwrap_or(&EMPTY)
    }

    pub fn param_types_of(&self, class: &str) -> &BTreeSet<String> {
        self.param_type_usages.get(class).unwrap_or(&EMPTY)
    }

    pub fn return_types_of(&self, class: &str) -> &BTreeSet<String> {
        self.return_type_usages.get(class).unwrap_or(&EMPTY)
    }

    /// Field, parameter and return types of `class`, excluding itself.
    pub fn referenced_types(&self, class: &str) -> BTreeSet<&str> {
        self.field_types_of(class)
            .iter()
            .chain(self.param_types_of(class))
            .chain(self.return_types_of(class))
            .map(String::as_str)
            .filter(|ty| *ty != class)
            .collect()
    }

    pub fn co_occurring(&self, class: &str) -> &BTreeSet<String> {
        self.co_occurrence.get(class).unwrap_or(&EMPTY)
    }

    // -- Inverse relations ---------------------------------------------------

    pub fn field_users_of(&self, class: &str) -> &BTreeSet<String> {
        self.used_as_field_type.get(class).unwrap_or(&EMPTY)
    }

    pub fn param_users_of(&self, class: &str) -> &BTreeSet<String> {
        self.used_as_param_type.get(class).unwrap_or(&EMPTY)
    }

    pub fn return_users_of(&self, class: &str) -> &BTreeSet<String> {
        self.used_as_return_type.get(class).unwrap_or(&EMPTY)
    }

    /// Classes other than `class` holding a field of type `class`.
    pub fn external_field_users<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a str> {
        self.field_users_of(class)
            .iter()
            .map(String::as_str)
            .filter(move |user| *user != class)
    }

    pub fn external_param_users<'a>(&'a self, class: &'a str) -> impl Iterator<Item = &'a str> {
        self.param_users_of(class)
            .iter()
            .map(String::as_str)
            .filter(move |user| *user != class)
    }

    pub fn external_field_user_count(&self, class: &str) -> usize {
        self.external_field_users(class).count()
    }

    // -- Counters ------------------------------------------------------------

    pub fn self_field_refs(&self, class: &str) -> u32 {
        self.self_field_refs.get(class).copied().unwrap_or(0)
    }

    /// Fields declared in other classes whose type is `class`.
    pub fn external_field_refs(&self, class: &str) -> u32 {
        self.external_field_refs.get(class).copied().unwrap_or(0)
    }

    pub fn self_param_refs(&self, class: &str) -> u32 {
        self.self_param_refs.get(class).copied().unwrap_or(0)
    }

    pub fn external_param_refs(&self, class: &str) -> u32 {
        self.external_param_refs.get(class).copied().unwrap_or(0)
    }

    /// Enum-like classes holding many fields of their own type.
    pub fn is_constant_like(&self, class: &str, threshold: u32) -> bool {
        self.self_field_refs(class) > threshold
    }
}
