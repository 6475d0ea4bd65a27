//! Which methods touch each field.

use std::collections::{BTreeMap, BTreeSet};

use crate::analysis::access::FieldOwners;
use crate::models::{ClassNode, FieldKey, MethodKey};

static NO_METHODS: BTreeSet<MethodKey> = BTreeSet::new();

#[derive(Debug, Default)]
pub struct FieldUsage {
    users: BTreeMap<FieldKey, BTreeSet<MethodKey>>,
}

impl FieldUsage {
    /// Field references made by the methods of one class, keyed by the
    /// declaring field where the snapshot knows it.
    pub fn scan_class(class: &ClassNode, owners: &FieldOwners) -> Vec<(FieldKey, MethodKey)> {
        let mut refs = Vec::new();
        for method in &class.methods {
            let method_key = class.method_key(method);
            for field in method.instructions.iter().filter_map(|insn| insn.field_key()) {
                let field = owners.resolve(field).unwrap_or_else(|| field.clone());
                refs.push((field, method_key.clone()));
            }
        }
        refs
    }

    pub fn from_refs(refs: impl IntoIterator<Item = (FieldKey, MethodKey)>) -> Self {
        let mut users: BTreeMap<FieldKey, BTreeSet<MethodKey>> = BTreeMap::new();
        for (field, method) in refs {
            users.entry(field).or_default().insert(method);
        }
        Self { users }
    }

    pub fn methods_using(&self, field: &FieldKey) -> &BTreeSet<MethodKey> {
        self.users.get(field).unwrap_or(&NO_METHODS)
    }

    /// Fields touched by at least one method in common with each field.
    pub fn siblings(&self) -> BTreeMap<FieldKey, BTreeSet<FieldKey>> {
        let mut by_method: BTreeMap<&MethodKey, Vec<&FieldKey>> = BTreeMap::new();
        for (field, methods) in &self.users {
            for method in methods {
                by_method.entry(method).or_default().push(field);
            }
        }
        let mut siblings: BTreeMap<FieldKey, BTreeSet<FieldKey>> = BTreeMap::new();
        for fields in by_method.values() {
            for a in fields {
                for b in fields {
                    if a != b {
                        siblings.entry((*a).clone()).or_default().insert((*b).clone());
                    }
                }
            }
        }
        siblings
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
