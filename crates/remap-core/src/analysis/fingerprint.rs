//! Name-independent structural fingerprints of classes and methods.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::descriptor::{normalize_field_descriptor, normalize_method_descriptor, OPAQUE_TYPE};
use crate::errors::RemapResult;
use crate::matching::names::NameClassifier;
use crate::models::{ClassKind, ClassNode, MethodKey, MethodNode};

// ---------------------------------------------------------------------------
// ClassFingerprint
// ---------------------------------------------------------------------------

/// Structural summary of one class. Built once per snapshot and never
/// mutated afterwards. Obfuscated class names inside descriptors and the
/// hierarchy are replaced by `#`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClassFingerprint {
    pub name: String,
    pub kind: ClassKind,
    pub super_type: Option<String>,
    pub interfaces: BTreeSet<String>,
    pub constructor_count: usize,
    pub has_static_initializer: bool,
    pub method_descriptors: BTreeMap<String, u32>,
    pub static_method_signatures: BTreeSet<String>,
    pub opcode_histogram: BTreeMap<u8, u32>,
    pub string_literals: BTreeSet<String>,
    pub static_field_types: BTreeMap<String, u32>,
    pub instance_field_types: BTreeMap<String, u32>,
    pub method_count: usize,
    pub field_count: usize,
    pub static_method_count: usize,
}

fn opaque_name(classifier: &NameClassifier, name: &str) -> String {
    if classifier.is_obfuscated(name) {
        OPAQUE_TYPE.to_string()
    } else {
        name.to_string()
    }
}

fn bump<K: Ord>(counts: &mut BTreeMap<K, u32>, key: K) {
    *counts.entry(key).or_insert(0) += 1;
}

impl ClassFingerprint {
    pub fn extract(class: &ClassNode, classifier: &NameClassifier) -> RemapResult<Self> {
        let is_opaque = |name: &str| classifier.is_obfuscated(name);

        let mut method_descriptors = BTreeMap::new();
        let mut static_method_signatures = BTreeSet::new();
        let mut opcode_histogram = BTreeMap::new();
        let mut string_literals = BTreeSet::new();
        let mut constructor_count = 0;
        let mut has_static_initializer = false;
        let mut static_method_count = 0;

        for method in &class.methods {
            let desc = normalize_method_descriptor(&method.descriptor, &is_opaque)?;
            if method.is_constructor() {
                constructor_count += 1;
            }
            if method.is_static_initializer() {
                has_static_initializer = true;
            } else if method.is_static {
                static_method_count += 1;
                static_method_signatures
                    .insert(format!("{}{desc}", opaque_name(classifier, &method.name)));
            }
            bump(&mut method_descriptors, desc);

            if method.is_abstract {
                continue;
            }
            for insn in &method.instructions {
                bump(&mut opcode_histogram, insn.opcode);
                if let Some(s) = insn.string_constant() {
                    string_literals.insert(s.to_string());
                }
            }
        }

        let mut static_field_types = BTreeMap::new();
        let mut instance_field_types = BTreeMap::new();
        for field in &class.fields {
            let desc = normalize_field_descriptor(&field.descriptor, &is_opaque)?;
            if field.is_static {
                bump(&mut static_field_types, desc);
            } else {
                bump(&mut instance_field_types, desc);
            }
        }

        Ok(Self {
            name: class.name.clone(),
            kind: class.kind,
            super_type: class
                .super_name
                .as_deref()
                .map(|s| opaque_name(classifier, s)),
            interfaces: class
                .interfaces
                .iter()
                .map(|i| opaque_name(classifier, i))
                .collect(),
            constructor_count,
            has_static_initializer,
            method_descriptors,
            static_method_signatures,
            opcode_histogram,
            string_literals,
            static_field_types,
            instance_field_types,
            method_count: class.methods.len(),
            field_count: class.fields.len(),
            static_method_count,
        })
    }

    /// `{super} ∪ interfaces`.
    pub fn hierarchy(&self) -> BTreeSet<&str> {
        self.super_type
            .iter()
            .chain(self.interfaces.iter())
            .map(String::as_str)
            .collect()
    }
}

// ---------------------------------------------------------------------------
// MethodFingerprint
// ---------------------------------------------------------------------------

/// Structural summary of one method body, for callers that build the
/// method mapping the field resolver consumes.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MethodFingerprint {
    pub key: MethodKey,
    pub normalized_descriptor: String,
    pub is_static: bool,
    pub instruction_count: usize,
    pub opcode_histogram: BTreeMap<u8, u32>,
    pub string_literals: BTreeSet<String>,
    pub invoked_signatures: BTreeSet<String>,
}

impl MethodFingerprint {
    pub fn extract(
        class: &ClassNode,
        method: &MethodNode,
        classifier: &NameClassifier,
    ) -> RemapResult<Self> {
        let is_opaque = |name: &str| classifier.is_obfuscated(name);
        let mut opcode_histogram = BTreeMap::new();
        let mut string_literals = BTreeSet::new();
        let mut invoked_signatures = BTreeSet::new();

        for insn in &method.instructions {
            bump(&mut opcode_histogram, insn.opcode);
            if let Some(s) = insn.string_constant() {
                string_literals.insert(s.to_string());
            }
            if let Some(target) = insn.method_key() {
                invoked_signatures.insert(format!(
                    "{}.{}{}",
                    opaque_name(classifier, &target.owner),
                    opaque_name(classifier, &target.name),
                    normalize_method_descriptor(&target.desc, &is_opaque)?
                ));
            }
        }

        Ok(Self {
            key: class.method_key(method),
            normalized_descriptor: normalize_method_descriptor(&method.descriptor, &is_opaque)?,
            is_static: method.is_static,
            instruction_count: method.instructions.len(),
            opcode_histogram,
            string_literals,
            invoked_signatures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldNode, Instruction};
    use crate::opcodes::*;

    fn sample() -> ClassNode {
        ClassNode::new("eb", ClassKind::Class)
            .extends("PacketBase")
            .implements("ab")
            .field(FieldNode::new("a", "I"))
            .field(FieldNode::new("b", "Leb;").with_static(true))
            .field(FieldNode::new("c", "I"))
            .method(MethodNode::new("<init>", "()V").with_code(vec![
                Instruction::op(ALOAD_0),
                Instruction::method(INVOKESPECIAL, "java/lang/Object", "<init>", "()V"),
                Instruction::op(RETURN),
            ]))
            .method(MethodNode::new("<init>", "(I)V"))
            .method(
                MethodNode::new("<clinit>", "()V")
                    .with_static(true)
                    .with_code(vec![Instruction::ldc_string("hello"), Instruction::op(POP)]),
            )
            .method(MethodNode::new("x", "(Leb;)Ljava/lang/String;").with_static(true))
            .method(
                MethodNode::new("y", "()V")
                    .with_abstract(true)
                    .with_code(vec![Instruction::op(NOP)]),
            )
    }

    #[test]
    fn extracts_shape() {
        let fp = ClassFingerprint::extract(&sample(), &NameClassifier::default()).unwrap();
        assert_eq!(fp.constructor_count, 2);
        assert!(fp.has_static_initializer);
        assert_eq!(fp.method_count, 5);
        assert_eq!(fp.field_count, 3);
        assert_eq!(fp.static_method_count, 1);
        assert_eq!(fp.method_descriptors.get("()V"), Some(&3));
        assert!(fp
            .static_method_signatures
            .contains("#(L#;)Ljava/lang/String;"));
        assert_eq!(fp.instance_field_types.get("I"), Some(&2));
        assert_eq!(fp.static_field_types.get("L#;"), Some(&1));
        assert!(fp.string_literals.contains("hello"));
    }

    #[test]
    fn hierarchy_is_normalized() {
        let fp = ClassFingerprint::extract(&sample(), &NameClassifier::default()).unwrap();
        let hierarchy = fp.hierarchy();
        assert!(hierarchy.contains("PacketBase"));
        assert!(hierarchy.contains("#"));
    }

    #[test]
    fn abstract_bodies_do_not_count() {
        let fp = ClassFingerprint::extract(&sample(), &NameClassifier::default()).unwrap();
        assert_eq!(fp.opcode_histogram.get(&NOP), None);
        assert_eq!(fp.opcode_histogram.get(&RETURN), Some(&1));
    }

    #[test]
    fn method_fingerprint_normalizes_calls() {
        let class = sample();
        let init = &class.methods[0];
        let fp = MethodFingerprint::extract(&class, init, &NameClassifier::default()).unwrap();
        assert_eq!(fp.instruction_count, 3);
        assert!(fp.invoked_signatures.contains("java/lang/Object.<init>()V"));
        assert_eq!(fp.key.name, "<init>");
    }

    #[test]
    fn extraction_is_deterministic() {
        let classifier = NameClassifier::default();
        let a = ClassFingerprint::extract(&sample(), &classifier).unwrap();
        let b = ClassFingerprint::extract(&sample(), &classifier).unwrap();
        assert_eq!(a, b);
    }
}
