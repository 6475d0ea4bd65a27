//! Small hand-built classes shared by unit tests.

use crate::models::{ClassKind, ClassNode, FieldNode, Instruction, MethodNode};
use crate::opcodes::*;

/// Enum-like class with `n` static fields of its own type.
pub fn constant_class(name: &str, n: usize) -> ClassNode {
    let own = format!("L{name};");
    (0..n).fold(ClassNode::new(name, ClassKind::Class), |class, i| {
        class.field(
            FieldNode::new(&format!("c{i}"), &own)
                .with_static(true)
                .with_final(true),
        )
    })
}

/// Class holding one instance field per listed type.
pub fn holder(name: &str, types: &[&str]) -> ClassNode {
    types
        .iter()
        .enumerate()
        .fold(ClassNode::new(name, ClassKind::Class), |class, (i, ty)| {
            class.field(FieldNode::new(&format!("h{i}"), &format!("L{ty};")))
        })
}

/// Class with `n` int fields and `n` methods of distinct arity, each bumping
/// one field and loading a literal. Classes built with the same `n` share a
/// fingerprint whatever their names.
pub fn rich_class(name: &str, n: usize) -> ClassNode {
    (0..n).fold(ClassNode::new(name, ClassKind::Class), |class, i| {
        let field = format!("f{i}");
        let desc = format!("({})V", "I".repeat(i));
        class
            .field(FieldNode::new(&field, "I"))
            .method(MethodNode::new(&format!("m{i}"), &desc).with_code(vec![
                Instruction::op(ALOAD_0),
                Instruction::op(DUP),
                Instruction::field(GETFIELD, name, &field, "I"),
                Instruction::op(ICONST_1),
                Instruction::op(IADD),
                Instruction::field(PUTFIELD, name, &field, "I"),
                Instruction::ldc_string(&format!("s{i}")),
                Instruction::op(POP),
                Instruction::op(RETURN),
            ]))
    })
}
