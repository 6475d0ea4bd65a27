//! In-memory bytecode tree of one snapshot, and the symbol keys shared by
//! every analysis and matching stage.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::descriptor::{parse_field_descriptor, parse_method_descriptor};
use crate::errors::{RemapError, RemapResult};

// ---------------------------------------------------------------------------
// Symbol keys
// ---------------------------------------------------------------------------

/// A field identity inside one snapshot: owner, name, descriptor.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    pub owner: String,
    pub name: String,
    pub desc: String,
}

impl FieldKey {
    pub fn new(owner: &str, name: &str, desc: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.owner, self.name, self.desc)
    }
}

/// A method identity inside one snapshot: owner, name, descriptor.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MethodKey {
    pub owner: String,
    pub name: String,
    pub desc: String,
}

impl MethodKey {
    pub fn new(owner: &str, name: &str, desc: &str) -> Self {
        Self {
            owner: owner.to_string(),
            name: name.to_string(),
            desc: desc.to_string(),
        }
    }
}

impl fmt::Display for MethodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.owner, self.name, self.desc)
    }
}

// ---------------------------------------------------------------------------
// Class tree
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassKind {
    Class,
    AbstractClass,
    Interface,
    Enum,
    Annotation,
}

/// LDC operand.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Type(String),
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Operand {
    #[default]
    None,
    Int {
        value: i32,
    },
    Field(FieldKey),
    Method(MethodKey),
    Type {
        name: String,
    },
    Constant {
        value: Constant,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: u8,
    #[serde(default)]
    pub operand: Operand,
}

impl Instruction {
    pub fn op(opcode: u8) -> Self {
        Self {
            opcode,
            operand: Operand::None,
        }
    }

    pub fn int(opcode: u8, value: i32) -> Self {
        Self {
            opcode,
            operand: Operand::Int { value },
        }
    }

    pub fn field(opcode: u8, owner: &str, name: &str, desc: &str) -> Self {
        Self {
            opcode,
            operand: Operand::Field(FieldKey::new(owner, name, desc)),
        }
    }

    pub fn method(opcode: u8, owner: &str, name: &str, desc: &str) -> Self {
        Self {
            opcode,
            operand: Operand::Method(MethodKey::new(owner, name, desc)),
        }
    }

    pub fn type_ref(opcode: u8, name: &str) -> Self {
        Self {
            opcode,
            operand: Operand::Type {
                name: name.to_string(),
            },
        }
    }

    pub fn ldc(value: Constant) -> Self {
        Self {
            opcode: crate::opcodes::LDC,
            operand: Operand::Constant { value },
        }
    }

    pub fn ldc_string(value: &str) -> Self {
        Self::ldc(Constant::String(value.to_string()))
    }

    pub fn field_key(&self) -> Option<&FieldKey> {
        match &self.operand {
            Operand::Field(key) => Some(key),
            _ => None,
        }
    }

    pub fn method_key(&self) -> Option<&MethodKey> {
        match &self.operand {
            Operand::Method(key) => Some(key),
            _ => None,
        }
    }

    pub fn string_constant(&self) -> Option<&str> {
        match &self.operand {
            Operand::Constant {
                value: Constant::String(s),
            } => Some(s),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldNode {
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_final: bool,
}

impl FieldNode {
    pub fn new(name: &str, descriptor: &str) -> Self {
        Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static: false,
            is_final: false,
        }
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    pub fn with_final(mut self, is_final: bool) -> Self {
        self.is_final = is_final;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MethodNode {
    pub name: String,
    pub descriptor: String,
    #[serde(default)]
    pub is_static: bool,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

impl MethodNode {
    pub fn new(name: &str, descriptor: &str) -> Self {
        Self {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static: false,
            is_abstract: false,
            instructions: Vec::new(),
        }
    }

    pub fn with_static(mut self, is_static: bool) -> Self {
        self.is_static = is_static;
        self
    }

    pub fn with_abstract(mut self, is_abstract: bool) -> Self {
        self.is_abstract = is_abstract;
        self
    }

    pub fn with_code(mut self, instructions: Vec<Instruction>) -> Self {
        self.instructions = instructions;
        self
    }

    pub fn is_constructor(&self) -> bool {
        self.name == "<init>"
    }

    pub fn is_static_initializer(&self) -> bool {
        self.name == "<clinit>"
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassNode {
    pub name: String,
    pub kind: ClassKind,
    #[serde(default)]
    pub super_name: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub fields: Vec<FieldNode>,
    #[serde(default)]
    pub methods: Vec<MethodNode>,
}

impl ClassNode {
    pub fn new(name: &str, kind: ClassKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            super_name: Some("java/lang/Object".to_string()),
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn extends(mut self, super_name: &str) -> Self {
        self.super_name = Some(super_name.to_string());
        self
    }

    pub fn implements(mut self, interface: &str) -> Self {
        self.interfaces.push(interface.to_string());
        self
    }

    pub fn field(mut self, field: FieldNode) -> Self {
        self.fields.push(field);
        self
    }

    pub fn method(mut self, method: MethodNode) -> Self {
        self.methods.push(method);
        self
    }

    pub fn field_key(&self, field: &FieldNode) -> FieldKey {
        FieldKey::new(&self.name, &field.name, &field.descriptor)
    }

    pub fn method_key(&self, method: &MethodNode) -> MethodKey {
        MethodKey::new(&self.name, &method.name, &method.descriptor)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// One build of the program: its classes in a stable, caller-defined order.
#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    classes: IndexMap<String, ClassNode>,
}

impl Snapshot {
    /// Validate and index a set of classes. Malformed descriptors or duplicate
    /// class names abort construction.
    pub fn new(classes: Vec<ClassNode>) -> RemapResult<Self> {
        let mut table = IndexMap::with_capacity(classes.len());
        for class in classes {
            validate_class(&class)?;
            if table.contains_key(&class.name) {
                return Err(RemapError::Snapshot(format!(
                    "duplicate class {}",
                    class.name
                )));
            }
            table.insert(class.name.clone(), class);
        }
        Ok(Self { classes: table })
    }

    pub fn from_json_str(payload: &str) -> RemapResult<Self> {
        let classes: Vec<ClassNode> = serde_json::from_str(payload)?;
        Self::new(classes)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn class(&self, name: &str) -> Option<&ClassNode> {
        self.classes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassNode> {
        self.classes.values()
    }

    pub fn class_names(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }
}

fn validate_class(class: &ClassNode) -> RemapResult<()> {
    if class.name.is_empty() {
        return Err(RemapError::Snapshot("class with empty name".into()));
    }
    let mut seen_fields = HashSet::new();
    for field in &class.fields {
        parse_field_descriptor(&field.descriptor).map_err(|e| context(class, &field.name, e))?;
        if !seen_fields.insert((&field.name, &field.descriptor)) {
            return Err(RemapError::Snapshot(format!(
                "duplicate field {}.{}:{}",
                class.name, field.name, field.descriptor
            )));
        }
    }
    for method in &class.methods {
        parse_method_descriptor(&method.descriptor).map_err(|e| context(class, &method.name, e))?;
        for insn in &method.instructions {
            match &insn.operand {
                Operand::Field(key) => {
                    parse_field_descriptor(&key.desc).map_err(|e| context(class, &method.name, e))?;
                }
                Operand::Method(key) => {
                    parse_method_descriptor(&key.desc)
                        .map_err(|e| context(class, &method.name, e))?;
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn context(class: &ClassNode, member: &str, err: RemapError) -> RemapError {
    RemapError::Snapshot(format!("{}.{}: {err}", class.name, member))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcodes;

    #[test]
    fn rejects_duplicate_classes() {
        let err = Snapshot::new(vec![
            ClassNode::new("ab", ClassKind::Class),
            ClassNode::new("ab", ClassKind::Class),
        ])
        .unwrap_err();
        assert!(matches!(err, RemapError::Snapshot(_)), "got {err}");
    }

    #[test]
    fn rejects_malformed_field_descriptor() {
        let class = ClassNode::new("ab", ClassKind::Class).field(FieldNode::new("a", "Lfoo"));
        assert!(Snapshot::new(vec![class]).is_err());
    }

    #[test]
    fn rejects_malformed_operand_descriptor() {
        let class = ClassNode::new("ab", ClassKind::Class).method(
            MethodNode::new("a", "()V").with_code(vec![Instruction::method(
                opcodes::INVOKESTATIC,
                "cd",
                "b",
                "(I",
            )]),
        );
        assert!(Snapshot::new(vec![class]).is_err());
    }

    #[test]
    fn preserves_insertion_order() {
        let snapshot = Snapshot::new(vec![
            ClassNode::new("zz", ClassKind::Class),
            ClassNode::new("aa", ClassKind::Interface),
        ])
        .unwrap();
        let names: Vec<&str> = snapshot.class_names().collect();
        assert_eq!(names, vec!["zz", "aa"]);
    }

    #[test]
    fn loads_json_tree() {
        let payload = r#"[
            {"name": "ab", "kind": "enum", "fields": [{"name": "a", "descriptor": "Lab;", "is_static": true}],
             "methods": [{"name": "<clinit>", "descriptor": "()V", "is_static": true,
                          "instructions": [{"opcode": 18, "operand": {"kind": "constant", "value": {"kind": "string", "value": "hi"}}},
                                           {"opcode": 179, "operand": {"kind": "field", "owner": "ab", "name": "a", "desc": "Lab;"}}]}]}
        ]"#;
        let snapshot = Snapshot::from_json_str(payload).unwrap();
        let class = snapshot.class("ab").unwrap();
        assert_eq!(class.kind, ClassKind::Enum);
        assert!(class.fields[0].is_static);
        let code = &class.methods[0].instructions;
        assert_eq!(code[0].string_constant(), Some("hi"));
        assert_eq!(code[1].field_key(), Some(&FieldKey::new("ab", "a", "Lab;")));
    }

    #[test]
    fn key_display() {
        assert_eq!(FieldKey::new("ab", "c", "I").to_string(), "ab.c:I");
        assert_eq!(MethodKey::new("ab", "c", "()V").to_string(), "ab.c()V");
    }
}
