//! JVM descriptor parsing, name-independent normalization, and remapping of
//! descriptors through a class mapping.

use std::fmt::Write as _;

use crate::errors::{RemapError, RemapResult};

/// Placeholder that stands in for an obfuscated class name.
pub const OPAQUE_TYPE: &str = "#";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeDesc {
    Primitive(char),
    Object(String),
    Array(Box<TypeDesc>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrimitiveCategory {
    Boolean,
    Integral,
    Floating,
}

impl TypeDesc {
    /// The innermost element type of an array, or the type itself.
    pub fn element(&self) -> &TypeDesc {
        match self {
            TypeDesc::Array(inner) => inner.element(),
            other => other,
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            TypeDesc::Array(inner) => 1 + inner.dimensions(),
            _ => 0,
        }
    }

    /// Class named by this type or by its array element.
    pub fn class_name(&self) -> Option<&str> {
        match self.element() {
            TypeDesc::Object(name) => Some(name),
            _ => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self, TypeDesc::Primitive(_))
    }

    /// Object types and arrays whose element is an object.
    pub fn is_reference_like(&self) -> bool {
        matches!(self.element(), TypeDesc::Object(_))
    }

    pub fn primitive_category(&self) -> Option<PrimitiveCategory> {
        match self {
            TypeDesc::Primitive('Z') => Some(PrimitiveCategory::Boolean),
            TypeDesc::Primitive('B' | 'C' | 'S' | 'I' | 'J') => Some(PrimitiveCategory::Integral),
            TypeDesc::Primitive('F' | 'D') => Some(PrimitiveCategory::Floating),
            _ => None,
        }
    }

    pub fn map_classes<F>(&self, f: &F) -> TypeDesc
    where
        F: Fn(&str) -> String,
    {
        match self {
            TypeDesc::Primitive(c) => TypeDesc::Primitive(*c),
            TypeDesc::Object(name) => TypeDesc::Object(f(name)),
            TypeDesc::Array(inner) => TypeDesc::Array(Box::new(inner.map_classes(f))),
        }
    }

    fn write_to(&self, out: &mut String) {
        match self {
            TypeDesc::Primitive(c) => out.push(*c),
            TypeDesc::Object(name) => {
                let _ = write!(out, "L{name};");
            }
            TypeDesc::Array(inner) => {
                out.push('[');
                inner.write_to(out);
            }
        }
    }

    pub fn to_descriptor(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }
}

/// Parameter list and return type; `ret` is `None` for `V`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodDesc {
    pub params: Vec<TypeDesc>,
    pub ret: Option<TypeDesc>,
}

impl MethodDesc {
    pub fn map_classes<F>(&self, f: &F) -> MethodDesc
    where
        F: Fn(&str) -> String,
    {
        MethodDesc {
            params: self.params.iter().map(|p| p.map_classes(f)).collect(),
            ret: self.ret.as_ref().map(|r| r.map_classes(f)),
        }
    }

    pub fn to_descriptor(&self) -> String {
        let mut out = String::from("(");
        for param in &self.params {
            param.write_to(&mut out);
        }
        out.push(')');
        match &self.ret {
            Some(ret) => ret.write_to(&mut out),
            None => out.push('V'),
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn malformed(desc: &str, reason: &str) -> RemapError {
    RemapError::Descriptor(format!("{desc:?}: {reason}"))
}

/// Array dimension limit imposed by the class file format.
pub const MAX_ARRAY_DIMENSIONS: usize = 255;

fn parse_type(desc: &str, bytes: &[u8], pos: &mut usize) -> RemapResult<TypeDesc> {
    let mut dimensions = 0;
    while bytes.get(*pos) == Some(&b'[') {
        dimensions += 1;
        *pos += 1;
    }
    if dimensions > MAX_ARRAY_DIMENSIONS {
        return Err(malformed(desc, "too many array dimensions"));
    }
    let element = parse_element(desc, bytes, pos)?;
    Ok((0..dimensions).fold(element, |ty, _| TypeDesc::Array(Box::new(ty))))
}

fn parse_element(desc: &str, bytes: &[u8], pos: &mut usize) -> RemapResult<TypeDesc> {
    let Some(&tag) = bytes.get(*pos) else {
        return Err(malformed(desc, "unexpected end"));
    };
    *pos += 1;
    match tag {
        b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z' => {
            Ok(TypeDesc::Primitive(tag as char))
        }
        b'L' => {
            let start = *pos;
            let Some(offset) = bytes[start..].iter().position(|&b| b == b';') else {
                return Err(malformed(desc, "unterminated class name"));
            };
            if offset == 0 {
                return Err(malformed(desc, "empty class name"));
            }
            *pos = start + offset + 1;
            Ok(TypeDesc::Object(desc[start..start + offset].to_string()))
        }
        other => Err(malformed(
            desc,
            &format!("unexpected {:?} at {}", other as char, *pos - 1),
        )),
    }
}

pub fn parse_field_descriptor(desc: &str) -> RemapResult<TypeDesc> {
    let bytes = desc.as_bytes();
    let mut pos = 0;
    let ty = parse_type(desc, bytes, &mut pos)?;
    if pos != bytes.len() {
        return Err(malformed(desc, "trailing characters"));
    }
    Ok(ty)
}

pub fn parse_method_descriptor(desc: &str) -> RemapResult<MethodDesc> {
    let bytes = desc.as_bytes();
    if bytes.first() != Some(&b'(') {
        return Err(malformed(desc, "missing '('"));
    }
    let mut pos = 1;
    let mut params = Vec::new();
    loop {
        match bytes.get(pos) {
            Some(b')') => {
                pos += 1;
                break;
            }
            Some(_) => params.push(parse_type(desc, bytes, &mut pos)?),
            None => return Err(malformed(desc, "missing ')'")),
        }
    }
    let ret = if bytes.get(pos) == Some(&b'V') {
        pos += 1;
        None
    } else {
        Some(parse_type(desc, bytes, &mut pos)?)
    };
    if pos != bytes.len() {
        return Err(malformed(desc, "trailing characters"));
    }
    Ok(MethodDesc { params, ret })
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Replace every class name `is_opaque` accepts with [`OPAQUE_TYPE`].
pub fn normalize_type<F>(ty: &TypeDesc, is_opaque: &F) -> TypeDesc
where
    F: Fn(&str) -> bool,
{
    ty.map_classes(&|name: &str| {
        if is_opaque(name) {
            OPAQUE_TYPE.to_string()
        } else {
            name.to_string()
        }
    })
}

pub fn normalize_field_descriptor<F>(desc: &str, is_opaque: &F) -> RemapResult<String>
where
    F: Fn(&str) -> bool,
{
    Ok(normalize_type(&parse_field_descriptor(desc)?, is_opaque).to_descriptor())
}

pub fn normalize_method_descriptor<F>(desc: &str, is_opaque: &F) -> RemapResult<String>
where
    F: Fn(&str) -> bool,
{
    let parsed = parse_method_descriptor(desc)?;
    let normalized = parsed.map_classes(&|name: &str| {
        if is_opaque(name) {
            OPAQUE_TYPE.to_string()
        } else {
            name.to_string()
        }
    });
    Ok(normalized.to_descriptor())
}

// ---------------------------------------------------------------------------
// Remapping
// ---------------------------------------------------------------------------

/// Rewrite a field or method descriptor, substituting every class (including
/// array element classes) that `lookup` maps. Primitives pass through.
pub fn remap_descriptor<'m, F>(desc: &str, lookup: F) -> RemapResult<String>
where
    F: Fn(&str) -> Option<&'m str>,
{
    let rename = |name: &str| lookup(name).unwrap_or(name).to_string();
    if desc.starts_with('(') {
        Ok(parse_method_descriptor(desc)?
            .map_classes(&rename)
            .to_descriptor())
    } else {
        Ok(parse_field_descriptor(desc)?
            .map_classes(&rename)
            .to_descriptor())
    }
}

/// Whether `new_desc` is `old_desc` itself or `old_desc` after remapping.
pub fn descriptors_match<'m, F>(old_desc: &str, new_desc: &str, lookup: F) -> RemapResult<bool>
where
    F: Fn(&str) -> Option<&'m str>,
{
    if old_desc == new_desc {
        return Ok(true);
    }
    Ok(remap_descriptor(old_desc, lookup)? == new_desc)
}
