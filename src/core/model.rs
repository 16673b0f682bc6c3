// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! In-memory program model: namespaces, types, members and method bodies.
//!
//! The parser builds this tree with pending references, the resolution
//! pass rewrites them in place, and the container writer serializes the
//! result. Offsets held by labels are instruction indices until the
//! container converts them to byte offsets.

use crate::core::symbols::{join, Reference, Symbol};
use crate::opcodes::{OpcodeId, Operand};

/// Declaration attribute bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Attributes(pub u16);

impl Attributes {
    pub const PUBLIC: u16 = 0x0001;
    pub const PRIVATE: u16 = 0x0002;
    pub const STATIC: u16 = 0x0004;
    pub const SEALED: u16 = 0x0008;
    pub const ABSTRACT: u16 = 0x0010;
    pub const INTERFACE: u16 = 0x0020;
    pub const STRUCT: u16 = 0x0040;
    pub const CONST: u16 = 0x0080;
    pub const READONLY: u16 = 0x0100;
    pub const VIRTUAL: u16 = 0x0200;
    pub const EXTERN: u16 = 0x0400;

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn has(self, bit: u16) -> bool {
        self.0 & bit != 0
    }

    pub fn set(&mut self, bit: u16) {
        self.0 |= bit;
    }

    pub fn is_static(self) -> bool {
        self.has(Self::STATIC)
    }
}

pub const TYPE_MODIFIERS: &[(&str, u16)] = &[
    ("pub", Attributes::PUBLIC),
    ("priv", Attributes::PRIVATE),
    ("stat", Attributes::STATIC),
    ("seal", Attributes::SEALED),
    ("abst", Attributes::ABSTRACT),
    ("iface", Attributes::INTERFACE),
    ("struct", Attributes::STRUCT),
];

pub const FIELD_MODIFIERS: &[(&str, u16)] = &[
    ("pub", Attributes::PUBLIC),
    ("priv", Attributes::PRIVATE),
    ("stat", Attributes::STATIC),
    ("const", Attributes::CONST),
    ("ro", Attributes::READONLY),
];

pub const METHOD_MODIFIERS: &[(&str, u16)] = &[
    ("pub", Attributes::PUBLIC),
    ("priv", Attributes::PRIVATE),
    ("stat", Attributes::STATIC),
    ("virt", Attributes::VIRTUAL),
    ("abst", Attributes::ABSTRACT),
    ("extern", Attributes::EXTERN),
];

pub fn modifier_bit(table: &[(&str, u16)], word: &str) -> Option<u16> {
    table
        .iter()
        .find(|(name, _)| *name == word)
        .map(|(_, bit)| *bit)
}

/// A type reference plus array dimensions (`i32[][]` has two).
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSpec {
    pub reference: Reference,
    pub dims: u8,
}

impl TypeSpec {
    pub fn new(reference: Reference, dims: u8) -> Self {
        Self { reference, dims }
    }

    pub fn resolved(symbol: Symbol) -> Self {
        Self::new(Reference::Resolved(symbol), 0)
    }

    pub fn void() -> Self {
        Self::resolved(Symbol::primitive("void"))
    }

    pub fn object() -> Self {
        Self::resolved(Symbol::primitive("obj"))
    }

    pub fn display(&self) -> String {
        let mut out = self.reference.display_name().to_string();
        for _ in 0..self.dims {
            out.push_str("[]");
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub ty: TypeSpec,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: TypeSpec) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A named position within a method's instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub index: u16,
    /// Instruction index the label marks; `None` until declared.
    pub offset: Option<u32>,
}

/// One instruction: opcode plus its fixed-arity operands.
///
/// The source line is carried for diagnostics only and is not part of an
/// instruction's identity.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: OpcodeId,
    pub operands: Vec<Operand>,
    pub line: u32,
}

impl Instruction {
    pub fn new(opcode: OpcodeId, operands: Vec<Operand>, line: u32) -> Self {
        Self {
            opcode,
            operands,
            line,
        }
    }
}

impl PartialEq for Instruction {
    fn eq(&self, other: &Self) -> bool {
        self.opcode == other.opcode && self.operands == other.operands
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodBody {
    pub instructions: Vec<Instruction>,
    pub labels: Vec<Label>,
    pub locals: Vec<Variable>,
}

impl MethodBody {
    pub fn label_by_name(&self, name: &str) -> Option<&Label> {
        self.labels.iter().find(|label| label.name == name)
    }

    pub fn local_slot(&self, name: &str) -> Option<u16> {
        self.locals
            .iter()
            .position(|local| local.name == name)
            .map(|idx| idx as u16)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: String,
    pub attrs: Attributes,
    pub ret: TypeSpec,
    pub params: Vec<Variable>,
    pub body: MethodBody,
    pub line: u32,
}

impl MethodDef {
    pub fn param_slot(&self, name: &str) -> Option<u16> {
        self.params
            .iter()
            .position(|param| param.name == name)
            .map(|idx| idx as u16)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub attrs: Attributes,
    pub ty: TypeSpec,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    pub name: String,
    pub attrs: Attributes,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
    pub nested: Vec<TypeDef>,
    pub line: u32,
}

impl TypeDef {
    pub fn new(name: impl Into<String>, attrs: Attributes, line: u32) -> Self {
        Self {
            name: name.into(),
            attrs,
            fields: Vec::new(),
            methods: Vec::new(),
            nested: Vec::new(),
            line,
        }
    }

    pub fn method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|method| method.name == name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn nested_type(&self, name: &str) -> Option<&TypeDef> {
        self.nested.iter().find(|ty| ty.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Namespace {
    /// Full dotted path; empty for the global namespace.
    pub name: String,
    pub types: Vec<TypeDef>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
        }
    }

    pub fn type_def(&self, name: &str) -> Option<&TypeDef> {
        self.types.iter().find(|ty| ty.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeAlias {
    pub alias: String,
    pub target: TypeSpec,
}

/// Root of the program model for one compilation unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Program {
    pub namespaces: Vec<Namespace>,
    pub externs: Vec<String>,
    pub aliases: Vec<TypeAlias>,
}

impl Program {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(&self, name: &str) -> Option<&Namespace> {
        self.namespaces.iter().find(|ns| ns.name == name)
    }

    /// The namespace with this full path, created on first use.
    pub fn namespace_mut(&mut self, name: &str) -> &mut Namespace {
        let idx = match self.namespaces.iter().position(|ns| ns.name == name) {
            Some(idx) => idx,
            None => {
                self.namespaces.push(Namespace::new(name));
                self.namespaces.len() - 1
            }
        };
        &mut self.namespaces[idx]
    }

    pub fn add_extern(&mut self, namespace: &str) {
        if !self.externs.iter().any(|ns| ns == namespace) {
            self.externs.push(namespace.to_string());
        }
    }

    /// Look up a type by its full dotted name.
    pub fn find_type(&self, full_name: &str) -> Option<&TypeDef> {
        let mut best: Option<&TypeDef> = None;
        for ns in &self.namespaces {
            let rest = if ns.name.is_empty() {
                Some(full_name)
            } else {
                full_name
                    .strip_prefix(ns.name.as_str())
                    .and_then(|rest| rest.strip_prefix('.'))
            };
            let Some(rest) = rest else { continue };
            let mut parts = rest.split('.');
            let Some(first) = parts.next() else { continue };
            let mut current = ns.type_def(first);
            for part in parts {
                current = current.and_then(|ty| ty.nested_type(part));
            }
            if current.is_some() {
                best = current;
            }
        }
        best
    }

    /// Mutable [`Program::find_type`].
    pub fn find_type_mut(&mut self, full_name: &str) -> Option<&mut TypeDef> {
        let mut found: Option<(usize, Vec<&str>)> = None;
        for (idx, ns) in self.namespaces.iter().enumerate() {
            let rest = if ns.name.is_empty() {
                Some(full_name)
            } else {
                full_name
                    .strip_prefix(ns.name.as_str())
                    .and_then(|rest| rest.strip_prefix('.'))
            };
            let Some(rest) = rest else { continue };
            let parts: Vec<&str> = rest.split('.').collect();
            let mut current = parts.first().and_then(|first| ns.type_def(first));
            for part in &parts[1..] {
                current = current.and_then(|ty| ty.nested_type(part));
            }
            if current.is_some() {
                found = Some((idx, parts));
            }
        }
        let (idx, parts) = found?;
        let (first, nested) = parts.split_first()?;
        let ns = &mut self.namespaces[idx];
        let mut current = ns.types.iter_mut().find(|ty| ty.name == *first)?;
        for part in nested {
            current = current.nested.iter_mut().find(|ty| ty.name == *part)?;
        }
        Some(current)
    }

    /// Look up a method by its canonical `Type.method` name.
    pub fn find_method(&self, full_name: &str) -> Option<&MethodDef> {
        let (type_name, method) = full_name.rsplit_once('.')?;
        self.find_type(type_name)?.method(method)
    }

    /// Visit every method with the full name of its declaring type.
    pub fn for_each_method(&self, mut visit: impl FnMut(&str, &MethodDef)) {
        fn walk(prefix: &str, ty: &TypeDef, visit: &mut dyn FnMut(&str, &MethodDef)) {
            let full = join(prefix, &ty.name);
            for method in &ty.methods {
                visit(&full, method);
            }
            for nested in &ty.nested {
                walk(&full, nested, visit);
            }
        }
        for ns in &self.namespaces {
            for ty in &ns.types {
                walk(&ns.name, ty, &mut visit);
            }
        }
    }

    /// Visit every type mutably with its full name.
    pub fn for_each_type_mut(&mut self, mut visit: impl FnMut(&str, &mut TypeDef)) {
        fn walk(prefix: &str, ty: &mut TypeDef, visit: &mut dyn FnMut(&str, &mut TypeDef)) {
            let full = join(prefix, &ty.name);
            visit(&full, ty);
            for nested in &mut ty.nested {
                walk(&full, nested, visit);
            }
        }
        for ns in &mut self.namespaces {
            let prefix = ns.name.clone();
            for ty in &mut ns.types {
                walk(&prefix, ty, &mut visit);
            }
        }
    }

    pub fn method_count(&self) -> usize {
        let mut count = 0;
        self.for_each_method(|_, _| count += 1);
        count
    }
}
