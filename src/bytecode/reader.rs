// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Container decoder and outline reader.

use std::collections::HashMap;

use tracing::debug;

use crate::core::model::{
    Attributes, FieldDef, Instruction, Label, MethodBody, MethodDef, Program, TypeAlias, TypeDef,
    TypeSpec, Variable,
};
use crate::core::string_heap::StringHeap;
use crate::core::symbols::{join, Reference, Symbol, SymbolKind};
use crate::debuginfo::{DebugDatabase, MethodSymbols};
use crate::opcodes::operand::read_type_spec;
use crate::opcodes::{OpcodeRegistry, Operand};

use super::codec::{CodecError, Decoder};
use super::{
    fallback_label_name, fallback_local_name, FLAG_NAMES_STRIPPED, FORMAT_VERSION, SEG_ALIAS,
    SEG_EXTERN, SEG_FIELD, SEG_METHOD, SEG_NAMESPACE, SEG_TYPE, SEG_VARIABLE,
};

/// Nesting limit for type segments.
const MAX_TYPE_DEPTH: usize = 64;

/// Smallest encoding of any segment: kind, a name and a count.
const MIN_SEGMENT_BYTES: usize = 9;
/// Kind byte, name index, type spec.
const VARIABLE_BYTES: usize = 1 + 4 + 6;
/// Index, name, byte offset.
const LABEL_BYTES: usize = 2 + 4 + 4;

/// Top-level structure of a container, read without decoding code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerOutline {
    pub names_stripped: bool,
    pub strings: usize,
    pub externs: Vec<String>,
    /// `(alias, target)` pairs.
    pub aliases: Vec<(String, String)>,
    /// Every type, nested ones included, by full name.
    pub types: Vec<OutlineType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineType {
    pub name: String,
    pub attrs: u16,
    pub fields: Vec<String>,
    pub methods: Vec<OutlineMethod>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineMethod {
    pub name: String,
    pub params: u16,
    pub locals: u16,
    pub instructions: u32,
    pub code_bytes: u32,
    pub labels: u16,
}

fn segment_error(kind: u8, context: &str, cur: &Decoder<'_>) -> CodecError {
    if (SEG_NAMESPACE..=SEG_VARIABLE).contains(&kind) {
        cur.invalid(format!("segment kind {kind} not allowed in {context}"))
    } else {
        CodecError::UnknownSegment { found: kind }
    }
}

/// Version, flags and heap.
fn read_header(cur: &mut Decoder<'_>) -> Result<(u8, StringHeap), CodecError> {
    let version = cur.read_u16()?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion { found: version });
    }
    let flags = cur.read_u8()?;
    if flags & !FLAG_NAMES_STRIPPED != 0 {
        return Err(cur.invalid(format!("unknown header flags {flags:#04X}")));
    }
    let heap = cur.read_heap()?;
    Ok((flags, heap))
}

fn read_inline_type(cur: &mut Decoder<'_>) -> Result<TypeSpec, CodecError> {
    let raw_kind = cur.read_u8()?;
    let kind = SymbolKind::from_u8(raw_kind)
        .ok_or_else(|| cur.invalid(format!("unknown symbol kind {raw_kind}")))?;
    let name = cur.read_string()?;
    let dims = cur.read_u8()?;
    Ok(TypeSpec::new(Reference::Resolved(Symbol::new(kind, name)), dims))
}

fn expect_no_children(cur: &mut Decoder<'_>, what: &str) -> Result<(), CodecError> {
    let children = cur.read_u32()?;
    if children != 0 {
        return Err(cur.invalid(format!("{what} segment with {children} children")));
    }
    Ok(())
}

/// Decode a container into a program model.
///
/// Local and label names missing from the container come from `debug`
/// when given, otherwise they are synthesised.
pub fn read_container(
    bytes: &[u8],
    registry: &OpcodeRegistry,
    debug_db: Option<&DebugDatabase>,
) -> Result<Program, CodecError> {
    let mut cur = Decoder::new(bytes, "container");
    let (flags, heap) = read_header(&mut cur)?;
    let reader = ContainerReader {
        registry,
        heap,
        debug_names: debug_db.map(DebugDatabase::method_index).unwrap_or_default(),
    };

    let mut program = Program::new();
    let segments = cur.read_bounded_count(MIN_SEGMENT_BYTES, "top-level segments")?;
    for _ in 0..segments {
        let kind = cur.read_u8()?;
        match kind {
            SEG_EXTERN => {
                let name = cur.read_string()?;
                expect_no_children(&mut cur, "extern")?;
                program.add_extern(&name);
            }
            SEG_ALIAS => {
                let alias = cur.read_string()?;
                let target = read_inline_type(&mut cur)?;
                expect_no_children(&mut cur, "alias")?;
                program.aliases.push(TypeAlias { alias, target });
            }
            SEG_NAMESPACE => {
                let name = cur.read_string()?;
                let count = cur.read_bounded_count(MIN_SEGMENT_BYTES, "namespace types")?;
                for _ in 0..count {
                    let kind = cur.read_u8()?;
                    if kind != SEG_TYPE {
                        return Err(segment_error(kind, "a namespace", &cur));
                    }
                    let ty = reader.read_type(&mut cur, &name, 0)?;
                    program.namespace_mut(&name).types.push(ty);
                }
            }
            other => return Err(segment_error(other, "the top level", &cur)),
        }
    }
    cur.finish()?;
    debug!(
        bytes = bytes.len(),
        methods = program.method_count(),
        stripped = flags & FLAG_NAMES_STRIPPED != 0,
        "container decoded"
    );
    Ok(program)
}

struct ContainerReader<'r, 'd> {
    registry: &'r OpcodeRegistry,
    heap: StringHeap,
    debug_names: HashMap<String, &'d MethodSymbols>,
}

impl ContainerReader<'_, '_> {
    /// A type segment whose kind byte was already read.
    fn read_type(
        &self,
        cur: &mut Decoder<'_>,
        prefix: &str,
        depth: usize,
    ) -> Result<TypeDef, CodecError> {
        if depth >= MAX_TYPE_DEPTH {
            return Err(cur.invalid("types nested too deeply"));
        }
        let name = cur.read_heap_string(&self.heap)?;
        let attrs = Attributes(cur.read_u16()?);
        let full_name = join(prefix, &name);
        let mut ty = TypeDef::new(name, attrs, 0);
        let children = cur.read_bounded_count(MIN_SEGMENT_BYTES, "type members")?;
        for _ in 0..children {
            match cur.read_u8()? {
                SEG_FIELD => {
                    let name = cur.read_heap_string(&self.heap)?;
                    let attrs = Attributes(cur.read_u16()?);
                    let ty_spec = read_type_spec(cur, &self.heap)?;
                    ty.fields.push(FieldDef {
                        name,
                        attrs,
                        ty: ty_spec,
                        line: 0,
                    });
                }
                SEG_METHOD => ty.methods.push(self.read_method(cur, &full_name)?),
                SEG_TYPE => ty.nested.push(self.read_type(cur, &full_name, depth + 1)?),
                other => return Err(segment_error(other, "a type", cur)),
            }
        }
        Ok(ty)
    }

    fn read_variable(&self, cur: &mut Decoder<'_>) -> Result<(Option<String>, TypeSpec), CodecError> {
        let kind = cur.read_u8()?;
        if kind != SEG_VARIABLE {
            return Err(segment_error(kind, "a method signature", cur));
        }
        let name = cur.read_heap_string_opt(&self.heap)?;
        let ty = read_type_spec(cur, &self.heap)?;
        Ok((name, ty))
    }

    fn read_method(&self, cur: &mut Decoder<'_>, type_name: &str) -> Result<MethodDef, CodecError> {
        let name = cur.read_heap_string(&self.heap)?;
        let full_name = join(type_name, &name);
        let attrs = Attributes(cur.read_u16()?);
        let ret = read_type_spec(cur, &self.heap)?;
        let param_count = cur.read_u16()? as usize;
        let local_count = cur.read_u16()? as usize;
        let symbols = self.debug_names.get(&full_name).copied();

        let mut params = Vec::with_capacity(param_count);
        for _ in 0..param_count {
            let (param, ty) = self.read_variable(cur)?;
            let param = param.ok_or_else(|| cur.invalid(format!("unnamed parameter in {full_name}")))?;
            params.push(Variable::new(param, ty));
        }
        let mut body = MethodBody::default();
        for slot in 0..local_count {
            let slot = slot as u16;
            let (local, ty) = self.read_variable(cur)?;
            let local = local
                .or_else(|| {
                    symbols.and_then(|s| s.locals.iter().find(|l| l.slot == slot).map(|l| l.name.clone()))
                })
                .unwrap_or_else(|| fallback_local_name(slot));
            body.locals.push(Variable::new(local, ty));
        }

        let instruction_count = cur.read_u32()? as usize;
        let code_len = cur.read_u32()? as usize;
        let code = cur.read_exact(code_len, "method code")?;
        let mut by_offset: HashMap<u32, u32> = HashMap::new();
        let mut code_cur = Decoder::new(code, "method code");
        while code_cur.has_remaining() {
            by_offset.insert(code_cur.position() as u32, body.instructions.len() as u32);
            let id = self.registry.read_id(&mut code_cur)?;
            let def = self
                .registry
                .get(id)
                .ok_or_else(|| CodecError::UnknownOpcode { code: id.to_string() })?;
            let operands = (def.decode)(def, &mut code_cur, &self.heap)?;
            body.instructions.push(Instruction::new(id, operands, 0));
        }
        if body.instructions.len() != instruction_count {
            return Err(cur.invalid(format!(
                "{full_name} declares {instruction_count} instructions, code holds {}",
                body.instructions.len()
            )));
        }
        by_offset.insert(code_len as u32, instruction_count as u32);

        let label_count = cur.read_bounded_count_u16(LABEL_BYTES, "labels")?;
        for _ in 0..label_count {
            let index = cur.read_u16()?;
            let label_name = cur.read_heap_string_opt(&self.heap)?;
            let byte_offset = cur.read_u32()?;
            let offset = by_offset
                .get(&byte_offset)
                .copied()
                .ok_or_else(|| CodecError::BadLabelOffset {
                    method: full_name.clone(),
                    offset: byte_offset,
                })?;
            let label_name = label_name
                .or_else(|| {
                    symbols.and_then(|s| s.labels.iter().find(|l| l.index == index).map(|l| l.name.clone()))
                })
                .unwrap_or_else(|| fallback_label_name(byte_offset));
            body.labels.push(Label {
                name: label_name,
                index,
                offset: Some(offset),
            });
        }

        for instr in &mut body.instructions {
            for operand in &mut instr.operands {
                if let Operand::Label(label) = operand {
                    let target = body
                        .labels
                        .iter()
                        .find(|l| l.index == label.index)
                        .and_then(|l| l.offset)
                        .ok_or_else(|| {
                            cur.invalid(format!(
                                "{full_name} branches to undeclared label {}",
                                label.index
                            ))
                        })?;
                    label.target = Some(target);
                }
            }
        }

        Ok(MethodDef {
            name,
            attrs,
            ret,
            params,
            body,
            line: 0,
        })
    }
}

/// List a container's declarations without decoding method code.
pub fn read_outline(bytes: &[u8]) -> Result<ContainerOutline, CodecError> {
    let mut cur = Decoder::new(bytes, "container");
    let (flags, heap) = read_header(&mut cur)?;
    let mut outline = ContainerOutline {
        names_stripped: flags & FLAG_NAMES_STRIPPED != 0,
        strings: heap.len(),
        ..ContainerOutline::default()
    };
    let segments = cur.read_bounded_count(MIN_SEGMENT_BYTES, "top-level segments")?;
    for _ in 0..segments {
        match cur.read_u8()? {
            SEG_EXTERN => {
                outline.externs.push(cur.read_string()?);
                expect_no_children(&mut cur, "extern")?;
            }
            SEG_ALIAS => {
                let alias = cur.read_string()?;
                let target = read_inline_type(&mut cur)?;
                expect_no_children(&mut cur, "alias")?;
                outline.aliases.push((alias, target.display()));
            }
            SEG_NAMESPACE => {
                let name = cur.read_string()?;
                let count = cur.read_bounded_count(MIN_SEGMENT_BYTES, "namespace types")?;
                for _ in 0..count {
                    let kind = cur.read_u8()?;
                    if kind != SEG_TYPE {
                        return Err(segment_error(kind, "a namespace", &cur));
                    }
                    outline_type(&mut cur, &heap, &name, 0, &mut outline.types)?;
                }
            }
            other => return Err(segment_error(other, "the top level", &cur)),
        }
    }
    cur.finish()?;
    Ok(outline)
}

fn outline_type(
    cur: &mut Decoder<'_>,
    heap: &StringHeap,
    prefix: &str,
    depth: usize,
    types: &mut Vec<OutlineType>,
) -> Result<(), CodecError> {
    if depth >= MAX_TYPE_DEPTH {
        return Err(cur.invalid("types nested too deeply"));
    }
    let name = join(prefix, &cur.read_heap_string(heap)?);
    let attrs = cur.read_u16()?;
    let slot = types.len();
    types.push(OutlineType {
        name: name.clone(),
        attrs,
        fields: Vec::new(),
        methods: Vec::new(),
    });
    let children = cur.read_bounded_count(MIN_SEGMENT_BYTES, "type members")?;
    for _ in 0..children {
        match cur.read_u8()? {
            SEG_FIELD => {
                let field = cur.read_heap_string(heap)?;
                cur.read_u16()?;
                read_type_spec(cur, heap)?;
                types[slot].fields.push(field);
            }
            SEG_METHOD => {
                let method = outline_method(cur, heap)?;
                types[slot].methods.push(method);
            }
            SEG_TYPE => outline_type(cur, heap, &name, depth + 1, types)?,
            other => return Err(segment_error(other, "a type", cur)),
        }
    }
    Ok(())
}

fn outline_method(cur: &mut Decoder<'_>, heap: &StringHeap) -> Result<OutlineMethod, CodecError> {
    let name = cur.read_heap_string(heap)?;
    cur.read_u16()?;
    read_type_spec(cur, heap)?;
    let params = cur.read_u16()?;
    let locals = cur.read_u16()?;
    let variables = usize::from(params) + usize::from(locals);
    if variables.saturating_mul(VARIABLE_BYTES) > cur.remaining_len() {
        return Err(CodecError::UnexpectedEof {
            context: format!("container variables of {name}"),
        });
    }
    for _ in 0..variables {
        let kind = cur.read_u8()?;
        if kind != SEG_VARIABLE {
            return Err(segment_error(kind, "a method signature", cur));
        }
        cur.read_heap_string_opt(heap)?;
        read_type_spec(cur, heap)?;
    }
    let instructions = cur.read_u32()?;
    let code_bytes = cur.read_u32()?;
    cur.read_exact(code_bytes as usize, "method code")?;
    let labels = cur.read_bounded_count_u16(LABEL_BYTES, "labels")?;
    cur.read_exact(labels * LABEL_BYTES, "labels")?;
    Ok(OutlineMethod {
        name,
        params,
        locals,
        instructions,
        code_bytes,
        labels: labels as u16,
    })
}
