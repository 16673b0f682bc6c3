// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Container encoder.

use tracing::debug;

use crate::core::model::{MethodDef, Program, TypeDef, TypeSpec, Variable};
use crate::core::string_heap::{StringHeap, NO_STRING};
use crate::core::symbols::join;
use crate::debuginfo::{
    DebugDatabase, LabelSymbol, LocalSymbol, MethodSymbols, NamespaceSymbols, TypeSymbols,
};
use crate::opcodes::operand::write_type_spec;
use crate::opcodes::OpcodeRegistry;

use super::codec::{u16_count, u32_count, write_heap, write_string, write_u16, write_u32, CodecError};
use super::{
    FLAG_NAMES_STRIPPED, FORMAT_VERSION, SEG_ALIAS, SEG_EXTERN, SEG_FIELD, SEG_METHOD,
    SEG_NAMESPACE, SEG_TYPE, SEG_VARIABLE,
};

/// An encoded container plus the names moved out of it.
#[derive(Debug, Clone)]
pub struct ContainerImage {
    pub bytes: Vec<u8>,
    /// Present when local and label names were stripped into a database.
    pub debug: Option<DebugDatabase>,
}

/// Encode a fully resolved program.
///
/// With `strip_names` the container carries no local or label names; they
/// are returned as a [`DebugDatabase`] instead.
pub fn write_container(
    program: &Program,
    registry: &OpcodeRegistry,
    strip_names: bool,
) -> Result<ContainerImage, CodecError> {
    let mut writer = ContainerWriter {
        registry,
        heap: StringHeap::new(),
        strip_names,
        body: Vec::new(),
    };
    let mut debug_db = DebugDatabase::default();

    let segments = program.externs.len() + program.aliases.len() + program.namespaces.len();
    write_u32(&mut writer.body, u32_count(segments, "top-level segments")?);
    for ext in &program.externs {
        writer.body.push(SEG_EXTERN);
        write_string(&mut writer.body, "extern", ext)?;
        write_u32(&mut writer.body, 0);
    }
    for alias in &program.aliases {
        writer.body.push(SEG_ALIAS);
        write_string(&mut writer.body, "alias", &alias.alias)?;
        write_inline_type(&mut writer.body, &alias.target)?;
        write_u32(&mut writer.body, 0);
    }
    for ns in &program.namespaces {
        writer.body.push(SEG_NAMESPACE);
        write_string(&mut writer.body, "namespace", &ns.name)?;
        write_u32(&mut writer.body, u32_count(ns.types.len(), "namespace types")?);
        let mut symbols = NamespaceSymbols {
            name: ns.name.clone(),
            types: Vec::new(),
        };
        for ty in &ns.types {
            symbols.types.push(writer.write_type(&ns.name, ty)?);
        }
        debug_db.namespaces.push(symbols);
    }

    let mut bytes = Vec::with_capacity(writer.body.len() + 64);
    write_u16(&mut bytes, FORMAT_VERSION);
    bytes.push(if strip_names { FLAG_NAMES_STRIPPED } else { 0 });
    write_heap(&mut bytes, &writer.heap)?;
    bytes.extend_from_slice(&writer.body);
    debug!(
        bytes = bytes.len(),
        strings = writer.heap.len(),
        stripped = strip_names,
        "container encoded"
    );
    Ok(ContainerImage {
        bytes,
        debug: strip_names.then_some(debug_db),
    })
}

/// Encode a method's instructions.
///
/// Returns the code bytes and the byte offset of every instruction, plus
/// one trailing entry for the end of the code.
pub fn encode_method_code(
    method: &MethodDef,
    registry: &OpcodeRegistry,
    heap: &mut StringHeap,
) -> Result<(Vec<u8>, Vec<u32>), CodecError> {
    let mut code = Vec::new();
    let mut offsets = Vec::with_capacity(method.body.instructions.len() + 1);
    for instr in &method.body.instructions {
        offsets.push(u32_count(code.len(), "method code length")?);
        let def = registry
            .get(instr.opcode)
            .ok_or_else(|| CodecError::UnknownOpcode {
                code: instr.opcode.to_string(),
            })?;
        instr.opcode.write(&mut code);
        (def.encode)(def, &instr.operands, &mut code, heap)?;
    }
    offsets.push(u32_count(code.len(), "method code length")?);
    Ok((code, offsets))
}

/// Symbol kind, name and dimensions written out in full.
fn write_inline_type(out: &mut Vec<u8>, spec: &TypeSpec) -> Result<(), CodecError> {
    let symbol = spec
        .reference
        .resolved()
        .ok_or_else(|| CodecError::UnresolvedReference {
            name: spec.reference.display_name().to_string(),
        })?;
    out.push(symbol.kind as u8);
    write_string(out, "alias target", &symbol.name)?;
    out.push(spec.dims);
    Ok(())
}

struct ContainerWriter<'r> {
    registry: &'r OpcodeRegistry,
    heap: StringHeap,
    strip_names: bool,
    body: Vec<u8>,
}

impl ContainerWriter<'_> {
    fn write_type(&mut self, prefix: &str, ty: &TypeDef) -> Result<TypeSymbols, CodecError> {
        let full_name = join(prefix, &ty.name);
        self.body.push(SEG_TYPE);
        write_u32(&mut self.body, self.heap.intern(&ty.name));
        write_u16(&mut self.body, ty.attrs.bits());
        let children = ty.fields.len() + ty.methods.len() + ty.nested.len();
        write_u32(&mut self.body, u32_count(children, "type members")?);

        for field in &ty.fields {
            self.body.push(SEG_FIELD);
            write_u32(&mut self.body, self.heap.intern(&field.name));
            write_u16(&mut self.body, field.attrs.bits());
            write_type_spec(&mut self.body, &mut self.heap, &field.ty)?;
        }
        let mut symbols = TypeSymbols {
            name: ty.name.clone(),
            nested: Vec::new(),
            methods: Vec::new(),
        };
        for method in &ty.methods {
            symbols.methods.push(self.write_method(&full_name, method)?);
        }
        for nested in &ty.nested {
            symbols.nested.push(self.write_type(&full_name, nested)?);
        }
        Ok(symbols)
    }

    fn write_method(&mut self, type_name: &str, method: &MethodDef) -> Result<MethodSymbols, CodecError> {
        self.body.push(SEG_METHOD);
        write_u32(&mut self.body, self.heap.intern(&method.name));
        write_u16(&mut self.body, method.attrs.bits());
        write_type_spec(&mut self.body, &mut self.heap, &method.ret)?;
        write_u16(&mut self.body, u16_count(method.params.len(), "parameters")?);
        write_u16(&mut self.body, u16_count(method.body.locals.len(), "locals")?);
        for param in &method.params {
            self.write_variable(param, false)?;
        }
        for local in &method.body.locals {
            self.write_variable(local, self.strip_names)?;
        }

        let (code, offsets) = encode_method_code(method, self.registry, &mut self.heap)?;
        write_u32(
            &mut self.body,
            u32_count(method.body.instructions.len(), "instructions")?,
        );
        write_u32(&mut self.body, u32_count(code.len(), "method code length")?);
        self.body.extend_from_slice(&code);

        let mut symbols = MethodSymbols {
            name: method.name.clone(),
            locals: method
                .body
                .locals
                .iter()
                .enumerate()
                .map(|(slot, local)| LocalSymbol {
                    name: local.name.clone(),
                    slot: slot as u16,
                })
                .collect(),
            labels: Vec::new(),
        };
        write_u16(&mut self.body, u16_count(method.body.labels.len(), "labels")?);
        for label in &method.body.labels {
            let byte_offset = label
                .offset
                .and_then(|idx| offsets.get(idx as usize).copied())
                .ok_or_else(|| CodecError::InvalidFormat {
                    chunk: "method".to_string(),
                    detail: format!(
                        "label '{}' in {} has no instruction offset",
                        label.name,
                        join(type_name, &method.name)
                    ),
                })?;
            write_u16(&mut self.body, label.index);
            let name = if self.strip_names {
                NO_STRING
            } else {
                self.heap.intern(&label.name)
            };
            write_u32(&mut self.body, name);
            write_u32(&mut self.body, byte_offset);
            symbols.labels.push(LabelSymbol {
                name: label.name.clone(),
                index: label.index,
                offset: byte_offset,
            });
        }
        Ok(symbols)
    }

    fn write_variable(&mut self, var: &Variable, strip: bool) -> Result<(), CodecError> {
        self.body.push(SEG_VARIABLE);
        let name = self.heap.intern_opt((!strip).then_some(var.name.as_str()));
        write_u32(&mut self.body, name);
        write_type_spec(&mut self.body, &mut self.heap, &var.ty)
    }
}
