// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Lowering of a resolved program to the target IR.

pub mod emit;
pub mod ir;
pub mod lower;
pub mod runtime;

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, trace};

use crate::core::model::{Attributes, MethodDef, Program, Variable};
use crate::core::string_heap::StringHeap;
use crate::core::symbols::join;
use crate::opcodes::OpcodeRegistry;

use emit::{MethodEmitter, ProgramInfo, SymbolImporter};
use ir::{IrLocal, IrMethod, IrModule, IrOp};
use runtime::Routine;

/// Largest IR body still marked as an inlining candidate.
pub const INLINE_OP_LIMIT: usize = 16;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CodegenError {
    #[error("{method}: unresolved reference '{name}'")]
    Unresolved { method: String, name: String },
    #[error("{method}: too many locals")]
    TooManyLocals { method: String },
    #[error("{method}: instruction {index} ({mnemonic}) has operands it cannot lower")]
    BadOperands {
        method: String,
        mnemonic: &'static str,
        index: usize,
    },
    #[error("{method}: unknown opcode {opcode}")]
    UnknownOpcode { method: String, opcode: String },
    #[error("{method}: label '{label}' has no offset")]
    UnplacedLabel { method: String, label: String },
    #[error("{method}: no placeholder at IR position {position}")]
    PatchTarget { method: String, position: usize },
}

/// Build toggles that change the emitted IR.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodegenOptions {
    pub inline: bool,
    pub unsafe_codegen: bool,
    pub allow_stack_overflow: bool,
}

pub struct CodeGenerator<'r> {
    registry: &'r OpcodeRegistry,
    options: CodegenOptions,
}

impl<'r> CodeGenerator<'r> {
    pub fn new(registry: &'r OpcodeRegistry, options: CodegenOptions) -> Self {
        Self { registry, options }
    }

    /// Lower every method with a body. Stops at the first failing method.
    pub fn generate(&self, program: &Program) -> Result<IrModule, CodegenError> {
        let info = ProgramInfo::from_program(program);
        let mut importer = SymbolImporter::new();
        let mut strings = StringHeap::new();
        let mut methods = Vec::new();
        let mut failure = None;

        program.for_each_method(|owner, method| {
            if failure.is_some() {
                return;
            }
            if method.attrs.has(Attributes::ABSTRACT) || method.attrs.has(Attributes::EXTERN) {
                trace!(owner, method = %method.name, "no body to lower");
                return;
            }
            match self.lower_method(&info, &mut importer, &mut strings, owner, method) {
                Ok(lowered) => methods.push(lowered),
                Err(err) => failure = Some(err),
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }

        debug!(
            methods = methods.len(),
            symbols = importer.len(),
            strings = strings.len(),
            "lowered program"
        );
        Ok(IrModule {
            symbols: importer.into_symbols(),
            strings,
            methods,
        })
    }

    fn lower_method(
        &self,
        info: &ProgramInfo,
        importer: &mut SymbolImporter,
        strings: &mut StringHeap,
        owner: &str,
        method: &MethodDef,
    ) -> Result<IrMethod, CodegenError> {
        let name = join(owner, &method.name);
        let mut ir = IrMethod::new(name.clone(), method.attrs.is_static(), info.ir_type(&method.ret));
        let to_local = |var: &Variable| IrLocal {
            name: var.name.clone(),
            ty: info.ir_type(&var.ty),
        };
        ir.params = method.params.iter().map(to_local).collect();
        ir.locals = method.body.locals.iter().map(to_local).collect();

        let mut marks: BTreeMap<u32, Vec<u16>> = BTreeMap::new();
        for label in &method.body.labels {
            let offset = label.offset.ok_or_else(|| CodegenError::UnplacedLabel {
                method: name.clone(),
                label: label.name.clone(),
            })?;
            marks.entry(offset).or_default().push(label.index);
        }

        let mut em = MethodEmitter::new(info, importer, strings, self.options, ir);
        if !self.options.allow_stack_overflow {
            em.emit(IrOp::CallRuntime(Routine::EnsureStack));
        }
        for (idx, instr) in method.body.instructions.iter().enumerate() {
            mark_labels(&mut em, &marks, idx as u32);
            let def = self
                .registry
                .get(instr.opcode)
                .ok_or_else(|| CodegenError::UnknownOpcode {
                    method: name.clone(),
                    opcode: instr.opcode.to_string(),
                })?;
            em.set_cursor(idx);
            (def.lower)(def, &instr.operands, &mut em)?;
        }
        mark_labels(&mut em, &marks, method.body.instructions.len() as u32);

        let patches = em.pending_patches();
        let mut ir = em.finish()?;
        ir.inline_hint = self.options.inline && ir.ops.len() <= INLINE_OP_LIMIT;
        trace!(method = %ir.name, ops = ir.ops.len(), patches, "lowered method");
        Ok(ir)
    }
}

fn mark_labels(em: &mut MethodEmitter<'_>, marks: &BTreeMap<u32, Vec<u16>>, offset: u32) {
    if let Some(labels) = marks.get(&offset) {
        for &index in labels {
            em.emit(IrOp::MarkLabel(index));
        }
    }
}
