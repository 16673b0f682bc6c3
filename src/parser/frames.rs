// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Continuation frames of the source parser.

use tracing::trace;

use crate::core::model::{Instruction, Label, MethodBody, MethodDef, TypeDef, TypeSpec, Variable};
use crate::core::patch::{MethodPatches, PatchKey, PatchQueue};
use crate::opcodes::Operand;

/// One open block. The innermost frame decides how the next statement is
/// read; closing it hands control back to the frame below.
pub(crate) enum Frame {
    File,
    Namespace { line: u32 },
    Type(TypeBuilder),
    Method(MethodBuilder),
    Locals { line: u32 },
    /// Block opened on a line that failed to parse.
    Skip { line: u32 },
}

impl Frame {
    pub(crate) fn line(&self) -> u32 {
        match self {
            Frame::File => 0,
            Frame::Namespace { line } | Frame::Locals { line } | Frame::Skip { line } => *line,
            Frame::Type(builder) => builder.def.line,
            Frame::Method(builder) => builder.def.line,
        }
    }

    pub(crate) fn describe(&self) -> &'static str {
        match self {
            Frame::File => "file",
            Frame::Namespace { .. } => ".namespace block",
            Frame::Type(_) => ".type block",
            Frame::Method(_) => ".method body",
            Frame::Locals { .. } => ".locals block",
            Frame::Skip { .. } => "block",
        }
    }
}

/// A type whose body is still being read.
pub(crate) struct TypeBuilder {
    pub def: TypeDef,
    pub full_name: String,
    /// Namespace the type lands in when it is top level.
    pub namespace: String,
}

/// A method whose body is still being read.
pub(crate) struct MethodBuilder {
    pub def: MethodDef,
    /// Full name of the declaring type.
    pub type_path: String,
    pub locals_seen: bool,
    pub locals_declared: bool,
    label_lines: Vec<u32>,
    patches: PatchQueue<MethodBody>,
}

impl MethodBuilder {
    /// Start a body with the labels found by the pre-scan reserved in
    /// textual order.
    pub(crate) fn new(def: MethodDef, type_path: String, reserved: Vec<(String, u32)>) -> Self {
        let mut builder = Self {
            def,
            type_path,
            locals_seen: false,
            locals_declared: false,
            label_lines: Vec::new(),
            patches: PatchQueue::new(),
        };
        for (name, line) in reserved {
            builder.reserve_label(name, line);
        }
        builder
    }

    fn reserve_label(&mut self, name: String, line: u32) -> Option<usize> {
        let index = u16::try_from(self.def.body.labels.len()).ok()?;
        self.def.body.labels.push(Label {
            name,
            index,
            offset: None,
        });
        self.label_lines.push(line);
        Some(self.def.body.labels.len() - 1)
    }

    /// Fix a label at the next instruction index.
    pub(crate) fn place_label(&mut self, name: &str, line: u32) -> Result<(), String> {
        let offset = self.def.body.instructions.len() as u32;
        let idx = match self.def.body.labels.iter().position(|label| label.name == name) {
            Some(idx) => idx,
            None => self
                .reserve_label(name.to_string(), line)
                .ok_or_else(|| "too many labels in method".to_string())?,
        };
        let label = &mut self.def.body.labels[idx];
        if label.offset.is_some() {
            return Err(format!("duplicate label '{name}'"));
        }
        label.offset = Some(offset);
        self.label_lines[idx] = line;
        Ok(())
    }

    /// Append an instruction, declaring its implicit locals and queueing
    /// target fix-ups for its label operands.
    pub(crate) fn push_instruction(&mut self, instr: Instruction, implicit_locals: Vec<String>) {
        for name in implicit_locals {
            self.def.body.locals.push(Variable::new(name, TypeSpec::object()));
        }
        let position = self.def.body.instructions.len() as u32;
        for (slot, operand) in instr.operands.iter().enumerate() {
            let Operand::Label(label) = operand else {
                continue;
            };
            let index = label.index;
            let slot = slot as u16;
            self.patches
                .enqueue(PatchKey::new(position, slot), move |body: &mut MethodBody| {
                    let target = body
                        .labels
                        .iter()
                        .find(|label| label.index == index)
                        .and_then(|label| label.offset)
                        .ok_or_else(|| format!("label {index} has no offset"))?;
                    let operand = body
                        .instructions
                        .get_mut(position as usize)
                        .and_then(|instr| instr.operands.get_mut(slot as usize));
                    match operand {
                        Some(Operand::Label(label)) => {
                            label.target = Some(target);
                            Ok(())
                        }
                        _ => Err(format!("no label operand at {position}/{slot}")),
                    }
                });
        }
        self.def.body.instructions.push(instr);
    }

    /// Close the body. Branch targets stay unfilled until the returned
    /// patches are applied after resolution.
    pub(crate) fn finish(self) -> (MethodDef, MethodPatches) {
        trace!(method = %self.def.name, pending = self.patches.len(), "label patches deferred");
        let patches = MethodPatches::new(
            self.type_path,
            self.def.name.clone(),
            self.def.line,
            self.label_lines,
            self.patches,
        );
        (self.def, patches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::Attributes;
    use crate::opcodes::{LabelRef, OpcodeId};

    fn builder(labels: &[(&str, u32)]) -> MethodBuilder {
        let def = MethodDef {
            name: "m".to_string(),
            attrs: Attributes::default(),
            ret: TypeSpec::void(),
            params: Vec::new(),
            body: MethodBody::default(),
            line: 1,
        };
        let reserved = labels.iter().map(|(n, l)| (n.to_string(), *l)).collect();
        MethodBuilder::new(def, "T".to_string(), reserved)
    }

    fn branch(index: u16) -> Instruction {
        Instruction::new(
            OpcodeId::Single(0x50),
            vec![Operand::Label(LabelRef {
                index,
                target: None,
            })],
            2,
        )
    }

    fn targets(def: &MethodDef) -> Vec<Option<u32>> {
        def.body
            .instructions
            .iter()
            .map(|i| match &i.operands[0] {
                Operand::Label(label) => label.target,
                _ => None,
            })
            .collect()
    }

    #[test]
    fn branch_targets_are_filled_when_patches_apply() {
        let mut b = builder(&[("top", 2), ("end", 5)]);
        b.place_label("top", 2).unwrap();
        b.push_instruction(branch(1), Vec::new());
        b.push_instruction(branch(0), Vec::new());
        b.place_label("end", 5).unwrap();
        let (mut def, patches) = b.finish();
        assert_eq!(patches.len(), 2);
        assert_eq!(targets(&def), vec![None, None]);
        assert!(patches.apply(&mut def.body).is_empty());
        assert_eq!(targets(&def), vec![Some(2), Some(0)]);
    }

    #[test]
    fn unplaced_labels_are_reported_once_each() {
        let mut b = builder(&[("lost", 7)]);
        b.push_instruction(branch(0), Vec::new());
        let (mut def, patches) = b.finish();
        let diags = patches.apply(&mut def.body);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line(), 7);
        assert!(diags[0].message().contains("lost"));
    }

    #[test]
    fn labels_cannot_be_placed_twice() {
        let mut b = builder(&[("x", 1)]);
        b.place_label("x", 1).unwrap();
        assert!(b.place_label("x", 3).unwrap_err().contains("duplicate"));
    }

    #[test]
    fn implicit_locals_are_objects() {
        let mut b = builder(&[]);
        b.push_instruction(
            Instruction::new(OpcodeId::Single(0x00), Vec::new(), 1),
            vec!["tmp".to_string()],
        );
        assert_eq!(b.def.body.locals[0].name, "tmp");
        assert_eq!(b.def.body.locals[0].ty, TypeSpec::object());
    }
}
