// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Disassembly listing of a program model.

use std::io::{self, Write};

use crate::core::model::{
    Attributes, MethodDef, Program, TypeDef, FIELD_MODIFIERS, METHOD_MODIFIERS, TYPE_MODIFIERS,
};
use crate::core::string_heap::StringHeap;
use crate::core::symbols::join;
use crate::opcodes::{OpcodeRegistry, Operand, VarKind};

use super::writer::encode_method_code;

/// Writer for listing file output.
pub struct ListingWriter<W: Write> {
    out: W,
}

fn modifiers(attrs: Attributes, table: &[(&str, u16)]) -> String {
    table
        .iter()
        .filter(|(_, bit)| attrs.has(*bit))
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(" ")
}

fn invalid_data(err: impl std::error::Error + Send + Sync + 'static) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

impl<W: Write> ListingWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn header(&mut self, title: &str) -> io::Result<()> {
        writeln!(self.out, "; {title}")?;
        writeln!(self.out, "; OFFS  INSTRUCTION")?;
        Ok(())
    }

    pub fn write_program(&mut self, program: &Program, registry: &OpcodeRegistry) -> io::Result<()> {
        for ext in &program.externs {
            writeln!(self.out, ".extern {ext}")?;
        }
        for alias in &program.aliases {
            writeln!(self.out, ".alias {} = {}", alias.alias, alias.target.display())?;
        }
        for ns in &program.namespaces {
            if ns.types.is_empty() {
                continue;
            }
            if ns.name.is_empty() {
                for ty in &ns.types {
                    self.write_type(ty, "", 0, registry)?;
                }
            } else {
                writeln!(self.out, ".namespace {} {{", ns.name)?;
                for ty in &ns.types {
                    self.write_type(ty, &ns.name, 1, registry)?;
                }
                writeln!(self.out, "}}")?;
            }
        }
        Ok(())
    }

    fn write_type(
        &mut self,
        ty: &TypeDef,
        prefix: &str,
        depth: usize,
        registry: &OpcodeRegistry,
    ) -> io::Result<()> {
        let indent = "  ".repeat(depth);
        let mods = modifiers(ty.attrs, TYPE_MODIFIERS);
        if mods.is_empty() {
            writeln!(self.out, "{indent}.type {} {{", ty.name)?;
        } else {
            writeln!(self.out, "{indent}.type {} : {mods} {{", ty.name)?;
        }
        for field in &ty.fields {
            let mods = modifiers(field.attrs, FIELD_MODIFIERS);
            let sep = if mods.is_empty() { "" } else { " " };
            writeln!(
                self.out,
                "{indent}  .field {mods}{sep}{} : {}",
                field.name,
                field.ty.display()
            )?;
        }
        let full = join(prefix, &ty.name);
        for method in &ty.methods {
            self.write_method(method, &indent, registry)?;
        }
        for nested in &ty.nested {
            self.write_type(nested, &full, depth + 1, registry)?;
        }
        writeln!(self.out, "{indent}}}")
    }

    fn write_method(&mut self, method: &MethodDef, indent: &str, registry: &OpcodeRegistry) -> io::Result<()> {
        let params: Vec<String> = method
            .params
            .iter()
            .map(|p| format!("{}:{}", p.name, p.ty.display()))
            .collect();
        let mods = modifiers(method.attrs, METHOD_MODIFIERS);
        let mut head = format!("{indent}  .method {}({})", method.name, params.join(", "));
        if !mods.is_empty() {
            head.push(' ');
            head.push_str(&mods);
        }
        if method.ret.display() != "void" {
            head.push_str(" -> ");
            head.push_str(&method.ret.display());
        }
        if method.attrs.has(Attributes::ABSTRACT) || method.attrs.has(Attributes::EXTERN) {
            return writeln!(self.out, "{head}");
        }
        writeln!(self.out, "{head} {{")?;

        if !method.body.locals.is_empty() {
            let locals: Vec<String> = method
                .body
                .locals
                .iter()
                .map(|l| format!("{}:{}", l.name, l.ty.display()))
                .collect();
            writeln!(self.out, "{indent}    .locals {{ {} }}", locals.join(", "))?;
        }

        let mut scratch = StringHeap::new();
        let (_, offsets) = encode_method_code(method, registry, &mut scratch).map_err(invalid_data)?;
        for (idx, instr) in method.body.instructions.iter().enumerate() {
            for label in &method.body.labels {
                if label.offset == Some(idx as u32) {
                    writeln!(self.out, "{indent}  {}:", label.name)?;
                }
            }
            let mnemonic = registry.get(instr.opcode).map_or("???", |def| def.mnemonic);
            let operands: Vec<String> = instr
                .operands
                .iter()
                .map(|operand| operand_text(method, operand))
                .collect();
            let text = if operands.is_empty() {
                mnemonic.to_string()
            } else {
                format!("{mnemonic} {}", operands.join(", "))
            };
            writeln!(self.out, "{indent}    {:04X}  {text}", offsets[idx])?;
        }
        let end = method.body.instructions.len() as u32;
        for label in &method.body.labels {
            if label.offset == Some(end) {
                writeln!(self.out, "{indent}  {}:", label.name)?;
            }
        }
        writeln!(self.out, "{indent}  }}")
    }
}

fn operand_text(method: &MethodDef, operand: &Operand) -> String {
    match operand {
        Operand::Const(constant) => constant.to_string(),
        Operand::Type(spec) => spec.display(),
        Operand::NullType => "null".to_string(),
        Operand::Field(reference) | Operand::Method(reference) => {
            reference.display_name().to_string()
        }
        Operand::Register(reg) => reg.name().to_string(),
        Operand::Flag(flag) => flag.name().to_string(),
        Operand::Label(label) => method
            .body
            .labels
            .iter()
            .find(|l| l.index == label.index)
            .map_or_else(|| format!("#{}", label.index), |l| l.name.clone()),
        Operand::Var(var) => {
            let vars = match var.kind {
                VarKind::Arg => &method.params,
                VarKind::Local => &method.body.locals,
            };
            vars.get(var.slot as usize)
                .map_or_else(|| var.slot.to_string(), |v| v.name.clone())
        }
        Operand::FunctionId(name) => format!("{name:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{Instruction, Label, MethodBody, TypeSpec, Variable};
    use crate::opcodes::{LabelRef, OpcodeId, Register, VarRef};

    #[test]
    fn listing_shows_offsets_labels_and_names() {
        let mut ty = TypeDef::new("Main", Attributes(Attributes::PUBLIC), 1);
        ty.methods.push(MethodDef {
            name: "run".to_string(),
            attrs: Attributes(Attributes::STATIC),
            ret: TypeSpec::void(),
            params: Vec::new(),
            body: MethodBody {
                instructions: vec![
                    Instruction::new(
                        OpcodeId::Single(0x2D),
                        vec![Operand::Var(VarRef {
                            kind: VarKind::Local,
                            slot: 0,
                        })],
                        2,
                    ),
                    Instruction::new(
                        OpcodeId::Single(0x50),
                        vec![Operand::Label(LabelRef {
                            index: 0,
                            target: Some(0),
                        })],
                        3,
                    ),
                    Instruction::new(OpcodeId::Single(0x05), vec![Operand::Register(Register::Ra)], 4),
                ],
                labels: vec![Label {
                    name: "top".to_string(),
                    index: 0,
                    offset: Some(0),
                }],
                locals: vec![Variable::new("n", TypeSpec::object())],
            },
            line: 2,
        });
        let mut program = Program::new();
        program.namespace_mut("App").types.push(ty);

        let mut out = Vec::new();
        let mut writer = ListingWriter::new(&mut out);
        writer.header("test").unwrap();
        writer
            .write_program(&program, OpcodeRegistry::standard().unwrap())
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let expected = [
            "; test",
            "; OFFS  INSTRUCTION",
            ".namespace App {",
            "  .type Main : pub {",
            "    .method run() stat {",
            "      .locals { n:obj }",
            "    top:",
            "      0000  stlc n",
            "      0006  jmp top",
            "      000B  pop ra",
            "    }",
            "  }",
            "}",
            "",
        ]
        .join("\n");
        assert_eq!(text, expected);
    }
}
