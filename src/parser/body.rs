// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Method bodies: `.locals`, labels and instructions.

use std::sync::Arc;

use crate::core::context::CompilationContext;
use crate::core::error::{AsmErrorKind, Diagnostic};
use crate::core::model::{Instruction, Variable};
use crate::core::scanner::Scanner;
use crate::opcodes::{ArgContext, ArgToken, OpcodeDef, Operand, RawArg};

use super::decls::read_type_spec;
use super::frames::Frame;
use super::{semantic, syntax, ParseState, SourceParser, Step};

fn read_arg(scanner: &mut Scanner<'_>) -> Result<RawArg, Diagnostic> {
    scanner.skip_trivia();
    let column = scanner.column();
    let token = if scanner.at_literal() {
        ArgToken::Literal(scanner.read_literal()?)
    } else {
        let (text, dims) = scanner.read_type_name()?;
        ArgToken::Name { text, dims }
    };
    Ok(RawArg { token, column })
}

impl SourceParser<'_> {
    pub(super) fn method_statement(
        &self,
        state: &mut ParseState<'_>,
        scanner: &mut Scanner<'_>,
        ctx: &mut CompilationContext,
    ) -> Result<Step, Diagnostic> {
        let line = scanner.line();
        let column = scanner.column();
        if scanner.peek() == Some('.') {
            scanner.expect('.')?;
            let word = scanner.read_ident()?;
            if word != "locals" {
                return Err(syntax(line, "Unexpected directive", Some(&format!(".{word}")))
                    .with_column(Some(column))
                    .with_help("allowed here: .locals"));
            }
            let method = state
                .method_mut()
                .ok_or_else(|| syntax(line, ".locals outside a method", None))?;
            if method.locals_seen {
                return Err(semantic(line, "Duplicate .locals block", None));
            }
            if !method.def.body.instructions.is_empty() {
                return Err(semantic(line, ".locals must precede the first instruction", None));
            }
            method.locals_seen = true;
            scanner.expect('{')?;
            return Ok(Step::Enter(Frame::Locals { line }));
        }

        if scanner.at_label_decl() {
            let name = scanner.read_ident()?;
            scanner.expect(':')?;
            let method = state
                .method_mut()
                .ok_or_else(|| syntax(line, "Label outside a method", Some(&name)))?;
            method
                .place_label(&name, line)
                .map_err(|msg| semantic(line, "Invalid label", Some(&msg)).with_column(Some(column)))?;
            return Ok(Step::Continue);
        }

        self.instruction(state, scanner, ctx)
    }

    /// One `name : TYPE` entry of a `.locals` block.
    pub(super) fn locals_entry(
        &self,
        state: &mut ParseState<'_>,
        scanner: &mut Scanner<'_>,
        ctx: &mut CompilationContext,
    ) -> Result<Step, Diagnostic> {
        if scanner.eat(',') {
            return Ok(Step::Continue);
        }
        let line = scanner.line();
        let name = scanner.read_ident()?;
        scanner.expect(':')?;
        let type_path = state.type_path();
        let ty = read_type_spec(scanner, &mut state.scope, ctx, type_path.as_deref())?;
        let method = state
            .method_mut()
            .ok_or_else(|| syntax(line, "Local outside a method", Some(&name)))?;
        if method.def.body.local_slot(&name).is_some() {
            return Err(semantic(line, "Duplicate local", Some(&name)));
        }
        if method.def.body.locals.len() >= usize::from(u16::MAX) {
            return Err(semantic(line, "Too many locals", Some(&name)));
        }
        method.def.body.locals.push(Variable::new(name, ty));
        Ok(Step::Continue)
    }

    /// A mnemonic and its arguments, matched against the registry's
    /// candidates in declaration order.
    fn instruction(
        &self,
        state: &mut ParseState<'_>,
        scanner: &mut Scanner<'_>,
        ctx: &mut CompilationContext,
    ) -> Result<Step, Diagnostic> {
        let line = scanner.line();
        let column = scanner.column();
        let mnemonic = scanner.read_ident()?;
        if !self.registry.is_mnemonic(&mnemonic) {
            return Err(
                Diagnostic::error(line, AsmErrorKind::Opcode, "Unknown mnemonic", Some(&mnemonic))
                    .with_column(Some(column))
                    .with_code("cpa303"),
            );
        }
        let args = self.read_args(&mnemonic, scanner)?;
        let candidates = self.registry.candidates(&mnemonic, args.len());
        if candidates.is_empty() {
            let mut diag = Diagnostic::error(
                line,
                AsmErrorKind::Opcode,
                &format!("No form of '{mnemonic}' takes {} argument(s)", args.len()),
                None,
            )
            .with_column(Some(column))
            .with_code("cpa304");
            for def in self.registry.overloads(&mnemonic) {
                diag = diag.with_note(format!("form: {}", def.signature()));
            }
            return Err(diag);
        }

        let type_path = state.type_path();
        let scope = state.scope.snapshot(type_path.as_deref());
        let file = ctx.file_arc();
        let method = state
            .method_mut()
            .ok_or_else(|| syntax(line, "Instruction outside a method", Some(&mnemonic)))?;

        let mut chosen: Option<(&OpcodeDef, Vec<Operand>, Vec<String>)> = None;
        let mut also_accepted = Vec::new();
        let mut rejections = Vec::new();
        for def in candidates {
            let mut arg_ctx = ArgContext {
                scope: Arc::clone(&scope),
                file: Arc::clone(&file),
                line,
                params: &method.def.params,
                locals: &method.def.body.locals,
                locals_declared: method.locals_declared,
                labels: &method.def.body.labels,
                implicit_locals: Vec::new(),
            };
            match (def.parse)(def, &args, &mut arg_ctx) {
                Ok(operands) if chosen.is_none() => {
                    chosen = Some((def, operands, arg_ctx.implicit_locals));
                }
                Ok(_) => also_accepted.push(def.signature()),
                Err(reason) if chosen.is_none() => {
                    rejections.push(format!("{}: {reason}", def.signature()));
                }
                Err(_) => {}
            }
        }

        let Some((def, operands, implicit_locals)) = chosen else {
            let mut diag = Diagnostic::error(
                line,
                AsmErrorKind::Opcode,
                &format!("Invalid arguments for '{mnemonic}'"),
                (rejections.len() == 1).then(|| rejections[0].as_str()),
            )
            .with_column(Some(column));
            if rejections.len() > 1 {
                for rejection in &rejections {
                    diag = diag.with_note(rejection.clone());
                }
            }
            return Err(diag);
        };

        if !also_accepted.is_empty() {
            let mut diag = Diagnostic::warning(
                line,
                AsmErrorKind::Opcode,
                "Ambiguous instruction",
                Some(&def.signature()),
            )
            .with_column(Some(column))
            .with_code("cpa305");
            for signature in &also_accepted {
                diag = diag.with_note(format!("also accepted by: {signature}"));
            }
            ctx.report(diag.with_help("the first form in table order is used"));
        }

        method.push_instruction(Instruction::new(def.id, operands, line), implicit_locals);
        Ok(Step::Continue)
    }

    /// Arguments on the mnemonic's line, separated by commas.
    fn read_args(&self, mnemonic: &str, scanner: &mut Scanner<'_>) -> Result<Vec<RawArg>, Diagnostic> {
        let mut args = Vec::new();
        if scanner.at_line_end() || !self.starts_argument(mnemonic, scanner) {
            return Ok(args);
        }
        loop {
            args.push(read_arg(scanner)?);
            scanner.skip_inline_trivia();
            if scanner.peek() != Some(',') {
                break;
            }
            scanner.expect(',')?;
        }
        Ok(args)
    }

    /// Whether the next word is an argument of `mnemonic` rather than the
    /// start of another instruction on the same line.
    ///
    /// A word spelled like a mnemonic only starts a new instruction when
    /// `mnemonic` can stand alone and the word is not followed by a comma.
    fn starts_argument(&self, mnemonic: &str, scanner: &mut Scanner<'_>) -> bool {
        match scanner.peek() {
            None | Some('}') | Some('.') | Some(',') => false,
            _ if scanner.at_literal() => true,
            _ => match scanner.peek_ident() {
                Some(_) if scanner.at_label_decl() => false,
                Some(ident) if self.registry.is_mnemonic(ident) => {
                    if self.registry.candidates(mnemonic, 0).is_empty() {
                        return true;
                    }
                    let mark = scanner.save();
                    let listed = scanner.read_ident().is_ok() && {
                        scanner.skip_inline_trivia();
                        scanner.peek() == Some(',')
                    };
                    scanner.restore(mark);
                    listed
                }
                _ => true,
            },
        }
    }
}
