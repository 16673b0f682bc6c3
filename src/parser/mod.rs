// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Source parser: text to program model.
//!
//! The parser keeps an explicit stack of [`Frame`]s instead of recursing.
//! Each step reads one statement for the innermost frame and answers with a
//! [`Step`]. A failed step reports one diagnostic, drops the rest of its
//! line and parsing continues in the same frame.

mod body;
mod decls;
mod frames;
#[cfg(test)]
mod tests;

use std::collections::HashSet;

use tracing::debug;

use crate::core::context::CompilationContext;
use crate::core::error::{AsmErrorKind, Diagnostic};
use crate::core::model::Program;
use crate::core::patch::MethodPatches;
use crate::core::scanner::{LexError, Scanner};
use crate::core::scope::ScopeStack;
use crate::opcodes::OpcodeRegistry;

use frames::{Frame, MethodBuilder};

/// An `.import` met while parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRequest {
    pub path: String,
    pub line: u32,
}

/// What one file contributed besides its declarations.
#[derive(Debug, Default)]
pub struct ParseOutput {
    pub imports: Vec<ImportRequest>,
    /// Branch fix-ups per method, to apply once resolution has run.
    pub label_patches: Vec<MethodPatches>,
    pub types: usize,
    pub methods: usize,
    pub instructions: usize,
}

pub(crate) enum Step {
    Continue,
    Enter(Frame),
    Close,
    Fail(Diagnostic),
}

impl From<LexError> for Diagnostic {
    fn from(err: LexError) -> Self {
        let kind = if err.message.starts_with("Expected") {
            AsmErrorKind::Syntax
        } else {
            AsmErrorKind::Lexical
        };
        Diagnostic::error(err.line, kind, &err.message, None).with_column(Some(err.column))
    }
}

pub(crate) fn syntax(line: u32, msg: &str, param: Option<&str>) -> Diagnostic {
    Diagnostic::error(line, AsmErrorKind::Syntax, msg, param)
}

pub(crate) fn semantic(line: u32, msg: &str, param: Option<&str>) -> Diagnostic {
    Diagnostic::error(line, AsmErrorKind::Semantic, msg, param)
}

/// Mutable state of one file's parse.
pub(crate) struct ParseState<'p> {
    pub program: &'p mut Program,
    pub scope: ScopeStack,
    pub frames: Vec<Frame>,
    pub output: ParseOutput,
    /// Types declared so far in this file, attached or not.
    pub declared_types: HashSet<String>,
}

impl ParseState<'_> {
    /// Full name of the innermost enclosing type.
    pub(crate) fn type_path(&self) -> Option<String> {
        self.frames.iter().rev().find_map(|frame| match frame {
            Frame::Type(builder) => Some(builder.full_name.clone()),
            Frame::Method(builder) => Some(builder.type_path.clone()),
            _ => None,
        })
    }

    pub(crate) fn method_mut(&mut self) -> Option<&mut MethodBuilder> {
        self.frames.iter_mut().rev().find_map(|frame| match frame {
            Frame::Method(builder) => Some(builder),
            _ => None,
        })
    }
}

pub struct SourceParser<'r> {
    registry: &'r OpcodeRegistry,
}

impl<'r> SourceParser<'r> {
    pub fn new(registry: &'r OpcodeRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r OpcodeRegistry {
        self.registry
    }

    /// Parse one file into `program`. The context's current file names the
    /// source in diagnostics and pending references.
    pub fn parse_source(
        &self,
        source: &str,
        program: &mut Program,
        ctx: &mut CompilationContext,
    ) -> ParseOutput {
        let mut scanner = Scanner::new(source);
        let mut state = ParseState {
            program,
            scope: ScopeStack::new(),
            frames: vec![Frame::File],
            output: ParseOutput::default(),
            declared_types: HashSet::new(),
        };

        loop {
            scanner.skip_trivia();
            if scanner.at_eof() {
                break;
            }
            ctx.set_line(scanner.line());
            if matches!(state.frames.last(), Some(Frame::Skip { .. })) {
                self.skip_block_line(&mut state, &mut scanner, ctx);
                continue;
            }
            let start = scanner.save();
            match self.step(&mut state, &mut scanner, ctx) {
                Step::Continue => {}
                Step::Enter(frame) => state.frames.push(frame),
                Step::Close => self.close_frame(&mut state, ctx),
                Step::Fail(diag) => {
                    ctx.report(diag);
                    scanner.restore(start);
                    self.skip_block_line(&mut state, &mut scanner, ctx);
                }
            }
        }

        while state.frames.len() > 1 {
            if let Some(frame) = state.frames.last() {
                if !matches!(frame, Frame::Skip { .. }) {
                    ctx.report(syntax(frame.line(), "Unclosed block", Some(frame.describe())));
                }
            }
            self.close_frame(&mut state, ctx);
        }

        debug!(
            file = ctx.file(),
            types = state.output.types,
            methods = state.output.methods,
            instructions = state.output.instructions,
            imports = state.output.imports.len(),
            "parsed file"
        );
        state.output
    }

    fn step(
        &self,
        state: &mut ParseState<'_>,
        scanner: &mut Scanner<'_>,
        ctx: &mut CompilationContext,
    ) -> Step {
        match self.try_step(state, scanner, ctx) {
            Ok(step) => step,
            Err(diag) => Step::Fail(diag),
        }
    }

    fn try_step(
        &self,
        state: &mut ParseState<'_>,
        scanner: &mut Scanner<'_>,
        ctx: &mut CompilationContext,
    ) -> Result<Step, Diagnostic> {
        let line = scanner.line();
        if scanner.peek() == Some('}') {
            if state.frames.len() <= 1 {
                return Err(syntax(line, "Unexpected '}'", None).with_column(Some(scanner.column())));
            }
            scanner.expect('}')?;
            return Ok(Step::Close);
        }
        let top = state.frames.last();
        if matches!(top, Some(Frame::File | Frame::Namespace { .. })) {
            self.namespace_statement(state, scanner, ctx)
        } else if matches!(top, Some(Frame::Type(_))) {
            self.type_statement(state, scanner, ctx)
        } else if matches!(top, Some(Frame::Method(_))) {
            self.method_statement(state, scanner, ctx)
        } else if matches!(top, Some(Frame::Locals { .. })) {
            self.locals_entry(state, scanner, ctx)
        } else {
            Ok(Step::Continue)
        }
    }

    /// Drop the rest of the line, keeping the frame stack in step with the
    /// braces on it.
    fn skip_block_line(
        &self,
        state: &mut ParseState<'_>,
        scanner: &mut Scanner<'_>,
        ctx: &mut CompilationContext,
    ) {
        let line = scanner.line();
        for brace in scanner.skip_line() {
            if brace == '{' {
                state.frames.push(Frame::Skip { line });
            } else if state.frames.len() > 1 {
                self.close_frame(state, ctx);
            }
        }
    }

    /// Pop the innermost frame and run its close action.
    fn close_frame(&self, state: &mut ParseState<'_>, ctx: &mut CompilationContext) {
        let Some(frame) = state.frames.pop() else {
            return;
        };
        match frame {
            Frame::File => state.frames.push(Frame::File),
            Frame::Namespace { .. } => {
                state.scope.pop();
            }
            Frame::Type(builder) => {
                state.output.types += 1;
                match state.frames.last_mut() {
                    Some(Frame::Type(parent)) => parent.def.nested.push(builder.def),
                    _ => state
                        .program
                        .namespace_mut(&builder.namespace)
                        .types
                        .push(builder.def),
                }
            }
            Frame::Method(builder) => {
                let (def, mut patches) = builder.finish();
                state.output.methods += 1;
                state.output.instructions += def.body.instructions.len();
                if let Some(Frame::Type(parent)) = state.frames.last_mut() {
                    patches.index = parent.def.methods.len();
                    patches.file = ctx.file_arc();
                    parent.def.methods.push(def);
                    state.output.label_patches.push(patches);
                }
            }
            Frame::Locals { .. } => {
                if let Some(method) = state.method_mut() {
                    method.locals_declared = true;
                }
            }
            Frame::Skip { .. } => {}
        }
    }
}
