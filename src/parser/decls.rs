// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Declaration directives: namespaces, imports, types, fields and methods.

use crate::core::context::CompilationContext;
use crate::core::error::Diagnostic;
use crate::core::model::{
    modifier_bit, Attributes, FieldDef, MethodBody, MethodDef, TypeAlias, TypeDef, TypeSpec,
    Variable, FIELD_MODIFIERS, METHOD_MODIFIERS, TYPE_MODIFIERS,
};
use crate::core::scanner::Scanner;
use crate::core::scope::ScopeStack;
use crate::core::symbols::{
    is_primitive_type, join, PendingRef, RefKind, Reference, SourceLoc, Symbol,
};

use super::frames::{Frame, MethodBuilder, TypeBuilder};
use super::{semantic, syntax, ImportRequest, ParseState, SourceParser, Step};

/// Read a type name and capture it as a reference for the resolution pass.
pub(crate) fn read_type_spec(
    scanner: &mut Scanner<'_>,
    scope: &mut ScopeStack,
    ctx: &CompilationContext,
    type_path: Option<&str>,
) -> Result<TypeSpec, Diagnostic> {
    scanner.skip_trivia();
    let line = scanner.line();
    let column = scanner.column();
    let (name, dims) = scanner.read_type_name()?;
    let reference = if is_primitive_type(&name) {
        Reference::Resolved(Symbol::primitive(&name))
    } else {
        Reference::Pending(PendingRef {
            name,
            expect: RefKind::Type,
            scope: scope.snapshot(type_path),
            origin: SourceLoc::new(ctx.file_arc(), line, Some(column)),
        })
    };
    Ok(TypeSpec::new(reference, dims))
}

/// The directive word after a `.`, if the cursor is on one.
fn read_directive(scanner: &mut Scanner<'_>) -> Result<Option<(String, usize)>, Diagnostic> {
    if scanner.peek() != Some('.') {
        return Ok(None);
    }
    let column = scanner.column();
    scanner.expect('.')?;
    Ok(Some((scanner.read_ident()?, column)))
}

fn unknown_directive(line: u32, column: usize, word: &str, allowed: &str) -> Diagnostic {
    syntax(line, "Unexpected directive", Some(&format!(".{word}")))
        .with_column(Some(column))
        .with_help(format!("allowed here: {allowed}"))
}

fn read_modifier(
    scanner: &mut Scanner<'_>,
    table: &[(&str, u16)],
    what: &str,
    attrs: &mut Attributes,
) -> Result<(), Diagnostic> {
    let line = scanner.line();
    let column = scanner.column();
    let word = scanner.read_ident()?;
    let bit = modifier_bit(table, &word).ok_or_else(|| {
        syntax(line, &format!("Unknown {what} modifier"), Some(&word)).with_column(Some(column))
    })?;
    attrs.set(bit);
    Ok(())
}

impl SourceParser<'_> {
    /// One statement at file or namespace level.
    pub(super) fn namespace_statement(
        &self,
        state: &mut ParseState<'_>,
        scanner: &mut Scanner<'_>,
        ctx: &mut CompilationContext,
    ) -> Result<Step, Diagnostic> {
        let line = scanner.line();
        let Some((word, column)) = read_directive(scanner)? else {
            return Err(syntax(line, "Expected a declaration", None)
                .with_column(Some(scanner.column())));
        };
        match word.as_str() {
            "import" => {
                let path = scanner.read_string()?;
                state.output.imports.push(ImportRequest { path, line });
                Ok(Step::Continue)
            }
            "using" => {
                let namespace = scanner.read_dotted()?;
                state.scope.add_import(&namespace);
                Ok(Step::Continue)
            }
            "alias" => {
                let alias = scanner.read_ident()?;
                scanner.expect('=')?;
                let target = read_type_spec(scanner, &mut state.scope, ctx, None)?;
                state.scope.add_alias(&alias, target.reference.display_name());
                state.program.aliases.push(TypeAlias {
                    alias: state.scope.qualify(&alias),
                    target,
                });
                Ok(Step::Continue)
            }
            "extern" => {
                let namespace = scanner.read_dotted()?;
                state.program.add_extern(&namespace);
                Ok(Step::Continue)
            }
            "namespace" => {
                let rooted = scanner.eat_str("::");
                let name = scanner.read_dotted()?;
                scanner.expect('{')?;
                let pushed = if rooted {
                    state.scope.push_rooted(&name)
                } else {
                    state.scope.push_named(&name)
                };
                pushed.map_err(|msg| syntax(line, msg, Some(&name)))?;
                Ok(Step::Enter(Frame::Namespace { line }))
            }
            "type" => self.type_decl(state, scanner, line),
            _ => Err(unknown_directive(
                line,
                column,
                &word,
                ".import .using .alias .extern .namespace .type",
            )),
        }
    }

    /// One statement inside a type body.
    pub(super) fn type_statement(
        &self,
        state: &mut ParseState<'_>,
        scanner: &mut Scanner<'_>,
        ctx: &mut CompilationContext,
    ) -> Result<Step, Diagnostic> {
        let line = scanner.line();
        let Some((word, column)) = read_directive(scanner)? else {
            return Err(syntax(line, "Expected a member declaration", None)
                .with_column(Some(scanner.column())));
        };
        match word.as_str() {
            "field" => self.field_decl(state, scanner, ctx, line),
            "method" => self.method_decl(state, scanner, ctx, line),
            "type" => self.type_decl(state, scanner, line),
            _ => Err(unknown_directive(line, column, &word, ".field .method .type")),
        }
    }

    fn type_decl(
        &self,
        state: &mut ParseState<'_>,
        scanner: &mut Scanner<'_>,
        line: u32,
    ) -> Result<Step, Diagnostic> {
        let name = scanner.read_ident()?;
        let mut attrs = Attributes::default();
        if scanner.eat(':') {
            loop {
                scanner.skip_trivia();
                if scanner.peek() == Some('{') || scanner.at_eof() {
                    break;
                }
                read_modifier(scanner, TYPE_MODIFIERS, "type", &mut attrs)?;
            }
        }
        scanner.expect('{')?;

        let full_name = match state.type_path() {
            Some(parent) => join(&parent, &name),
            None => state.scope.qualify(&name),
        };
        if state.declared_types.contains(&full_name) || state.program.find_type(&full_name).is_some()
        {
            return Err(semantic(line, "Duplicate type", Some(&full_name)));
        }
        state.declared_types.insert(full_name.clone());
        Ok(Step::Enter(Frame::Type(TypeBuilder {
            def: TypeDef::new(name, attrs, line),
            full_name,
            namespace: state.scope.namespace(),
        })))
    }

    fn field_decl(
        &self,
        state: &mut ParseState<'_>,
        scanner: &mut Scanner<'_>,
        ctx: &mut CompilationContext,
        line: u32,
    ) -> Result<Step, Diagnostic> {
        let mut attrs = Attributes::default();
        let name = loop {
            scanner.skip_trivia();
            let save = scanner.save();
            let word = scanner.read_ident()?;
            scanner.skip_inline_trivia();
            if scanner.peek() == Some(':') {
                break word;
            }
            scanner.restore(save);
            read_modifier(scanner, FIELD_MODIFIERS, "field", &mut attrs)?;
        };
        scanner.expect(':')?;
        let type_path = state.type_path();
        let ty = read_type_spec(scanner, &mut state.scope, ctx, type_path.as_deref())?;

        let Some(Frame::Type(builder)) = state.frames.last_mut() else {
            return Err(syntax(line, "Field outside a type", Some(&name)));
        };
        if builder.def.field(&name).is_some() {
            return Err(semantic(line, "Duplicate field", Some(&name)));
        }
        builder.def.fields.push(FieldDef {
            name,
            attrs,
            ty,
            line,
        });
        Ok(Step::Continue)
    }

    fn method_decl(
        &self,
        state: &mut ParseState<'_>,
        scanner: &mut Scanner<'_>,
        ctx: &mut CompilationContext,
        line: u32,
    ) -> Result<Step, Diagnostic> {
        let name = scanner.read_ident()?;
        let type_path = state.type_path().unwrap_or_default();
        scanner.expect('(')?;
        let mut params: Vec<Variable> = Vec::new();
        if !scanner.eat(')') {
            loop {
                scanner.skip_trivia();
                let param_line = scanner.line();
                let param = scanner.read_ident()?;
                scanner.expect(':')?;
                let ty = read_type_spec(scanner, &mut state.scope, ctx, Some(&type_path))?;
                if params.iter().any(|p| p.name == param) {
                    return Err(semantic(param_line, "Duplicate parameter", Some(&param)));
                }
                params.push(Variable::new(param, ty));
                if scanner.eat(',') {
                    continue;
                }
                scanner.expect(')')?;
                break;
            }
        }

        let mut attrs = Attributes::default();
        loop {
            scanner.skip_inline_trivia();
            match scanner.peek() {
                None | Some('\n') | Some('{') | Some('-') => break,
                _ => read_modifier(scanner, METHOD_MODIFIERS, "method", &mut attrs)?,
            }
        }
        let ret = if scanner.eat_str("->") {
            read_type_spec(scanner, &mut state.scope, ctx, Some(&type_path))?
        } else {
            TypeSpec::void()
        };

        let Some(Frame::Type(builder)) = state.frames.last_mut() else {
            return Err(syntax(line, "Method outside a type", Some(&name)));
        };
        if builder.def.method(&name).is_some() {
            return Err(semantic(line, "Duplicate method", Some(&name)));
        }
        let def = MethodDef {
            name,
            attrs,
            ret,
            params,
            body: MethodBody::default(),
            line,
        };

        let bodiless = attrs.has(Attributes::ABSTRACT) || attrs.has(Attributes::EXTERN);
        scanner.skip_trivia();
        let has_body = scanner.peek() == Some('{');
        match (bodiless, has_body) {
            (true, false) => {
                builder.def.methods.push(def);
                state.output.methods += 1;
                Ok(Step::Continue)
            }
            (true, true) => Err(semantic(
                line,
                "Abstract or extern method cannot have a body",
                Some(&def.name),
            )),
            (false, false) => Err(syntax(line, "Expected method body", Some(&def.name))),
            (false, true) => {
                scanner.expect('{')?;
                let reserved = scanner.prescan_labels();
                Ok(Step::Enter(Frame::Method(MethodBuilder::new(
                    def, type_path, reserved,
                ))))
            }
        }
    }
}
