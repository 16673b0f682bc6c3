// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Resolution pass: rewrite every pending reference in a program in place.

use std::collections::HashSet;

use tracing::{debug, trace};

use crate::core::context::CompilationContext;
use crate::core::error::{AsmErrorKind, Diagnostic};
use crate::core::model::{Program, TypeDef};
use crate::core::patch::MethodPatches;
use crate::core::symbols::{join, DeclarationTable, PendingRef, Reference, Resolution};
use crate::opcodes::Operand;

/// Counts from one resolution pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub resolved: usize,
    pub unresolved: usize,
}

/// Collect the declarations of a whole compilation set.
pub fn collect_declarations(program: &Program) -> DeclarationTable {
    fn declare(table: &mut DeclarationTable, prefix: &str, ty: &TypeDef) {
        let full = join(prefix, &ty.name);
        for field in &ty.fields {
            table.declare_field(join(&full, &field.name));
        }
        for method in &ty.methods {
            table.declare_method(join(&full, &method.name));
        }
        for nested in &ty.nested {
            declare(table, &full, nested);
        }
        table.declare_type(full);
    }

    let mut table = DeclarationTable::new();
    for ns in &program.namespaces {
        for ty in &ns.types {
            declare(&mut table, &ns.name, ty);
        }
    }
    for ext in &program.externs {
        table.declare_extern(ext.clone());
    }
    table
}

/// Visit every reference stored in the program model.
pub fn for_each_reference_mut(program: &mut Program, visit: &mut dyn FnMut(&mut Reference)) {
    for alias in &mut program.aliases {
        visit(&mut alias.target.reference);
    }
    program.for_each_type_mut(|_, ty| {
        for field in &mut ty.fields {
            visit(&mut field.ty.reference);
        }
        for method in &mut ty.methods {
            visit(&mut method.ret.reference);
            for var in method.params.iter_mut().chain(method.body.locals.iter_mut()) {
                visit(&mut var.ty.reference);
            }
            for instr in &mut method.body.instructions {
                for operand in &mut instr.operands {
                    match operand {
                        Operand::Type(spec) => visit(&mut spec.reference),
                        Operand::Field(reference) | Operand::Method(reference) => visit(reference),
                        _ => {}
                    }
                }
            }
        }
    });
}

/// Resolve every pending reference against the program's own declarations.
///
/// Each failed lookup produces one diagnostic naming the reference and
/// where it was written. The program may still hold pending references
/// afterwards only if diagnostics were reported.
pub fn resolve_program(program: &mut Program, ctx: &mut CompilationContext) -> ResolveStats {
    let table = collect_declarations(program);
    let mut stats = ResolveStats::default();
    let mut reported: HashSet<(String, String, u32)> = HashSet::new();
    let mut diagnostics = Vec::new();

    for_each_reference_mut(program, &mut |reference| {
        let Reference::Pending(pending) = reference else {
            return;
        };
        match table.resolve(pending) {
            Resolution::Found(symbol) => {
                stats.resolved += 1;
                *reference = Reference::Resolved(symbol);
            }
            Resolution::NotFound => {
                stats.unresolved += 1;
                let key = (
                    pending.name.clone(),
                    pending.origin.file.to_string(),
                    pending.origin.line,
                );
                if reported.insert(key) {
                    diagnostics.push(unresolved_diagnostic(pending));
                }
            }
            Resolution::Ambiguous(candidates) => {
                stats.unresolved += 1;
                let mut diag = located(
                    Diagnostic::error(
                        pending.origin.line,
                        AsmErrorKind::Resolution,
                        &format!("Ambiguous {} reference", pending.expect.describe()),
                        Some(&pending.name),
                    ),
                    pending,
                );
                for candidate in candidates {
                    diag = diag.with_note(format!("candidate: {candidate}"));
                }
                diagnostics.push(diag.with_help("qualify the name or remove one of the .using imports"));
            }
        }
    });

    for diag in diagnostics {
        ctx.report(diag);
    }
    debug!(
        resolved = stats.resolved,
        unresolved = stats.unresolved,
        "resolution pass complete"
    );
    stats
}

/// Fill branch targets once resolution has run, returning how many
/// methods were patched cleanly.
///
/// Each method first has its labels checked; a method with an unplaced
/// label is reported and left unpatched.
pub fn apply_label_patches(
    program: &mut Program,
    patches: Vec<MethodPatches>,
    ctx: &mut CompilationContext,
) -> usize {
    let mut patched = 0;
    for set in patches {
        let owner = join(&set.type_path, &set.method);
        let file = set.file.to_string();
        let line = set.line;
        let Some(method) = program
            .find_type_mut(&set.type_path)
            .and_then(|ty| ty.methods.get_mut(set.index))
            .filter(|method| method.name == set.method)
        else {
            ctx.report(
                Diagnostic::error(line, AsmErrorKind::Semantic, "Branch targets could not be fixed", Some(&owner))
                    .with_file((!file.is_empty()).then_some(file)),
            );
            continue;
        };
        let diagnostics = set.apply(&mut method.body);
        if diagnostics.is_empty() {
            patched += 1;
        }
        for diag in diagnostics {
            ctx.report(diag);
        }
    }
    trace!(methods = patched, "label patches applied");
    patched
}

fn unresolved_diagnostic(pending: &PendingRef) -> Diagnostic {
    located(
        Diagnostic::error(
            pending.origin.line,
            AsmErrorKind::Resolution,
            &format!("Unresolved {} reference", pending.expect.describe()),
            Some(&pending.name),
        ),
        pending,
    )
}

fn located(diag: Diagnostic, pending: &PendingRef) -> Diagnostic {
    diag.with_column(pending.origin.column)
        .with_file(Some(pending.origin.file.to_string()))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::core::model::{Attributes, FieldDef, MethodBody, MethodDef, TypeSpec};
    use crate::core::symbols::{RefKind, ResolverScope, SourceLoc, Symbol, SymbolKind};

    fn pending(name: &str, expect: RefKind, type_path: &str, line: u32) -> Reference {
        Reference::Pending(PendingRef {
            name: name.to_string(),
            expect,
            scope: Arc::new(ResolverScope {
                namespace: "App".to_string(),
                type_path: Some(type_path.to_string()),
                ..ResolverScope::default()
            }),
            origin: SourceLoc::new(Arc::from("main.casm"), line, Some(5)),
        })
    }

    fn program_with_field_type(name: &str) -> Program {
        let mut program = Program::new();
        let mut ty = TypeDef::new("Main", Attributes::default(), 1);
        ty.fields.push(FieldDef {
            name: "helper".to_string(),
            attrs: Attributes::default(),
            ty: TypeSpec::new(pending(name, RefKind::Type, "App.Main", 2), 0),
            line: 2,
        });
        ty.methods.push(MethodDef {
            name: "run".to_string(),
            attrs: Attributes::default(),
            ret: TypeSpec::void(),
            params: Vec::new(),
            body: MethodBody::default(),
            line: 3,
        });
        program.namespace_mut("App").types.push(ty);
        // Declared after its first use.
        program
            .namespace_mut("App")
            .types
            .push(TypeDef::new("Helper", Attributes::default(), 9));
        program
    }

    #[test]
    fn forward_references_resolve_in_place() {
        let mut program = program_with_field_type("Helper");
        let mut ctx = CompilationContext::default();
        let stats = resolve_program(&mut program, &mut ctx);
        assert_eq!(stats, ResolveStats { resolved: 1, unresolved: 0 });
        assert!(ctx.diagnostics().is_empty());
        let field = &program.namespaces[0].types[0].fields[0];
        assert_eq!(
            field.ty.reference,
            Reference::Resolved(Symbol::new(SymbolKind::Type, "App.Helper"))
        );
    }

    #[test]
    fn missing_names_report_once_with_location() {
        let mut program = program_with_field_type("Nowhere");
        let mut ctx = CompilationContext::default();
        let stats = resolve_program(&mut program, &mut ctx);
        assert_eq!(stats.unresolved, 1);
        assert_eq!(ctx.diagnostics().len(), 1);
        let diag = &ctx.diagnostics()[0];
        assert_eq!(diag.message(), "Unresolved type reference: Nowhere");
        assert_eq!(diag.file(), Some("main.casm"));
        assert_eq!(diag.line(), 2);
        assert_eq!(diag.column(), Some(5));
    }

    #[test]
    fn declarations_include_members_and_nested_types() {
        let mut program = program_with_field_type("Helper");
        program.namespaces[0].types[0]
            .nested
            .push(TypeDef::new("Inner", Attributes::default(), 4));
        program.add_extern("Host");
        let table = collect_declarations(&program);
        assert_eq!(table.type_count(), 3);
        let run = pending("run", RefKind::Method, "App.Main", 1);
        let Reference::Pending(run) = run else { unreachable!() };
        assert_eq!(
            table.resolve(&run),
            Resolution::Found(Symbol::new(SymbolKind::Method, "App.Main.run"))
        );
    }
}
