// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

use std::sync::Arc;

use super::*;
use crate::codegen::lower::lower_plain;
use crate::core::error::Severity;
use crate::core::resolve::{apply_label_patches, for_each_reference_mut, resolve_program};
use crate::opcodes::table::{decode_by_spec, encode_by_spec, parse_by_spec};
use crate::opcodes::{ArgSpec, LabelRef, OpcodeDef, OpcodeId, Operand, VarKind, VarRef};

fn parse_with(registry: &OpcodeRegistry, src: &str, werror: bool) -> (Program, CompilationContext, ParseOutput) {
    let mut program = Program::new();
    let mut ctx = CompilationContext::new(werror);
    ctx.set_file(Arc::from("main.casm"));
    let output = SourceParser::new(registry).parse_source(src, &mut program, &mut ctx);
    (program, ctx, output)
}

fn parse(src: &str) -> (Program, CompilationContext, ParseOutput) {
    parse_with(OpcodeRegistry::standard().unwrap(), src, false)
}

fn lines(lines: &[&str]) -> String {
    lines.join("\n")
}

fn messages(ctx: &CompilationContext) -> Vec<String> {
    ctx.diagnostics()
        .iter()
        .map(|d| format!("{}: {}", d.line(), d.message()))
        .collect()
}

fn pending_count(program: &mut Program) -> usize {
    let mut count = 0;
    for_each_reference_mut(program, &mut |reference| {
        if reference.is_pending() {
            count += 1;
        }
    });
    count
}

#[test]
fn method_with_params_and_implicit_local() {
    let src = lines(&[
        ".namespace App {",
        "  .type Calc : pub {",
        "    .method add(a:i32,b:i32) pub stat -> i32 { ldrg a ldrg b add stlc r ldlc r }",
        "  }",
        "}",
    ]);
    let (mut program, mut ctx, output) = parse(&src);
    assert!(ctx.diagnostics().is_empty(), "{:?}", messages(&ctx));
    let stats = resolve_program(&mut program, &mut ctx);
    assert_eq!(stats.unresolved, 0);
    assert_eq!(pending_count(&mut program), 0);

    let method = program.find_method("App.Calc.add").unwrap();
    assert_eq!(method.params.len(), 2);
    assert_eq!(method.body.instructions.len(), 5);
    assert!(method.attrs.is_static());
    assert_eq!(method.body.locals.len(), 1);
    assert_eq!(method.body.locals[0].name, "r");
    assert_eq!(
        method.body.instructions[3].operands,
        vec![Operand::Var(VarRef {
            kind: VarKind::Local,
            slot: 0
        })]
    );
    assert_eq!(output.methods, 1);
    assert_eq!(output.instructions, 5);
}

#[test]
fn bad_line_reports_once_and_keeps_neighbours() {
    let src = lines(&[
        ".type A {",
        "  .field pub x : i32",
        "  .field bogus y : i32",
        "  .field pub z : i32",
        "}",
    ]);
    let (program, ctx, _) = parse(&src);
    assert_eq!(messages(&ctx), vec!["3: Unknown field modifier: bogus".to_string()]);
    let ty = program.find_type("A").unwrap();
    let names: Vec<&str> = ty.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["x", "z"]);
}

#[test]
fn bad_instruction_line_keeps_the_rest_of_the_body() {
    let src = lines(&[
        ".type A {",
        "  .method m() {",
        "    nop",
        "    frob ra",
        "    ret",
        "  }",
        "}",
    ]);
    let (program, ctx, _) = parse(&src);
    assert_eq!(ctx.diagnostics().len(), 1);
    assert_eq!(ctx.diagnostics()[0].line(), 4);
    assert_eq!(ctx.diagnostics()[0].code(), "cpa303");
    assert_eq!(program.find_method("A.m").unwrap().body.instructions.len(), 2);
}

#[test]
fn failed_method_header_skips_its_body() {
    let src = lines(&[
        ".type A {",
        "  .method bad(x) {",
        "    frob",
        "  }",
        "  .method good() { ret }",
        "}",
    ]);
    let (program, ctx, _) = parse(&src);
    assert_eq!(ctx.diagnostics().len(), 1, "{:?}", messages(&ctx));
    assert_eq!(ctx.diagnostics()[0].line(), 2);
    let ty = program.find_type("A").unwrap();
    assert!(ty.method("bad").is_none());
    assert!(ty.method("good").is_some());
}

#[test]
fn labels_are_reserved_on_close_and_patched_after_resolution() {
    let src = lines(&[
        ".type A {",
        "  .method m() {",
        "  top:",
        "    jmp done",
        "    jmp top",
        "  done:",
        "    ret",
        "  }",
        "}",
    ]);
    let (mut program, mut ctx, output) = parse(&src);
    assert!(ctx.diagnostics().is_empty(), "{:?}", messages(&ctx));
    let body = &program.find_method("A.m").unwrap().body;
    assert_eq!(body.labels.len(), 2);
    assert_eq!(body.label_by_name("top").unwrap().offset, Some(0));
    assert_eq!(body.label_by_name("done").unwrap().offset, Some(2));
    assert_eq!(
        body.instructions[0].operands,
        vec![Operand::Label(LabelRef {
            index: 1,
            target: None
        })]
    );
    assert_eq!(output.label_patches.len(), 1);

    resolve_program(&mut program, &mut ctx);
    assert_eq!(apply_label_patches(&mut program, output.label_patches, &mut ctx), 1);
    assert!(ctx.diagnostics().is_empty(), "{:?}", messages(&ctx));
    let body = &program.find_method("A.m").unwrap().body;
    assert_eq!(
        body.instructions[0].operands,
        vec![Operand::Label(LabelRef {
            index: 1,
            target: Some(2)
        })]
    );
    assert_eq!(
        body.instructions[1].operands,
        vec![Operand::Label(LabelRef {
            index: 0,
            target: Some(0)
        })]
    );
}

#[test]
fn nested_type_methods_are_patched_in_place() {
    let src = lines(&[
        ".namespace App {",
        "  .type Outer {",
        "    .method a() { ret }",
        "    .type Inner {",
        "      .method b() {",
        "      again:",
        "        jmp again",
        "      }",
        "    }",
        "    .method c() {",
        "      jmp out",
        "    out:",
        "      ret",
        "    }",
        "  }",
        "}",
    ]);
    let (mut program, mut ctx, output) = parse(&src);
    assert!(ctx.diagnostics().is_empty(), "{:?}", messages(&ctx));
    resolve_program(&mut program, &mut ctx);
    assert_eq!(apply_label_patches(&mut program, output.label_patches, &mut ctx), 3);
    let target = |name: &str| match &program.find_method(name).unwrap().body.instructions[0].operands[0] {
        Operand::Label(label) => label.target,
        _ => None,
    };
    assert_eq!(target("App.Outer.Inner.b"), Some(0));
    assert_eq!(target("App.Outer.c"), Some(1));
}

#[test]
fn branch_to_unknown_label_is_an_error() {
    let src = ".type A { .method m() { jmp nowhere } }";
    let (_, ctx, _) = parse(src);
    assert_eq!(ctx.error_count(), 1);
    assert!(
        ctx.diagnostics()[0].message().contains("undefined label 'nowhere'"),
        "{:?}",
        messages(&ctx)
    );
}

#[test]
fn namespaces_merge_and_rooted_paths_replace() {
    let src = lines(&[
        ".namespace App { .type A { } }",
        ".namespace App.Sub { .type B { } }",
        ".namespace App { .namespace ::Other { .type C { } } .type D { } }",
        ".type Top { }",
    ]);
    let (program, ctx, output) = parse(&src);
    assert!(ctx.diagnostics().is_empty(), "{:?}", messages(&ctx));
    for name in ["App.A", "App.Sub.B", "Other.C", "App.D", "Top"] {
        assert!(program.find_type(name).is_some(), "{name}");
    }
    assert_eq!(program.namespace("App").unwrap().types.len(), 2);
    assert_eq!(output.types, 5);
}

#[test]
fn nested_types_and_duplicates() {
    let src = lines(&[
        ".type Outer {",
        "  .type Inner { }",
        "  .type Inner { }",
        "  .field f : Inner",
        "}",
    ]);
    let (program, ctx, _) = parse(&src);
    assert_eq!(messages(&ctx), vec!["3: Duplicate type: Outer.Inner".to_string()]);
    let outer = program.find_type("Outer").unwrap();
    assert_eq!(outer.nested.len(), 1);
    assert_eq!(outer.fields.len(), 1);
    assert!(program.find_type("Outer.Inner").is_some());
}

#[test]
fn locals_block_rules() {
    let src = lines(&[
        ".type A {",
        "  .method m() {",
        "    .locals { n:i32, s:str }",
        "    stlc n",
        "    stlc fresh",
        "    .locals { k:i32 }",
        "  }",
        "}",
    ]);
    let (program, ctx, _) = parse(&src);
    let msgs = messages(&ctx);
    assert_eq!(msgs.len(), 2, "{msgs:?}");
    assert!(msgs[0].starts_with("5: ") && msgs[0].contains("unknown local 'fresh'"));
    assert!(msgs[1].starts_with("6: Duplicate .locals block"));
    let body = &program.find_method("A.m").unwrap().body;
    assert_eq!(body.locals.len(), 2);
    assert_eq!(body.instructions.len(), 1);
}

#[test]
fn first_accepting_form_wins_with_a_warning() {
    let defs = vec![
        OpcodeDef {
            mnemonic: "put",
            id: OpcodeId::Single(0x01),
            args: &[ArgSpec::Constant],
            parse: parse_by_spec,
            encode: encode_by_spec,
            decode: decode_by_spec,
            lower: lower_plain,
        },
        OpcodeDef {
            mnemonic: "put",
            id: OpcodeId::Single(0x02),
            args: &[ArgSpec::Constant],
            parse: parse_by_spec,
            encode: encode_by_spec,
            decode: decode_by_spec,
            lower: lower_plain,
        },
    ];
    let registry = OpcodeRegistry::new(&[], defs).unwrap();
    let src = ".type A { .method m() { put 1 } }";

    let (program, ctx, _) = parse_with(&registry, src, false);
    assert_eq!(ctx.diagnostics().len(), 1);
    let warning = &ctx.diagnostics()[0];
    assert_eq!(warning.severity(), Severity::Warning);
    assert_eq!(warning.code(), "cpa305");
    let body = &program.find_method("A.m").unwrap().body;
    assert_eq!(body.instructions[0].opcode, OpcodeId::Single(0x01));

    let (_, ctx, _) = parse_with(&registry, src, true);
    assert_eq!(ctx.diagnostics()[0].severity(), Severity::Error);
}

#[test]
fn arity_and_argument_errors() {
    let src = lines(&[
        ".type A {",
        "  .method m() {",
        "    push 1, 2",
        "    setf ra",
        "  }",
        "}",
    ]);
    let (_, ctx, _) = parse(&src);
    let diags = ctx.diagnostics();
    assert_eq!(diags.len(), 2);
    assert_eq!(diags[0].code(), "cpa304");
    assert_eq!(diags[0].notes().len(), 2);
    assert!(diags[1].message().contains("Invalid arguments for 'setf'"));
}

#[test]
fn unclosed_blocks_are_reported_and_kept() {
    let src = lines(&[".type A {", "  .method m() {", "    ret"]);
    let (program, ctx, _) = parse(&src);
    let lines: Vec<u32> = ctx.diagnostics().iter().map(|d| d.line()).collect();
    assert_eq!(lines, vec![2, 1]);
    assert!(program.find_method("A.m").is_some());
}

#[test]
fn file_level_records() {
    let src = lines(&[
        ".import \"lib/util.casm\"",
        ".extern Host.IO",
        ".namespace App {",
        "  .alias Vec = Geo.Vector",
        "}",
    ]);
    let (program, ctx, output) = parse(&src);
    assert!(ctx.diagnostics().is_empty(), "{:?}", messages(&ctx));
    assert_eq!(
        output.imports,
        vec![ImportRequest {
            path: "lib/util.casm".to_string(),
            line: 1
        }]
    );
    assert_eq!(program.externs, vec!["Host.IO".to_string()]);
    assert_eq!(program.aliases.len(), 1);
    assert_eq!(program.aliases[0].alias, "App.Vec");
}

#[test]
fn forward_and_missing_references() {
    let src = lines(&[
        ".namespace App {",
        "  .type Main {",
        "    .method run() stat {",
        "      newobj Later",
        "      call Nowhere.go",
        "      ret",
        "    }",
        "  }",
        "  .type Later { }",
        "}",
    ]);
    let (mut program, mut ctx, _) = parse(&src);
    assert!(ctx.diagnostics().is_empty(), "{:?}", messages(&ctx));
    let stats = resolve_program(&mut program, &mut ctx);
    assert_eq!(stats.resolved, 1);
    assert_eq!(stats.unresolved, 1);
    let msgs = messages(&ctx);
    assert_eq!(msgs, vec!["5: Unresolved method reference: Nowhere.go".to_string()]);
}

#[test]
fn stray_close_brace_is_one_error() {
    let (_, ctx, _) = parse("}\n.type A { }");
    assert_eq!(messages(&ctx), vec!["1: Unexpected '}'".to_string()]);
}

#[test]
fn operands_may_be_spelled_like_mnemonics() {
    let src = lines(&[
        ".namespace App {",
        "  .type Calc {",
        "    .method add(a:i32, b:i32) stat -> i32 {",
        "      ldrg a",
        "      ret",
        "    }",
        "    .method run() stat {",
        "      .locals { or:i32 }",
        "      ldlc or",
        "      call add",
        "      nop ret",
        "    }",
        "  }",
        "}",
    ]);
    let (mut program, mut ctx, _) = parse(&src);
    assert!(ctx.diagnostics().is_empty(), "{:?}", messages(&ctx));
    resolve_program(&mut program, &mut ctx);
    assert!(ctx.diagnostics().is_empty(), "{:?}", messages(&ctx));

    let body = &program.find_method("App.Calc.run").unwrap().body;
    assert_eq!(body.instructions.len(), 4);
    assert_eq!(
        body.instructions[0].operands,
        vec![Operand::Var(VarRef {
            kind: VarKind::Local,
            slot: 0
        })]
    );
    match &body.instructions[1].operands[..] {
        [Operand::Method(reference)] => {
            assert_eq!(reference.resolved().map(|s| s.name.as_str()), Some("App.Calc.add"));
        }
        other => panic!("unexpected operands {other:?}"),
    }
    assert!(body.instructions[2].operands.is_empty());
    assert!(body.instructions[3].operands.is_empty());
}
