// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

use clap::Parser;

use cpasm::assembler::cli::{normalize_args, validate_cli, Cli};
use cpasm::assembler::run_with_config;
use cpasm::bytecode::read_container;
use cpasm::codegen::{CodeGenerator, CodegenOptions};
use cpasm::core::error::AsmErrorKind;
use cpasm::debuginfo::DebugDatabase;
use cpasm::opcodes::OpcodeRegistry;

const MAIN: &str = r#"
.import "lib/util.casm"
.namespace App {
  .type Main : pub {
    .method run(a:i32) pub stat {
      .locals { n:i32 }
      ldrg a
      stlc n
      call App.Util.helper
    done:
      ret
    }
  }
}
"#;

const UTIL: &str = r#"
.namespace App {
  .type Util {
    .method helper() stat {
      ret
    }
  }
}
"#;

fn write_project(root: &Path) {
    fs::create_dir_all(root.join("lib")).unwrap();
    fs::write(root.join("main.casm"), MAIN).unwrap();
    fs::write(root.join("lib/util.casm"), UTIL).unwrap();
}

fn cli(args: &[String]) -> Cli {
    let mut full = vec!["cpasm".to_string()];
    full.extend_from_slice(args);
    Cli::parse_from(normalize_args(full))
}

fn arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

#[test]
fn build_writes_container_database_listing_and_ir() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path());
    let main = dir.path().join("main.casm");
    let listing = dir.path().join("main.lst");
    let ir = dir.path().join("main.ir");

    let config = validate_cli(&cli(&[
        arg(&main),
        "--list".to_string(),
        arg(&listing),
        "--emit-ir".to_string(),
        arg(&ir),
    ]))
    .unwrap();
    let report = run_with_config(&config).unwrap();
    assert_eq!(report.error_count(), 0);

    let container = fs::read(dir.path().join("main.cpbc")).unwrap();
    let db = DebugDatabase::decode(&fs::read(dir.path().join("main.cpdb")).unwrap()).unwrap();
    let registry = OpcodeRegistry::standard().unwrap();
    let program = read_container(&container, registry, Some(&db)).unwrap();
    assert_eq!(program.find_method("App.Main.run").unwrap().body.locals[0].name, "n");

    let text = fs::read_to_string(&listing).unwrap();
    assert!(text.starts_with("; cpasm v"));
    assert!(text.contains("  done:"));
    assert!(text.contains("stlc n"));

    let ir_text = fs::read_to_string(&ir).unwrap();
    assert!(ir_text.contains("App.Main.run("));
    assert!(ir_text.contains("App.Util.helper("));

    let module = CodeGenerator::new(registry, CodegenOptions::default())
        .generate(&program)
        .unwrap();
    assert_eq!(ir_text, module.to_string());
}

#[test]
fn up_to_date_output_skips_the_build_unless_forced() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path());
    let main = dir.path().join("main.casm");
    let out = dir.path().join("prog.cpbc");
    let listing = dir.path().join("prog.lst");
    let args = vec![
        arg(&main),
        "-out".to_string(),
        arg(&out),
        "--list".to_string(),
        arg(&listing),
    ];

    run_with_config(&validate_cli(&cli(&args)).unwrap()).unwrap();
    assert!(out.exists());
    fs::remove_file(&listing).unwrap();

    run_with_config(&validate_cli(&cli(&args)).unwrap()).unwrap();
    assert!(!listing.exists());

    let mut forced = args.clone();
    forced.push("--force".to_string());
    run_with_config(&validate_cli(&cli(&forced)).unwrap()).unwrap();
    assert!(listing.exists());
}

#[test]
fn editing_an_imported_file_triggers_a_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path());
    let main = dir.path().join("main.casm");
    let listing = dir.path().join("main.lst");
    let args = vec![arg(&main), "--list".to_string(), arg(&listing)];

    run_with_config(&validate_cli(&cli(&args)).unwrap()).unwrap();
    fs::remove_file(&listing).unwrap();
    run_with_config(&validate_cli(&cli(&args)).unwrap()).unwrap();
    assert!(!listing.exists());

    let later = SystemTime::now() + Duration::from_secs(120);
    File::options()
        .write(true)
        .open(dir.path().join("lib/util.casm"))
        .unwrap()
        .set_modified(later)
        .unwrap();
    run_with_config(&validate_cli(&cli(&args)).unwrap()).unwrap();
    assert!(listing.exists());
}

#[test]
fn failed_build_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let main = dir.path().join("main.casm");
    fs::write(&main, ".type A {\n  .field f : Missing\n}\n").unwrap();

    let config = validate_cli(&cli(&[arg(&main), "--omit-debug-info".to_string()])).unwrap();
    let err = run_with_config(&config).unwrap_err();
    assert_eq!(err.kind(), AsmErrorKind::Resolution);
    assert_eq!(err.diagnostics()[0].line(), 2);
    assert!(!dir.path().join("main.cpbc").exists());
    assert!(!dir.path().join("main.cpdb").exists());
}

#[test]
fn glob_inputs_compile_together() {
    let dir = tempfile::tempdir().unwrap();
    write_project(dir.path());
    fs::write(
        dir.path().join("main.casm"),
        MAIN.replace(".import \"lib/util.casm\"", ""),
    )
    .unwrap();
    let pattern = arg(&dir.path().join("**").join("*.casm"));
    let out = dir.path().join("all.cpbc");

    let config = validate_cli(&cli(&[
        pattern,
        "-o".to_string(),
        arg(&out),
        "--omit-debug-info".to_string(),
    ]))
    .unwrap();
    assert_eq!(config.input_paths.len(), 2);
    run_with_config(&config).unwrap();

    let registry = OpcodeRegistry::standard().unwrap();
    let program = read_container(&fs::read(&out).unwrap(), registry, None).unwrap();
    assert!(program.find_method("App.Util.helper").is_some());
    assert!(!dir.path().join("all.cpdb").exists());
}
