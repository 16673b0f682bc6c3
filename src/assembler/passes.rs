// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! CLI-driven run flow: compile, then write the container, debug database,
//! listing and IR outputs the configuration asks for.

use std::env;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use clap::Parser;
use tracing::{debug, info};

use super::cli::{normalize_args, validate_cli, Cli, CliConfig, VERSION};
use super::{source_closure, CompileOutput, Compiler, FsLoader};
use crate::bytecode::{read_container, ListingWriter};
use crate::codegen::CodeGenerator;
use crate::core::error::{AsmError, AsmErrorKind, AsmRunError, AsmRunReport};
use crate::core::model::Program;
use crate::debuginfo::DebugDatabase;
use crate::opcodes::OpcodeRegistry;

/// Run the assembler with command-line arguments.
pub fn run() -> Result<AsmRunReport, AsmRunError> {
    let cli = Cli::parse_from(normalize_args(env::args_os()));
    run_with_cli(&cli)
}

pub fn run_with_cli(cli: &Cli) -> Result<AsmRunReport, AsmRunError> {
    let config = validate_cli(cli)?;
    run_with_config(&config)
}

/// Inputs and everything they import are no newer than the container.
fn sources_up_to_date(config: &CliConfig) -> bool {
    match source_closure(&FsLoader, &config.input_paths) {
        Ok(files) => super::cli::is_up_to_date(&files, &config.output),
        Err(err) => {
            debug!(error = %err, "cannot list sources, rebuilding");
            false
        }
    }
}

pub fn run_with_config(config: &CliConfig) -> Result<AsmRunReport, AsmRunError> {
    if !config.force && sources_up_to_date(config) {
        info!(output = %config.output.display(), "output is up to date");
        return Ok(AsmRunReport::new(Vec::new(), Vec::new()));
    }

    let registry = OpcodeRegistry::standard().map_err(|err| {
        AsmRunError::new(
            AsmError::new(AsmErrorKind::Opcode, &err.to_string(), None),
            Vec::new(),
            Vec::new(),
        )
    })?;
    let compiler = Compiler::new(registry, FsLoader, config.build);
    let output = compiler.compile(&config.input_paths)?;

    write_output(&config.output, &output.container)?;
    if let (Some(path), Some(bytes)) = (&config.debug_output, &output.debug_database) {
        write_output(path, bytes)?;
    }
    info!(
        output = %config.output.display(),
        files = output.files.len(),
        bytes = output.container.len(),
        "container written"
    );

    if config.list.is_some() || config.emit_ir.is_some() {
        let reloaded = reload(registry, &output)?;
        if let Some(path) = &config.list {
            write_listing(path, &reloaded, registry)?;
        }
        if let Some(path) = &config.emit_ir {
            let generator = CodeGenerator::new(registry, config.build.codegen_options());
            let module = generator.generate(&reloaded).map_err(|err| {
                AsmRunError::new(
                    AsmError::new(AsmErrorKind::Codegen, &err.to_string(), None),
                    Vec::new(),
                    Vec::new(),
                )
            })?;
            write_output(path, module.to_string().as_bytes())?;
            debug!(path = %path.display(), methods = module.methods.len(), "IR written");
        }
    }

    Ok(output.report)
}

/// Read the container back the way a later consumer would.
fn reload(registry: &OpcodeRegistry, output: &CompileOutput) -> Result<Program, AsmRunError> {
    let format_error = |message: String| {
        AsmRunError::new(
            AsmError::new(AsmErrorKind::Format, &message, None),
            Vec::new(),
            Vec::new(),
        )
    };
    let db = output
        .debug_database
        .as_deref()
        .map(DebugDatabase::decode)
        .transpose()
        .map_err(|err| format_error(err.to_string()))?;
    read_container(&output.container, registry, db.as_ref()).map_err(|err| format_error(err.to_string()))
}

fn io_failure(path: &Path, err: &io::Error) -> AsmRunError {
    let param = format!("{} ({err})", path.display());
    AsmRunError::new(
        AsmError::new(AsmErrorKind::Io, "Error opening file for write", Some(&param)),
        Vec::new(),
        Vec::new(),
    )
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<(), AsmRunError> {
    fs::write(path, bytes).map_err(|err| io_failure(path, &err))
}

fn write_listing(path: &Path, program: &Program, registry: &OpcodeRegistry) -> Result<(), AsmRunError> {
    let file = File::create(path).map_err(|err| io_failure(path, &err))?;
    let mut out = BufWriter::new(file);
    render_listing(&mut out, program, registry).map_err(|err| io_failure(path, &err))
}

fn render_listing(out: &mut impl Write, program: &Program, registry: &OpcodeRegistry) -> io::Result<()> {
    let mut listing = ListingWriter::new(&mut *out);
    listing.header(&format!("cpasm v{VERSION}"))?;
    listing.write_program(program, registry)?;
    out.flush()
}
