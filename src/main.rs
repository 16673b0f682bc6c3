// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

// CLI entrypoint for cpasm.

use std::fs::File;
use std::io::{self, Write};

use clap::Parser;
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

use cpasm::assembler::cli::{normalize_args, validate_cli, Cli, DiagnosticsSinkConfig, OutputFormat};
use cpasm::assembler::run_with_config;
use cpasm::core::error::{Diagnostic, Severity};

struct DiagnosticsSink {
    writer: Box<dyn Write>,
}

impl DiagnosticsSink {
    fn from_config(config: &DiagnosticsSinkConfig) -> io::Result<Self> {
        match config {
            DiagnosticsSinkConfig::Stderr => Ok(Self {
                writer: Box::new(io::stderr()),
            }),
            DiagnosticsSinkConfig::File { path } => Ok(Self {
                writer: Box::new(File::create(path)?),
            }),
        }
    }

    fn emit_line(&mut self, line: &str) {
        let _ = writeln!(self.writer, "{line}");
    }

    fn emit_diagnostics(&mut self, diagnostics: &[Diagnostic], source: SourceContext<'_>, format: OutputFormat) {
        for diag in diagnostics {
            // Context lines are only known for the first root file.
            let lines = match (diag.file(), source.file) {
                (Some(file), Some(root)) if file == root => Some(source.lines),
                _ => None,
            };
            self.emit_line(&format_diagnostic_line(diag, lines, source.use_color, format));
        }
    }
}

#[derive(Clone, Copy)]
struct SourceContext<'a> {
    file: Option<&'a str>,
    lines: &'a [String],
    use_color: bool,
}

fn severity_to_str(severity: Severity) -> &'static str {
    match severity {
        Severity::Warning => "warning",
        Severity::Error => "error",
    }
}

fn format_diagnostic_line(
    diag: &Diagnostic,
    source_lines: Option<&[String]>,
    use_color: bool,
    format: OutputFormat,
) -> String {
    if format == OutputFormat::Json {
        json!({
            "code": diag.code(),
            "severity": severity_to_str(diag.severity()),
            "message": diag.message(),
            "file": diag.file(),
            "line": diag.line(),
            "col_start": diag.column(),
            "notes": diag.notes(),
            "help": diag.help(),
        })
        .to_string()
    } else {
        diag.format_with_context(source_lines, use_color)
    }
}

/// `CPASM_LOG` overrides the default filter.
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env("CPASM_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse_from(normalize_args(std::env::args_os()));
    let config = match validate_cli(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    init_logging(config.verbose);

    let mut sink = match DiagnosticsSink::from_config(&config.diagnostics_sink) {
        Ok(sink) => sink,
        Err(err) => {
            eprintln!("Failed to open diagnostics sink: {err}");
            std::process::exit(1);
        }
    };

    let use_color = std::env::var("NO_COLOR").is_err()
        && matches!(config.diagnostics_sink, DiagnosticsSinkConfig::Stderr);
    match run_with_config(&config) {
        Ok(report) => {
            if config.build.quiet {
                return;
            }
            let source = SourceContext {
                file: report.source_file(),
                lines: report.source_lines(),
                use_color,
            };
            sink.emit_diagnostics(report.diagnostics(), source, config.output_format);
        }
        Err(err) => {
            let diagnostics: Vec<Diagnostic> = err
                .diagnostics()
                .iter()
                .filter(|diag| !config.build.quiet || diag.severity() != Severity::Warning)
                .cloned()
                .collect();
            let source = SourceContext {
                file: err.source_file(),
                lines: err.source_lines(),
                use_color,
            };
            sink.emit_diagnostics(&diagnostics, source, config.output_format);
            if config.output_format != OutputFormat::Json {
                sink.emit_line(&err.to_string());
            }
            std::process::exit(1);
        }
    }
}
