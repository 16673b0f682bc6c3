// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Command-line interface parsing and argument validation.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use clap::{ArgAction, Parser, ValueEnum};

use super::BuildOptions;
use crate::core::error::{AsmError, AsmErrorKind, AsmRunError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const LONG_ABOUT: &str = "Assembler for the CP register-and-stack instruction set.

Every INPUT and each file it imports are assembled into one bytecode
container. Inputs may be glob patterns. Unless --omit-debug-info is given,
local and label names are moved into a debug database written next to the
container (<out>.cpdb). The build is skipped while the container is newer
than every input and every file they import; --force rebuilds anyway.

Boolean options may also be set through CPASM_* environment variables
(1/true/yes/on or 0/false/no/off); command-line flags take precedence.";

/// Extension of the default container output.
pub const CONTAINER_EXTENSION: &str = "cpbc";
/// Extension of the debug database written next to the container.
pub const DEBUG_DB_EXTENSION: &str = "cpdb";

#[derive(Parser, Debug)]
#[command(
    name = "cpasm",
    version = VERSION,
    about = "Assembler for the CP register-and-stack bytecode",
    long_about = LONG_ABOUT
)]
pub struct Cli {
    #[arg(
        value_name = "INPUT",
        required = true,
        action = ArgAction::Append,
        long_help = "Source file or glob pattern (repeatable). Imports are followed from each input."
    )]
    pub inputs: Vec<String>,
    #[arg(
        short = 'o',
        long = "out",
        value_name = "FILE",
        long_help = "Container output path. Defaults to the first input with a .cpbc extension."
    )]
    pub out: Option<PathBuf>,
    #[arg(
        long = "emit-ir",
        value_name = "FILE",
        long_help = "Reload the written container, lower it to the target IR and write the IR listing to FILE."
    )]
    pub emit_ir: Option<PathBuf>,
    #[arg(
        short = 'l',
        long = "list",
        value_name = "FILE",
        long_help = "Write a disassembly listing of the container to FILE."
    )]
    pub list: Option<PathBuf>,
    #[arg(
        long = "force",
        action = ArgAction::SetTrue,
        long_help = "Rebuild even when the output is newer than every input."
    )]
    pub force: bool,
    #[arg(
        long = "format",
        value_enum,
        default_value_t = OutputFormat::Text,
        long_help = "Diagnostic output format."
    )]
    pub format: OutputFormat,
    #[arg(
        short = 'E',
        long = "error",
        value_name = "FILE",
        long_help = "Write diagnostics to FILE instead of stderr."
    )]
    pub error_file: Option<PathBuf>,
    #[arg(
        short = 'q',
        long = "quiet",
        action = ArgAction::SetTrue,
        long_help = "Suppress warnings and the success summary."
    )]
    pub quiet: bool,
    #[arg(
        long = "Werror",
        action = ArgAction::SetTrue,
        long_help = "Treat warnings as errors."
    )]
    pub warn_error: bool,
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::SetTrue,
        long_help = "Log pipeline progress (default log filter becomes debug; CPASM_LOG overrides)."
    )]
    pub verbose: bool,
    #[arg(
        long = "inline",
        action = ArgAction::SetTrue,
        long_help = "Mark small methods as inlining candidates in the IR."
    )]
    pub inline: bool,
    #[arg(
        long = "omit-debug-info",
        action = ArgAction::SetTrue,
        long_help = "Keep names in the container and write no debug database."
    )]
    pub omit_debug_info: bool,
    #[arg(
        long = "unsafe-codegen",
        action = ArgAction::SetTrue,
        long_help = "Lower array element access without bounds checks."
    )]
    pub unsafe_codegen: bool,
    #[arg(
        long = "allow-stack-overflow",
        action = ArgAction::SetTrue,
        long_help = "Omit the per-method stack guard call."
    )]
    pub allow_stack_overflow: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticsSinkConfig {
    Stderr,
    File { path: PathBuf },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Rewrite legacy spellings before clap sees the arguments.
///
/// `-out` becomes `--out` and `/?` becomes `--help`.
pub fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| match arg.to_str() {
            Some("-out") => OsString::from("--out"),
            Some("/?") => OsString::from("--help"),
            Some(text) if text.starts_with("-out=") => OsString::from(format!("-{text}")),
            _ => arg,
        })
        .collect()
}

fn cli_error(message: impl Into<String>) -> AsmRunError {
    AsmRunError::new(
        AsmError::new(AsmErrorKind::Cli, &message.into(), None),
        Vec::new(),
        Vec::new(),
    )
}

fn parse_env_bool(var_name: &str) -> Result<Option<bool>, AsmRunError> {
    let Some(raw) = env::var_os(var_name) else {
        return Ok(None);
    };
    let value = raw.to_string_lossy().trim().to_ascii_lowercase();
    let parsed = match value.as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        "" => None,
        _ => {
            return Err(cli_error(format!(
                "Invalid boolean value for {var_name}: {value}"
            )))
        }
    };
    Ok(parsed)
}

fn flag_or_env(flag: bool, var_name: &str) -> Result<bool, AsmRunError> {
    if flag {
        return Ok(true);
    }
    Ok(parse_env_bool(var_name)?.unwrap_or(false))
}

fn is_glob_pattern(text: &str) -> bool {
    text.contains(['*', '?', '['])
}

/// Expand glob patterns; plain paths pass through untouched.
pub fn expand_inputs(inputs: &[String]) -> Result<Vec<PathBuf>, AsmRunError> {
    let mut paths = Vec::new();
    for input in inputs {
        if !is_glob_pattern(input) {
            paths.push(PathBuf::from(input));
            continue;
        }
        let matches = glob::glob(input)
            .map_err(|err| cli_error(format!("Invalid input pattern {input}: {err}")))?;
        let before = paths.len();
        for entry in matches {
            let path = entry.map_err(|err| cli_error(format!("Cannot read {input}: {err}")))?;
            if path.is_file() && !paths.contains(&path) {
                paths.push(path);
            }
        }
        if paths.len() == before {
            return Err(cli_error(format!("No input files match: {input}")));
        }
    }
    Ok(paths)
}

pub fn default_output_path(first_input: &Path) -> PathBuf {
    first_input.with_extension(CONTAINER_EXTENSION)
}

pub fn debug_db_path(output: &Path) -> PathBuf {
    output.with_extension(DEBUG_DB_EXTENSION)
}

/// True when `output` exists and is at least as new as every input.
pub fn is_up_to_date(inputs: &[PathBuf], output: &Path) -> bool {
    let Ok(out_time) = fs::metadata(output).and_then(|meta| meta.modified()) else {
        return false;
    };
    inputs.iter().all(|input| {
        fs::metadata(input)
            .and_then(|meta| meta.modified())
            .is_ok_and(|time| time <= out_time)
    })
}

/// Validate CLI arguments and return parsed configuration.
pub fn validate_cli(cli: &Cli) -> Result<CliConfig, AsmRunError> {
    let build = BuildOptions {
        inline: flag_or_env(cli.inline, "CPASM_INLINE")?,
        omit_debug_info: flag_or_env(cli.omit_debug_info, "CPASM_OMIT_DEBUG_INFO")?,
        unsafe_codegen: flag_or_env(cli.unsafe_codegen, "CPASM_UNSAFE_CODEGEN")?,
        allow_stack_overflow: flag_or_env(cli.allow_stack_overflow, "CPASM_ALLOW_STACK_OVERFLOW")?,
        quiet: flag_or_env(cli.quiet, "CPASM_QUIET")?,
        werror: flag_or_env(cli.warn_error, "CPASM_WERROR")?,
    };

    let input_paths = expand_inputs(&cli.inputs)?;
    let Some(first) = input_paths.first() else {
        return Err(cli_error("No input files"));
    };
    let output = cli.out.clone().unwrap_or_else(|| default_output_path(first));
    if input_paths.iter().any(|input| input == &output) {
        return Err(cli_error(format!(
            "Output would overwrite an input: {}",
            output.display()
        )));
    }
    let debug_output = (!build.omit_debug_info).then(|| debug_db_path(&output));

    let diagnostics_sink = match &cli.error_file {
        Some(path) => DiagnosticsSinkConfig::File { path: path.clone() },
        None => DiagnosticsSinkConfig::Stderr,
    };

    Ok(CliConfig {
        input_paths,
        output,
        debug_output,
        emit_ir: cli.emit_ir.clone(),
        list: cli.list.clone(),
        force: cli.force,
        verbose: cli.verbose,
        output_format: cli.format,
        diagnostics_sink,
        build,
    })
}

/// Validated CLI configuration.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub input_paths: Vec<PathBuf>,
    pub output: PathBuf,
    pub debug_output: Option<PathBuf>,
    pub emit_ir: Option<PathBuf>,
    pub list: Option<PathBuf>,
    pub force: bool,
    pub verbose: bool,
    pub output_format: OutputFormat,
    pub diagnostics_sink: DiagnosticsSinkConfig,
    pub build: BuildOptions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Mutex, OnceLock};

    const BUILD_VARS: &[&str] = &[
        "CPASM_INLINE",
        "CPASM_OMIT_DEBUG_INFO",
        "CPASM_UNSAFE_CODEGEN",
        "CPASM_ALLOW_STACK_OVERFLOW",
        "CPASM_QUIET",
        "CPASM_WERROR",
    ];

    fn with_env_vars(vars: &[(&str, Option<&str>)], test: impl FnOnce()) {
        static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        let _guard = ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut all: Vec<(&str, Option<&str>)> =
            BUILD_VARS.iter().map(|name| (*name, None)).collect();
        for (key, value) in vars {
            if let Some(slot) = all.iter_mut().find(|(name, _)| name == key) {
                slot.1 = *value;
            }
        }
        let saved: Vec<(String, Option<OsString>)> = all
            .iter()
            .map(|(key, _)| (key.to_string(), env::var_os(key)))
            .collect();

        for (key, value) in &all {
            match value {
                // SAFETY: tests serialize env access via ENV_LOCK.
                Some(value) => unsafe { env::set_var(key, value) },
                // SAFETY: tests serialize env access via ENV_LOCK.
                None => unsafe { env::remove_var(key) },
            }
        }

        test();

        for (key, value) in saved {
            match value {
                // SAFETY: tests serialize env access via ENV_LOCK.
                Some(value) => unsafe { env::set_var(&key, value) },
                // SAFETY: tests serialize env access via ENV_LOCK.
                None => unsafe { env::remove_var(&key) },
            }
        }
    }

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["cpasm"];
        full.extend_from_slice(args);
        Cli::parse_from(normalize_args(full))
    }

    #[test]
    fn legacy_out_and_help_spellings_are_normalized() {
        let args = normalize_args(["cpasm", "-out", "a.cpbc", "/?", "-out=b.cpbc", "-o", "c"]);
        let expected: Vec<OsString> = ["cpasm", "--out", "a.cpbc", "--help", "--out=b.cpbc", "-o", "c"]
            .into_iter()
            .map(OsString::from)
            .collect();
        assert_eq!(args, expected);

        let cli = parse(&["main.casm", "-out", "prog.cpbc"]);
        assert_eq!(cli.out, Some(PathBuf::from("prog.cpbc")));
    }

    #[test]
    fn slash_question_mark_requests_help() {
        let err = Cli::try_parse_from(normalize_args(["cpasm", "/?"])).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn cli_parses_outputs_and_toggles() {
        let cli = parse(&[
            "--format",
            "json",
            "-E",
            "errs.txt",
            "--emit-ir",
            "prog.ir",
            "--list",
            "prog.lst",
            "--Werror",
            "--inline",
            "main.casm",
        ]);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.error_file, Some(PathBuf::from("errs.txt")));
        assert_eq!(cli.emit_ir, Some(PathBuf::from("prog.ir")));
        assert_eq!(cli.list, Some(PathBuf::from("prog.lst")));
        assert!(cli.warn_error);
        assert!(cli.inline);
        assert!(!cli.omit_debug_info);
        assert_eq!(cli.inputs, vec!["main.casm".to_string()]);
    }

    #[test]
    fn validate_cli_defaults_output_next_to_first_input() {
        with_env_vars(&[], || {
            let config = validate_cli(&parse(&["src/main.casm", "src/lib.casm"])).unwrap();
            assert_eq!(config.output, PathBuf::from("src/main.cpbc"));
            assert_eq!(config.debug_output, Some(PathBuf::from("src/main.cpdb")));
            assert_eq!(config.diagnostics_sink, DiagnosticsSinkConfig::Stderr);
            assert_eq!(config.build, BuildOptions::default());
        });
    }

    #[test]
    fn omit_debug_info_drops_the_database_path() {
        with_env_vars(&[], || {
            let config = validate_cli(&parse(&["--omit-debug-info", "-o", "out.cpbc", "a.casm"])).unwrap();
            assert_eq!(config.output, PathBuf::from("out.cpbc"));
            assert!(config.debug_output.is_none());
        });
    }

    #[test]
    fn validate_cli_applies_env_defaults_when_cli_not_set() {
        with_env_vars(
            &[
                ("CPASM_INLINE", Some("yes")),
                ("CPASM_WERROR", Some("1")),
                ("CPASM_QUIET", Some("on")),
                ("CPASM_UNSAFE_CODEGEN", Some("0")),
            ],
            || {
                let config = validate_cli(&parse(&["a.casm"])).unwrap();
                assert!(config.build.inline);
                assert!(config.build.werror);
                assert!(config.build.quiet);
                assert!(!config.build.unsafe_codegen);
            },
        );
    }

    #[test]
    fn validate_cli_cli_values_override_env_values() {
        with_env_vars(&[("CPASM_ALLOW_STACK_OVERFLOW", Some("off"))], || {
            let config = validate_cli(&parse(&["--allow-stack-overflow", "a.casm"])).unwrap();
            assert!(config.build.allow_stack_overflow);
        });
    }

    #[test]
    fn validate_cli_rejects_invalid_env_boolean_value() {
        with_env_vars(&[("CPASM_OMIT_DEBUG_INFO", Some("maybe"))], || {
            let err = validate_cli(&parse(&["a.casm"])).unwrap_err();
            assert_eq!(err.kind(), AsmErrorKind::Cli);
            assert!(err.to_string().contains("CPASM_OMIT_DEBUG_INFO"));
        });
    }

    #[test]
    fn validate_cli_rejects_output_over_input() {
        with_env_vars(&[], || {
            let err = validate_cli(&parse(&["-o", "a.casm", "a.casm"])).unwrap_err();
            assert_eq!(err.kind(), AsmErrorKind::Cli);
        });
    }

    #[test]
    fn glob_inputs_expand_to_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.casm", "a.casm", "notes.txt"] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        let pattern = dir.path().join("*.casm").to_string_lossy().to_string();
        let paths = expand_inputs(&[pattern]).unwrap();
        assert_eq!(
            paths,
            vec![dir.path().join("a.casm"), dir.path().join("b.casm")]
        );

        let missing = dir.path().join("*.none").to_string_lossy().to_string();
        let err = expand_inputs(&[missing]).unwrap_err();
        assert!(err.to_string().starts_with("No input files match"));
    }

    #[test]
    fn up_to_date_requires_an_output_newer_than_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("main.casm");
        let output = dir.path().join("main.cpbc");
        fs::write(&input, ".type A {}").unwrap();
        assert!(!is_up_to_date(&[input.clone()], &output));
        fs::write(&output, [1u8]).unwrap();
        assert!(is_up_to_date(&[input.clone()], &output));
        assert!(!is_up_to_date(&[dir.path().join("gone.casm")], &output));
    }
}
