// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Compiler driver: source files in, container and debug database out.
//!
//! [`Compiler`] owns the pass sequence. Sources come through a
//! [`SourceLoader`] so the same driver runs over the file system and over
//! in-memory fixtures.

pub mod cli;
mod passes;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::bytecode::write_container;
use crate::codegen::CodegenOptions;
use crate::core::context::CompilationContext;
use crate::core::error::{AsmError, AsmErrorKind, AsmRunError, AsmRunReport, Diagnostic, Severity};
use crate::core::model::Program;
use crate::core::resolve::{apply_label_patches, resolve_program};
use crate::opcodes::OpcodeRegistry;
use crate::parser::SourceParser;

pub use cli::VERSION;
pub use passes::{run, run_with_cli, run_with_config};

/// Build toggles shared by the driver and code generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub inline: bool,
    pub omit_debug_info: bool,
    pub unsafe_codegen: bool,
    pub allow_stack_overflow: bool,
    pub quiet: bool,
    pub werror: bool,
}

impl BuildOptions {
    pub fn codegen_options(&self) -> CodegenOptions {
        CodegenOptions {
            inline: self.inline,
            unsafe_codegen: self.unsafe_codegen,
            allow_stack_overflow: self.allow_stack_overflow,
        }
    }
}

/// Where source text comes from.
pub trait SourceLoader {
    /// Stable identity of `path`; two spellings of one file map to one key.
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf>;

    fn load(&self, path: &Path) -> io::Result<String>;
}

/// Loads sources from disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsLoader;

impl SourceLoader for FsLoader {
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        fs::canonicalize(path)
    }

    fn load(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path)
    }
}

/// Sources held in memory, keyed by normalised path.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: BTreeMap<PathBuf, String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl AsRef<Path>, text: impl Into<String>) -> Self {
        self.insert(path, text);
        self
    }

    pub fn insert(&mut self, path: impl AsRef<Path>, text: impl Into<String>) {
        self.files.insert(normalize_path(path.as_ref()), text.into());
    }
}

impl SourceLoader for MemoryLoader {
    fn canonicalize(&self, path: &Path) -> io::Result<PathBuf> {
        let normal = normalize_path(path);
        if self.files.contains_key(&normal) {
            Ok(normal)
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such source: {}", path.display()),
            ))
        }
    }

    fn load(&self, path: &Path) -> io::Result<String> {
        self.files.get(&normalize_path(path)).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such source: {}", path.display()),
            )
        })
    }
}

/// Lexically fold `.` and `..` components.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Every source reachable from `roots` through `.import`, roots first.
///
/// Imports are found by a line scan without parsing. An unreadable file
/// ends the walk with its error.
pub fn source_closure<L: SourceLoader>(loader: &L, roots: &[PathBuf]) -> io::Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::new();
    for root in roots {
        let canonical = loader.canonicalize(root)?;
        if seen.insert(canonical.clone()) {
            queue.push_back(canonical);
        }
    }
    let mut files = Vec::new();
    while let Some(path) = queue.pop_front() {
        let text = loader.load(&path)?;
        for target in import_targets(&text) {
            let canonical = loader.canonicalize(&import_path(&path, target))?;
            if seen.insert(canonical.clone()) {
                queue.push_back(canonical);
            }
        }
        files.push(path);
    }
    Ok(files)
}

fn import_targets(text: &str) -> impl Iterator<Item = &str> {
    text.lines().filter_map(|line| {
        let rest = line.trim_start().strip_prefix(".import")?;
        let rest = rest.trim_start().strip_prefix('"')?;
        rest.split_once('"').map(|(path, _)| path)
    })
}

/// Path of an `.import` relative to the file that names it.
fn import_path(importer: &Path, target: &str) -> PathBuf {
    let target = Path::new(target);
    if target.is_absolute() {
        return target.to_path_buf();
    }
    importer
        .parent()
        .map_or_else(|| target.to_path_buf(), |dir| dir.join(target))
}

/// Everything a successful compile produced.
#[derive(Debug)]
pub struct CompileOutput {
    pub program: Program,
    pub container: Vec<u8>,
    /// Encoded debug database; absent when debug info is omitted.
    pub debug_database: Option<Vec<u8>>,
    /// Every file parsed, in parse order.
    pub files: Vec<PathBuf>,
    pub report: AsmRunReport,
}

pub struct Compiler<'r, L> {
    registry: &'r OpcodeRegistry,
    loader: L,
    options: BuildOptions,
}

impl<'r, L: SourceLoader> Compiler<'r, L> {
    pub fn new(registry: &'r OpcodeRegistry, loader: L, options: BuildOptions) -> Self {
        Self {
            registry,
            loader,
            options,
        }
    }

    pub fn options(&self) -> BuildOptions {
        self.options
    }

    /// Parse `roots` and every file they import, resolve, and encode.
    ///
    /// Nothing is produced when any error diagnostic was reported.
    pub fn compile(&self, roots: &[PathBuf]) -> Result<CompileOutput, AsmRunError> {
        let mut ctx = CompilationContext::new(self.options.werror);
        let mut program = Program::new();
        let parser = SourceParser::new(self.registry);

        let mut queue: VecDeque<PathBuf> = VecDeque::new();
        let mut seen: HashSet<PathBuf> = HashSet::new();
        for root in roots {
            match self.loader.canonicalize(root) {
                Ok(path) => {
                    if seen.insert(path.clone()) {
                        queue.push_back(path);
                    }
                }
                Err(err) => ctx.report(open_failure(root, None, &err)),
            }
        }

        let mut files = Vec::new();
        let mut label_patches = Vec::new();
        let mut root_lines: Option<(String, Vec<String>)> = None;
        while let Some(path) = queue.pop_front() {
            let file_name = path.display().to_string();
            let text = match self.loader.load(&path) {
                Ok(text) => text,
                Err(err) => {
                    ctx.report(open_failure(&path, None, &err));
                    continue;
                }
            };
            if root_lines.is_none() {
                root_lines = Some((file_name.clone(), text.lines().map(str::to_string).collect()));
            }

            ctx.set_file(Arc::from(file_name.as_str()));
            let output = parser.parse_source(&text, &mut program, &mut ctx);
            files.push(path.clone());
            label_patches.extend(output.label_patches);

            let mut queued = 0usize;
            for import in output.imports {
                let target = import_path(&path, &import.path);
                match self.loader.canonicalize(&target) {
                    Ok(canonical) => {
                        if seen.insert(canonical.clone()) {
                            queue.push_back(canonical);
                            queued += 1;
                        }
                    }
                    Err(err) => ctx.report(
                        open_failure(&target, Some(import.line), &err).with_file(Some(file_name.clone())),
                    ),
                }
            }
            if queued > 0 {
                debug!(file = %file_name, queued, "imports queued");
            }
        }

        let stats = resolve_program(&mut program, &mut ctx);
        info!(
            files = files.len(),
            resolved = stats.resolved,
            unresolved = stats.unresolved,
            "resolution pass complete"
        );
        let methods = label_patches.len();
        let patched = apply_label_patches(&mut program, label_patches, &mut ctx);
        debug!(methods, patched, "label patches applied");

        let (source_file, source_lines) = root_lines.unwrap_or_default();
        let source_file = (!source_file.is_empty()).then_some(source_file);
        if ctx.has_errors() {
            let diagnostics = ctx.take_diagnostics();
            let count = diagnostics
                .iter()
                .filter(|d| d.severity() == Severity::Error)
                .count();
            let kind = diagnostics
                .iter()
                .find(|d| d.severity() == Severity::Error)
                .map_or(AsmErrorKind::Syntax, Diagnostic::kind);
            let message = format!("Compilation failed with {count} error(s)");
            return Err(AsmRunError::new(AsmError::new(kind, &message, None), diagnostics, source_lines)
                .with_source_file(source_file));
        }

        let image = write_container(&program, self.registry, !self.options.omit_debug_info)
            .map_err(|err| format_failure(&err.to_string(), &source_lines))?;
        let debug_database = match &image.debug {
            Some(db) => Some(
                db.encode()
                    .map_err(|err| format_failure(&err.to_string(), &source_lines))?,
            ),
            None => None,
        };
        debug!(
            container = image.bytes.len(),
            debug = debug_database.as_ref().map_or(0, Vec::len),
            "outputs encoded"
        );

        let report =
            AsmRunReport::new(ctx.take_diagnostics(), source_lines).with_source_file(source_file);
        Ok(CompileOutput {
            program,
            container: image.bytes,
            debug_database,
            files,
            report,
        })
    }
}

fn open_failure(path: &Path, line: Option<u32>, err: &io::Error) -> Diagnostic {
    let param = format!("{} ({err})", path.display());
    Diagnostic::error(line.unwrap_or(0), AsmErrorKind::Io, "Cannot open source file", Some(&param))
}

fn format_failure(message: &str, source_lines: &[String]) -> AsmRunError {
    AsmRunError::new(
        AsmError::new(AsmErrorKind::Format, message, None),
        Vec::new(),
        source_lines.to_vec(),
    )
}
