// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Per-compilation state threaded through every pass.

use std::sync::Arc;

use crate::core::error::{AsmErrorKind, Diagnostic, Severity};
use crate::core::symbols::SourceLoc;

/// Current source position plus the diagnostics collected so far.
///
/// One value exists per compilation; independent compilations never share
/// one.
#[derive(Debug)]
pub struct CompilationContext {
    file: Arc<str>,
    line: u32,
    diagnostics: Vec<Diagnostic>,
    warnings_as_errors: bool,
}

impl CompilationContext {
    pub fn new(warnings_as_errors: bool) -> Self {
        Self {
            file: Arc::from(""),
            line: 0,
            diagnostics: Vec::new(),
            warnings_as_errors,
        }
    }

    pub fn set_file(&mut self, file: Arc<str>) {
        self.file = file;
        self.line = 0;
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn file_arc(&self) -> Arc<str> {
        Arc::clone(&self.file)
    }

    pub fn set_line(&mut self, line: u32) {
        self.line = line;
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn loc(&self, column: Option<usize>) -> SourceLoc {
        SourceLoc::new(self.file_arc(), self.line, column)
    }

    /// Record a diagnostic, filling in the current file when it has none.
    pub fn report(&mut self, diagnostic: Diagnostic) {
        let mut diagnostic = if diagnostic.file().is_none() && !self.file.is_empty() {
            diagnostic.with_file(Some(self.file.to_string()))
        } else {
            diagnostic
        };
        if self.warnings_as_errors && diagnostic.severity() == Severity::Warning {
            diagnostic = diagnostic.escalate();
        }
        self.diagnostics.push(diagnostic);
    }

    pub fn error(&mut self, kind: AsmErrorKind, msg: &str, param: Option<&str>) {
        self.report(Diagnostic::error(self.line, kind, msg, param));
    }

    pub fn warning(&mut self, kind: AsmErrorKind, msg: &str, param: Option<&str>) {
        self.report(Diagnostic::warning(self.line, kind, msg, param));
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity() == Severity::Error)
            .count()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }
}

impl Default for CompilationContext {
    fn default() -> Self {
        Self::new(false)
    }
}
