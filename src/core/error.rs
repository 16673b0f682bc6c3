// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Error types, diagnostics, and reporting for the compiler.

use std::fmt;
use std::sync::Arc;

/// Categories of compiler errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmErrorKind {
    Lexical,
    Syntax,
    Semantic,
    Resolution,
    Opcode,
    Format,
    Io,
    Cli,
    Codegen,
}

/// A compiler error with a kind and message.
#[derive(Debug, Clone)]
pub struct AsmError {
    kind: AsmErrorKind,
    message: String,
}

impl AsmError {
    pub fn new(kind: AsmErrorKind, msg: &str, param: Option<&str>) -> Self {
        Self {
            kind,
            message: format_error(msg, param),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> AsmErrorKind {
        self.kind
    }
}

impl fmt::Display for AsmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AsmError {}

/// Severity level for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// A diagnostic message with location and context.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub(crate) line: u32,
    pub(crate) column: Option<usize>,
    pub(crate) code: String,
    pub(crate) severity: Severity,
    pub(crate) error: AsmError,
    pub(crate) file: Option<String>,
    pub(crate) notes: Vec<String>,
    pub(crate) help: Vec<String>,
}

impl Diagnostic {
    pub fn new(line: u32, severity: Severity, error: AsmError) -> Self {
        Self {
            line,
            column: None,
            code: default_diagnostic_code(error.kind()).to_string(),
            severity,
            error,
            file: None,
            notes: Vec::new(),
            help: Vec::new(),
        }
    }

    pub fn error(line: u32, kind: AsmErrorKind, msg: &str, param: Option<&str>) -> Self {
        Self::new(line, Severity::Error, AsmError::new(kind, msg, param))
    }

    pub fn warning(line: u32, kind: AsmErrorKind, msg: &str, param: Option<&str>) -> Self {
        Self::new(line, Severity::Warning, AsmError::new(kind, msg, param))
    }

    pub fn with_column(mut self, column: Option<usize>) -> Self {
        self.column = column;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_file(mut self, file: Option<String>) -> Self {
        self.file = file;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help.push(help.into());
        self
    }

    pub fn escalate(mut self) -> Self {
        self.severity = Severity::Error;
        self
    }

    pub fn format(&self) -> String {
        format!(
            "{}: {} [{}] - {}",
            self.line,
            severity_label(self.severity),
            self.code,
            self.error.message()
        )
    }

    pub fn format_with_context(&self, lines: Option<&[String]>, use_color: bool) -> String {
        let sev = severity_label(self.severity);
        let header = match &self.file {
            Some(file) => format!("{file}:{}: {sev} [{}]", self.line, self.code),
            None => format!("{}: {sev} [{}]", self.line, self.code),
        };

        let mut out = String::new();
        out.push_str(&header);
        out.push('\n');

        for line in build_context_lines(self.line, self.column, lines, use_color) {
            out.push_str(&line);
            out.push('\n');
        }

        for note in &self.notes {
            out.push_str("note: ");
            out.push_str(note);
            out.push('\n');
        }

        for help in &self.help {
            out.push_str("help: ");
            out.push_str(help);
            out.push('\n');
        }

        out.push_str(&format!("{sev}: {}", self.error.message()));
        out
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn kind(&self) -> AsmErrorKind {
        self.error.kind()
    }

    pub fn code(&self) -> &str {
        self.code.as_str()
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    pub fn column(&self) -> Option<usize> {
        self.column
    }

    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn message(&self) -> &str {
        self.error.message()
    }

    pub fn notes(&self) -> &[String] {
        &self.notes
    }

    pub fn help(&self) -> &[String] {
        &self.help
    }
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Warning => "WARNING",
        Severity::Error => "ERROR",
    }
}

/// Report from a successful compilation run.
#[derive(Debug)]
pub struct AsmRunReport {
    diagnostics: Vec<Diagnostic>,
    source_lines: Arc<Vec<String>>,
    source_file: Option<String>,
}

impl AsmRunReport {
    pub fn new(diagnostics: Vec<Diagnostic>, source_lines: impl Into<Arc<Vec<String>>>) -> Self {
        Self {
            diagnostics,
            source_lines: source_lines.into(),
            source_file: None,
        }
    }

    /// Name the file `source_lines` came from.
    pub fn with_source_file(mut self, file: Option<String>) -> Self {
        self.source_file = file;
        self
    }

    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn source_lines(&self) -> &[String] {
        &self.source_lines
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
            .count()
    }
}

/// Error from a failed compilation run.
#[derive(Debug)]
pub struct AsmRunError {
    error: AsmError,
    diagnostics: Vec<Diagnostic>,
    source_lines: Arc<Vec<String>>,
    source_file: Option<String>,
}

impl AsmRunError {
    pub fn new(
        error: AsmError,
        diagnostics: Vec<Diagnostic>,
        source_lines: impl Into<Arc<Vec<String>>>,
    ) -> Self {
        Self {
            error,
            diagnostics,
            source_lines: source_lines.into(),
            source_file: None,
        }
    }

    pub fn with_source_file(mut self, file: Option<String>) -> Self {
        self.source_file = file;
        self
    }

    pub fn source_file(&self) -> Option<&str> {
        self.source_file.as_deref()
    }

    pub fn kind(&self) -> AsmErrorKind {
        self.error.kind()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn source_lines(&self) -> &[String] {
        &self.source_lines
    }

    pub fn error_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
            .count()
    }
}

impl fmt::Display for AsmRunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for AsmRunError {}

/// Build context lines for error display.
pub fn build_context_lines(
    line_num: u32,
    column: Option<usize>,
    lines: Option<&[String]>,
    use_color: bool,
) -> Vec<String> {
    let line_idx = line_num.saturating_sub(1) as usize;
    let Some(line) = lines.and_then(|lines| lines.get(line_idx)) else {
        return vec![format!("{:>5} | <source unavailable>", line_num)];
    };
    let display = crate::core::report::highlight_line(line, column, use_color);
    vec![format!("{:>5} | {}", line_num, display)]
}

fn default_diagnostic_code(kind: AsmErrorKind) -> &'static str {
    match kind {
        AsmErrorKind::Lexical => "cpa101",
        AsmErrorKind::Syntax => "cpa102",
        AsmErrorKind::Semantic => "cpa201",
        AsmErrorKind::Resolution => "cpa301",
        AsmErrorKind::Opcode => "cpa302",
        AsmErrorKind::Format => "cpa401",
        AsmErrorKind::Io => "cpa501",
        AsmErrorKind::Cli => "cpa601",
        AsmErrorKind::Codegen => "cpa701",
    }
}

/// Format an error message with an optional parameter.
pub fn format_error(msg: &str, param: Option<&str>) -> String {
    match param {
        Some(p) => format!("{msg}: {p}"),
        None => msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostic_format_includes_line_and_severity() {
        let diag = Diagnostic::error(12, AsmErrorKind::Syntax, "Bad thing", None);
        assert_eq!(diag.format(), "12: ERROR [cpa102] - Bad thing");
    }

    #[test]
    fn format_error_appends_parameter() {
        assert_eq!(format_error("Unknown mnemonic", Some("ldq")), "Unknown mnemonic: ldq");
        assert_eq!(format_error("Unknown mnemonic", None), "Unknown mnemonic");
    }

    #[test]
    fn format_with_context_renders_notes_before_help() {
        let diag = Diagnostic::error(2, AsmErrorKind::Opcode, "no overload accepts", None)
            .with_file(Some("main.casm".to_string()))
            .with_column(Some(5))
            .with_note("push(Register): expected register")
            .with_help("check the argument types");
        let lines = vec![".method m() {".to_string(), "    push qq".to_string()];

        let rendered = diag.format_with_context(Some(&lines), false);
        let expected = [
            "main.casm:2: ERROR [cpa302]",
            "    2 |     push qq",
            "note: push(Register): expected register",
            "help: check the argument types",
            "ERROR: no overload accepts",
        ]
        .join("\n");
        assert_eq!(rendered, expected);
    }

    #[test]
    fn missing_source_line_is_reported_as_unavailable() {
        let lines = build_context_lines(9, None, Some(&[]), false);
        assert_eq!(lines, vec!["    9 | <source unavailable>".to_string()]);
    }

    #[test]
    fn run_report_counts_by_severity() {
        let report = AsmRunReport::new(
            vec![
                Diagnostic::warning(1, AsmErrorKind::Opcode, "ambiguous", None),
                Diagnostic::error(2, AsmErrorKind::Syntax, "bad", None),
                Diagnostic::warning(3, AsmErrorKind::Opcode, "ambiguous", None),
            ],
            Vec::new(),
        );
        assert_eq!(report.warning_count(), 2);
        assert_eq!(report.error_count(), 1);
    }
}
