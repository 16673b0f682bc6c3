// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Character-level scanner over one source file.
//!
//! The parser pulls tokens on demand rather than from a pre-built token
//! list: argument parsing needs to know whether a token starts on the
//! mnemonic's line, and candidate opcode parsers backtrack with
//! [`Scanner::save`]/[`Scanner::restore`].

use std::fmt;

/// A lexical error with the position where it was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: usize,
}

impl LexError {
    fn new(message: impl Into<String>, line: u32, column: usize) -> Self {
        Self {
            message: message.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

impl std::error::Error for LexError {}

/// A literal value as written.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    Bool(bool),
    Null,
}

/// Saved scanner position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pos: usize,
    line: u32,
    column: usize,
}

pub struct Scanner<'a> {
    src: &'a str,
    cur: Cursor,
}

impl<'a> Scanner<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            cur: Cursor {
                pos: 0,
                line: 1,
                column: 1,
            },
        }
    }

    pub fn save(&self) -> Cursor {
        self.cur
    }

    pub fn restore(&mut self, cursor: Cursor) {
        self.cur = cursor;
    }

    pub fn line(&self) -> u32 {
        self.cur.line
    }

    pub fn column(&self) -> usize {
        self.cur.column
    }

    pub fn error(&self, message: impl Into<String>) -> LexError {
        LexError::new(message, self.cur.line, self.cur.column)
    }

    fn rest(&self) -> &'a str {
        &self.src[self.cur.pos..]
    }

    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.cur.pos += c.len_utf8();
        if c == '\n' {
            self.cur.line += 1;
            self.cur.column = 1;
        } else {
            self.cur.column += 1;
        }
        Some(c)
    }

    /// Skip whitespace, newlines and comments.
    pub fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c == ';' {
                self.skip_comment();
            } else if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    /// Skip spaces, tabs and a trailing comment, stopping at a newline.
    pub fn skip_inline_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c == ';' {
                self.skip_comment();
            } else if c.is_whitespace() && c != '\n' {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    pub fn at_eof(&self) -> bool {
        self.cur.pos >= self.src.len()
    }

    /// True when only inline trivia remains before the next newline.
    pub fn at_line_end(&mut self) -> bool {
        self.skip_inline_trivia();
        matches!(self.peek(), None | Some('\n'))
    }

    pub fn eat(&mut self, expected: char) -> bool {
        self.skip_trivia();
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    pub fn eat_str(&mut self, expected: &str) -> bool {
        self.skip_trivia();
        if self.rest().starts_with(expected) {
            for _ in expected.chars() {
                self.bump();
            }
            true
        } else {
            false
        }
    }

    pub fn expect(&mut self, expected: char) -> Result<(), LexError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(match self.peek() {
                Some(found) => format!("Expected '{expected}', found '{found}'"),
                None => format!("Expected '{expected}', found end of file"),
            }))
        }
    }

    /// The identifier at the cursor, without consuming it.
    pub fn peek_ident(&self) -> Option<&'a str> {
        let rest = self.rest();
        let mut chars = rest.char_indices();
        let (_, first) = chars.next()?;
        if !is_ident_start(first) {
            return None;
        }
        let end = chars
            .find(|(_, c)| !is_ident_char(*c))
            .map_or(rest.len(), |(idx, _)| idx);
        Some(&rest[..end])
    }

    /// True when the cursor sits on `NAME:` (and not `NAME::`).
    pub fn at_label_decl(&self) -> bool {
        match self.peek_ident() {
            Some(ident) => {
                let after = &self.rest()[ident.len()..];
                after.starts_with(':') && !after.starts_with("::")
            }
            None => false,
        }
    }

    pub fn read_ident(&mut self) -> Result<String, LexError> {
        self.skip_trivia();
        let ident = self
            .peek_ident()
            .ok_or_else(|| self.error(self.describe_expected("identifier")))?;
        for _ in ident.chars() {
            self.bump();
        }
        Ok(ident.to_string())
    }

    /// A dotted name such as `App.Core.Main`.
    pub fn read_dotted(&mut self) -> Result<String, LexError> {
        let mut name = self.read_ident()?;
        while self.peek() == Some('.') && self.peek_nth(1).is_some_and(is_ident_start) {
            self.bump();
            name.push('.');
            let part = self.read_ident()?;
            name.push_str(&part);
        }
        Ok(name)
    }

    /// A dotted type name followed by zero or more `[]` suffixes.
    pub fn read_type_name(&mut self) -> Result<(String, u8), LexError> {
        let name = self.read_dotted()?;
        let mut dims: u8 = 0;
        while self.rest().starts_with("[]") {
            self.bump();
            self.bump();
            dims = dims
                .checked_add(1)
                .ok_or_else(|| self.error("Too many array dimensions"))?;
        }
        Ok((name, dims))
    }

    /// True when the next token can start a literal.
    pub fn at_literal(&self) -> bool {
        match self.peek() {
            Some(c) if c.is_ascii_digit() || c == '"' || c == '\'' => true,
            Some('-') | Some('+') => self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()),
            _ => matches!(self.peek_ident(), Some("true" | "false" | "null")),
        }
    }

    pub fn read_literal(&mut self) -> Result<Literal, LexError> {
        self.skip_trivia();
        match self.peek() {
            Some('"') => self.read_string().map(Literal::Str),
            Some('\'') => self.read_char().map(Literal::Char),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' => self.read_number(),
            _ => match self.peek_ident() {
                Some("true") => {
                    self.read_ident()?;
                    Ok(Literal::Bool(true))
                }
                Some("false") => {
                    self.read_ident()?;
                    Ok(Literal::Bool(false))
                }
                Some("null") => {
                    self.read_ident()?;
                    Ok(Literal::Null)
                }
                _ => Err(self.error(self.describe_expected("literal"))),
            },
        }
    }

    pub fn read_string(&mut self) -> Result<String, LexError> {
        self.skip_trivia();
        if self.peek() != Some('"') {
            return Err(self.error(self.describe_expected("string literal")));
        }
        let start = self.save();
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                None | Some('\n') => {
                    return Err(LexError::new(
                        "Unterminated string literal",
                        start.line,
                        start.column,
                    ))
                }
                Some('"') => return Ok(out),
                Some('\\') => out.push(self.read_escape()?),
                Some(c) => out.push(c),
            }
        }
    }

    fn read_char(&mut self) -> Result<char, LexError> {
        let start = self.save();
        self.bump();
        let value = match self.bump() {
            None | Some('\n') | Some('\'') => {
                return Err(LexError::new(
                    "Malformed character literal",
                    start.line,
                    start.column,
                ))
            }
            Some('\\') => self.read_escape()?,
            Some(c) => c,
        };
        if self.bump() != Some('\'') {
            return Err(LexError::new(
                "Unterminated character literal",
                start.line,
                start.column,
            ));
        }
        Ok(value)
    }

    fn read_escape(&mut self) -> Result<char, LexError> {
        let at = self.save();
        let escaped = match self.bump() {
            Some('\\') => '\\',
            Some('\'') => '\'',
            Some('"') => '"',
            Some('0') => '\0',
            Some('a') => '\u{07}',
            Some('b') => '\u{08}',
            Some('f') => '\u{0C}',
            Some('n') => '\n',
            Some('r') => '\r',
            Some('t') => '\t',
            Some('v') => '\u{0B}',
            Some(other) => {
                return Err(LexError::new(
                    format!("Unknown escape sequence '\\{other}'"),
                    at.line,
                    at.column,
                ))
            }
            None => return Err(LexError::new("Unterminated escape sequence", at.line, at.column)),
        };
        Ok(escaped)
    }

    fn read_number(&mut self) -> Result<Literal, LexError> {
        let start = self.save();
        let negative = match self.peek() {
            Some('-') => {
                self.bump();
                true
            }
            Some('+') => {
                self.bump();
                false
            }
            _ => false,
        };
        let radix = if self.rest().starts_with("0x") || self.rest().starts_with("0X") {
            16
        } else if self.rest().starts_with("0b") || self.rest().starts_with("0B") {
            2
        } else {
            10
        };
        if radix != 10 {
            self.bump();
            self.bump();
        }
        let digits_start = self.cur.pos;
        while self.peek().is_some_and(|c| c.is_digit(radix) || c == '_') {
            self.bump();
        }
        let mut is_float = false;
        if radix == 10 {
            if self.peek() == Some('.') && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.bump();
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
            if matches!(self.peek(), Some('e' | 'E')) {
                let sign_then_digit = matches!(self.peek_nth(1), Some('-' | '+'))
                    && self.peek_nth(2).is_some_and(|c| c.is_ascii_digit());
                if sign_then_digit || self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
                    is_float = true;
                    self.bump();
                    if sign_then_digit {
                        self.bump();
                    }
                    while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                        self.bump();
                    }
                }
            }
        }
        let text: String = self.src[digits_start..self.cur.pos]
            .chars()
            .filter(|c| *c != '_')
            .collect();
        if self.peek().is_some_and(is_ident_char) {
            return Err(LexError::new(
                "Malformed numeric literal",
                start.line,
                start.column,
            ));
        }
        if text.is_empty() {
            return Err(LexError::new("Missing digits in numeric literal", start.line, start.column));
        }
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| LexError::new("Malformed float literal", start.line, start.column))?;
            return Ok(Literal::Float(if negative { -value } else { value }));
        }
        let magnitude = u64::from_str_radix(&text, radix)
            .map_err(|_| LexError::new("Integer literal out of range", start.line, start.column))?;
        let value = if negative {
            if magnitude > i64::MAX as u64 + 1 {
                return Err(LexError::new("Integer literal out of range", start.line, start.column));
            }
            (magnitude as i64).wrapping_neg()
        } else {
            i64::try_from(magnitude).map_err(|_| {
                LexError::new("Integer literal out of range", start.line, start.column)
            })?
        };
        Ok(Literal::Int(value))
    }

    /// Consume the rest of the current line including its newline.
    ///
    /// Returns the braces met outside string/char literals and comments,
    /// in order, so the caller can keep its block structure in step.
    pub fn skip_line(&mut self) -> Vec<char> {
        let mut braces = Vec::new();
        while let Some(c) = self.peek() {
            match c {
                '\n' => {
                    self.bump();
                    break;
                }
                ';' => self.skip_comment(),
                '"' | '\'' => self.skip_quoted_on_line(c),
                '{' | '}' => {
                    braces.push(c);
                    self.bump();
                }
                _ => {
                    self.bump();
                }
            }
        }
        braces
    }

    fn skip_quoted_on_line(&mut self, quote: char) {
        self.bump();
        while let Some(c) = self.peek() {
            match c {
                '\n' => break,
                '\\' => {
                    self.bump();
                    if self.peek() != Some('\n') {
                        self.bump();
                    }
                }
                _ => {
                    self.bump();
                    if c == quote {
                        break;
                    }
                }
            }
        }
    }

    /// Label names declared directly in the block starting at the cursor.
    ///
    /// The cursor must be just past the block's `{`. Nested blocks are not
    /// searched and the scanner position is left unchanged.
    pub fn prescan_labels(&self) -> Vec<(String, u32)> {
        let mut probe = Scanner {
            src: self.src,
            cur: self.cur,
        };
        let mut labels = Vec::new();
        let mut depth = 0usize;
        loop {
            probe.skip_trivia();
            let Some(c) = probe.peek() else { break };
            match c {
                '{' => {
                    depth += 1;
                    probe.bump();
                }
                '}' => {
                    if depth == 0 {
                        break;
                    }
                    depth -= 1;
                    probe.bump();
                }
                '"' | '\'' => probe.skip_quoted_on_line(c),
                c if is_ident_start(c) => {
                    let line = probe.line();
                    let is_label = probe.at_label_decl();
                    let ident = probe.read_ident().unwrap_or_default();
                    if is_label && depth == 0 && !labels.iter().any(|(name, _)| *name == ident) {
                        labels.push((ident, line));
                    }
                }
                _ => {
                    probe.bump();
                }
            }
        }
        labels
    }

    fn describe_expected(&self, what: &str) -> String {
        match self.peek() {
            Some(found) => format!("Expected {what}, found '{found}'"),
            None => format!("Expected {what}, found end of file"),
        }
    }
}

pub fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

pub fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trivia_and_line_tracking() {
        let mut sc = Scanner::new("  ; comment\n\tname ; trailing\nnext");
        assert_eq!(sc.read_ident().unwrap(), "name");
        assert_eq!(sc.line(), 2);
        assert!(sc.at_line_end());
        assert_eq!(sc.read_ident().unwrap(), "next");
        assert_eq!(sc.line(), 3);
        assert!(sc.at_eof());
    }

    #[test]
    fn dotted_and_array_type_names() {
        let mut sc = Scanner::new("App.Core.Main[][] rest");
        assert_eq!(sc.read_type_name().unwrap(), ("App.Core.Main".to_string(), 2));
        assert_eq!(sc.read_ident().unwrap(), "rest");
    }

    #[test]
    fn integer_literals_in_all_radixes() {
        let cases = [
            ("42", 42),
            ("-7", -7),
            ("0x1F", 31),
            ("0b101", 5),
            ("-0x10", -16),
            ("1_000", 1000),
            ("9223372036854775807", i64::MAX),
            ("-9223372036854775808", i64::MIN),
        ];
        for (text, expected) in cases {
            let mut sc = Scanner::new(text);
            assert_eq!(sc.read_literal().unwrap(), Literal::Int(expected), "{text}");
        }
    }

    #[test]
    fn float_literals() {
        let mut sc = Scanner::new("1.5 -2e3 3.0E-1");
        assert_eq!(sc.read_literal().unwrap(), Literal::Float(1.5));
        assert_eq!(sc.read_literal().unwrap(), Literal::Float(-2000.0));
        assert_eq!(sc.read_literal().unwrap(), Literal::Float(0.3));
    }

    #[test]
    fn malformed_numbers_are_lexical_errors() {
        for text in ["12abc", "0x", "99999999999999999999"] {
            let mut sc = Scanner::new(text);
            assert!(sc.read_literal().is_err(), "{text}");
        }
    }

    #[test]
    fn string_escapes_follow_the_fixed_set() {
        let mut sc = Scanner::new(r#""a\\b\'c\"d\0\a\b\f\n\r\t\v""#);
        assert_eq!(
            sc.read_literal().unwrap(),
            Literal::Str("a\\b'c\"d\0\u{07}\u{08}\u{0C}\n\r\t\u{0B}".to_string())
        );
        let mut sc = Scanner::new(r#""bad \q""#);
        let err = sc.read_literal().unwrap_err();
        assert!(err.message.contains("\\q"));
    }

    #[test]
    fn unterminated_literals_are_rejected() {
        assert!(Scanner::new("\"open\nclosed\"").read_literal().is_err());
        assert!(Scanner::new("'ab'").read_literal().is_err());
        assert_eq!(Scanner::new("'\\n'").read_literal().unwrap(), Literal::Char('\n'));
    }

    #[test]
    fn keyword_literals() {
        let mut sc = Scanner::new("true false null");
        assert_eq!(sc.read_literal().unwrap(), Literal::Bool(true));
        assert_eq!(sc.read_literal().unwrap(), Literal::Bool(false));
        assert_eq!(sc.read_literal().unwrap(), Literal::Null);
    }

    #[test]
    fn skip_line_reports_braces_outside_literals() {
        let mut sc = Scanner::new("bad \"{\" } ; {\nnext");
        assert_eq!(sc.skip_line(), vec!['}']);
        assert_eq!(sc.line(), 2);
        assert_eq!(sc.read_ident().unwrap(), "next");
    }

    #[test]
    fn label_declarations_are_detected() {
        let sc = Scanner::new("top: jmp top");
        assert!(sc.at_label_decl());
        let sc = Scanner::new("Ns::Type");
        assert!(!sc.at_label_decl());
    }

    #[test]
    fn prescan_finds_block_level_labels_only() {
        let src = "\n start: nop\n .locals { a:i32 }\n \"x:\" loop: jmp start\n}\nafter:";
        let sc = Scanner::new(src);
        let labels = sc.prescan_labels();
        assert_eq!(
            labels,
            vec![("start".to_string(), 2), ("loop".to_string(), 4)]
        );
        assert_eq!(sc.line(), 1);
    }

    #[test]
    fn save_and_restore_backtrack() {
        let mut sc = Scanner::new("alpha beta");
        let mark = sc.save();
        sc.read_ident().unwrap();
        sc.restore(mark);
        assert_eq!(sc.read_ident().unwrap(), "alpha");
    }
}
