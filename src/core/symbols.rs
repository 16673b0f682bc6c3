// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Symbol references and name resolution.
//!
//! Every textual type/field/method reference captured by the parser is a
//! [`Reference::Pending`] holding the resolver scope that was active where
//! it was written. Once the whole compilation set is parsed, the
//! [`DeclarationTable`] built from the program resolves each pending
//! reference to a canonical [`Symbol`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Built-in type keywords.
pub const PRIMITIVE_TYPES: &[&str] = &[
    "void", "bool", "char", "i8", "i16", "i32", "i64", "u8", "u16", "u32", "u64", "f32", "f64",
    "str", "obj",
];

pub fn is_primitive_type(name: &str) -> bool {
    PRIMITIVE_TYPES.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Type = 1,
    Field = 2,
    Method = 3,
    Primitive = 4,
    External = 5,
}

impl SymbolKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Type),
            2 => Some(Self::Field),
            3 => Some(Self::Method),
            4 => Some(Self::Primitive),
            5 => Some(Self::External),
            _ => None,
        }
    }
}

/// A resolved declaration, identified by its canonical dotted name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub kind: SymbolKind,
    pub name: String,
}

impl Symbol {
    pub fn new(kind: SymbolKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    pub fn primitive(name: &str) -> Self {
        Self::new(SymbolKind::Primitive, name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// What a pending reference must resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Type,
    Field,
    Method,
}

impl RefKind {
    pub fn describe(self) -> &'static str {
        match self {
            RefKind::Type => "type",
            RefKind::Field => "field",
            RefKind::Method => "method",
        }
    }
}

/// Where a reference was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: Arc<str>,
    pub line: u32,
    pub column: Option<usize>,
}

impl SourceLoc {
    pub fn new(file: Arc<str>, line: u32, column: Option<usize>) -> Self {
        Self { file, line, column }
    }
}

/// Snapshot of the lookup context at the point of use.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverScope {
    /// Dotted namespace path, empty for the global namespace.
    pub namespace: String,
    /// Full name of the enclosing type, if any.
    pub type_path: Option<String>,
    /// Namespaces imported with `.using`, innermost scope first.
    pub imports: Vec<String>,
    /// `(alias, target)` pairs visible at the point of use.
    pub aliases: Vec<(String, String)>,
}

impl ResolverScope {
    fn expand_alias(&self, name: &str) -> String {
        let (head, tail) = match name.split_once('.') {
            Some((head, tail)) => (head, Some(tail)),
            None => (name, None),
        };
        match self.aliases.iter().rev().find(|(alias, _)| alias == head) {
            Some((_, target)) => match tail {
                Some(tail) => format!("{target}.{tail}"),
                None => target.clone(),
            },
            None => name.to_string(),
        }
    }

    /// Prefixes to try, innermost first, ending with the global scope.
    fn enclosing_prefixes(&self) -> Vec<String> {
        let base = self.type_path.as_deref().unwrap_or(&self.namespace);
        let mut prefixes = Vec::new();
        let mut current = base.to_string();
        loop {
            prefixes.push(current.clone());
            match current.rfind('.') {
                Some(idx) => current.truncate(idx),
                None if !current.is_empty() => current.clear(),
                None => break,
            }
        }
        prefixes
    }
}

/// A deferred lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRef {
    pub name: String,
    pub expect: RefKind,
    pub scope: Arc<ResolverScope>,
    pub origin: SourceLoc,
}

/// A symbol reference stored in the program model.
#[derive(Debug, Clone, PartialEq)]
pub enum Reference {
    Resolved(Symbol),
    Pending(PendingRef),
}

impl Reference {
    pub fn resolved(&self) -> Option<&Symbol> {
        match self {
            Reference::Resolved(symbol) => Some(symbol),
            Reference::Pending(_) => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Reference::Pending(_))
    }

    /// Name as written (pending) or canonical name (resolved).
    pub fn display_name(&self) -> &str {
        match self {
            Reference::Resolved(symbol) => &symbol.name,
            Reference::Pending(pending) => &pending.name,
        }
    }
}

/// Outcome of resolving one pending reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(Symbol),
    NotFound,
    Ambiguous(Vec<String>),
}

/// Every declaration of a compilation set, by canonical name.
#[derive(Debug, Clone, Default)]
pub struct DeclarationTable {
    types: HashSet<String>,
    fields: HashSet<String>,
    methods: HashSet<String>,
    externs: Vec<String>,
}

impl DeclarationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_type(&mut self, name: impl Into<String>) {
        self.types.insert(name.into());
    }

    pub fn declare_field(&mut self, name: impl Into<String>) {
        self.fields.insert(name.into());
    }

    pub fn declare_method(&mut self, name: impl Into<String>) {
        self.methods.insert(name.into());
    }

    pub fn declare_extern(&mut self, namespace: impl Into<String>) {
        let namespace = namespace.into();
        if !self.externs.contains(&namespace) {
            self.externs.push(namespace);
        }
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    fn contains(&self, kind: RefKind, name: &str) -> bool {
        match kind {
            RefKind::Type => self.types.contains(name),
            RefKind::Field => self.fields.contains(name),
            RefKind::Method => self.methods.contains(name),
        }
    }

    fn is_external(&self, name: &str) -> bool {
        self.externs.iter().any(|ns| {
            name.len() > ns.len() && name.starts_with(ns.as_str()) && name[ns.len()..].starts_with('.')
        })
    }

    pub fn resolve(&self, pending: &PendingRef) -> Resolution {
        let kind = pending.expect;
        if kind == RefKind::Type && is_primitive_type(&pending.name) {
            return Resolution::Found(Symbol::primitive(&pending.name));
        }
        let found_kind = match kind {
            RefKind::Type => SymbolKind::Type,
            RefKind::Field => SymbolKind::Field,
            RefKind::Method => SymbolKind::Method,
        };
        let scope = pending.scope.as_ref();
        let name = scope.expand_alias(&pending.name);
        if kind == RefKind::Type && is_primitive_type(&name) {
            return Resolution::Found(Symbol::primitive(&name));
        }

        // Unqualified members only ever name the enclosing type's members.
        let member_only = kind != RefKind::Type && !name.contains('.');
        if member_only {
            if let Some(type_path) = &scope.type_path {
                let full = join(type_path, &name);
                if self.contains(kind, &full) {
                    return Resolution::Found(Symbol::new(found_kind, full));
                }
            }
            return Resolution::NotFound;
        }

        for prefix in scope.enclosing_prefixes() {
            let full = join(&prefix, &name);
            if self.contains(kind, &full) {
                return Resolution::Found(Symbol::new(found_kind, full));
            }
        }

        let mut matches: Vec<String> = Vec::new();
        for import in &scope.imports {
            let full = join(import, &name);
            if self.contains(kind, &full) && !matches.contains(&full) {
                matches.push(full);
            }
        }
        match matches.len() {
            0 => {}
            1 => return Resolution::Found(Symbol::new(found_kind, matches.remove(0))),
            _ => return Resolution::Ambiguous(matches),
        }

        if self.is_external(&name) {
            return Resolution::Found(Symbol::new(SymbolKind::External, name));
        }
        for import in &scope.imports {
            let full = join(import, &name);
            if self.is_external(&full) {
                return Resolution::Found(Symbol::new(SymbolKind::External, full));
            }
        }
        Resolution::NotFound
    }
}

pub fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
