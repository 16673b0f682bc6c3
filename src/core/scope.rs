// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Scope management for namespace paths, imports and aliases.

use std::sync::Arc;

use crate::core::symbols::ResolverScope;

/// A frame in the scope stack.
///
/// Records how many path segments, imports and aliases the frame added so
/// that closing it restores the enclosing state exactly.
struct ScopeFrame {
    saved_segments: Option<Vec<String>>,
    segment_count: usize,
    import_mark: usize,
    alias_mark: usize,
}

/// Stack of namespace scopes with the `.using`/`.alias` state they carry.
pub struct ScopeStack {
    segments: Vec<String>,
    frames: Vec<ScopeFrame>,
    imports: Vec<String>,
    aliases: Vec<(String, String)>,
    cached: Option<Arc<ResolverScope>>,
    cached_type: Option<String>,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            frames: Vec::new(),
            imports: Vec::new(),
            aliases: Vec::new(),
            cached: None,
            cached_type: None,
        }
    }

    pub fn clear(&mut self) {
        self.segments.clear();
        self.frames.clear();
        self.imports.clear();
        self.aliases.clear();
        self.invalidate();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn namespace(&self) -> String {
        self.segments.join(".")
    }

    pub fn qualify(&self, name: &str) -> String {
        if self.segments.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.segments.join("."), name)
        }
    }

    /// Enter a namespace that appends `name` to the current path.
    pub fn push_named(&mut self, name: &str) -> Result<(), &'static str> {
        let parts = split_segments(name)?;
        let count = parts.len();
        self.segments.extend(parts);
        self.frames.push(ScopeFrame {
            saved_segments: None,
            segment_count: count,
            import_mark: self.imports.len(),
            alias_mark: self.aliases.len(),
        });
        self.invalidate();
        Ok(())
    }

    /// Enter a namespace whose path replaces the current one.
    pub fn push_rooted(&mut self, name: &str) -> Result<(), &'static str> {
        let parts = split_segments(name)?;
        let saved = std::mem::replace(&mut self.segments, parts);
        self.frames.push(ScopeFrame {
            saved_segments: Some(saved),
            segment_count: 0,
            import_mark: self.imports.len(),
            alias_mark: self.aliases.len(),
        });
        self.invalidate();
        Ok(())
    }

    pub fn pop(&mut self) -> bool {
        let Some(frame) = self.frames.pop() else {
            return false;
        };
        match frame.saved_segments {
            Some(saved) => self.segments = saved,
            None => {
                let keep = self.segments.len().saturating_sub(frame.segment_count);
                self.segments.truncate(keep);
            }
        }
        self.imports.truncate(frame.import_mark);
        self.aliases.truncate(frame.alias_mark);
        self.invalidate();
        true
    }

    pub fn add_import(&mut self, namespace: &str) {
        if !self.imports.iter().any(|existing| existing == namespace) {
            self.imports.push(namespace.to_string());
            self.invalidate();
        }
    }

    pub fn add_alias(&mut self, alias: &str, target: &str) {
        self.aliases.push((alias.to_string(), target.to_string()));
        self.invalidate();
    }

    /// Resolver scope for a reference written inside `type_path`.
    ///
    /// Snapshots are shared until the scope state changes.
    pub fn snapshot(&mut self, type_path: Option<&str>) -> Arc<ResolverScope> {
        if let Some(cached) = &self.cached {
            if self.cached_type.as_deref() == type_path {
                return Arc::clone(cached);
            }
        }
        let mut imports = self.imports.clone();
        imports.reverse();
        let scope = Arc::new(ResolverScope {
            namespace: self.namespace(),
            type_path: type_path.map(str::to_string),
            imports,
            aliases: self.aliases.clone(),
        });
        self.cached = Some(Arc::clone(&scope));
        self.cached_type = type_path.map(str::to_string);
        scope
    }

    fn invalidate(&mut self) {
        self.cached = None;
        self.cached_type = None;
    }
}

impl Default for ScopeStack {
    fn default() -> Self {
        Self::new()
    }
}

fn split_segments(name: &str) -> Result<Vec<String>, &'static str> {
    if name.is_empty() {
        return Err("Namespace name cannot be empty");
    }
    let parts: Vec<&str> = name.split('.').collect();
    if parts.iter().any(|part| part.is_empty()) {
        return Err("Namespace name cannot contain empty segments");
    }
    Ok(parts.into_iter().map(str::to_string).collect())
}
