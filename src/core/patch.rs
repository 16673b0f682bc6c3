// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Deferred patch requests applied after a unit is otherwise complete.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::core::error::{AsmErrorKind, Diagnostic};
use crate::core::model::MethodBody;

/// Identifies what a patch rewrites: an instruction position and a slot
/// within it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatchKey {
    pub position: u32,
    pub slot: u16,
}

impl PatchKey {
    pub fn new(position: u32, slot: u16) -> Self {
        Self { position, slot }
    }
}

impl fmt::Display for PatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.position, self.slot)
    }
}

type PatchFn<T, E> = Box<dyn FnOnce(&mut T) -> Result<(), E>>;

struct PatchRequest<T, E> {
    key: PatchKey,
    apply: PatchFn<T, E>,
}

/// Queue of patch requests keyed by [`PatchKey`].
///
/// A key is accepted once: enqueuing it again, before or after it has
/// been applied, is a no-op. [`PatchQueue::apply`] runs requests from the
/// highest position down, so a patch that splices items into the target
/// never moves a position still waiting to be patched.
pub struct PatchQueue<T, E = String> {
    pending: Vec<PatchRequest<T, E>>,
    keys: HashSet<PatchKey>,
}

impl<T, E> PatchQueue<T, E> {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            keys: HashSet::new(),
        }
    }

    /// Returns `false` when the key was already queued or applied.
    pub fn enqueue<F>(&mut self, key: PatchKey, apply: F) -> bool
    where
        F: FnOnce(&mut T) -> Result<(), E> + 'static,
    {
        if !self.keys.insert(key) {
            return false;
        }
        self.pending.push(PatchRequest {
            key,
            apply: Box::new(apply),
        });
        true
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, key: PatchKey) -> bool {
        self.keys.contains(&key)
    }

    /// Apply every pending request, returning how many ran.
    ///
    /// All requests run even when some fail; failures are returned
    /// together with their keys.
    pub fn apply(&mut self, target: &mut T) -> Result<usize, Vec<(PatchKey, E)>> {
        let mut pending = std::mem::take(&mut self.pending);
        pending.sort_by(|a, b| b.key.cmp(&a.key));
        let count = pending.len();
        let mut failures = Vec::new();
        for request in pending {
            if let Err(err) = (request.apply)(target) {
                failures.push((request.key, err));
            }
        }
        if failures.is_empty() {
            Ok(count)
        } else {
            Err(failures)
        }
    }
}

impl<T, E> Default for PatchQueue<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Branch fix-ups of one method, held back until references are resolved.
pub struct MethodPatches {
    /// Full name of the declaring type.
    pub type_path: String,
    /// Position in the declaring type's method list.
    pub index: usize,
    pub method: String,
    pub file: Arc<str>,
    pub line: u32,
    label_lines: Vec<u32>,
    queue: PatchQueue<MethodBody>,
}

impl MethodPatches {
    pub fn new(
        type_path: String,
        method: String,
        line: u32,
        label_lines: Vec<u32>,
        queue: PatchQueue<MethodBody>,
    ) -> Self {
        Self {
            type_path,
            index: 0,
            method,
            file: Arc::from(""),
            line,
            label_lines,
            queue,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Check that every label landed somewhere, then fill branch targets.
    pub fn apply(mut self, body: &mut MethodBody) -> Vec<Diagnostic> {
        let file = (!self.file.is_empty()).then(|| self.file.to_string());
        let mut diagnostics = Vec::new();
        for (label, line) in body.labels.iter().zip(&self.label_lines) {
            if label.offset.is_none() {
                diagnostics.push(
                    Diagnostic::error(*line, AsmErrorKind::Semantic, "Label is never placed", Some(&label.name))
                        .with_file(file.clone())
                        .with_note(format!("in method {}.{}", self.type_path, self.method)),
                );
            }
        }
        if !diagnostics.is_empty() {
            return diagnostics;
        }
        if let Err(failures) = self.queue.apply(body) {
            for (key, message) in failures {
                diagnostics.push(
                    Diagnostic::error(
                        self.line,
                        AsmErrorKind::Semantic,
                        "Branch target could not be fixed",
                        Some(&format!("{key}: {message}")),
                    )
                    .with_file(file.clone()),
                );
            }
        }
        diagnostics
    }
}

impl fmt::Debug for MethodPatches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodPatches")
            .field("type_path", &self.type_path)
            .field("index", &self.index)
            .field("method", &self.method)
            .field("pending", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keys_apply_once() {
        let mut queue: PatchQueue<Vec<u32>> = PatchQueue::new();
        assert!(queue.enqueue(PatchKey::new(1, 0), |v: &mut Vec<u32>| {
            v.push(1);
            Ok(())
        }));
        assert!(!queue.enqueue(PatchKey::new(1, 0), |v: &mut Vec<u32>| {
            v.push(2);
            Ok(())
        }));
        let mut target = Vec::new();
        assert_eq!(queue.apply(&mut target), Ok(1));
        assert_eq!(target, vec![1]);

        // Re-enqueuing an applied key is still a no-op.
        assert!(!queue.enqueue(PatchKey::new(1, 0), |v: &mut Vec<u32>| {
            v.push(3);
            Ok(())
        }));
        assert_eq!(queue.apply(&mut target), Ok(0));
        assert_eq!(target, vec![1]);
    }

    #[test]
    fn patches_run_from_highest_position_down() {
        let mut queue: PatchQueue<Vec<&'static str>> = PatchQueue::new();
        queue.enqueue(PatchKey::new(1, 0), |v: &mut Vec<&'static str>| {
            v.insert(1, "one");
            Ok(())
        });
        queue.enqueue(PatchKey::new(3, 0), |v: &mut Vec<&'static str>| {
            v.insert(3, "three");
            Ok(())
        });
        let mut target = vec!["a", "b", "c", "d"];
        queue.apply(&mut target).unwrap();
        assert_eq!(target, vec!["a", "one", "b", "c", "three", "d"]);
    }

    #[test]
    fn failures_are_collected_with_keys() {
        let mut queue: PatchQueue<u32> = PatchQueue::new();
        queue.enqueue(PatchKey::new(0, 0), |_: &mut u32| Err("missing".to_string()));
        queue.enqueue(PatchKey::new(2, 1), |n: &mut u32| {
            *n += 1;
            Ok(())
        });
        let mut n = 0;
        let failures = queue.apply(&mut n).unwrap_err();
        assert_eq!(failures, vec![(PatchKey::new(0, 0), "missing".to_string())]);
        assert_eq!(n, 1);
        assert!(queue.is_empty());
    }

    fn placeholder_body(placed: bool) -> MethodBody {
        use crate::core::model::Label;
        MethodBody {
            labels: vec![Label {
                name: "end".to_string(),
                index: 0,
                offset: placed.then_some(0),
            }],
            ..MethodBody::default()
        }
    }

    #[test]
    fn method_patches_report_unplaced_labels_instead_of_patching() {
        let mut queue: PatchQueue<MethodBody> = PatchQueue::new();
        queue.enqueue(PatchKey::new(0, 0), |_: &mut MethodBody| Err("should not run".to_string()));
        let mut patches = MethodPatches::new("App.T".to_string(), "m".to_string(), 3, vec![9], queue);
        patches.file = Arc::from("main.casm");
        let mut body = placeholder_body(false);
        let diags = patches.apply(&mut body);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line(), 9);
        assert_eq!(diags[0].file(), Some("main.casm"));
        assert_eq!(diags[0].message(), "Label is never placed: end");
    }

    #[test]
    fn method_patch_failures_point_at_the_method() {
        let mut queue: PatchQueue<MethodBody> = PatchQueue::new();
        queue.enqueue(PatchKey::new(4, 1), |_: &mut MethodBody| Err("gone".to_string()));
        let patches = MethodPatches::new("T".to_string(), "m".to_string(), 3, vec![5], queue);
        let diags = patches.apply(&mut placeholder_body(true));
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].line(), 3);
        assert!(diags[0].file().is_none());
        assert!(diags[0].message().contains("4#1: gone"));
    }
}
