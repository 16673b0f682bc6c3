// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Erik van der Tier

//! Deduplicated string table referenced by index from binary outputs.

use std::collections::HashMap;

/// Heap index written for "no string".
pub const NO_STRING: u32 = u32::MAX;

/// Interns strings in first-seen order.
///
/// Identical text always maps to the same index for the lifetime of the
/// heap. The heap is owned by one compilation unit and cleared between
/// units.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringHeap {
    entries: Vec<String>,
    index: HashMap<String, u32>,
}

impl StringHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a heap from entries read back from a binary section.
    ///
    /// Later duplicates keep their slot but lookups resolve to the first.
    pub fn from_entries(entries: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            index.entry(entry.clone()).or_insert(idx as u32);
        }
        Self { entries, index }
    }

    pub fn intern(&mut self, text: &str) -> u32 {
        if let Some(&idx) = self.index.get(text) {
            return idx;
        }
        let idx = self.entries.len() as u32;
        self.entries.push(text.to_string());
        self.index.insert(text.to_string(), idx);
        idx
    }

    pub fn intern_opt(&mut self, text: Option<&str>) -> u32 {
        text.map_or(NO_STRING, |text| self.intern(text))
    }

    pub fn lookup(&self, text: &str) -> Option<u32> {
        self.index.get(text).copied()
    }

    pub fn get(&self, idx: u32) -> Option<&str> {
        self.entries.get(idx as usize).map(String::as_str)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn intern_assigns_first_seen_indices() {
        let mut heap = StringHeap::new();
        assert_eq!(heap.intern("Main"), 0);
        assert_eq!(heap.intern("add"), 1);
        assert_eq!(heap.intern("Main"), 0);
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.get(1), Some("add"));
        assert_eq!(heap.get(2), None);
    }

    #[test]
    fn intern_opt_maps_none_to_sentinel() {
        let mut heap = StringHeap::new();
        assert_eq!(heap.intern_opt(None), NO_STRING);
        assert_eq!(heap.intern_opt(Some("x")), 0);
    }

    #[test]
    fn clear_resets_indices() {
        let mut heap = StringHeap::new();
        heap.intern("a");
        heap.intern("b");
        heap.clear();
        assert!(heap.is_empty());
        assert_eq!(heap.intern("b"), 0);
    }

    proptest! {
        #[test]
        fn identical_text_maps_to_identical_index(words in prop::collection::vec("[a-z]{0,6}", 0..40)) {
            let mut heap = StringHeap::new();
            let indices: Vec<u32> = words.iter().map(|w| heap.intern(w)).collect();
            for (i, a) in words.iter().enumerate() {
                for (j, b) in words.iter().enumerate() {
                    prop_assert_eq!(a == b, indices[i] == indices[j]);
                }
                prop_assert_eq!(heap.get(indices[i]), Some(a.as_str()));
            }
            let rebuilt = StringHeap::from_entries(heap.entries().to_vec());
            prop_assert_eq!(rebuilt, heap);
        }
    }
}
