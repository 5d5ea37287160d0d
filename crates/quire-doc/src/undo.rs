//! Bounded undo/redo stacks.
//!
//! Entries are reverting changesets, ready to apply against the current
//! document once restamped with the next version.

use std::collections::VecDeque;

use tracing::warn;

use crate::changeset::FinalizedChangeset;
use crate::ops::{Operation, transform, transform_cursor};

/// Most recent changesets first out; the oldest are dropped past `max_depth`.
#[derive(Clone, Debug)]
pub struct UndoStack {
    entries: VecDeque<FinalizedChangeset>,
    max_depth: usize,
}

impl UndoStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_depth,
        }
    }

    pub fn push(&mut self, changeset: FinalizedChangeset) {
        if self.max_depth == 0 {
            return;
        }
        self.entries.push_back(changeset);
        while self.entries.len() > self.max_depth {
            if let Some(dropped) = self.entries.pop_front() {
                warn!(
                    "undo stack exceeded {} entries, dropping version {}",
                    self.max_depth,
                    dropped.version
                );
            }
        }
    }

    /// Re-point every entry past operations that landed without being
    /// recorded, such as a remote edit.
    pub fn transform_past(&mut self, landed: &[Operation]) {
        if landed.is_empty() {
            return;
        }
        for entry in &mut self.entries {
            for a in landed {
                entry.operations = entry.operations.iter().map(|b| transform(a, b)).collect();
                entry.before_cursor = entry.before_cursor.take().map(|c| transform_cursor(a, &c));
                entry.after_cursor = entry.after_cursor.take().map(|c| transform_cursor(a, &c));
            }
        }
    }

    pub fn pop(&mut self) -> Option<FinalizedChangeset> {
        self.entries.pop_back()
    }

    pub fn peek(&self) -> Option<&FinalizedChangeset> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
