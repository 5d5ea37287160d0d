//! Rich-text runs.
//!
//! A [`TextRun`] is the value a text-bearing block stores under an attribute
//! (conventionally `textContent`). It wraps a document delta and caches its
//! length and plain-text rendering. Runs are replaced on every edit, never
//! changed in place, so a delta captured for transport or undo stays valid.

use std::fmt;

use serde_json::Value;

use crate::delta::{AttributeMap, Delta, DeltaOp, InsertValue};

/// Attribute key conventionally holding a block's text run.
pub const TEXT_CONTENT_KEY: &str = "textContent";

/// One position in a text run.
#[derive(Clone, Debug, PartialEq)]
pub enum TextChar {
    Char(char),
    Embed(Value),
}

/// An immutable run of rich text.
#[derive(Clone, Debug, Default)]
pub struct TextRun {
    delta: Delta,
    len: usize,
    text: String,
}

impl TextRun {
    /// An empty run.
    pub fn new() -> Self {
        Self::default()
    }

    /// A run of unformatted text.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::from_delta(Delta::new().insert(text, None))
    }

    /// A run holding `delta`, which should contain only inserts.
    pub fn from_delta(delta: Delta) -> Self {
        let len = delta.length();
        let text = delta.to_plain_text();
        Self { delta, len, text }
    }

    pub fn delta(&self) -> &Delta {
        &self.delta
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Plain text with embeds skipped.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The character or embed at `offset`.
    pub fn char_at(&self, offset: usize) -> Option<TextChar> {
        let mut start = 0;
        for op in self.delta.ops() {
            let len = op.len();
            if offset < start + len {
                return match op {
                    DeltaOp::Insert {
                        insert: InsertValue::Text(s),
                        ..
                    } => s.chars().nth(offset - start).map(TextChar::Char),
                    DeltaOp::Insert {
                        insert: InsertValue::Embed(v),
                        ..
                    } => Some(TextChar::Embed(v.clone())),
                    _ => None,
                };
            }
            start += len;
        }
        None
    }

    /// Formatting attributes in effect at `offset`.
    pub fn attributes_at(&self, offset: usize) -> Option<&AttributeMap> {
        let mut start = 0;
        for op in self.delta.ops() {
            let len = op.len();
            if offset < start + len {
                return op.attributes();
            }
            start += len;
        }
        None
    }

    /// The run that results from applying `change`.
    pub fn applied(&self, change: &Delta) -> TextRun {
        TextRun::from_delta(self.delta.compose(change))
    }

    /// Replace this run's content with the result of applying `change`.
    pub(crate) fn apply_delta(&mut self, change: &Delta) {
        *self = self.applied(change);
    }
}

impl PartialEq for TextRun {
    fn eq(&self, other: &Self) -> bool {
        self.delta == other.delta
    }
}

impl fmt::Display for TextRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for TextRun {
    fn from(text: &str) -> Self {
        Self::from_text(text)
    }
}
