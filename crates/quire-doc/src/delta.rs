//! Composable rich-text deltas.
//!
//! A [`Delta`] is an ordered list of retain / insert / delete instructions,
//! each optionally carrying formatting attributes. A delta made only of
//! inserts describes a document; any delta describes a change to one. The wire
//! shape is the familiar op list:
//!
//! ```text
//! [{"retain": 5}, {"insert": "abc", "attributes": {"bold": true}}, {"delete": 2}]
//! ```
//!
//! Lengths and offsets count characters; an embed counts as one.
//!
//! # Algebra
//!
//! - `a.compose(b)`: one delta with the effect of `a` followed by `b`.
//! - `a.transform(b, priority)`: rewrite `b` (concurrent with `a`) to apply
//!   after `a`. With `priority`, `a`'s inserts win ties at the same position.
//! - `a.transform_position(i, priority)`: where index `i` ends up after `a`.
//! - `a.invert(base)`: the delta undoing `a` when `a` was applied to `base`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Formatting attributes on an insert or retain. `null` values remove the key
/// when composed onto existing text.
pub type AttributeMap = Map<String, Value>;

/// Content of an insert: text, or an opaque embedded value of length one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InsertValue {
    Text(String),
    Embed(Value),
}

impl InsertValue {
    pub fn len(&self) -> usize {
        match self {
            InsertValue::Text(s) => s.chars().count(),
            InsertValue::Embed(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A single delta instruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeltaOp {
    Insert {
        insert: InsertValue,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<AttributeMap>,
    },
    Retain {
        retain: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<AttributeMap>,
    },
    Delete {
        delete: usize,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum OpKind {
    Insert,
    Retain,
    Delete,
}

impl DeltaOp {
    pub fn len(&self) -> usize {
        match self {
            DeltaOp::Insert { insert, .. } => insert.len(),
            DeltaOp::Retain { retain, .. } => *retain,
            DeltaOp::Delete { delete } => *delete,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Attributes, with an empty map treated as absent.
    pub fn attributes(&self) -> Option<&AttributeMap> {
        match self {
            DeltaOp::Insert { attributes, .. } | DeltaOp::Retain { attributes, .. } => {
                attributes.as_ref().filter(|a| !a.is_empty())
            }
            DeltaOp::Delete { .. } => None,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, DeltaOp::Insert { .. })
    }

    pub fn is_retain(&self) -> bool {
        matches!(self, DeltaOp::Retain { .. })
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, DeltaOp::Delete { .. })
    }

    fn kind(&self) -> OpKind {
        match self {
            DeltaOp::Insert { .. } => OpKind::Insert,
            DeltaOp::Retain { .. } => OpKind::Retain,
            DeltaOp::Delete { .. } => OpKind::Delete,
        }
    }
}

fn non_empty(attributes: Option<AttributeMap>) -> Option<AttributeMap> {
    attributes.filter(|a| !a.is_empty())
}

// ── Attribute algebra ───────────────────────────────────────────────────────

/// Attributes of `b` layered over `a`. Null values in `b` are dropped unless
/// `keep_null` (composing onto a retain, where the null must survive to clear
/// the underlying format).
pub fn compose_attributes(
    a: Option<&AttributeMap>,
    b: Option<&AttributeMap>,
    keep_null: bool,
) -> Option<AttributeMap> {
    let mut attributes = b.cloned().unwrap_or_default();
    if !keep_null {
        attributes.retain(|_, v| !v.is_null());
    }
    if let Some(a) = a {
        for (key, value) in a {
            if !b.is_some_and(|b| b.contains_key(key)) {
                attributes.insert(key.clone(), value.clone());
            }
        }
    }
    non_empty(Some(attributes))
}

/// `b`'s attributes as seen after concurrent `a`. With `priority`, keys that
/// `a` already set are dropped from `b`.
pub fn transform_attributes(
    a: Option<&AttributeMap>,
    b: Option<&AttributeMap>,
    priority: bool,
) -> Option<AttributeMap> {
    let Some(a) = a else {
        return b.cloned();
    };
    let b = b?;
    if !priority {
        return Some(b.clone());
    }
    let attributes: AttributeMap = b
        .iter()
        .filter(|(key, _)| !a.contains_key(*key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    non_empty(Some(attributes))
}

/// Attributes that undo applying `attr` on top of `base`.
pub fn invert_attributes(attr: Option<&AttributeMap>, base: Option<&AttributeMap>) -> Option<AttributeMap> {
    let empty = AttributeMap::new();
    let attr = attr.unwrap_or(&empty);
    let base = base.unwrap_or(&empty);
    let mut memo = AttributeMap::new();
    for (key, value) in base {
        if attr.get(key) != Some(value) && attr.contains_key(key) {
            memo.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in attr {
        if base.get(key) != Some(value) && !base.contains_key(key) {
            memo.insert(key.clone(), Value::Null);
        }
    }
    non_empty(Some(memo))
}

// ── Iterator ────────────────────────────────────────────────────────────────

/// Walks a delta's ops, handing out pieces of a requested length.
///
/// Past the end it yields an endless retain, which is what lets two deltas of
/// different lengths be zipped together.
struct OpIter<'a> {
    ops: &'a [DeltaOp],
    index: usize,
    offset: usize,
}

impl<'a> OpIter<'a> {
    fn new(ops: &'a [DeltaOp]) -> Self {
        Self { ops, index: 0, offset: 0 }
    }

    fn has_next(&self) -> bool {
        self.peek_length() < usize::MAX
    }

    fn peek(&self) -> Option<&'a DeltaOp> {
        self.ops.get(self.index)
    }

    fn peek_length(&self) -> usize {
        match self.ops.get(self.index) {
            Some(op) => op.len() - self.offset,
            None => usize::MAX,
        }
    }

    fn peek_kind(&self) -> OpKind {
        self.peek().map(DeltaOp::kind).unwrap_or(OpKind::Retain)
    }

    fn next(&mut self, length: usize) -> DeltaOp {
        let Some(op) = self.ops.get(self.index) else {
            return DeltaOp::Retain {
                retain: usize::MAX,
                attributes: None,
            };
        };
        let offset = self.offset;
        let remaining = op.len() - offset;
        let length = if length >= remaining {
            self.index += 1;
            self.offset = 0;
            remaining
        } else {
            self.offset += length;
            length
        };

        match op {
            DeltaOp::Delete { .. } => DeltaOp::Delete { delete: length },
            DeltaOp::Retain { attributes, .. } => DeltaOp::Retain {
                retain: length,
                attributes: attributes.clone(),
            },
            DeltaOp::Insert {
                insert: InsertValue::Text(text),
                attributes,
            } => DeltaOp::Insert {
                insert: InsertValue::Text(text.chars().skip(offset).take(length).collect()),
                attributes: attributes.clone(),
            },
            DeltaOp::Insert { .. } => op.clone(),
        }
    }

    fn rest(&mut self) -> Vec<DeltaOp> {
        if !self.has_next() {
            return Vec::new();
        }
        if self.offset == 0 {
            return self.ops[self.index..].to_vec();
        }
        let head = self.next(usize::MAX);
        let mut rest = vec![head];
        rest.extend_from_slice(&self.ops[self.index..]);
        rest
    }
}

// ── Delta ───────────────────────────────────────────────────────────────────

/// An ordered list of delta instructions. See the module docs.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Delta {
    ops: Vec<DeltaOp>,
}

impl Delta {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Build from ops as given, without merging neighbours.
    pub fn from_ops(ops: Vec<DeltaOp>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[DeltaOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<DeltaOp> {
        self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    // ── Builders ────────────────────────────────────────────────────────

    pub fn insert(mut self, text: impl Into<String>, attributes: Option<AttributeMap>) -> Self {
        self.push_insert(text, attributes);
        self
    }

    pub fn insert_embed(mut self, value: Value, attributes: Option<AttributeMap>) -> Self {
        self.push(DeltaOp::Insert {
            insert: InsertValue::Embed(value),
            attributes: non_empty(attributes),
        });
        self
    }

    pub fn retain(mut self, length: usize, attributes: Option<AttributeMap>) -> Self {
        self.push_retain(length, attributes);
        self
    }

    pub fn delete(mut self, length: usize) -> Self {
        self.push_delete(length);
        self
    }

    pub fn push_insert(&mut self, text: impl Into<String>, attributes: Option<AttributeMap>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        self.push(DeltaOp::Insert {
            insert: InsertValue::Text(text),
            attributes: non_empty(attributes),
        });
    }

    pub fn push_retain(&mut self, length: usize, attributes: Option<AttributeMap>) {
        if length == 0 {
            return;
        }
        self.push(DeltaOp::Retain {
            retain: length,
            attributes: non_empty(attributes),
        });
    }

    pub fn push_delete(&mut self, length: usize) {
        if length == 0 {
            return;
        }
        self.push(DeltaOp::Delete { delete: length });
    }

    /// Append an op, merging it into its neighbour where possible.
    ///
    /// Inserts are kept ahead of a trailing delete so that equivalent deltas
    /// have one canonical form.
    pub fn push(&mut self, new_op: DeltaOp) {
        let mut index = self.ops.len();

        if let Some(last) = self.ops.last_mut() {
            if let (DeltaOp::Delete { delete: n }, DeltaOp::Delete { delete: m }) = (&mut *last, &new_op) {
                *n += m;
                return;
            }
            if last.is_delete() && new_op.is_insert() {
                index -= 1;
                if index == 0 {
                    self.ops.insert(0, new_op);
                    return;
                }
            }
        }

        if index > 0 {
            let prev = &mut self.ops[index - 1];
            if prev.attributes() == new_op.attributes() {
                match (prev, &new_op) {
                    (
                        DeltaOp::Insert {
                            insert: InsertValue::Text(a),
                            ..
                        },
                        DeltaOp::Insert {
                            insert: InsertValue::Text(b),
                            ..
                        },
                    ) => {
                        a.push_str(b);
                        return;
                    }
                    (DeltaOp::Retain { retain: a, .. }, DeltaOp::Retain { retain: b, .. }) => {
                        *a = a.saturating_add(*b);
                        return;
                    }
                    _ => {}
                }
            }
        }

        if index == self.ops.len() {
            self.ops.push(new_op);
        } else {
            self.ops.insert(index, new_op);
        }
    }

    /// Drop a trailing plain retain, which has no effect.
    pub fn chop(mut self) -> Self {
        if matches!(self.ops.last(), Some(op @ DeltaOp::Retain { .. }) if op.attributes().is_none()) {
            self.ops.pop();
        }
        self
    }

    // ── Measures ────────────────────────────────────────────────────────

    /// Total length of all ops.
    pub fn length(&self) -> usize {
        self.ops.iter().map(DeltaOp::len).sum()
    }

    /// How much longer the document gets when this delta is applied.
    pub fn change_length(&self) -> isize {
        self.ops
            .iter()
            .map(|op| match op {
                DeltaOp::Insert { .. } => op.len() as isize,
                DeltaOp::Delete { delete } => -(*delete as isize),
                DeltaOp::Retain { .. } => 0,
            })
            .sum()
    }

    /// Length of the document this delta applies to, as far as its retains
    /// and deletes reach.
    pub fn base_length(&self) -> usize {
        self.ops.iter().filter(|op| !op.is_insert()).map(DeltaOp::len).sum()
    }

    /// True for a pure document (inserts only).
    pub fn is_document(&self) -> bool {
        self.ops.iter().all(DeltaOp::is_insert)
    }

    /// The ops covering `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> Delta {
        let mut ops = Vec::new();
        let mut iter = OpIter::new(&self.ops);
        let mut index = 0;
        while index < end && iter.has_next() {
            let next = if index < start {
                iter.next(start - index)
            } else {
                let op = iter.next(end - index);
                ops.push(op.clone());
                op
            };
            index += next.len();
        }
        Delta { ops }
    }

    pub fn concat(&self, other: &Delta) -> Delta {
        let mut delta = self.clone();
        if let Some((first, rest)) = other.ops.split_first() {
            delta.push(first.clone());
            delta.ops.extend_from_slice(rest);
        }
        delta
    }

    // ── Algebra ─────────────────────────────────────────────────────────

    /// A single delta equivalent to applying `self` then `other`.
    pub fn compose(&self, other: &Delta) -> Delta {
        let mut this_iter = OpIter::new(&self.ops);
        let mut other_iter = OpIter::new(&other.ops);
        let mut ops = Vec::new();

        // Fast path: a leading plain retain in `other` passes our leading
        // inserts through untouched.
        if let Some(DeltaOp::Retain {
            retain,
            attributes: None,
        }) = other_iter.peek()
        {
            let mut first_left = *retain;
            while this_iter.peek_kind() == OpKind::Insert && this_iter.peek_length() <= first_left {
                first_left -= this_iter.peek_length();
                ops.push(this_iter.next(usize::MAX));
            }
            if retain - first_left > 0 {
                other_iter.next(retain - first_left);
            }
        }

        let mut delta = Delta { ops };
        while this_iter.has_next() || other_iter.has_next() {
            if other_iter.peek_kind() == OpKind::Insert {
                delta.push(other_iter.next(usize::MAX));
            } else if this_iter.peek_kind() == OpKind::Delete {
                delta.push(this_iter.next(usize::MAX));
            } else {
                let length = this_iter.peek_length().min(other_iter.peek_length());
                let this_op = this_iter.next(length);
                let other_op = other_iter.next(length);
                match other_op {
                    DeltaOp::Retain { ref attributes, .. } => {
                        let composed = compose_attributes(
                            this_op.attributes(),
                            attributes.as_ref().filter(|a| !a.is_empty()),
                            this_op.is_retain(),
                        );
                        let new_op = match this_op {
                            DeltaOp::Insert { insert, .. } => DeltaOp::Insert {
                                insert,
                                attributes: composed,
                            },
                            _ => DeltaOp::Retain {
                                retain: length,
                                attributes: composed,
                            },
                        };
                        delta.push(new_op.clone());

                        // Nothing left to change: the rest of `self` is copied.
                        if !other_iter.has_next() && delta.ops.last() == Some(&new_op) {
                            let rest = Delta {
                                ops: this_iter.rest(),
                            };
                            return delta.concat(&rest).chop();
                        }
                    }
                    DeltaOp::Delete { .. } if this_op.is_retain() => delta.push(other_op),
                    _ => {}
                }
            }
        }
        delta.chop()
    }

    /// Rewrite `other`, made concurrently with `self`, to apply after `self`.
    ///
    /// `priority` means `self` happened first: its inserts win ties at the
    /// same position and its attributes win on overlap.
    pub fn transform(&self, other: &Delta, priority: bool) -> Delta {
        let mut this_iter = OpIter::new(&self.ops);
        let mut other_iter = OpIter::new(&other.ops);
        let mut delta = Delta::new();

        while this_iter.has_next() || other_iter.has_next() {
            if this_iter.peek_kind() == OpKind::Insert
                && (priority || other_iter.peek_kind() != OpKind::Insert)
            {
                let inserted = this_iter.next(usize::MAX);
                delta.push_retain(inserted.len(), None);
            } else if other_iter.peek_kind() == OpKind::Insert {
                delta.push(other_iter.next(usize::MAX));
            } else {
                let length = this_iter.peek_length().min(other_iter.peek_length());
                let this_op = this_iter.next(length);
                let other_op = other_iter.next(length);
                if this_op.is_delete() {
                    continue;
                }
                if other_op.is_delete() {
                    delta.push(other_op);
                } else {
                    let attributes =
                        transform_attributes(this_op.attributes(), other_op.attributes(), priority);
                    delta.push_retain(length, attributes);
                }
            }
        }
        delta.chop()
    }

    /// Where `index` lands once `self` is applied.
    ///
    /// Without `priority`, an insert exactly at `index` pushes it right.
    pub fn transform_position(&self, mut index: usize, priority: bool) -> usize {
        let mut iter = OpIter::new(&self.ops);
        let mut offset = 0;
        while iter.has_next() && offset <= index {
            let length = iter.peek_length();
            let kind = iter.peek_kind();
            iter.next(usize::MAX);
            match kind {
                OpKind::Delete => {
                    index -= length.min(index - offset);
                    continue;
                }
                OpKind::Insert if offset < index || !priority => index += length,
                _ => {}
            }
            offset += length;
        }
        index
    }

    /// The delta that undoes `self` when `self` was applied to `base`.
    pub fn invert(&self, base: &Delta) -> Delta {
        let mut inverted = Delta::new();
        let mut base_index = 0;
        for op in &self.ops {
            match op {
                DeltaOp::Insert { .. } => inverted.push_delete(op.len()),
                DeltaOp::Retain { retain, .. } if op.attributes().is_none() => {
                    inverted.push_retain(*retain, None);
                    base_index += retain;
                }
                _ => {
                    let length = op.len();
                    let slice = base.slice(base_index, base_index + length);
                    for base_op in slice.ops {
                        if op.is_delete() {
                            inverted.push(base_op);
                        } else {
                            let attributes = invert_attributes(op.attributes(), base_op.attributes());
                            inverted.push_retain(base_op.len(), attributes);
                        }
                    }
                    base_index += length;
                }
            }
        }
        inverted.chop()
    }

    /// Concatenated text of all inserts; embeds are skipped.
    pub fn to_plain_text(&self) -> String {
        self.ops
            .iter()
            .filter_map(|op| match op {
                DeltaOp::Insert {
                    insert: InsertValue::Text(s),
                    ..
                } => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl From<Vec<DeltaOp>> for Delta {
    fn from(ops: Vec<DeltaOp>) -> Self {
        Self::from_ops(ops)
    }
}
