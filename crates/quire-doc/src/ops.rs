//! Operations and their transform algebra.
//!
//! An [`Operation`] is one atomic tree edit. Operations carry everything needed
//! to undo them (removed subtrees, prior attribute values, a precomputed text
//! inverse) so inversion never consults the live tree.
//!
//! [`transform`] re-points an operation recorded before another one landed.
//! It is one-sided: the operation that already landed always
//! wins position ties.

use quire_types::{BlockId, CursorState, Path};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::delta::Delta;
use crate::record::NodeRecord;

/// One atomic tree edit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Operation {
    /// Insert subtrees starting at `location` (last segment is the first
    /// child's rank, or a slot key).
    InsertNodes {
        location: Path,
        children: Vec<NodeRecord>,
    },
    /// Remove `children.len()` contiguous subtrees starting at `location`.
    RemoveNodes {
        location: Path,
        children: Vec<NodeRecord>,
    },
    /// Set attributes on the node at `location`. A `null` value means absent.
    #[serde(rename_all = "camelCase")]
    UpdateAttributes {
        location: Path,
        attributes: Map<String, Value>,
        old_attributes: Map<String, Value>,
    },
    /// Apply `delta` to block `id`'s text run at `key`. `location` is
    /// informational; the block is found by id.
    TextEdit {
        location: Path,
        id: BlockId,
        key: String,
        delta: Delta,
        invert: Delta,
    },
}

impl Operation {
    pub fn location(&self) -> &Path {
        match self {
            Operation::InsertNodes { location, .. }
            | Operation::RemoveNodes { location, .. }
            | Operation::UpdateAttributes { location, .. }
            | Operation::TextEdit { location, .. } => location,
        }
    }

    fn location_mut(&mut self) -> &mut Path {
        match self {
            Operation::InsertNodes { location, .. }
            | Operation::RemoveNodes { location, .. }
            | Operation::UpdateAttributes { location, .. }
            | Operation::TextEdit { location, .. } => location,
        }
    }

    /// Kind tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::InsertNodes { .. } => "insert-nodes",
            Operation::RemoveNodes { .. } => "remove-nodes",
            Operation::UpdateAttributes { .. } => "update-attributes",
            Operation::TextEdit { .. } => "text-edit",
        }
    }

    /// The (block, key) a text edit targets.
    pub fn text_target(&self) -> Option<(&BlockId, &str)> {
        match self {
            Operation::TextEdit { id, key, .. } => Some((id, key.as_str())),
            _ => None,
        }
    }

    /// The operation that undoes this one.
    pub fn invert(&self) -> Operation {
        match self {
            Operation::InsertNodes { location, children } => Operation::RemoveNodes {
                location: location.clone(),
                children: children.clone(),
            },
            Operation::RemoveNodes { location, children } => Operation::InsertNodes {
                location: location.clone(),
                children: children.clone(),
            },
            Operation::UpdateAttributes {
                location,
                attributes,
                old_attributes,
            } => Operation::UpdateAttributes {
                location: location.clone(),
                attributes: old_attributes.clone(),
                old_attributes: attributes.clone(),
            },
            Operation::TextEdit {
                location,
                id,
                key,
                delta,
                invert,
            } => Operation::TextEdit {
                location: location.clone(),
                id: *id,
                key: key.clone(),
                delta: invert.clone(),
                invert: delta.clone(),
            },
        }
    }
}

/// Rewrite `b`, recorded before `a` landed, so it applies after `a`.
pub fn transform(a: &Operation, b: &Operation) -> Operation {
    transform_with(a, b, true)
}

/// Like [`transform`], but `b` keeps precedence on position ties. Used to walk
/// a landed operation forward past the operations of a changeset being
/// rebased, so both sides agree on who goes first.
pub fn transform_yielding(a: &Operation, b: &Operation) -> Operation {
    transform_with(a, b, false)
}

fn transform_with(a: &Operation, b: &Operation, a_first: bool) -> Operation {
    let mut out = b.clone();
    match a {
        Operation::InsertNodes { location, children } => {
            if !a_first && matches!(b, Operation::InsertNodes { location: l, .. } if l == location) {
                return out;
            }
            let moved = Path::transform(location, b.location(), children.len() as isize);
            *out.location_mut() = moved;
        }
        Operation::RemoveNodes { location, children } => {
            let moved = Path::transform(location, b.location(), -(children.len() as isize));
            *out.location_mut() = moved;
        }
        Operation::TextEdit {
            id: a_id,
            key: a_key,
            delta: a_delta,
            ..
        } => {
            let Operation::TextEdit {
                id,
                key,
                delta,
                invert,
                ..
            } = &mut out
            else {
                return out;
            };
            if id != a_id || key != a_key {
                return out;
            }
            // `invert` lives in post-`b` coordinates, so `a` is first
            // brought past `b` before transforming it.
            let a_after_b = delta.transform(a_delta, !a_first);
            *invert = a_after_b.transform(invert, a_first);
            *delta = a_delta.transform(delta, a_first);
        }
        Operation::UpdateAttributes { .. } => {}
    }
    out
}

/// Move `cursor` through `base`. Only text edits on a block the cursor sits in
/// have any effect.
pub fn transform_cursor(base: &Operation, cursor: &CursorState) -> CursorState {
    match base {
        Operation::TextEdit { id, delta, .. } if cursor.touches(id) => {
            cursor.map_offsets(id, |offset| delta.transform_position(offset, false))
        }
        _ => cursor.clone(),
    }
}

/// Inverse of applying `ops` in order: each op inverted, in reverse order.
pub fn invert_operations(ops: &[Operation]) -> Vec<Operation> {
    ops.iter().rev().map(Operation::invert).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_types::path;
    use serde_json::json;

    fn insert(location: Path, n: usize) -> Operation {
        Operation::InsertNodes {
            location,
            children: (0..n).map(|_| NodeRecord::block("paragraph")).collect(),
        }
    }

    fn remove(location: Path, n: usize) -> Operation {
        Operation::RemoveNodes {
            location,
            children: (0..n).map(|_| NodeRecord::block("paragraph")).collect(),
        }
    }

    fn text_edit(id: BlockId, delta: Delta, invert: Delta) -> Operation {
        Operation::TextEdit {
            location: path!["body", 0],
            id,
            key: "textContent".into(),
            delta,
            invert,
        }
    }

    #[test]
    fn test_insert_insert() {
        let out = transform(&insert(path![0, 1], 2), &insert(path![0, 1], 1));
        assert_eq!(out.location(), &path![0, 3]);
    }

    #[test]
    fn test_remove_remove() {
        let out = transform(&remove(path![0, 1], 2), &remove(path![0, 3], 1));
        assert_eq!(out.location(), &path![0, 1]);
    }

    #[test]
    fn test_disjoint_subtrees_untouched() {
        let b = insert(path![1, 0], 1);
        assert_eq!(transform(&insert(path![0, 4], 3), &b), b);
        assert_eq!(transform(&remove(path![0, 0], 1), &b), b);

        let update = Operation::UpdateAttributes {
            location: path!["body", 0],
            attributes: json!({"a": 1}).as_object().cloned().unwrap(),
            old_attributes: Map::new(),
        };
        assert_eq!(transform(&update, &b), b);
    }

    #[test]
    fn test_text_edits_on_same_run() {
        let id = BlockId::new();
        // base text "abcd"
        let a = text_edit(id, Delta::new().insert("X", None), Delta::new().delete(1));
        let b = text_edit(
            id,
            Delta::new().retain(2, None).insert("Y", None),
            Delta::new().retain(2, None).delete(1),
        );
        let Operation::TextEdit { delta, invert, .. } = transform(&a, &b) else {
            panic!("expected text edit");
        };
        assert_eq!(delta, Delta::new().retain(3, None).insert("Y", None));
        assert_eq!(invert, Delta::new().retain(3, None).delete(1));
    }

    #[test]
    fn test_text_edits_on_other_runs_untouched() {
        let a = text_edit(BlockId::new(), Delta::new().insert("X", None), Delta::new().delete(1));
        let b = text_edit(BlockId::new(), Delta::new().insert("Y", None), Delta::new().delete(1));
        assert_eq!(transform(&a, &b), b);
    }

    #[test]
    fn test_landed_edit_wins_ties() {
        let id = BlockId::new();
        let a = text_edit(id, Delta::new().insert("A", None), Delta::new().delete(1));
        let b = text_edit(id, Delta::new().insert("B", None), Delta::new().delete(1));
        let Operation::TextEdit { delta, .. } = transform(&a, &b) else {
            panic!("expected text edit");
        };
        assert_eq!(delta, Delta::new().retain(1, None).insert("B", None));
    }

    #[test]
    fn test_invert_swaps_payloads() {
        let op = insert(path!["body", 0], 2);
        assert!(matches!(op.invert(), Operation::RemoveNodes { .. }));
        assert_eq!(op.invert().invert(), op);

        let id = BlockId::new();
        let edit = text_edit(id, Delta::new().insert("a", None), Delta::new().delete(1));
        let Operation::TextEdit { delta, invert, .. } = edit.invert() else {
            panic!("expected text edit");
        };
        assert_eq!(delta, Delta::new().delete(1));
        assert_eq!(invert, Delta::new().insert("a", None));
    }

    #[test]
    fn test_invert_operations_reverses() {
        let ops = vec![insert(path!["body", 0], 1), remove(path!["body", 3], 1)];
        let inverted = invert_operations(&ops);
        assert_eq!(inverted[0].kind(), "insert-nodes");
        assert_eq!(inverted[0].location(), &path!["body", 3]);
        assert_eq!(inverted[1].kind(), "remove-nodes");
    }

    #[test]
    fn test_yielding_keeps_the_other_side_first() {
        let a = insert(path![0, 1], 2);
        let b = insert(path![0, 1], 1);
        assert_eq!(transform(&a, &b).location(), &path![0, 3]);
        assert_eq!(transform_yielding(&a, &b).location(), &path![0, 1]);

        let id = BlockId::new();
        let x = text_edit(id, Delta::new().insert("X", None), Delta::new().delete(1));
        let y = text_edit(id, Delta::new().insert("Y", None), Delta::new().delete(1));
        let Operation::TextEdit { delta, .. } = transform_yielding(&x, &y) else {
            panic!("expected text edit");
        };
        assert_eq!(delta, Delta::new().insert("Y", None));
        let Operation::TextEdit { delta, .. } = transform(&x, &y) else {
            panic!("expected text edit");
        };
        assert_eq!(delta, Delta::new().retain(1, None).insert("Y", None));
    }

    #[test]
    fn test_cursor_follows_insert() {
        let x = BlockId::new();
        let edit = text_edit(x, Delta::new().insert("ab", None), Delta::new().delete(2));
        let cursor = CursorState::collapsed(x, 5);
        assert_eq!(transform_cursor(&edit, &cursor), CursorState::collapsed(x, 7));

        let elsewhere = CursorState::collapsed(BlockId::new(), 5);
        assert_eq!(transform_cursor(&edit, &elsewhere), elsewhere);

        let range = CursorState::open(x, 1, x, 4);
        assert_eq!(transform_cursor(&edit, &range), CursorState::open(x, 3, x, 6));
    }

    #[test]
    fn test_serde_kind_tags() {
        let op = Operation::UpdateAttributes {
            location: path!["body", 1],
            attributes: json!({"level": 2}).as_object().cloned().unwrap(),
            old_attributes: json!({"level": null}).as_object().cloned().unwrap(),
        };
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["op"], "update-attributes");
        assert_eq!(json["location"], json!(["body", 1]));
        assert_eq!(json["oldAttributes"]["level"], Value::Null);
        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
