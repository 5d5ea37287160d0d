//! Changeset builder.
//!
//! A [`Changeset`] batches operations against a snapshot of a
//! [`DocumentHost`]. Calls take handles and paths as they are in the snapshot;
//! each new operation is then re-pointed past the operations already buffered,
//! so later calls see the effects of earlier ones. Consecutive text edits on
//! the same run are merged into one operation.
//!
//! [`Changeset::finalize`] seals the buffer into a [`FinalizedChangeset`], the
//! unit that is applied, recorded in history, rebased and sent over the wire.

use quire_types::{CursorState, Path, PathSegment, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumString};

use crate::delta::{AttributeMap, Delta};
use crate::ops::{Operation, transform};
use crate::record::{NodeRecord, attr_from_value, text_run_to_value};
use crate::text::TextRun;
use crate::tree::{AttrValue, DocTree, NodeHandle, RESERVED_ATTRIBUTES, TITLE_SLOT};
use crate::{DocError, Result};

/// What a changeset is built against.
pub trait DocumentHost {
    fn user_id(&self) -> UserId;

    /// Last applied version; new changesets are stamped one past it.
    fn applied_version(&self) -> u64;

    fn cursor(&self) -> Option<CursorState>;

    fn tree(&self) -> &DocTree;

    /// The document root.
    fn root(&self) -> NodeHandle;

    fn path_of(&self, node: NodeHandle) -> Result<Path> {
        self.tree().path_of(node)
    }
}

/// Which history stack captures an applied changeset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Record {
    #[default]
    Undo,
    Redo,
    None,
}

/// How a changeset is applied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApplyOptions {
    /// False when only bookkeeping changed and the view need not re-render.
    pub update_view: bool,
    /// Leave the cursor untouched.
    pub ignore_cursor: bool,
    pub record: Record,
    /// Put the cursor back to the changeset's before-cursor after applying.
    pub refresh_cursor: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            update_view: true,
            ignore_cursor: false,
            record: Record::Undo,
            refresh_cursor: false,
        }
    }
}

impl ApplyOptions {
    pub fn with_update_view(mut self, update_view: bool) -> Self {
        self.update_view = update_view;
        self
    }

    pub fn with_ignore_cursor(mut self, ignore_cursor: bool) -> Self {
        self.ignore_cursor = ignore_cursor;
        self
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.record = record;
        self
    }

    pub fn with_refresh_cursor(mut self, refresh_cursor: bool) -> Self {
        self.refresh_cursor = refresh_cursor;
        self
    }
}

/// A sealed, versioned batch of operations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedChangeset {
    pub user_id: UserId,
    /// The version this changeset becomes once applied.
    pub version: u64,
    pub operations: Vec<Operation>,
    pub before_cursor: Option<CursorState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after_cursor: Option<CursorState>,
    #[serde(default)]
    pub force_update: bool,
    #[serde(default)]
    pub options: ApplyOptions,
}

impl FinalizedChangeset {
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// In-progress batch of operations against a host snapshot.
pub struct Changeset<'a, H: DocumentHost + ?Sized> {
    host: &'a H,
    user_id: UserId,
    version: u64,
    before_cursor: Option<CursorState>,
    after_cursor: Option<CursorState>,
    force_update: bool,
    operations: Vec<Operation>,
    /// Buffered attribute updates as (index into `operations`, target node).
    attribute_targets: Vec<(usize, NodeHandle)>,
}

impl<'a, H: DocumentHost + ?Sized> Changeset<'a, H> {
    pub fn new(host: &'a H) -> Self {
        Self {
            host,
            user_id: host.user_id(),
            version: host.applied_version() + 1,
            before_cursor: host.cursor(),
            after_cursor: None,
            force_update: false,
            operations: Vec::new(),
            attribute_targets: Vec::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn set_after_cursor(&mut self, cursor: CursorState) {
        self.after_cursor = Some(cursor);
    }

    /// Ask the view to re-render even if nothing visible changed.
    pub fn force_update(&mut self) {
        self.force_update = true;
    }

    // =========================================================================
    // Buffer
    // =========================================================================

    /// Buffer an operation given in snapshot coordinates.
    pub fn push(&mut self, op: Operation) {
        if self.merge_text_edit(&op) {
            return;
        }
        let op = self.past_buffered(op);
        self.operations.push(op);
    }

    /// Coalesce with the last buffered op if both edit the same text run.
    fn merge_text_edit(&mut self, op: &Operation) -> bool {
        let Operation::TextEdit {
            id,
            key,
            delta,
            invert,
            ..
        } = op
        else {
            return false;
        };
        let Some(Operation::TextEdit {
            id: last_id,
            key: last_key,
            delta: last_delta,
            invert: last_invert,
            ..
        }) = self.operations.last_mut()
        else {
            return false;
        };
        if last_id != id || last_key != key {
            return false;
        }
        *last_delta = last_delta.compose(delta);
        *last_invert = invert.compose(last_invert);
        true
    }

    /// Re-point `op` past every buffered operation. Text edits are already
    /// sequential within one changeset, so they are not transformed against
    /// each other.
    fn past_buffered(&self, op: Operation) -> Operation {
        self.operations.iter().fold(op, |op, buffered| {
            if op.text_target().is_some() && buffered.text_target().is_some() {
                op
            } else {
                transform(buffered, &op)
            }
        })
    }

    fn path_past_buffered(&self, path: Path) -> Path {
        self.operations.iter().fold(path, |path, buffered| match buffered {
            Operation::InsertNodes { location, children } => {
                Path::transform(location, &path, children.len() as isize)
            }
            Operation::RemoveNodes { location, children } => {
                Path::transform(location, &path, -(children.len() as isize))
            }
            _ => path,
        })
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    /// Set several attributes on `node`; `null` removes a key.
    pub fn update_attributes(&mut self, node: NodeHandle, attributes: Map<String, Value>) -> Result<()> {
        let host = self.host;
        let tree = host.tree();
        for (key, value) in &attributes {
            if RESERVED_ATTRIBUTES.contains(&key.as_str()) {
                return Err(DocError::ReservedAttribute(key.clone()));
            }
            if matches!(tree.attribute(node, key), Some(AttrValue::Node(_))) {
                return Err(DocError::SlotAttribute(key.clone()));
            }
            if !value.is_null() {
                attr_from_value(key, value)?;
            }
        }

        let location = self.path_past_buffered(self.host.path_of(node)?);
        let mut old_attributes = Map::new();
        for key in attributes.keys() {
            old_attributes.insert(key.clone(), self.pending_value(node, key)?);
        }

        self.attribute_targets.push((self.operations.len(), node));
        self.operations.push(Operation::UpdateAttributes {
            location,
            attributes,
            old_attributes,
        });
        Ok(())
    }

    /// Latest buffered assignment to `key` on `node`, with its op index.
    fn buffered_attribute(&self, node: NodeHandle, key: &str) -> Option<(usize, &Value)> {
        self.attribute_targets.iter().rev().find_map(|&(index, target)| {
            if target != node {
                return None;
            }
            match &self.operations[index] {
                Operation::UpdateAttributes { attributes, .. } => attributes.get(key).map(|v| (index, v)),
                _ => None,
            }
        })
    }

    /// Value of `key` on `node` as this changeset has already left it;
    /// `null` when absent.
    fn pending_value(&self, node: NodeHandle, key: &str) -> Result<Value> {
        let tree = self.host.tree();
        let (base, from) = match self.buffered_attribute(node, key) {
            Some((index, value)) => (value.clone(), index + 1),
            None => match tree.attribute(node, key) {
                Some(value) => (tree.attr_to_value(value)?, 0),
                None => (Value::Null, 0),
            },
        };
        let Some(id) = tree.block_id(node) else {
            return Ok(base);
        };
        let mut edits = self.operations[from..]
            .iter()
            .filter_map(|op| match op {
                Operation::TextEdit {
                    id: op_id,
                    key: op_key,
                    delta,
                    ..
                } if *op_id == id && op_key == key => Some(delta),
                _ => None,
            })
            .peekable();
        if edits.peek().is_none() {
            return Ok(base);
        }
        let AttrValue::Text(run) = attr_from_value(key, &base)? else {
            return Err(DocError::TextRunMissing { id, key: key.to_string() });
        };
        let pending = edits.fold(run.delta().clone(), |doc, delta| doc.compose(delta));
        Ok(text_run_to_value(&TextRun::from_delta(pending)))
    }

    pub fn set_attribute(&mut self, node: NodeHandle, key: impl Into<String>, value: Value) -> Result<()> {
        let mut attributes = Map::new();
        attributes.insert(key.into(), value);
        self.update_attributes(node, attributes)
    }

    pub fn remove_attribute(&mut self, node: NodeHandle, key: impl Into<String>) -> Result<()> {
        self.set_attribute(node, key, Value::Null)
    }

    // =========================================================================
    // Structure
    // =========================================================================

    /// Insert subtrees under `parent` starting at rank `index`.
    pub fn insert_children_at(&mut self, parent: NodeHandle, index: usize, children: Vec<NodeRecord>) -> Result<()> {
        if children.is_empty() {
            return Ok(());
        }
        if let Some(doc) = children.iter().find(|c| c.is_document()) {
            return Err(DocError::InvalidRecord(format!("cannot insert a {} as a child", doc.node_type)));
        }
        let len = self.host.tree().child_count(parent);
        if index > len {
            return Err(DocError::IndexOutOfBounds { index, len });
        }
        let location = self.host.path_of(parent)?.child(index);
        self.push(Operation::InsertNodes { location, children });
        Ok(())
    }

    pub fn append_child(&mut self, parent: NodeHandle, child: NodeRecord) -> Result<()> {
        let index = self.host.tree().child_count(parent);
        self.insert_children_at(parent, index, vec![child])
    }

    /// Remove `count` children of `parent` starting at rank `index`.
    pub fn remove_children_at(&mut self, parent: NodeHandle, index: usize, count: usize) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let host = self.host;
        let tree = host.tree();
        let len = tree.child_count(parent);
        if index.checked_add(count).is_none_or(|end| end > len) {
            return Err(DocError::IndexOutOfBounds { index, len });
        }
        let children = tree
            .children(parent)
            .into_iter()
            .skip(index)
            .take(count)
            .map(|child| self.removal_record(child))
            .collect::<Result<Vec<_>>>()?;
        let location = self.host.path_of(parent)?.child(index);
        self.push(Operation::RemoveNodes { location, children });
        Ok(())
    }

    /// Remove a single node, positional or slot child.
    pub fn remove_node(&mut self, node: NodeHandle) -> Result<()> {
        let location = self.host.path_of(node)?;
        if location.is_empty() {
            return Err(DocError::InvalidLocation {
                path: location,
                reason: "cannot remove the document root".to_string(),
            });
        }
        let record = self.removal_record(node)?;
        self.push(Operation::RemoveNodes {
            location,
            children: vec![record],
        });
        Ok(())
    }

    /// Record of `node` as this changeset leaves it before removing it.
    ///
    /// Buffered attribute and text changes anywhere in the subtree are folded
    /// in. Structural edits buffered inside the subtree are not, so they are
    /// rejected.
    fn removal_record(&self, node: NodeHandle) -> Result<NodeRecord> {
        let location = self.path_past_buffered(self.host.path_of(node)?);
        let nested = self.operations.iter().find(|op| {
            matches!(op, Operation::InsertNodes { .. } | Operation::RemoveNodes { .. })
                && location.is_ancestor_of(op.location())
        });
        if let Some(op) = nested {
            return Err(DocError::InvalidLocation {
                path: op.location().clone(),
                reason: format!("{location} is removed after a structural edit inside it"),
            });
        }
        let mut record = self.host.tree().to_record(node)?;
        self.overlay_pending(node, &mut record)?;
        Ok(record)
    }

    fn overlay_pending(&self, node: NodeHandle, record: &mut NodeRecord) -> Result<()> {
        let tree = self.host.tree();
        for key in self.touched_keys(node) {
            match self.pending_value(node, &key)? {
                Value::Null => {
                    record.attributes.remove(&key);
                }
                value => {
                    record.attributes.insert(key, value);
                }
            }
        }
        for (key, value) in tree.attributes(node)? {
            let AttrValue::Node(slot_child) = value else {
                continue;
            };
            if let Some(slot_value) = record.attributes.get_mut(key) {
                let mut slot_record = NodeRecord::from_value(slot_value.take())?;
                self.overlay_pending(*slot_child, &mut slot_record)?;
                *slot_value = slot_record.to_value()?;
            }
        }
        for (child, child_record) in tree.children(node).into_iter().zip(record.children.iter_mut()) {
            self.overlay_pending(child, child_record)?;
        }
        Ok(())
    }

    /// Attribute keys on `node` that buffered updates or text edits touch.
    fn touched_keys(&self, node: NodeHandle) -> Vec<String> {
        let id = self.host.tree().block_id(node);
        let mut keys: Vec<String> = self
            .attribute_targets
            .iter()
            .filter(|(_, target)| *target == node)
            .filter_map(|&(index, _)| match &self.operations[index] {
                Operation::UpdateAttributes { attributes, .. } => Some(attributes.keys().cloned()),
                _ => None,
            })
            .flatten()
            .chain(self.operations.iter().filter_map(|op| match op.text_target() {
                Some((op_id, key)) if Some(*op_id) == id => Some(key.to_string()),
                _ => None,
            }))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    /// Replace (or clear, with `None`) the document title.
    pub fn set_title(&mut self, title: Option<NodeRecord>) -> Result<()> {
        if title.as_ref().is_some_and(NodeRecord::is_document) {
            return Err(DocError::InvalidRecord("a document cannot be a title".to_string()));
        }
        let location = Path::new(vec![PathSegment::Key(TITLE_SLOT.to_string())]);
        let current = self
            .operations
            .iter()
            .rev()
            .find_map(|op| match op {
                Operation::InsertNodes { location: l, children } if *l == location => Some(children.first().cloned()),
                Operation::RemoveNodes { location: l, .. } if *l == location => Some(None),
                _ => None,
            })
            .map(Ok)
            .unwrap_or_else(|| {
                let tree = self.host.tree();
                tree.slot(self.host.root(), TITLE_SLOT)
                    .map(|h| self.removal_record(h))
                    .transpose()
            })?;

        if let Some(old) = current {
            self.push(Operation::RemoveNodes {
                location: location.clone(),
                children: vec![old],
            });
        }
        if let Some(new) = title {
            self.push(Operation::InsertNodes {
                location,
                children: vec![new],
            });
        }
        Ok(())
    }

    // =========================================================================
    // Text
    // =========================================================================

    /// The run at (`node`, `key`) as it stands after buffered updates and
    /// edits.
    fn pending_text(&self, node: NodeHandle, key: &str) -> Result<TextRun> {
        let tree = self.host.tree();
        let id = tree.block_id(node).ok_or_else(|| DocError::InvalidLocation {
            path: tree.path_of(node).unwrap_or_default(),
            reason: "text edits target blocks".to_string(),
        })?;
        let missing = || DocError::TextRunMissing { id, key: key.to_string() };
        let value = self.pending_value(node, key)?;
        if value.is_null() {
            return Err(missing());
        }
        match attr_from_value(key, &value) {
            Ok(AttrValue::Text(run)) => Ok(run),
            _ => Err(missing()),
        }
    }

    /// Apply `delta` to block `node`'s text run at `key`. The delta is written
    /// against the run as this changeset has already left it.
    pub fn text_edit(&mut self, node: NodeHandle, key: impl Into<String>, delta: Delta) -> Result<()> {
        let key = key.into();
        let current = self.pending_text(node, &key)?;
        let id = self.host.tree().block_id(node).ok_or(DocError::UnknownNode(node))?;
        let invert = delta.invert(current.delta());
        let location = self.host.path_of(node)?;
        self.push(Operation::TextEdit {
            location,
            id,
            key,
            delta,
            invert,
        });
        Ok(())
    }

    /// Insert `text` at the end of the run.
    pub fn text_append(
        &mut self,
        node: NodeHandle,
        key: impl Into<String>,
        text: impl Into<String>,
        attributes: Option<AttributeMap>,
    ) -> Result<()> {
        let key = key.into();
        let len = self.pending_text(node, &key)?.len();
        let delta = Delta::new().retain(len, None).insert(text, attributes);
        self.text_edit(node, key, delta)
    }

    // =========================================================================
    // Seal
    // =========================================================================

    /// Seal the buffer. The builder is left empty.
    pub fn finalize(&mut self, options: ApplyOptions) -> FinalizedChangeset {
        self.attribute_targets.clear();
        FinalizedChangeset {
            user_id: self.user_id,
            version: self.version,
            operations: std::mem::take(&mut self.operations),
            before_cursor: self.before_cursor.clone(),
            after_cursor: self.after_cursor.take(),
            force_update: std::mem::take(&mut self.force_update),
            options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::BODY_SLOT;
    use quire_types::{BlockId, path};
    use serde_json::json;

    struct Snapshot {
        tree: DocTree,
        root: NodeHandle,
        blocks: Vec<NodeHandle>,
    }

    impl DocumentHost for Snapshot {
        fn user_id(&self) -> UserId {
            UserId::local()
        }
        fn applied_version(&self) -> u64 {
            4
        }
        fn cursor(&self) -> Option<CursorState> {
            None
        }
        fn tree(&self) -> &DocTree {
            &self.tree
        }
        fn root(&self) -> NodeHandle {
            self.root
        }
    }

    fn snapshot() -> Snapshot {
        let mut tree = DocTree::new();
        let root = tree.create_document();
        let body = tree.slot(root, BODY_SLOT).unwrap();
        let blocks = ["one", "two", "three"]
            .iter()
            .map(|text| {
                let b = tree.create_block("paragraph");
                tree.set_attribute(b, "textContent", TextRun::from_text(*text).into()).unwrap();
                tree.append_child(body, b).unwrap();
                b
            })
            .collect();
        Snapshot { tree, root, blocks }
    }

    #[test]
    fn test_version_is_one_past_applied() {
        let snap = snapshot();
        let cs = Changeset::new(&snap);
        assert_eq!(cs.version(), 5);
    }

    #[test]
    fn test_consecutive_text_edits_coalesce() {
        let snap = snapshot();
        let mut cs = Changeset::new(&snap);
        let b = snap.blocks[0];
        cs.text_edit(b, "textContent", Delta::new().retain(1, None).insert("a", None)).unwrap();
        cs.text_edit(b, "textContent", Delta::new().retain(1, None).insert("b", None)).unwrap();

        let finalized = cs.finalize(ApplyOptions::default());
        assert_eq!(finalized.operations.len(), 1);
        let Operation::TextEdit { delta, invert, .. } = &finalized.operations[0] else {
            panic!("expected text edit");
        };
        assert_eq!(delta, &Delta::new().retain(1, None).insert("ba", None));
        assert_eq!(invert, &Delta::new().retain(1, None).delete(2));
        assert!(cs.is_empty());
    }

    #[test]
    fn test_later_ops_see_earlier_ones() {
        let snap = snapshot();
        let body = snap.tree.slot(snap.root, BODY_SLOT).unwrap();
        let mut cs = Changeset::new(&snap);
        cs.insert_children_at(body, 0, vec![NodeRecord::block("heading")]).unwrap();
        cs.remove_node(snap.blocks[1]).unwrap();
        cs.set_attribute(snap.blocks[2], "align", json!("right")).unwrap();

        let ops = cs.operations();
        assert_eq!(ops[1].location(), &path!["body", 2]);
        assert_eq!(ops[2].location(), &path!["body", 2]);
    }

    #[test]
    fn test_append_after_buffered_append() {
        let snap = snapshot();
        let body = snap.tree.slot(snap.root, BODY_SLOT).unwrap();
        let mut cs = Changeset::new(&snap);
        cs.append_child(body, NodeRecord::block("a")).unwrap();
        cs.append_child(body, NodeRecord::block("b")).unwrap();
        assert_eq!(cs.operations()[0].location(), &path!["body", 3]);
        assert_eq!(cs.operations()[1].location(), &path!["body", 4]);
    }

    #[test]
    fn test_update_records_old_values() {
        let snap = snapshot();
        let b = snap.blocks[0];
        let mut cs = Changeset::new(&snap);
        cs.set_attribute(b, "level", json!(1)).unwrap();
        cs.set_attribute(b, "level", json!(2)).unwrap();
        cs.remove_attribute(b, "textContent").unwrap();

        let Operation::UpdateAttributes { old_attributes, .. } = &cs.operations()[1] else {
            panic!("expected update");
        };
        assert_eq!(old_attributes["level"], json!(1));
        let Operation::UpdateAttributes { old_attributes, .. } = &cs.operations()[2] else {
            panic!("expected update");
        };
        assert_eq!(old_attributes["textContent"]["type"], "rich-text");
    }

    #[test]
    fn test_old_values_follow_the_node_not_the_path() {
        let snap = snapshot();
        let mut cs = Changeset::new(&snap);
        cs.set_attribute(snap.blocks[1], "level", json!(5)).unwrap();
        cs.remove_node(snap.blocks[0]).unwrap();
        cs.set_attribute(snap.blocks[2], "level", json!(9)).unwrap();

        let Operation::UpdateAttributes {
            location,
            old_attributes,
            ..
        } = &cs.operations()[2]
        else {
            panic!("expected update");
        };
        assert_eq!(location, &path!["body", 1]);
        assert_eq!(old_attributes["level"], Value::Null);
    }

    #[test]
    fn test_text_edit_after_replacing_the_run() {
        let snap = snapshot();
        let b = snap.blocks[2];
        let mut cs = Changeset::new(&snap);
        cs.set_attribute(b, "textContent", text_run_to_value(&TextRun::from_text("hi")))
            .unwrap();
        cs.text_append(b, "textContent", "!", None).unwrap();

        let Operation::TextEdit { delta, invert, .. } = &cs.operations()[1] else {
            panic!("expected text edit");
        };
        assert_eq!(delta, &Delta::new().retain(2, None).insert("!", None));
        assert_eq!(invert, &Delta::new().retain(2, None).delete(1));
    }

    #[test]
    fn test_old_text_includes_buffered_edits() {
        let snap = snapshot();
        let b = snap.blocks[0];
        let mut cs = Changeset::new(&snap);
        cs.text_append(b, "textContent", "!", None).unwrap();
        cs.remove_attribute(b, "textContent").unwrap();

        let Operation::UpdateAttributes { old_attributes, .. } = &cs.operations()[1] else {
            panic!("expected update");
        };
        assert_eq!(old_attributes["textContent"], text_run_to_value(&TextRun::from_text("one!")));

        assert!(matches!(
            cs.text_append(b, "textContent", "?", None),
            Err(DocError::TextRunMissing { .. })
        ));
    }

    #[test]
    fn test_removal_carries_buffered_changes() {
        let snap = snapshot();
        let b = snap.blocks[0];
        let mut cs = Changeset::new(&snap);
        cs.text_append(b, "textContent", "!", None).unwrap();
        cs.set_attribute(b, "level", json!(3)).unwrap();
        cs.remove_node(b).unwrap();

        let Operation::RemoveNodes { children, .. } = &cs.operations()[2] else {
            panic!("expected remove");
        };
        assert_eq!(children[0].attributes["textContent"], text_run_to_value(&TextRun::from_text("one!")));
        assert_eq!(children[0].attributes["level"], json!(3));
    }

    #[test]
    fn test_removal_after_nested_insert_is_rejected() {
        let snap = snapshot();
        let body = snap.tree.slot(snap.root, BODY_SLOT).unwrap();
        let mut cs = Changeset::new(&snap);
        cs.append_child(snap.blocks[1], NodeRecord::element("span")).unwrap();
        assert!(matches!(cs.remove_node(snap.blocks[1]), Err(DocError::InvalidLocation { .. })));
        assert!(matches!(cs.remove_children_at(body, 0, 3), Err(DocError::InvalidLocation { .. })));
        assert_eq!(cs.operations().len(), 1);
    }

    #[test]
    fn test_reserved_and_invalid_rejected() {
        let snap = snapshot();
        let mut cs = Changeset::new(&snap);
        assert!(matches!(
            cs.set_attribute(snap.blocks[0], "id", json!("x")),
            Err(DocError::ReservedAttribute(_))
        ));
        assert!(matches!(
            cs.set_attribute(snap.root, BODY_SLOT, json!(1)),
            Err(DocError::SlotAttribute(_))
        ));
        let body = snap.tree.slot(snap.root, BODY_SLOT).unwrap();
        assert!(matches!(
            cs.remove_children_at(body, 2, 2),
            Err(DocError::IndexOutOfBounds { .. })
        ));
        assert!(matches!(
            cs.text_edit(body, "textContent", Delta::new().insert("x", None)),
            Err(DocError::InvalidLocation { .. })
        ));
        assert!(cs.is_empty());
    }

    #[test]
    fn test_text_append_uses_pending_length() {
        let snap = snapshot();
        let b = snap.blocks[1];
        let mut cs = Changeset::new(&snap);
        cs.text_append(b, "textContent", "!", None).unwrap();
        cs.text_append(b, "textContent", "?", None).unwrap();
        let Operation::TextEdit { delta, .. } = &cs.operations()[0] else {
            panic!("expected text edit");
        };
        assert_eq!(delta, &Delta::new().retain(3, None).insert("!?", None));
    }

    #[test]
    fn test_set_title_replaces_existing() {
        let snap = snapshot();
        let mut cs = Changeset::new(&snap);
        let first = NodeRecord::block_with_id("title", BlockId::new());
        cs.set_title(Some(first.clone())).unwrap();
        cs.set_title(Some(NodeRecord::block("title"))).unwrap();
        let ops = cs.operations();
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[1], Operation::RemoveNodes { location: path!["title"], children: vec![first] });
    }

    #[test]
    fn test_options_wire_shape() {
        let json = serde_json::to_value(ApplyOptions::default().with_record(Record::None)).unwrap();
        assert_eq!(json, json!({"updateView": true, "ignoreCursor": false, "record": "none", "refreshCursor": false}));
        let parsed: ApplyOptions = serde_json::from_value(json!({"record": "redo"})).unwrap();
        assert_eq!(parsed.record, Record::Redo);
        assert!(parsed.update_view);
    }
}
