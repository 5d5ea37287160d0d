//! Versioned document state.
//!
//! [`State`] is the version authority for one document: it owns the tree, the
//! applied-version counter, the cursor, the history of applied changesets and
//! the undo/redo stacks. All mutation goes through [`State::apply`].
//!
//! # Versions
//!
//! A changeset built against version `v` is stamped `v + 1`. `apply` expects
//! `applied + 1`; anything at or below `applied` is a stale or duplicate
//! delivery and is ignored. A changeset built against an older
//! version goes through [`State::rebase`] first.
//!
//! # Events
//!
//! Instead of listener callbacks, `apply` queues [`StateEvent`]s that the view
//! layer collects with [`State::drain_events`].

use std::path::Path as FsPath;

use quire_types::{CursorChangeReason, CursorState, Path, PathSegment, UserId};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use crate::changeset::{ApplyOptions, Changeset, DocumentHost, FinalizedChangeset, Record};
use crate::history::VersionHistory;
use crate::ops::{Operation, invert_operations, transform, transform_cursor, transform_yielding};
use crate::record::{NodeRecord, attr_from_value};
use crate::tree::{DocTree, NodeHandle, TreeEvent};
use crate::undo::UndoStack;
use crate::{DocError, Result};

/// Default bound on the undo and redo stacks.
pub const DEFAULT_MAX_UNDO_DEPTH: usize = 100;

/// Construction settings for a [`State`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Version of the initial document; the first changeset is `base + 1`.
    pub base_version: u64,

    /// Author stamped on changesets built against this state.
    pub user_id: UserId,

    /// Undo/redo stack bound. Zero disables undo.
    pub max_undo_depth: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            base_version: 0,
            user_id: UserId::local(),
            max_undo_depth: DEFAULT_MAX_UNDO_DEPTH,
        }
    }
}

impl StateConfig {
    pub fn with_base_version(mut self, version: u64) -> Self {
        self.base_version = version;
        self
    }

    pub fn with_user_id(mut self, user_id: UserId) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_max_undo_depth(mut self, depth: usize) -> Self {
        self.max_undo_depth = depth;
        self
    }

    /// Parse from RON text. Missing fields take their defaults.
    pub fn from_ron(text: &str) -> Result<Self> {
        Ok(ron::from_str(text)?)
    }

    /// Load from a RON file.
    pub fn load(path: impl AsRef<FsPath>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_ron(&text)
    }
}

/// Result of [`State::apply`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The changeset was executed and is now the applied version.
    Applied { version: u64 },
    /// The changeset was at or below the applied version and was skipped.
    Ignored { version: u64, applied: u64 },
}

/// Notification queued by a [`State`].
#[derive(Clone, Debug, PartialEq)]
pub enum StateEvent {
    /// A changeset is about to be executed.
    BeforeApply { version: u64 },
    /// A changeset was executed. Handles in `Removed` tree events have
    /// already been released.
    Applied {
        changeset: FinalizedChangeset,
        tree_events: Vec<TreeEvent>,
        update_view: bool,
    },
    CursorChanged {
        previous: Option<CursorState>,
        current: Option<CursorState>,
        reason: CursorChangeReason,
    },
}

/// One document's tree, version and history.
#[derive(Debug, Clone)]
pub struct State {
    tree: DocTree,
    root: NodeHandle,
    applied_version: u64,
    cursor: Option<CursorState>,
    history: VersionHistory,
    undo_stack: UndoStack,
    redo_stack: UndoStack,
    events: Vec<StateEvent>,
    config: StateConfig,
}

impl State {
    /// A state over an empty document.
    pub fn new(config: StateConfig) -> Self {
        let mut tree = DocTree::new();
        let root = tree.create_document();
        Self::with_tree(tree, root, config)
    }

    /// A state over a document snapshot.
    pub fn from_record(record: &NodeRecord, config: StateConfig) -> Result<Self> {
        if !record.is_document() {
            return Err(DocError::InvalidRecord(format!(
                "expected a document record, got {:?}",
                record.node_type
            )));
        }
        let mut tree = DocTree::new();
        let root = tree.insert_record(record)?;
        Ok(Self::with_tree(tree, root, config))
    }

    fn with_tree(tree: DocTree, root: NodeHandle, config: StateConfig) -> Self {
        Self {
            tree,
            root,
            applied_version: config.base_version,
            cursor: None,
            history: VersionHistory::new(config.base_version),
            undo_stack: UndoStack::new(config.max_undo_depth),
            redo_stack: UndoStack::new(config.max_undo_depth),
            events: Vec::new(),
            config,
        }
    }

    /// Snapshot the whole document.
    pub fn snapshot(&self) -> Result<NodeRecord> {
        self.tree.to_record(self.root)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn tree(&self) -> &DocTree {
        &self.tree
    }

    pub fn root(&self) -> NodeHandle {
        self.root
    }

    pub fn applied_version(&self) -> u64 {
        self.applied_version
    }

    pub fn cursor(&self) -> Option<&CursorState> {
        self.cursor.as_ref()
    }

    pub fn history(&self) -> &VersionHistory {
        &self.history
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Take the queued notifications.
    pub fn drain_events(&mut self) -> Vec<StateEvent> {
        std::mem::take(&mut self.events)
    }

    /// Move the cursor outside of any changeset.
    pub fn set_cursor(&mut self, cursor: Option<CursorState>, reason: CursorChangeReason) {
        self.move_cursor(cursor, reason);
    }

    fn move_cursor(&mut self, cursor: Option<CursorState>, reason: CursorChangeReason) {
        if cursor == self.cursor {
            return;
        }
        let previous = std::mem::replace(&mut self.cursor, cursor.clone());
        self.events.push(StateEvent::CursorChanged {
            previous,
            current: cursor,
            reason,
        });
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Resolve a path from the document root.
    pub fn find_node_by_location(&self, path: &Path) -> Result<NodeHandle> {
        self.tree.resolve(self.root, path)
    }

    pub fn path_of(&self, node: NodeHandle) -> Result<Path> {
        self.tree.path_of(node)
    }

    // =========================================================================
    // Building
    // =========================================================================

    /// Start a changeset against the current version.
    pub fn changeset(&self) -> Changeset<'_, State> {
        Changeset::new(self)
    }

    /// Build a changeset with `build`, finalize it and apply it. Returns
    /// `None` when `build` produced no operations.
    pub fn apply_changes<F>(&mut self, options: ApplyOptions, build: F) -> Result<Option<ApplyOutcome>>
    where
        F: FnOnce(&mut Changeset<'_, State>) -> Result<()>,
    {
        let finalized = {
            let mut changeset = Changeset::new(&*self);
            build(&mut changeset)?;
            changeset.finalize(options)
        };
        if finalized.is_empty() {
            return Ok(None);
        }
        self.apply(finalized).map(Some)
    }

    // =========================================================================
    // Apply
    // =========================================================================

    /// Execute a changeset stamped past the applied version, normally
    /// `applied + 1`.
    ///
    /// Stale versions are ignored. A version further ahead is applied with a
    /// warning; the skipped versions stay missing from history, so rebasing
    /// across them fails with [`DocError::MissingVersion`]. Addressing failures part-way through leave
    /// the tree diverged from the operation stream; the caller should reload
    /// from a fresh snapshot.
    pub fn apply(&mut self, changeset: FinalizedChangeset) -> Result<ApplyOutcome> {
        self.apply_recorded(changeset, true)
    }

    fn apply_recorded(&mut self, changeset: FinalizedChangeset, clear_redo: bool) -> Result<ApplyOutcome> {
        let version = changeset.version;
        if version <= self.applied_version {
            debug!(
                "ignoring changeset {version} at applied version {}",
                self.applied_version
            );
            return Ok(ApplyOutcome::Ignored {
                version,
                applied: self.applied_version,
            });
        }
        if version > self.applied_version + 1 {
            warn!(
                "applying changeset {version} past a gap from version {}",
                self.applied_version
            );
        }

        self.events.push(StateEvent::BeforeApply { version });
        let mut tree_events = Vec::new();
        for op in &changeset.operations {
            trace!(op = op.kind(), location = %op.location(), "executing operation");
            if let Err(e) = self.execute(op, &mut tree_events) {
                error!("changeset {version}: {} at {} failed: {e}", op.kind(), op.location());
                return Err(e);
            }
        }
        self.applied_version = version;
        self.history.push(changeset.clone())?;

        let options = changeset.options.clone();
        if !options.ignore_cursor {
            let (cursor, reason) = if options.refresh_cursor {
                (changeset.before_cursor.clone(), CursorChangeReason::Changeset)
            } else if let Some(after) = &changeset.after_cursor {
                (Some(after.clone()), CursorChangeReason::Changeset)
            } else {
                let moved = self
                    .cursor
                    .clone()
                    .map(|c| changeset.operations.iter().fold(c, |c, op| transform_cursor(op, &c)));
                (moved, CursorChangeReason::ContentChanged)
            };
            self.move_cursor(cursor, reason);
        }

        match options.record {
            Record::Undo => {
                if clear_redo {
                    self.redo_stack.clear();
                }
                let inverse = self.inverse_of(&changeset);
                self.undo_stack.push(inverse);
            }
            Record::Redo => {
                let inverse = self.inverse_of(&changeset);
                self.redo_stack.push(inverse);
            }
            Record::None => {
                self.undo_stack.transform_past(&changeset.operations);
                self.redo_stack.transform_past(&changeset.operations);
            }
        }

        let update_view = options.update_view || changeset.force_update;
        self.events.push(StateEvent::Applied {
            changeset,
            tree_events,
            update_view,
        });
        Ok(ApplyOutcome::Applied { version })
    }

    fn parent_and_slot(&self, location: &Path) -> Result<(NodeHandle, PathSegment)> {
        let (Some(parent_path), Some(slot)) = (location.parent(), location.last()) else {
            return Err(DocError::InvalidLocation {
                path: location.clone(),
                reason: "operation cannot target the document root".to_string(),
            });
        };
        Ok((self.find_node_by_location(&parent_path)?, slot.clone()))
    }

    fn execute(&mut self, op: &Operation, events: &mut Vec<TreeEvent>) -> Result<()> {
        match op {
            Operation::InsertNodes { location, children } => {
                let (parent, slot) = self.parent_and_slot(location)?;
                match slot {
                    PathSegment::Index(index) => {
                        for (offset, record) in children.iter().enumerate() {
                            let child = self.tree.insert_record(record)?;
                            match self.tree.insert_child_at(parent, index + offset, child) {
                                Ok(event) => events.push(event),
                                Err(e) => {
                                    let _ = self.tree.release(child);
                                    return Err(e);
                                }
                            }
                        }
                    }
                    PathSegment::Key(key) => {
                        let [record] = children.as_slice() else {
                            return Err(DocError::InvalidLocation {
                                path: location.clone(),
                                reason: format!("a slot holds one node, got {}", children.len()),
                            });
                        };
                        let child = self.tree.insert_record(record)?;
                        match self.tree.set_slot(parent, &key, child) {
                            Ok(slot_events) => {
                                for event in slot_events {
                                    self.release_removed(&event);
                                    events.push(event);
                                }
                            }
                            Err(e) => {
                                let _ = self.tree.release(child);
                                return Err(e);
                            }
                        }
                    }
                }
            }
            Operation::RemoveNodes { location, children } => {
                let (parent, slot) = self.parent_and_slot(location)?;
                let removed = match slot {
                    PathSegment::Index(index) => self.tree.delete_children_at(parent, index, children.len())?,
                    PathSegment::Key(key) => self.tree.take_slot(parent, &key)?.into_iter().collect(),
                };
                if removed.len() != children.len() {
                    warn!(
                        "remove at {location} expected {} nodes, removed {}",
                        children.len(),
                        removed.len()
                    );
                }
                for event in removed {
                    self.release_removed(&event);
                    events.push(event);
                }
            }
            Operation::UpdateAttributes { location, attributes, .. } => {
                let node = self.find_node_by_location(location)?;
                for (key, value) in attributes {
                    if value.is_null() {
                        self.tree.remove_attribute(node, key)?;
                    } else {
                        self.tree.set_attribute(node, key, attr_from_value(key, value)?)?;
                    }
                }
            }
            Operation::TextEdit { id, key, delta, .. } => {
                let node = self.tree.find_block(id).ok_or(DocError::BlockNotFound(*id))?;
                self.tree.apply_text_delta(node, key, delta)?;
            }
        }
        Ok(())
    }

    fn release_removed(&mut self, event: &TreeEvent) {
        if let TreeEvent::Removed { child, .. } = event {
            if let Err(e) = self.tree.release(*child) {
                warn!("could not release removed node {child:?}: {e}");
            }
        }
    }

    // =========================================================================
    // Rebase
    // =========================================================================

    /// Bring a changeset built against an older version up to date.
    ///
    /// Each landed operation, from `changeset.version` through the applied
    /// version, is walked forward through the changeset: every operation is
    /// transformed against it, and it is then moved past that operation
    /// before meeting the next one, since later operations were built on top
    /// of earlier ones. The before-cursor sees each landed operation as it
    /// was; the after-cursor sees it moved past the whole changeset. The
    /// result is stamped `applied + 1`.
    pub fn rebase(&self, changeset: FinalizedChangeset, options: ApplyOptions) -> Result<FinalizedChangeset> {
        let FinalizedChangeset {
            user_id,
            version,
            mut operations,
            mut before_cursor,
            mut after_cursor,
            force_update,
            ..
        } = changeset;

        for landed_version in version..=self.applied_version {
            let landed = self
                .history
                .get(landed_version)
                .ok_or(DocError::MissingVersion(landed_version))?;
            for a in &landed.operations {
                before_cursor = before_cursor.map(|c| transform_cursor(a, &c));
                let mut a = a.clone();
                for b in operations.iter_mut() {
                    let rebased = transform(&a, b);
                    a = transform_yielding(b, &a);
                    *b = rebased;
                }
                after_cursor = after_cursor.map(|c| transform_cursor(&a, &c));
            }
        }

        if version <= self.applied_version {
            debug!(
                "rebased changeset from version {version} to {}",
                self.applied_version + 1
            );
        }
        Ok(FinalizedChangeset {
            user_id,
            version: self.applied_version + 1,
            operations,
            before_cursor,
            after_cursor,
            force_update,
            options,
        })
    }

    // =========================================================================
    // Undo / redo
    // =========================================================================

    /// Undo the most recent recorded changeset. `None` when there is nothing
    /// to undo.
    pub fn undo(&mut self) -> Result<Option<ApplyOutcome>> {
        let Some(inverse) = self.undo_stack.pop() else {
            return Ok(None);
        };
        self.apply_reversal(inverse, Record::Redo).map(Some)
    }

    /// Reapply the most recently undone changeset.
    pub fn redo(&mut self) -> Result<Option<ApplyOutcome>> {
        let Some(inverse) = self.redo_stack.pop() else {
            return Ok(None);
        };
        self.apply_reversal(inverse, Record::Undo).map(Some)
    }

    fn apply_reversal(&mut self, mut inverse: FinalizedChangeset, record: Record) -> Result<ApplyOutcome> {
        inverse.user_id = self.config.user_id;
        inverse.version = self.applied_version + 1;
        inverse.options = ApplyOptions::default().with_record(record);
        self.apply_recorded(inverse, false)
    }

    /// The changeset that reverts `changeset`, valid against the state right
    /// after it. Stacked entries stay valid because unrecorded changesets are
    /// transformed into them as they land.
    fn inverse_of(&self, changeset: &FinalizedChangeset) -> FinalizedChangeset {
        FinalizedChangeset {
            user_id: self.config.user_id,
            version: changeset.version + 1,
            operations: invert_operations(&changeset.operations),
            before_cursor: changeset.after_cursor.clone().or_else(|| self.cursor.clone()),
            after_cursor: changeset.before_cursor.clone(),
            force_update: false,
            options: ApplyOptions::default(),
        }
    }
}

impl DocumentHost for State {
    fn user_id(&self) -> UserId {
        self.config.user_id
    }

    fn applied_version(&self) -> u64 {
        self.applied_version
    }

    fn cursor(&self) -> Option<CursorState> {
        self.cursor.clone()
    }

    fn tree(&self) -> &DocTree {
        &self.tree
    }

    fn root(&self) -> NodeHandle {
        self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::Delta;
    use crate::text::{TEXT_CONTENT_KEY, TextRun};
    use crate::tree::BODY_SLOT;
    use quire_types::{BlockId, path};
    use serde_json::json;

    fn state_with_paragraph(text: &str) -> (State, NodeHandle) {
        let mut state = State::new(StateConfig::default());
        let body = state.tree().slot(state.root(), BODY_SLOT).unwrap();
        let record = NodeRecord::block("paragraph").with_text(TEXT_CONTENT_KEY, &TextRun::from_text(text));
        state
            .apply_changes(ApplyOptions::default().with_record(Record::None), |cs| cs.append_child(body, record))
            .unwrap();
        let para = state.find_node_by_location(&path!["body", 0]).unwrap();
        state.drain_events();
        (state, para)
    }

    fn text_of(state: &State, node: NodeHandle) -> String {
        state.tree().text_run(node, TEXT_CONTENT_KEY).unwrap().as_str().to_string()
    }

    #[test]
    fn test_apply_advances_version() {
        let (mut state, para) = state_with_paragraph("Hello");
        assert_eq!(state.applied_version(), 1);

        let outcome = state
            .apply_changes(ApplyOptions::default(), |cs| cs.text_append(para, TEXT_CONTENT_KEY, "!", None))
            .unwrap();
        assert_eq!(outcome, Some(ApplyOutcome::Applied { version: 2 }));
        assert_eq!(text_of(&state, para), "Hello!");
        assert_eq!(state.history().latest_version(), 2);

        let events = state.drain_events();
        assert!(matches!(events[0], StateEvent::BeforeApply { version: 2 }));
        assert!(matches!(events.last(), Some(StateEvent::Applied { update_view: true, .. })));
    }

    #[test]
    fn test_empty_changeset_is_noop() {
        let (mut state, _) = state_with_paragraph("x");
        let outcome = state.apply_changes(ApplyOptions::default(), |_| Ok(())).unwrap();
        assert_eq!(outcome, None);
        assert_eq!(state.applied_version(), 1);
    }

    #[test]
    fn test_stale_and_gapped_versions() {
        let (mut state, para) = state_with_paragraph("abc");
        let mut cs = state.changeset();
        cs.text_append(para, TEXT_CONTENT_KEY, "d", None).unwrap();
        let finalized = cs.finalize(ApplyOptions::default());

        state.apply(finalized.clone()).unwrap();
        let again = state.apply(finalized.clone()).unwrap();
        assert_eq!(again, ApplyOutcome::Ignored { version: 2, applied: 2 });
        assert_eq!(text_of(&state, para), "abcd");

        let mut future = finalized.clone();
        future.version = 9;
        assert_eq!(state.apply(future).unwrap(), ApplyOutcome::Applied { version: 9 });
        assert_eq!(state.applied_version(), 9);
        assert_eq!(text_of(&state, para), "abcdd");
        assert!(state.history().get(5).is_none());

        let mut behind_gap = finalized;
        behind_gap.version = 4;
        assert!(matches!(
            state.rebase(behind_gap, ApplyOptions::default()),
            Err(DocError::MissingVersion(4))
        ));
    }

    #[test]
    fn test_rebase_shifts_text_edit() {
        let (mut state, para) = state_with_paragraph("world");
        let mut stale = state.changeset();
        stale.text_append(para, TEXT_CONTENT_KEY, "!", None).unwrap();
        let stale = stale.finalize(ApplyOptions::default());

        state
            .apply_changes(ApplyOptions::default(), |cs| {
                cs.text_edit(para, TEXT_CONTENT_KEY, Delta::new().insert("hello ", None))
            })
            .unwrap();

        let rebased = state.rebase(stale, ApplyOptions::default()).unwrap();
        assert_eq!(rebased.version, 3);
        state.apply(rebased).unwrap();
        assert_eq!(text_of(&state, para), "hello world!");
    }

    #[test]
    fn test_rebase_missing_history() {
        let state = State::new(StateConfig::default().with_base_version(5));
        let changeset = FinalizedChangeset {
            user_id: UserId::local(),
            version: 3,
            operations: Vec::new(),
            before_cursor: None,
            after_cursor: None,
            force_update: false,
            options: ApplyOptions::default(),
        };
        assert!(matches!(
            state.rebase(changeset, ApplyOptions::default()),
            Err(DocError::MissingVersion(3))
        ));
    }

    #[test]
    fn test_cursor_follows_content() {
        let (mut state, para) = state_with_paragraph("abcdef");
        let id = state.tree().block_id(para).unwrap();
        state.set_cursor(Some(CursorState::collapsed(id, 5)), CursorChangeReason::UiEvent);
        state.drain_events();

        state
            .apply_changes(ApplyOptions::default(), |cs| {
                cs.text_edit(para, TEXT_CONTENT_KEY, Delta::new().insert("xy", None))
            })
            .unwrap();
        assert_eq!(state.cursor(), Some(&CursorState::collapsed(id, 7)));
        let events = state.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            StateEvent::CursorChanged { reason: CursorChangeReason::ContentChanged, .. }
        )));
    }

    #[test]
    fn test_after_cursor_and_refresh() {
        let (mut state, para) = state_with_paragraph("abc");
        let id = state.tree().block_id(para).unwrap();
        state.set_cursor(Some(CursorState::collapsed(id, 0)), CursorChangeReason::UiEvent);

        state
            .apply_changes(ApplyOptions::default(), |cs| {
                cs.text_append(para, TEXT_CONTENT_KEY, "d", None)?;
                cs.set_after_cursor(CursorState::collapsed(id, 4));
                Ok(())
            })
            .unwrap();
        assert_eq!(state.cursor(), Some(&CursorState::collapsed(id, 4)));

        state
            .apply_changes(ApplyOptions::default().with_refresh_cursor(true), |cs| {
                cs.text_append(para, TEXT_CONTENT_KEY, "e", None)?;
                cs.set_after_cursor(CursorState::collapsed(id, 5));
                Ok(())
            })
            .unwrap();
        assert_eq!(state.cursor(), Some(&CursorState::collapsed(id, 4)));
    }

    #[test]
    fn test_undo_redo_round_trip() {
        let (mut state, para) = state_with_paragraph("abc");
        let before = state.snapshot().unwrap();

        state
            .apply_changes(ApplyOptions::default(), |cs| {
                cs.text_append(para, TEXT_CONTENT_KEY, "def", None)?;
                cs.set_attribute(para, "align", json!("center"))
            })
            .unwrap();
        let after = state.snapshot().unwrap();

        assert!(state.undo().unwrap().is_some());
        assert_eq!(state.snapshot().unwrap(), before);
        assert!(state.can_redo());

        assert!(state.redo().unwrap().is_some());
        assert_eq!(state.snapshot().unwrap(), after);
        assert!(state.can_undo());
        assert!(!state.can_redo());
        assert_eq!(state.applied_version(), 4);
    }

    #[test]
    fn test_new_edit_clears_redo() {
        let (mut state, para) = state_with_paragraph("abc");
        state
            .apply_changes(ApplyOptions::default(), |cs| cs.text_append(para, TEXT_CONTENT_KEY, "d", None))
            .unwrap();
        state.undo().unwrap();
        assert!(state.can_redo());
        state
            .apply_changes(ApplyOptions::default(), |cs| cs.text_append(para, TEXT_CONTENT_KEY, "e", None))
            .unwrap();
        assert!(!state.can_redo());
        assert_eq!(state.undo().unwrap(), Some(ApplyOutcome::Applied { version: 5 }));
        assert_eq!(state.redo().unwrap(), Some(ApplyOutcome::Applied { version: 6 }));
        assert_eq!(state.redo().unwrap(), None);
    }

    #[test]
    fn test_undo_block_removal_restores_id() {
        let (mut state, para) = state_with_paragraph("keep me");
        let id = state.tree().block_id(para).unwrap();
        state.apply_changes(ApplyOptions::default(), |cs| cs.remove_node(para)).unwrap();
        assert!(state.tree().find_block(&id).is_none());

        state.undo().unwrap();
        let restored = state.tree().find_block(&id).unwrap();
        assert_eq!(state.path_of(restored).unwrap(), path!["body", 0]);
        assert_eq!(text_of(&state, restored), "keep me");
    }

    #[test]
    fn test_undo_survives_remote_insert() {
        let (mut state, para) = state_with_paragraph("mine");
        let id = state.tree().block_id(para).unwrap();
        state
            .apply_changes(ApplyOptions::default(), |cs| cs.set_attribute(para, "align", json!("right")))
            .unwrap();

        let body = state.tree().slot(state.root(), BODY_SLOT).unwrap();
        state
            .apply_changes(ApplyOptions::default().with_record(Record::None), |cs| {
                cs.insert_children_at(body, 0, vec![NodeRecord::block("paragraph")])
            })
            .unwrap();

        state.undo().unwrap();
        let para = state.tree().find_block(&id).unwrap();
        assert_eq!(state.path_of(para).unwrap(), path!["body", 1]);
        assert!(state.tree().attribute(para, "align").is_none());
        assert_eq!(state.tree().child_count(body), 2);
    }

    #[test]
    fn test_undo_removal_then_earlier_edit() {
        let (mut state, para) = state_with_paragraph("abc");
        state
            .apply_changes(ApplyOptions::default(), |cs| cs.set_attribute(para, "align", json!("left")))
            .unwrap();
        let before_removal = state.snapshot().unwrap();
        state.apply_changes(ApplyOptions::default(), |cs| cs.remove_node(para)).unwrap();

        state.undo().unwrap();
        assert_eq!(state.snapshot().unwrap(), before_removal);
        state.undo().unwrap();
        let para = state.find_node_by_location(&path!["body", 0]).unwrap();
        assert!(state.tree().attribute(para, "align").is_none());
    }

    #[test]
    fn test_undo_attribute_updates_around_a_removal() {
        let mut state = State::new(StateConfig::default());
        let body = state.tree().slot(state.root(), BODY_SLOT).unwrap();
        let records = ["a", "b", "c"]
            .iter()
            .map(|t| NodeRecord::block("paragraph").with_text(TEXT_CONTENT_KEY, &TextRun::from_text(*t)))
            .collect();
        state
            .apply_changes(ApplyOptions::default().with_record(Record::None), |cs| {
                cs.insert_children_at(body, 0, records)
            })
            .unwrap();
        let blocks = state.tree().children(body);
        let before = state.snapshot().unwrap();

        state
            .apply_changes(ApplyOptions::default(), |cs| {
                cs.set_attribute(blocks[1], "level", json!(5))?;
                cs.remove_node(blocks[0])?;
                cs.set_attribute(blocks[2], "level", json!(9))
            })
            .unwrap();
        let c = state.find_node_by_location(&path!["body", 1]).unwrap();
        assert_eq!(state.tree().attribute(c, "level").unwrap().as_scalar(), Some(&json!(9)));

        state.undo().unwrap();
        assert_eq!(state.snapshot().unwrap(), before);
    }

    #[test]
    fn test_replaced_run_then_append_round_trips() {
        let (mut state, para) = state_with_paragraph("hello world");
        state
            .apply_changes(ApplyOptions::default(), |cs| {
                cs.set_attribute(para, TEXT_CONTENT_KEY, json!({"type": "rich-text", "ops": [{"insert": "hi"}]}))?;
                cs.text_append(para, TEXT_CONTENT_KEY, "!", None)
            })
            .unwrap();
        assert_eq!(text_of(&state, para), "hi!");

        let snapshot = state.snapshot().unwrap();
        let rebuilt = State::from_record(&snapshot, StateConfig::default()).unwrap();
        assert_eq!(rebuilt.snapshot().unwrap(), snapshot);

        state.undo().unwrap();
        assert_eq!(text_of(&state, para), "hello world");
    }

    #[test]
    fn test_text_edit_past_run_end_is_rejected() {
        let (mut state, para) = state_with_paragraph("hi");
        let id = state.tree().block_id(para).unwrap();
        let changeset = FinalizedChangeset {
            user_id: UserId::local(),
            version: 2,
            operations: vec![Operation::TextEdit {
                location: path!["body", 0],
                id,
                key: TEXT_CONTENT_KEY.to_string(),
                delta: Delta::new().retain(9, None).insert("!", None),
                invert: Delta::new().retain(9, None).delete(1),
            }],
            before_cursor: None,
            after_cursor: None,
            force_update: false,
            options: ApplyOptions::default(),
        };
        assert!(matches!(state.apply(changeset), Err(DocError::DeltaOutOfRange { .. })));
        assert_eq!(text_of(&state, para), "hi");
        assert_eq!(state.applied_version(), 1);
    }

    #[test]
    fn test_title_slot() {
        let mut state = State::new(StateConfig::default());
        let title = NodeRecord::block_with_id("title", BlockId::new())
            .with_text(TEXT_CONTENT_KEY, &TextRun::from_text("Notes"));
        state
            .apply_changes(ApplyOptions::default(), |cs| cs.set_title(Some(title.clone())))
            .unwrap();
        let node = state.find_node_by_location(&path!["title"]).unwrap();
        assert_eq!(state.tree().to_record(node).unwrap(), title);

        state.apply_changes(ApplyOptions::default(), |cs| cs.set_title(None)).unwrap();
        assert!(matches!(
            state.find_node_by_location(&path!["title"]),
            Err(DocError::PathNotFound { .. })
        ));
    }

    #[test]
    fn test_from_record_requires_document() {
        let err = State::from_record(&NodeRecord::element("body"), StateConfig::default()).unwrap_err();
        assert!(matches!(err, DocError::InvalidRecord(_)));
    }

    #[test]
    fn test_config_from_ron() {
        let config = StateConfig::from_ron("(base_version: 7, max_undo_depth: 3)").unwrap();
        assert_eq!(config.base_version, 7);
        assert_eq!(config.max_undo_depth, 3);
        assert_eq!(config.user_id, UserId::local());

        let state = State::new(config);
        assert_eq!(state.applied_version(), 7);
        assert!(StateConfig::from_ron("(base_version: \"x\")").is_err());
    }
}
