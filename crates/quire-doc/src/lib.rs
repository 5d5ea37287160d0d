//! Versioned block-tree document engine.
//!
//! A document is an ordered tree of elements and blocks; blocks carry stable
//! ids and hold rich text as [`TextRun`]s. Every change is an [`Operation`],
//! batched into a [`Changeset`] against a versioned [`State`].
//!
//! # Flow
//!
//! 1. Build a [`Changeset`] against the current [`State`] (handles and paths
//!    as they are now). Each new operation is re-pointed past the ones already
//!    buffered; consecutive text edits on one run are merged.
//! 2. [`Changeset::finalize`] seals it as a [`FinalizedChangeset`] stamped
//!    `applied + 1`.
//! 3. [`State::apply`] executes it, records it in the [`VersionHistory`] and
//!    queues [`StateEvent`]s.
//! 4. A changeset built against an older version (a remote edit, an undo past
//!    later edits) goes through [`State::rebase`] first.
//!
//! # Conflict resolution
//!
//! History is strictly linear. Structural operations shift each other's paths
//! ([`quire_types::Path::transform`]); text edits on the same run are
//! transformed as rich-text deltas ([`Delta::transform`]). The version that
//! landed first always wins position ties.

pub mod changeset;
pub mod delta;
mod error;
pub mod history;
pub mod ops;
pub mod record;
pub mod state;
pub mod text;
pub mod tree;
pub mod undo;
pub mod wire;

pub use changeset::{ApplyOptions, Changeset, DocumentHost, FinalizedChangeset, Record};
pub use delta::{AttributeMap, Delta, DeltaOp, InsertValue};
pub use error::DocError;
pub use history::VersionHistory;
pub use ops::{Operation, invert_operations, transform, transform_cursor, transform_yielding};
pub use record::NodeRecord;
pub use state::{ApplyOutcome, State, StateConfig, StateEvent};
pub use text::{TEXT_CONTENT_KEY, TextChar, TextRun};
pub use tree::{AttrValue, BODY_SLOT, DocTree, NodeHandle, NodeKind, TITLE_SLOT, TreeEvent};
pub use undo::UndoStack;

pub use quire_types::{BlockId, CursorChangeReason, CursorState, Path, PathSegment, UserId};

/// Result type for document operations.
pub type Result<T> = std::result::Result<T, DocError>;

#[cfg(test)]
mod tests {
    use super::*;
    use quire_types::path;
    use serde_json::json;

    fn paragraph(text: &str) -> NodeRecord {
        NodeRecord::block("paragraph").with_text(TEXT_CONTENT_KEY, &TextRun::from_text(text))
    }

    fn body_texts(state: &State) -> Vec<String> {
        let body = state.find_node_by_location(&path!["body"]).unwrap();
        state
            .tree()
            .children(body)
            .into_iter()
            .map(|b| state.tree().text_run(b, TEXT_CONTENT_KEY).unwrap().as_str().to_string())
            .collect()
    }

    #[test]
    fn test_document_basic_operations() {
        let mut state = State::new(StateConfig::default());
        let body = state.tree().slot(state.root(), BODY_SLOT).unwrap();

        state
            .apply_changes(ApplyOptions::default(), |cs| {
                cs.append_child(body, paragraph("Hello, world!"))?;
                cs.append_child(body, paragraph("Second"))
            })
            .unwrap();
        assert_eq!(body_texts(&state), vec!["Hello, world!", "Second"]);

        let first = state.find_node_by_location(&path!["body", 0]).unwrap();
        state
            .apply_changes(ApplyOptions::default(), |cs| {
                cs.text_edit(first, TEXT_CONTENT_KEY, Delta::new().retain(7, None).delete(5).insert("quire", None))
            })
            .unwrap();
        assert_eq!(body_texts(&state), vec!["Hello, quire!", "Second"]);
    }

    #[test]
    fn test_remote_changeset_via_wire() {
        let mut local = State::new(StateConfig::default());
        let body = local.tree().slot(local.root(), BODY_SLOT).unwrap();
        local
            .apply_changes(ApplyOptions::default(), |cs| cs.append_child(body, paragraph("shared")))
            .unwrap();

        let mut remote = State::from_record(&local.snapshot().unwrap(), StateConfig::default().with_base_version(1))
            .unwrap();

        let para = local.find_node_by_location(&path!["body", 0]).unwrap();
        local
            .apply_changes(ApplyOptions::default(), |cs| {
                cs.set_attribute(para, "align", json!("center"))?;
                cs.text_append(para, TEXT_CONTENT_KEY, " text", None)
            })
            .unwrap();

        let sent = wire::encode(local.history().get(2).unwrap()).unwrap();
        let received = wire::decode(&sent).unwrap();
        remote.apply(received).unwrap();

        assert_eq!(remote.snapshot().unwrap(), local.snapshot().unwrap());
        assert_eq!(remote.applied_version(), 2);
    }
}
