//! Selection states addressed by block id and text offset.
//!
//! Cursors point at blocks by [`BlockId`] rather than by path: a path goes
//! stale as soon as a sibling is inserted, a block id does not. Offsets are
//! counted in characters of the block's text run (an embed counts as one).

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::ids::BlockId;

/// A selection in the document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum CursorState {
    /// A caret with no extent.
    #[serde(rename_all = "camelCase")]
    Collapsed { target_id: BlockId, offset: usize },
    /// A ranged selection; start and end may sit in different blocks.
    #[serde(rename_all = "camelCase")]
    Open {
        start_id: BlockId,
        start_offset: usize,
        end_id: BlockId,
        end_offset: usize,
    },
}

impl CursorState {
    pub fn collapsed(target_id: BlockId, offset: usize) -> Self {
        Self::Collapsed { target_id, offset }
    }

    /// A ranged selection. Collapses when both ends coincide.
    pub fn open(start_id: BlockId, start_offset: usize, end_id: BlockId, end_offset: usize) -> Self {
        if start_id == end_id && start_offset == end_offset {
            return Self::collapsed(start_id, start_offset);
        }
        Self::Open {
            start_id,
            start_offset,
            end_id,
            end_offset,
        }
    }

    pub fn is_collapsed(&self) -> bool {
        matches!(self, CursorState::Collapsed { .. })
    }

    /// Block holding the caret (or the selection's start).
    pub fn start_id(&self) -> BlockId {
        match self {
            CursorState::Collapsed { target_id, .. } => *target_id,
            CursorState::Open { start_id, .. } => *start_id,
        }
    }

    /// Block holding the selection's end (the caret block when collapsed).
    pub fn end_id(&self) -> BlockId {
        match self {
            CursorState::Collapsed { target_id, .. } => *target_id,
            CursorState::Open { end_id, .. } => *end_id,
        }
    }

    /// True if either end of the selection sits in `id`.
    pub fn touches(&self, id: &BlockId) -> bool {
        self.start_id() == *id || self.end_id() == *id
    }

    /// Remap every offset that sits in block `id` through `f`.
    pub fn map_offsets(&self, id: &BlockId, mut f: impl FnMut(usize) -> usize) -> Self {
        match self {
            CursorState::Collapsed { target_id, offset } if target_id == id => {
                Self::collapsed(*target_id, f(*offset))
            }
            CursorState::Collapsed { .. } => self.clone(),
            CursorState::Open {
                start_id,
                start_offset,
                end_id,
                end_offset,
            } => {
                let start_offset = if start_id == id { f(*start_offset) } else { *start_offset };
                let end_offset = if end_id == id { f(*end_offset) } else { *end_offset };
                Self::open(*start_id, start_offset, *end_id, end_offset)
            }
        }
    }
}

/// Why the cursor moved, so the view layer can tell model-driven moves from
/// input-driven ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CursorChangeReason {
    /// Set explicitly by a changeset's after-cursor.
    Changeset,
    /// Shifted because the text under it changed.
    ContentChanged,
    /// Moved by the user through the view.
    UiEvent,
}
