//! Error types for document operations.

use quire_types::{BlockId, Path};
use thiserror::Error;

use crate::tree::NodeHandle;

/// Errors that can occur while building, applying or decoding changes.
///
/// Structural violations are raised before the tree is touched. Addressing
/// errors raised while applying a changeset mean the operation stream and the
/// tree have diverged; callers should refetch a fresh snapshot.
#[derive(Error, Debug)]
pub enum DocError {
    /// Inserting a node into its own subtree.
    #[error("cannot insert node {child:?} under its own descendant {parent:?}")]
    AncestorInsertion { parent: NodeHandle, child: NodeHandle },

    /// Inserting a node that already has a parent.
    #[error("node {0:?} already has a parent")]
    AlreadyParented(NodeHandle),

    /// Path resolution hit a missing child or slot.
    #[error("no node at {path} (missing segment at depth {depth})")]
    PathNotFound { path: Path, depth: usize },

    /// Path resolution tried to index into something that holds no children.
    #[error("node at {path} is not a container")]
    NotAContainer { path: Path },

    /// Reverse lookup on a node that is not attached to a document.
    #[error("node {0:?} is not attached to a document")]
    Detached(NodeHandle),

    /// Handle refers to a released or never-allocated arena slot.
    #[error("unknown node handle {0:?}")]
    UnknownNode(NodeHandle),

    /// No attached block carries this id.
    #[error("block not found: {0:?}")]
    BlockNotFound(BlockId),

    /// Attempted to set a structural attribute through the attribute API.
    #[error("attribute {0:?} is reserved")]
    ReservedAttribute(String),

    /// Attribute holds (or would hold) a child node; use the slot API.
    #[error("attribute {0:?} is a node slot")]
    SlotAttribute(String),

    /// Text edit addressed an attribute that is not a text run.
    #[error("block {id:?} has no text run at {key:?}")]
    TextRunMissing { id: BlockId, key: String },

    /// Text delta reaches past the end of the run it is applied to.
    #[error("delta for block {id:?} at {key:?} spans {base} chars, run has {len}")]
    DeltaOutOfRange {
        id: BlockId,
        key: String,
        base: usize,
        len: usize,
    },

    /// Child index past the end of the children list.
    #[error("index {index} out of bounds for {len} children")]
    IndexOutOfBounds { index: usize, len: usize },

    /// A stored node record could not be turned into a node.
    #[error("invalid node record: {0}")]
    InvalidRecord(String),

    /// Operation location cannot address what the operation needs.
    #[error("invalid location {path}: {reason}")]
    InvalidLocation { path: Path, reason: String },

    /// History only takes versions past its latest one.
    #[error("version {version} is not past the latest recorded version {latest}")]
    VersionOrder { latest: u64, version: u64 },

    /// Changeset history no longer holds a version needed for rebase.
    #[error("version {0} is not in history")]
    MissingVersion(u64),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration file could not be parsed.
    #[error("config error: {0}")]
    Config(#[from] ron::error::SpannedError),

    /// Configuration file could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for DocError {
    fn from(e: serde_json::Error) -> Self {
        DocError::Serialization(e.to_string())
    }
}
