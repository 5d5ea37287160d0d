//! Shared identity, addressing and selection types for Quire.
//!
//! This crate is the leaf of the workspace: typed IDs, tree paths and cursor
//! states. It has **no internal quire dependencies**, so both the document
//! engine and whatever view layer sits on top can speak the same vocabulary.
//!
//! # Key Types
//!
//! |-------------------|------------------------------------------------------|
//! | Type              | Purpose                                              |
//! |-------------------|------------------------------------------------------|
//! | [`BlockId`]       | Version-stable identity of a block node              |
//! | [`UserId`]        | Author of a changeset                                |
//! | [`Path`]          | Structural location (sibling ranks + attribute keys) |
//! | [`CursorState`]   | Collapsed or ranged selection addressed by block id  |
//! |-------------------|------------------------------------------------------|

pub mod cursor;
pub mod ids;
pub mod path;

pub use cursor::{CursorChangeReason, CursorState};
pub use ids::{BlockId, UserId};
pub use path::{Path, PathParseError, PathSegment};
