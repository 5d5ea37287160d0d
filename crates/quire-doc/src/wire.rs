//! Changeset wire format.
//!
//! A changeset travels as one camelCase JSON object:
//!
//! ```text
//! {"userId": "…", "version": 7, "operations": [{"op": "text-edit", …}],
//!  "beforeCursor": {…} | null, "afterCursor": {…}, "forceUpdate": false,
//!  "options": {"updateView": true, "ignoreCursor": false, "record": "undo", "refreshCursor": false}}
//! ```
//!
//! Retain and delete lengths, and cursor offsets, count Unicode scalar
//! values (Rust `char`s), with an embed counting 1. Peers that count UTF-16
//! code units must convert offsets for text outside the Basic Multilingual
//! Plane.
//!
//! Transport and retry live outside the engine; these are pure conversions.

use serde_json::Value;

use crate::Result;
use crate::changeset::FinalizedChangeset;

pub fn encode(changeset: &FinalizedChangeset) -> Result<String> {
    Ok(serde_json::to_string(changeset)?)
}

pub fn decode(text: &str) -> Result<FinalizedChangeset> {
    Ok(serde_json::from_str(text)?)
}

pub fn encode_value(changeset: &FinalizedChangeset) -> Result<Value> {
    Ok(serde_json::to_value(changeset)?)
}

pub fn decode_value(value: Value) -> Result<FinalizedChangeset> {
    Ok(serde_json::from_value(value)?)
}
