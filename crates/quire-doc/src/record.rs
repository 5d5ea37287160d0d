//! Serialized node records.
//!
//! A [`NodeRecord`] is the plain-data form of a subtree, used for snapshots
//! and carried by insert/remove operations:
//!
//! ```text
//! {"type": "paragraph", "id": "0190…", "level": 2,
//!  "textContent": {"type": "rich-text", "ops": [{"insert": "Hello"}]},
//!  "children": [...]}
//! ```
//!
//! Attribute values are read back by shape: an object whose `type` is
//! `"rich-text"` is a text run, an object with any other string `type` is a
//! nested node record (a slot child), anything else is a scalar.

use std::collections::BTreeMap;

use quire_types::BlockId;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::delta::Delta;
use crate::text::TextRun;
use crate::tree::{AttrValue, DOCUMENT_TYPE, DocTree, NodeHandle, NodeKind};
use crate::{DocError, Result};

/// `type` tag of a serialized text run.
pub const RICH_TEXT_TYPE: &str = "rich-text";

/// Plain-data form of a node and everything below it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(rename = "type")]
    pub node_type: String,
    /// Present exactly when the node is a block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<BlockId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeRecord>,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, Value>,
}

impl NodeRecord {
    pub fn element(node_type: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            id: None,
            children: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// A block record with a fresh id.
    pub fn block(node_type: impl Into<String>) -> Self {
        Self::block_with_id(node_type, BlockId::new())
    }

    pub fn block_with_id(node_type: impl Into<String>, id: BlockId) -> Self {
        Self {
            id: Some(id),
            ..Self::element(node_type)
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Attach a text run under `key`.
    pub fn with_text(self, key: impl Into<String>, run: &TextRun) -> Self {
        self.with_attribute(key, text_run_to_value(run))
    }

    pub fn with_child(mut self, child: NodeRecord) -> Self {
        self.children.push(child);
        self
    }

    pub fn is_document(&self) -> bool {
        self.node_type == DOCUMENT_TYPE
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(|e| DocError::InvalidRecord(e.to_string()))
    }
}

enum ValueShape {
    Scalar,
    RichText,
    Node,
}

fn shape_of(value: &Value) -> ValueShape {
    match value.get("type").and_then(Value::as_str) {
        Some(RICH_TEXT_TYPE) => ValueShape::RichText,
        Some(_) if value.is_object() => ValueShape::Node,
        _ => ValueShape::Scalar,
    }
}

/// Serialized form of a text run.
pub fn text_run_to_value(run: &TextRun) -> Value {
    json!({ "type": RICH_TEXT_TYPE, "ops": run.delta() })
}

/// Parse a serialized text run. Its ops must be inserts only.
pub fn text_run_from_value(value: &Value) -> Result<TextRun> {
    let ops = value
        .get("ops")
        .cloned()
        .ok_or_else(|| DocError::InvalidRecord("rich-text value without ops".to_string()))?;
    let delta: Delta = serde_json::from_value(ops).map_err(|e| DocError::InvalidRecord(e.to_string()))?;
    if !delta.is_document() {
        return Err(DocError::InvalidRecord(
            "rich-text ops must contain only inserts".to_string(),
        ));
    }
    Ok(TextRun::from_delta(delta))
}

/// Decode a scalar or rich-text attribute value. Node records are rejected:
/// those go through the slot API.
pub fn attr_from_value(key: &str, value: &Value) -> Result<AttrValue> {
    match shape_of(value) {
        ValueShape::Scalar => Ok(AttrValue::Scalar(value.clone())),
        ValueShape::RichText => Ok(AttrValue::Text(text_run_from_value(value)?)),
        ValueShape::Node => Err(DocError::SlotAttribute(key.to_string())),
    }
}

impl DocTree {
    /// Serialize an attribute value; slot children become nested records.
    pub fn attr_to_value(&self, value: &AttrValue) -> Result<Value> {
        match value {
            AttrValue::Scalar(v) => Ok(v.clone()),
            AttrValue::Text(run) => Ok(text_run_to_value(run)),
            AttrValue::Node(h) => self.to_record(*h)?.to_value(),
        }
    }

    /// Snapshot the subtree rooted at `node`.
    pub fn to_record(&self, node: NodeHandle) -> Result<NodeRecord> {
        let kind = self.kind(node).ok_or(DocError::UnknownNode(node))?;
        let mut attributes = BTreeMap::new();
        for (key, value) in self.attributes(node)? {
            attributes.insert(key.clone(), self.attr_to_value(value)?);
        }
        let children = self
            .children(node)
            .into_iter()
            .map(|child| self.to_record(child))
            .collect::<Result<Vec<_>>>()?;
        Ok(NodeRecord {
            node_type: self.node_name(node).unwrap_or_default().to_string(),
            id: match kind {
                NodeKind::Block(id) => Some(id),
                _ => None,
            },
            children,
            attributes,
        })
    }

    /// Build an unparented subtree from `record`. On error nothing is left
    /// behind in the arena.
    pub fn insert_record(&mut self, record: &NodeRecord) -> Result<NodeHandle> {
        let handle = if record.is_document() {
            self.create_bare_document()
        } else if let Some(id) = record.id {
            self.create_block_with_id(record.node_type.clone(), id)?
        } else {
            self.create_element(record.node_type.clone())
        };
        match self.fill_from_record(handle, record) {
            Ok(()) => Ok(handle),
            Err(e) => {
                let _ = self.release(handle);
                Err(e)
            }
        }
    }

    fn fill_from_record(&mut self, handle: NodeHandle, record: &NodeRecord) -> Result<()> {
        for (key, value) in &record.attributes {
            if let ValueShape::Node = shape_of(value) {
                let child_record = NodeRecord::from_value(value.clone())?;
                let child = self.insert_record(&child_record)?;
                if let Err(e) = self.set_slot(handle, key, child) {
                    let _ = self.release(child);
                    return Err(e);
                }
            } else {
                self.set_attribute(handle, key, attr_from_value(key, value)?)?;
            }
        }
        for child_record in &record.children {
            let child = self.insert_record(child_record)?;
            if let Err(e) = self.append_child(handle, child) {
                let _ = self.release(child);
                return Err(e);
            }
        }
        Ok(())
    }
}
