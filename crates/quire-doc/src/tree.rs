//! Node arena: the ordered tree of elements, blocks and documents.
//!
//! Nodes live in a flat arena and refer to one another by [`NodeHandle`]
//! (index + generation), so parent/sibling/child links never form ownership
//! cycles. A released slot bumps its generation; stale handles then fail
//! lookups with [`DocError::UnknownNode`] instead of aliasing a new node.
//!
//! A node's children come in two flavours:
//! - positional children, kept as a doubly linked sibling chain and addressed
//!   by rank (`PathSegment::Index`);
//! - slot children, held in a node-valued attribute and addressed by key
//!   (`PathSegment::Key`). A document keeps its `title` and `body` this way.
//!
//! Every structural mutation returns the [`TreeEvent`]s it caused.

use std::collections::{BTreeMap, HashMap};

use quire_types::{BlockId, Path, PathSegment};
use serde_json::Value;

use crate::delta::Delta;
use crate::text::TextRun;
use crate::{DocError, Result};

/// Node name of a document root.
pub const DOCUMENT_TYPE: &str = "document";
/// Document slot holding the optional title block.
pub const TITLE_SLOT: &str = "title";
/// Document slot holding the body container.
pub const BODY_SLOT: &str = "body";

/// Attribute names owned by the node structure itself.
pub const RESERVED_ATTRIBUTES: [&str; 3] = ["type", "children", "id"];

/// Stable reference to a node in a [`DocTree`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

/// What a node is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Plain element with children and attributes.
    Element,
    /// Element with an immutable block id.
    Block(BlockId),
    /// Document root, holding `title` and `body` slots.
    Document,
}

/// A node attribute value.
#[derive(Clone, Debug, PartialEq)]
pub enum AttrValue {
    Scalar(Value),
    Text(TextRun),
    Node(NodeHandle),
}

impl AttrValue {
    pub fn as_scalar(&self) -> Option<&Value> {
        match self {
            AttrValue::Scalar(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&TextRun> {
        match self {
            AttrValue::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<NodeHandle> {
        match self {
            AttrValue::Node(h) => Some(*h),
            _ => None,
        }
    }
}

impl From<Value> for AttrValue {
    fn from(v: Value) -> Self {
        AttrValue::Scalar(v)
    }
}

impl From<TextRun> for AttrValue {
    fn from(t: TextRun) -> Self {
        AttrValue::Text(t)
    }
}

/// A structural change to the tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TreeEvent {
    Inserted {
        parent: NodeHandle,
        child: NodeHandle,
        slot: PathSegment,
    },
    Removed {
        parent: NodeHandle,
        child: NodeHandle,
        slot: PathSegment,
    },
}

impl TreeEvent {
    pub fn child(&self) -> NodeHandle {
        match self {
            TreeEvent::Inserted { child, .. } | TreeEvent::Removed { child, .. } => *child,
        }
    }
}

#[derive(Clone, Debug)]
struct Node {
    kind: NodeKind,
    name: String,
    parent: Option<NodeHandle>,
    /// Set when held in a parent's attribute slot rather than its child chain.
    slot: Option<String>,
    prev: Option<NodeHandle>,
    next: Option<NodeHandle>,
    first_child: Option<NodeHandle>,
    last_child: Option<NodeHandle>,
    child_count: usize,
    attached: bool,
    attributes: BTreeMap<String, AttrValue>,
}

impl Node {
    fn new(kind: NodeKind, name: String) -> Self {
        Self {
            kind,
            name,
            parent: None,
            slot: None,
            prev: None,
            next: None,
            first_child: None,
            last_child: None,
            child_count: 0,
            attached: matches!(kind, NodeKind::Document),
            attributes: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug)]
struct Entry {
    generation: u32,
    node: Option<Node>,
}

/// Arena owning every node of one or more trees.
#[derive(Clone, Debug, Default)]
pub struct DocTree {
    entries: Vec<Entry>,
    free: Vec<u32>,
    /// Live blocks by id, attached or not.
    blocks: HashMap<BlockId, NodeHandle>,
}

impl DocTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, handle: NodeHandle) -> bool {
        self.node(handle).is_ok()
    }

    fn alloc(&mut self, node: Node) -> NodeHandle {
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.node = Some(node);
            return NodeHandle {
                index,
                generation: entry.generation,
            };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry {
            generation: 0,
            node: Some(node),
        });
        NodeHandle { index, generation: 0 }
    }

    fn node(&self, handle: NodeHandle) -> Result<&Node> {
        self.entries
            .get(handle.index as usize)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.node.as_ref())
            .ok_or(DocError::UnknownNode(handle))
    }

    fn node_mut(&mut self, handle: NodeHandle) -> Result<&mut Node> {
        self.entries
            .get_mut(handle.index as usize)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.node.as_mut())
            .ok_or(DocError::UnknownNode(handle))
    }

    // =========================================================================
    // Construction
    // =========================================================================

    pub fn create_element(&mut self, name: impl Into<String>) -> NodeHandle {
        self.alloc(Node::new(NodeKind::Element, name.into()))
    }

    /// Create a block with a fresh id.
    pub fn create_block(&mut self, name: impl Into<String>) -> NodeHandle {
        let id = BlockId::new();
        let handle = self.alloc(Node::new(NodeKind::Block(id), name.into()));
        self.blocks.insert(id, handle);
        handle
    }

    /// Create a block carrying an existing id (records, undo).
    pub fn create_block_with_id(&mut self, name: impl Into<String>, id: BlockId) -> Result<NodeHandle> {
        if self.blocks.contains_key(&id) {
            return Err(DocError::InvalidRecord(format!("duplicate block id {id}")));
        }
        let handle = self.alloc(Node::new(NodeKind::Block(id), name.into()));
        self.blocks.insert(id, handle);
        Ok(handle)
    }

    /// Create a document root with an empty `body` container.
    pub fn create_document(&mut self) -> NodeHandle {
        let doc = self.alloc(Node::new(NodeKind::Document, DOCUMENT_TYPE.to_string()));
        let body = self.create_element(BODY_SLOT);
        let attached = self.set_slot(doc, BODY_SLOT, body);
        debug_assert!(attached.is_ok(), "fresh body slot rejected: {attached:?}");
        doc
    }

    /// A document root with no slots, for filling from a record.
    pub(crate) fn create_bare_document(&mut self) -> NodeHandle {
        self.alloc(Node::new(NodeKind::Document, DOCUMENT_TYPE.to_string()))
    }

    /// Free a detached subtree. Returns the number of nodes released.
    pub fn release(&mut self, root: NodeHandle) -> Result<usize> {
        if self.node(root)?.parent.is_some() {
            return Err(DocError::AlreadyParented(root));
        }
        let handles = self.descendants(root);
        for h in &handles {
            let Some(entry) = self.entries.get_mut(h.index as usize) else {
                continue;
            };
            if let Some(node) = entry.node.take() {
                if let NodeKind::Block(id) = node.kind {
                    self.blocks.remove(&id);
                }
                entry.generation = entry.generation.wrapping_add(1);
                self.free.push(h.index);
            }
        }
        Ok(handles.len())
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn kind(&self, node: NodeHandle) -> Option<NodeKind> {
        self.node(node).ok().map(|n| n.kind)
    }

    pub fn node_name(&self, node: NodeHandle) -> Option<&str> {
        self.node(node).ok().map(|n| n.name.as_str())
    }

    pub fn block_id(&self, node: NodeHandle) -> Option<BlockId> {
        match self.node(node).ok()?.kind {
            NodeKind::Block(id) => Some(id),
            _ => None,
        }
    }

    /// The attached block carrying `id`.
    pub fn find_block(&self, id: &BlockId) -> Option<NodeHandle> {
        self.blocks.get(id).copied().filter(|h| self.is_attached(*h))
    }

    /// True when the node sits under a document root (or is one).
    pub fn is_attached(&self, node: NodeHandle) -> bool {
        self.node(node).is_ok_and(|n| n.attached)
    }

    pub fn parent(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.node(node).ok()?.parent
    }

    pub fn first_child(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.node(node).ok()?.first_child
    }

    pub fn last_child(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.node(node).ok()?.last_child
    }

    pub fn next_sibling(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.node(node).ok()?.next
    }

    pub fn prev_sibling(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.node(node).ok()?.prev
    }

    pub fn child_count(&self, node: NodeHandle) -> usize {
        self.node(node).map(|n| n.child_count).unwrap_or(0)
    }

    /// Positional child at `index`, found by walking the sibling chain.
    pub fn child_at(&self, parent: NodeHandle, index: usize) -> Option<NodeHandle> {
        let mut current = self.first_child(parent);
        for _ in 0..index {
            current = self.next_sibling(current?);
        }
        current
    }

    pub fn children(&self, parent: NodeHandle) -> Vec<NodeHandle> {
        let mut out = Vec::with_capacity(self.child_count(parent));
        let mut current = self.first_child(parent);
        while let Some(h) = current {
            out.push(h);
            current = self.next_sibling(h);
        }
        out
    }

    /// Rank among the parent's positional children. `None` for roots and slot
    /// children.
    pub fn index_in_parent(&self, node: NodeHandle) -> Option<usize> {
        let n = self.node(node).ok()?;
        if n.parent.is_none() || n.slot.is_some() {
            return None;
        }
        let mut index = 0;
        let mut current = n.prev;
        while let Some(h) = current {
            index += 1;
            current = self.prev_sibling(h);
        }
        Some(index)
    }

    /// Key of the parent slot holding this node, if any.
    pub fn slot_key(&self, node: NodeHandle) -> Option<&str> {
        self.node(node).ok()?.slot.as_deref()
    }

    /// Child node held in `parent`'s `key` slot.
    pub fn slot(&self, parent: NodeHandle, key: &str) -> Option<NodeHandle> {
        self.attribute(parent, key)?.as_node()
    }

    /// True when `ancestor` is a strict ancestor of `node`.
    pub fn is_ancestor(&self, ancestor: NodeHandle, node: NodeHandle) -> bool {
        let mut current = self.parent(node);
        while let Some(h) = current {
            if h == ancestor {
                return true;
            }
            current = self.parent(h);
        }
        false
    }

    /// `root` and everything below it, slot children included, in pre-order.
    pub fn descendants(&self, root: NodeHandle) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(h) = stack.pop() {
            let Ok(node) = self.node(h) else {
                continue;
            };
            out.push(h);
            let mut below: Vec<NodeHandle> = node.attributes.values().filter_map(AttrValue::as_node).collect();
            below.extend(self.children(h));
            stack.extend(below.into_iter().rev());
        }
        out
    }

    // =========================================================================
    // Attributes
    // =========================================================================

    pub fn attribute(&self, node: NodeHandle, key: &str) -> Option<&AttrValue> {
        self.node(node).ok()?.attributes.get(key)
    }

    pub fn attributes(&self, node: NodeHandle) -> Result<&BTreeMap<String, AttrValue>> {
        Ok(&self.node(node)?.attributes)
    }

    pub fn text_run(&self, node: NodeHandle, key: &str) -> Option<&TextRun> {
        self.attribute(node, key)?.as_text()
    }

    fn check_reserved(&self, node: NodeHandle, key: &str) -> Result<()> {
        self.node(node)?;
        // `id` is a block's identity; elements may not use it either, so that
        // records stay unambiguous.
        if RESERVED_ATTRIBUTES.contains(&key) {
            return Err(DocError::ReservedAttribute(key.to_string()));
        }
        Ok(())
    }

    fn check_plain_attribute(&self, node: NodeHandle, key: &str) -> Result<()> {
        self.check_reserved(node, key)?;
        if matches!(self.node(node)?.attributes.get(key), Some(AttrValue::Node(_))) {
            return Err(DocError::SlotAttribute(key.to_string()));
        }
        Ok(())
    }

    /// Set a scalar or text attribute. Returns the previous value.
    pub fn set_attribute(&mut self, node: NodeHandle, key: &str, value: AttrValue) -> Result<Option<AttrValue>> {
        self.check_plain_attribute(node, key)?;
        if matches!(value, AttrValue::Node(_)) {
            return Err(DocError::SlotAttribute(key.to_string()));
        }
        Ok(self.node_mut(node)?.attributes.insert(key.to_string(), value))
    }

    /// Remove a scalar or text attribute. Returns the removed value.
    pub fn remove_attribute(&mut self, node: NodeHandle, key: &str) -> Result<Option<AttrValue>> {
        self.check_plain_attribute(node, key)?;
        Ok(self.node_mut(node)?.attributes.remove(key))
    }

    /// Replace the text run at `key` with the result of applying `delta`.
    pub(crate) fn apply_text_delta(&mut self, node: NodeHandle, key: &str, delta: &Delta) -> Result<()> {
        let id = self.block_id(node).unwrap_or_else(BlockId::nil);
        match self.node_mut(node)?.attributes.get_mut(key) {
            Some(AttrValue::Text(run)) => {
                let base = delta.base_length();
                if base > run.len() {
                    return Err(DocError::DeltaOutOfRange {
                        id,
                        key: key.to_string(),
                        base,
                        len: run.len(),
                    });
                }
                run.apply_delta(delta);
                Ok(())
            }
            _ => Err(DocError::TextRunMissing {
                id,
                key: key.to_string(),
            }),
        }
    }

    // =========================================================================
    // Structure
    // =========================================================================

    fn check_insertable(&self, parent: NodeHandle, node: NodeHandle) -> Result<()> {
        self.node(parent)?;
        let child = self.node(node)?;
        if node == parent || self.is_ancestor(node, parent) {
            return Err(DocError::AncestorInsertion { parent, child: node });
        }
        if child.parent.is_some() {
            return Err(DocError::AlreadyParented(node));
        }
        if child.kind == NodeKind::Document {
            return Err(DocError::InvalidLocation {
                path: Path::root(),
                reason: "a document cannot be nested".to_string(),
            });
        }
        Ok(())
    }

    fn set_attached(&mut self, root: NodeHandle, attached: bool) {
        for h in self.descendants(root) {
            if let Ok(node) = self.node_mut(h) {
                node.attached = attached;
            }
        }
    }

    /// Link `node` into `parent`'s children at `index`.
    pub fn insert_child_at(&mut self, parent: NodeHandle, index: usize, node: NodeHandle) -> Result<TreeEvent> {
        self.check_insertable(parent, node)?;
        let (kind, len, last, attached) = {
            let p = self.node(parent)?;
            (p.kind, p.child_count, p.last_child, p.attached)
        };
        if kind == NodeKind::Document {
            return Err(DocError::NotAContainer { path: Path::root() });
        }
        if index > len {
            return Err(DocError::IndexOutOfBounds { index, len });
        }

        let next = self.child_at(parent, index);
        let prev = match next {
            Some(n) => self.node(n)?.prev,
            None => last,
        };
        {
            let child = self.node_mut(node)?;
            child.parent = Some(parent);
            child.slot = None;
            child.prev = prev;
            child.next = next;
        }
        match prev {
            Some(p) => self.node_mut(p)?.next = Some(node),
            None => self.node_mut(parent)?.first_child = Some(node),
        }
        match next {
            Some(n) => self.node_mut(n)?.prev = Some(node),
            None => self.node_mut(parent)?.last_child = Some(node),
        }
        self.node_mut(parent)?.child_count += 1;
        self.set_attached(node, attached);

        Ok(TreeEvent::Inserted {
            parent,
            child: node,
            slot: PathSegment::Index(index),
        })
    }

    pub fn append_child(&mut self, parent: NodeHandle, node: NodeHandle) -> Result<TreeEvent> {
        let index = self.child_count(parent);
        self.insert_child_at(parent, index, node)
    }

    /// Unlink `count` contiguous children starting at `index`.
    ///
    /// Removed subtrees stay in the arena, detached, until released.
    pub fn delete_children_at(&mut self, parent: NodeHandle, index: usize, count: usize) -> Result<Vec<TreeEvent>> {
        let len = self.node(parent)?.child_count;
        if index.checked_add(count).is_none_or(|end| end > len) {
            return Err(DocError::IndexOutOfBounds { index, len });
        }

        let mut victims = Vec::with_capacity(count);
        let mut current = self.child_at(parent, index);
        for _ in 0..count {
            let Some(h) = current else {
                break;
            };
            victims.push(h);
            current = self.next_sibling(h);
        }

        let mut events = Vec::with_capacity(victims.len());
        for (i, child) in victims.into_iter().enumerate() {
            self.unlink(child)?;
            events.push(TreeEvent::Removed {
                parent,
                child,
                slot: PathSegment::Index(index + i),
            });
        }
        Ok(events)
    }

    fn unlink(&mut self, node: NodeHandle) -> Result<()> {
        let (parent, prev, next) = {
            let n = self.node(node)?;
            (n.parent, n.prev, n.next)
        };
        let Some(parent) = parent else {
            return Ok(());
        };
        match prev {
            Some(p) => self.node_mut(p)?.next = next,
            None => self.node_mut(parent)?.first_child = next,
        }
        match next {
            Some(n) => self.node_mut(n)?.prev = prev,
            None => self.node_mut(parent)?.last_child = prev,
        }
        self.node_mut(parent)?.child_count -= 1;
        {
            let n = self.node_mut(node)?;
            n.parent = None;
            n.prev = None;
            n.next = None;
        }
        self.set_attached(node, false);
        Ok(())
    }

    /// Put `node` in `parent`'s `key` slot, detaching any previous occupant.
    pub fn set_slot(&mut self, parent: NodeHandle, key: &str, node: NodeHandle) -> Result<Vec<TreeEvent>> {
        self.check_reserved(parent, key)?;
        self.check_insertable(parent, node)?;

        let mut events = Vec::new();
        if let Some(event) = self.take_slot(parent, key)? {
            events.push(event);
        }
        {
            let child = self.node_mut(node)?;
            child.parent = Some(parent);
            child.slot = Some(key.to_string());
        }
        let attached = {
            let p = self.node_mut(parent)?;
            p.attributes.insert(key.to_string(), AttrValue::Node(node));
            p.attached
        };
        self.set_attached(node, attached);

        events.push(TreeEvent::Inserted {
            parent,
            child: node,
            slot: PathSegment::Key(key.to_string()),
        });
        Ok(events)
    }

    /// Detach the node in `parent`'s `key` slot, if there is one.
    pub fn take_slot(&mut self, parent: NodeHandle, key: &str) -> Result<Option<TreeEvent>> {
        let child = match self.node(parent)?.attributes.get(key) {
            Some(AttrValue::Node(h)) => *h,
            _ => return Ok(None),
        };
        self.node_mut(parent)?.attributes.remove(key);
        {
            let n = self.node_mut(child)?;
            n.parent = None;
            n.slot = None;
        }
        self.set_attached(child, false);
        Ok(Some(TreeEvent::Removed {
            parent,
            child,
            slot: PathSegment::Key(key.to_string()),
        }))
    }

    // =========================================================================
    // Paths
    // =========================================================================

    /// Path from the document root down to `node`.
    pub fn path_of(&self, node: NodeHandle) -> Result<Path> {
        let mut segments = Vec::new();
        let mut current = node;
        loop {
            let n = self.node(current)?;
            let Some(parent) = n.parent else {
                if n.kind == NodeKind::Document {
                    break;
                }
                return Err(DocError::Detached(node));
            };
            let segment = match &n.slot {
                Some(key) => PathSegment::Key(key.clone()),
                None => PathSegment::Index(self.index_in_parent(current).ok_or(DocError::Detached(node))?),
            };
            segments.push(segment);
            current = parent;
        }
        segments.reverse();
        Ok(Path::new(segments))
    }

    /// Walk `path` down from `root`.
    pub fn resolve(&self, root: NodeHandle, path: &Path) -> Result<NodeHandle> {
        let mut current = root;
        self.node(root)?;
        for (depth, segment) in path.segments().iter().enumerate() {
            let node = self.node(current)?;
            current = match segment {
                PathSegment::Index(i) => {
                    if node.kind == NodeKind::Document {
                        return Err(DocError::NotAContainer {
                            path: Path::new(path.segments()[..depth].to_vec()),
                        });
                    }
                    self.child_at(current, *i).ok_or_else(|| DocError::PathNotFound {
                        path: path.clone(),
                        depth,
                    })?
                }
                PathSegment::Key(key) => match node.attributes.get(key) {
                    Some(AttrValue::Node(h)) => *h,
                    Some(_) => {
                        return Err(DocError::NotAContainer {
                            path: Path::new(path.segments()[..=depth].to_vec()),
                        });
                    }
                    None => {
                        return Err(DocError::PathNotFound {
                            path: path.clone(),
                            depth,
                        });
                    }
                },
            };
        }
        Ok(current)
    }
}
