//! # Tree Collaborator
//!
//! The metadata core does not own the folder/document/page tree. It talks to
//! it through the [`TreeStore`] trait, which exposes only what propagation and
//! assignment need:
//!
//! 1. **Structure**: a node's kind, parent and direct children
//! 2. **Instances**: reading a node's [`InstanceSet`], writing or deleting one instance
//! 3. **Identity**: stable, comparable [`NodeId`]s
//!
//! Nodes reference each other only by id, never by pointer, so a walk can
//! add and remove instances while it is still visiting the subtree.
//!
//! ## Implementations
//!
//! - [`memory::MemTree`]: arena of nodes with adjacency lists; used by tests and
//!   as the in-process model.
//! - [`json::JsonTreeStore`]: a `MemTree` persisted to a JSON file.

use crate::error::Result;
use crate::kv::{InstanceSet, MetadataInstance};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub mod json;
pub mod memory;

/// Stable identity of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Uuid);

impl NodeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    Document,
    Page,
}

impl NodeKind {
    /// Folders and documents have children; pages are leaves.
    pub fn can_have_children(self) -> bool {
        !matches!(self, NodeKind::Page)
    }

    /// Pages only ever inherit metadata from their document.
    pub fn can_declare(self) -> bool {
        !matches!(self, NodeKind::Page)
    }
}

/// Abstract interface to the node tree.
///
/// Writes go through `&mut self`; reads return owned data so callers can keep
/// them while writing.
pub trait TreeStore {
    /// Kind of the node, or `NodeNotFound`.
    fn kind_of(&self, node: NodeId) -> Result<NodeKind>;

    fn parent_of(&self, node: NodeId) -> Result<Option<NodeId>>;

    /// Direct children only.
    fn children_of(&self, node: NodeId) -> Result<Vec<NodeId>>;

    fn read_instances(&self, node: NodeId) -> Result<InstanceSet>;

    /// Creates or replaces the instance with the same key on `node`.
    fn write_instance(&mut self, node: NodeId, instance: &MetadataInstance) -> Result<()>;

    /// Deletes the instance for `key`; deleting a missing key is not an error.
    fn delete_instance(&mut self, node: NodeId, key: &str) -> Result<()>;

    /// Lazily walks the full subtree below `node` (not including it).
    fn descendants_of(&self, node: NodeId) -> Descendants<'_, Self>
    where
        Self: Sized,
    {
        Descendants::new(self, node)
    }

    /// Ancestors from the parent up to the root.
    fn ancestors_of(&self, node: NodeId) -> Result<Vec<NodeId>> {
        let mut ancestors = Vec::new();
        let mut current = self.parent_of(node)?;
        while let Some(id) = current {
            ancestors.push(id);
            current = self.parent_of(id)?;
        }
        Ok(ancestors)
    }
}

/// Depth-first iterator over a subtree, fetching children on demand.
///
/// A node whose children cannot be listed is yielded as an error in its
/// place; the walk then continues with the remaining nodes.
pub struct Descendants<'a, S: TreeStore> {
    store: &'a S,
    stack: Vec<NodeId>,
    pending_root: Option<NodeId>,
}

impl<'a, S: TreeStore> Descendants<'a, S> {
    fn new(store: &'a S, root: NodeId) -> Self {
        Self {
            store,
            stack: Vec::new(),
            pending_root: Some(root),
        }
    }

    fn push_children(&mut self, node: NodeId) -> Result<()> {
        let children = self.store.children_of(node)?;
        self.stack.extend(children.into_iter().rev());
        Ok(())
    }
}

impl<S: TreeStore> Iterator for Descendants<'_, S> {
    type Item = Result<NodeId>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(root) = self.pending_root.take() {
            if let Err(err) = self.push_children(root) {
                return Some(Err(err));
            }
        }
        let node = self.stack.pop()?;
        if let Err(err) = self.push_children(node) {
            return Some(Err(err));
        }
        Some(Ok(node))
    }
}
