use super::{NodeId, NodeKind, TreeStore};
use crate::error::{KvError, Result};
use crate::kv::{InstanceSet, MetadataInstance};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEntry {
    pub kind: NodeKind,
    pub title: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    #[serde(default)]
    pub instances: InstanceSet,
}

/// In-memory node arena.
///
/// Nodes live in one map keyed by [`NodeId`]; structure is kept as parent id
/// plus ordered child ids. Structural rules:
/// - folders hold folders and documents
/// - documents hold pages
/// - pages hold nothing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemTree {
    nodes: HashMap<NodeId, NodeEntry>,
    roots: Vec<NodeId>,
    #[serde(skip)]
    failing_writes: HashSet<NodeId>,
}

impl MemTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(&id)
    }

    pub fn title(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(&id).map(|n| n.title.as_str())
    }

    pub fn add_folder(&mut self, title: &str, parent: Option<NodeId>) -> Result<NodeId> {
        self.add_node(NodeKind::Folder, title, parent)
    }

    /// Adds a document with `page_count` pages titled `page 1..=n`.
    pub fn add_document(
        &mut self,
        title: &str,
        parent: Option<NodeId>,
        page_count: usize,
    ) -> Result<NodeId> {
        let doc = self.add_node(NodeKind::Document, title, parent)?;
        for number in 1..=page_count {
            self.add_node(NodeKind::Page, &format!("page {number}"), Some(doc))?;
        }
        Ok(doc)
    }

    pub fn add_page(&mut self, document: NodeId) -> Result<NodeId> {
        let number = self.entry(document)?.children.len() + 1;
        self.add_node(NodeKind::Page, &format!("page {number}"), Some(document))
    }

    pub fn add_node(
        &mut self,
        kind: NodeKind,
        title: &str,
        parent: Option<NodeId>,
    ) -> Result<NodeId> {
        if let Some(parent_id) = parent {
            self.check_placement(kind, parent_id)?;
        } else if kind == NodeKind::Page {
            return Err(KvError::InvalidTarget(
                "a page must belong to a document".to_string(),
            ));
        }

        let id = NodeId::new();
        self.nodes.insert(
            id,
            NodeEntry {
                kind,
                title: title.to_string(),
                parent,
                children: Vec::new(),
                instances: InstanceSet::new(),
            },
        );
        self.link(id, parent);
        Ok(id)
    }

    /// Re-parents `id`. Instances are not touched; callers re-run inheritance.
    pub fn move_node(&mut self, id: NodeId, new_parent: Option<NodeId>) -> Result<()> {
        let kind = self.entry(id)?.kind;
        if let Some(parent_id) = new_parent {
            self.check_placement(kind, parent_id)?;
            if parent_id == id || self.is_ancestor(id, parent_id)? {
                return Err(KvError::InvalidTarget(format!(
                    "cannot move {id} into its own subtree"
                )));
            }
        } else if kind == NodeKind::Page {
            return Err(KvError::InvalidTarget(
                "a page must belong to a document".to_string(),
            ));
        }

        self.unlink(id)?;
        self.link(id, new_parent);
        if let Some(entry) = self.nodes.get_mut(&id) {
            entry.parent = new_parent;
        }
        Ok(())
    }

    /// Removes `id` and its whole subtree, instances included.
    pub fn remove_node(&mut self, id: NodeId) -> Result<()> {
        self.unlink(id)?;
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(entry) = self.nodes.remove(&current) {
                stack.extend(entry.children);
            }
        }
        Ok(())
    }

    /// Makes every write to `node` fail, for exercising error paths.
    pub fn fail_writes_on(&mut self, node: NodeId) {
        self.failing_writes.insert(node);
    }

    pub fn clear_write_failures(&mut self) {
        self.failing_writes.clear();
    }

    fn entry(&self, id: NodeId) -> Result<&NodeEntry> {
        self.nodes.get(&id).ok_or(KvError::NodeNotFound(id))
    }

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut NodeEntry> {
        self.nodes.get_mut(&id).ok_or(KvError::NodeNotFound(id))
    }

    fn check_placement(&self, kind: NodeKind, parent: NodeId) -> Result<()> {
        let parent_kind = self.entry(parent)?.kind;
        let allowed = match parent_kind {
            NodeKind::Folder => matches!(kind, NodeKind::Folder | NodeKind::Document),
            NodeKind::Document => kind == NodeKind::Page,
            NodeKind::Page => false,
        };
        if allowed {
            Ok(())
        } else {
            Err(KvError::InvalidTarget(format!(
                "a {kind:?} cannot be placed under a {parent_kind:?}"
            )))
        }
    }

    /// Whether `ancestor` lies on the parent chain of `node`.
    fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> Result<bool> {
        let mut current = self.entry(node)?.parent;
        while let Some(id) = current {
            if id == ancestor {
                return Ok(true);
            }
            current = self.entry(id)?.parent;
        }
        Ok(false)
    }

    fn link(&mut self, id: NodeId, parent: Option<NodeId>) {
        if let Some(parent_entry) = parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent_entry.children.push(id);
        } else {
            self.roots.push(id);
        }
    }

    fn unlink(&mut self, id: NodeId) -> Result<()> {
        let parent = self.entry(id)?.parent;
        match parent {
            Some(parent) => self.entry_mut(parent)?.children.retain(|c| *c != id),
            None => self.roots.retain(|r| *r != id),
        }
        Ok(())
    }

    fn check_writable(&self, node: NodeId) -> Result<()> {
        if self.failing_writes.contains(&node) {
            return Err(KvError::Store(format!("simulated write error on {node}")));
        }
        Ok(())
    }
}

impl TreeStore for MemTree {
    fn kind_of(&self, node: NodeId) -> Result<NodeKind> {
        Ok(self.entry(node)?.kind)
    }

    fn parent_of(&self, node: NodeId) -> Result<Option<NodeId>> {
        Ok(self.entry(node)?.parent)
    }

    fn children_of(&self, node: NodeId) -> Result<Vec<NodeId>> {
        Ok(self.entry(node)?.children.clone())
    }

    fn read_instances(&self, node: NodeId) -> Result<InstanceSet> {
        Ok(self.entry(node)?.instances.clone())
    }

    fn write_instance(&mut self, node: NodeId, instance: &MetadataInstance) -> Result<()> {
        self.check_writable(node)?;
        self.entry_mut(node)?.instances.upsert(instance.clone());
        Ok(())
    }

    fn delete_instance(&mut self, node: NodeId, key: &str) -> Result<()> {
        self.check_writable(node)?;
        self.entry_mut(node)?.instances.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvType, SchemaEntry};

    #[test]
    fn document_gets_pages() {
        let mut tree = MemTree::new();
        let folder = tree.add_folder("Folder_A", None).unwrap();
        let doc = tree.add_document("document.pdf", Some(folder), 5).unwrap();

        assert_eq!(tree.children_of(folder).unwrap(), vec![doc]);
        let pages = tree.children_of(doc).unwrap();
        assert_eq!(pages.len(), 5);
        for page in pages {
            assert_eq!(tree.kind_of(page).unwrap(), NodeKind::Page);
            assert_eq!(tree.parent_of(page).unwrap(), Some(doc));
        }
        assert_eq!(tree.roots(), &[folder]);
    }

    #[test]
    fn placement_rules_are_enforced() {
        let mut tree = MemTree::new();
        let folder = tree.add_folder("f", None).unwrap();
        let doc = tree.add_document("d", Some(folder), 1).unwrap();
        let page = tree.children_of(doc).unwrap()[0];

        assert!(tree.add_node(NodeKind::Page, "p", Some(folder)).is_err());
        assert!(tree.add_node(NodeKind::Page, "p", None).is_err());
        assert!(tree.add_folder("nested", Some(doc)).is_err());
        assert!(tree.add_document("d2", Some(page), 0).is_err());
    }

    #[test]
    fn unknown_node_is_not_found() {
        let tree = MemTree::new();
        let ghost = NodeId::new();
        assert!(matches!(
            tree.children_of(ghost),
            Err(KvError::NodeNotFound(id)) if id == ghost
        ));
    }

    #[test]
    fn move_node_relinks_and_rejects_cycles() {
        let mut tree = MemTree::new();
        let a = tree.add_folder("a", None).unwrap();
        let b = tree.add_folder("b", Some(a)).unwrap();
        let doc = tree.add_document("d", Some(a), 0).unwrap();

        tree.move_node(doc, Some(b)).unwrap();
        assert_eq!(tree.children_of(a).unwrap(), vec![b]);
        assert_eq!(tree.children_of(b).unwrap(), vec![doc]);
        assert_eq!(tree.parent_of(doc).unwrap(), Some(b));

        assert!(tree.move_node(a, Some(b)).is_err());
        assert!(tree.move_node(a, Some(a)).is_err());

        tree.move_node(b, None).unwrap();
        assert_eq!(tree.roots(), &[a, b]);
    }

    #[test]
    fn remove_node_drops_subtree() {
        let mut tree = MemTree::new();
        let a = tree.add_folder("a", None).unwrap();
        let doc = tree.add_document("d", Some(a), 3).unwrap();
        assert_eq!(tree.len(), 5);

        tree.remove_node(doc).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.children_of(a).unwrap().is_empty());
    }

    #[test]
    fn instance_io() {
        let mut tree = MemTree::new();
        let folder = tree.add_folder("f", None).unwrap();
        let price = SchemaEntry::new("price", KvType::Money, "dd,cc");
        let inst = MetadataInstance::new(&price, folder);

        tree.write_instance(folder, &inst).unwrap();
        assert_eq!(tree.read_instances(folder).unwrap().get("price"), Some(&inst));

        tree.delete_instance(folder, "price").unwrap();
        tree.delete_instance(folder, "price").unwrap();
        assert!(tree.read_instances(folder).unwrap().is_empty());
    }

    #[test]
    fn simulated_write_failure() {
        let mut tree = MemTree::new();
        let folder = tree.add_folder("f", None).unwrap();
        let inst = MetadataInstance::new(&SchemaEntry::new("k", KvType::Text, ""), folder);

        tree.fail_writes_on(folder);
        assert!(matches!(
            tree.write_instance(folder, &inst),
            Err(KvError::Store(_))
        ));

        tree.clear_write_failures();
        assert!(tree.write_instance(folder, &inst).is_ok());
    }
}
