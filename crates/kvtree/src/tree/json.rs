use super::memory::MemTree;
use super::{NodeId, NodeKind, TreeStore};
use crate::error::{KvError, Result};
use crate::kv::{InstanceSet, MetadataInstance};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A [`MemTree`] backed by a JSON file.
///
/// The whole tree is loaded on [`open`](Self::open) and written back on
/// [`save`](Self::save). Writes go to a temporary file in the same directory
/// that is then renamed over the data file, so a crash never leaves a
/// half-written tree behind.
pub struct JsonTreeStore {
    path: PathBuf,
    tree: MemTree,
}

impl JsonTreeStore {
    /// Opens the store at `path`; a missing file is an empty tree.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tree = if path.exists() {
            let content = fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            MemTree::new()
        };
        tracing::debug!(
            target = "kvtree::store",
            path = %path.display(),
            nodes = tree.len(),
            "opened tree"
        );
        Ok(Self { path, tree })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn tree(&self) -> &MemTree {
        &self.tree
    }

    /// Structural edits (adding, moving, removing nodes) go through the arena.
    pub fn tree_mut(&mut self) -> &mut MemTree {
        &mut self.tree
    }

    pub fn save(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dir.exists() {
            fs::create_dir_all(&dir)?;
        }

        let content = serde_json::to_string_pretty(&self.tree)?;
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| KvError::Store(format!("{} is not a file path", self.path.display())))?
            .to_string_lossy();
        let tmp_file = dir.join(format!(".{}-{}.tmp", file_name, Uuid::new_v4()));
        fs::write(&tmp_file, content)?;
        fs::rename(&tmp_file, &self.path)?;

        tracing::debug!(
            target = "kvtree::store",
            path = %self.path.display(),
            nodes = self.tree.len(),
            "saved tree"
        );
        Ok(())
    }
}

impl TreeStore for JsonTreeStore {
    fn kind_of(&self, node: NodeId) -> Result<NodeKind> {
        self.tree.kind_of(node)
    }

    fn parent_of(&self, node: NodeId) -> Result<Option<NodeId>> {
        self.tree.parent_of(node)
    }

    fn children_of(&self, node: NodeId) -> Result<Vec<NodeId>> {
        self.tree.children_of(node)
    }

    fn read_instances(&self, node: NodeId) -> Result<InstanceSet> {
        self.tree.read_instances(node)
    }

    fn write_instance(&mut self, node: NodeId, instance: &MetadataInstance) -> Result<()> {
        self.tree.write_instance(node, instance)
    }

    fn delete_instance(&mut self, node: NodeId, key: &str) -> Result<()> {
        self.tree.delete_instance(node, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvType, SchemaEntry};
    use crate::test_utils::TestEnv;

    #[test]
    fn writes_go_through_to_the_tree() {
        let env = TestEnv::new();
        let mut store = env.open();
        let folder = store.tree_mut().add_folder("Home", None).unwrap();
        let entry = SchemaEntry::new("note", KvType::Text, "");

        store
            .write_instance(folder, &MetadataInstance::new(&entry, folder))
            .unwrap();
        assert!(store.tree().read_instances(folder).unwrap().contains("note"));

        store.delete_instance(folder, "note").unwrap();
        assert!(store.read_instances(folder).unwrap().is_empty());
    }

    #[test]
    fn save_round_trips_structure() {
        let env = TestEnv::new();
        let mut store = env.open();
        let folder = store.tree_mut().add_folder("Home", None).unwrap();
        let doc = store.tree_mut().add_document("a.pdf", Some(folder), 1).unwrap();
        store.save().unwrap();

        let reopened = env.open();
        assert_eq!(reopened.path(), env.path.as_path());
        assert_eq!(reopened.parent_of(doc).unwrap(), Some(folder));
        assert_eq!(reopened.children_of(doc).unwrap().len(), 1);
        assert_eq!(reopened.tree().roots(), &[folder]);
    }
}
