use crate::tree::json::JsonTreeStore;
use crate::tree::memory::MemTree;
use crate::tree::{NodeId, TreeStore};
use std::path::PathBuf;
use tempfile::TempDir;

/// A folder holding one document with `n` pages, the smallest tree that
/// exercises every node kind.
pub struct TreeFixture {
    pub tree: MemTree,
    pub folder: NodeId,
    pub document: NodeId,
    pub pages: Vec<NodeId>,
}

impl TreeFixture {
    pub fn folder_with_document(page_count: usize) -> Self {
        let mut tree = MemTree::new();
        let folder = tree.add_folder("Folder_A", None).expect("add folder");
        let document = tree
            .add_document("document.pdf", Some(folder), page_count)
            .expect("add document");
        let pages = tree.children_of(document).expect("list pages");
        Self {
            tree,
            folder,
            document,
            pages,
        }
    }

    pub fn document_and_pages(&self) -> Vec<NodeId> {
        std::iter::once(self.document)
            .chain(self.pages.iter().copied())
            .collect()
    }
}

pub struct TestEnv {
    // Keeps the directory alive until the test is done
    pub _temp_dir: TempDir,
    pub path: PathBuf,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("failed to create temp dir");
        let path = temp_dir.path().join("kvtree.json");
        Self {
            _temp_dir: temp_dir,
            path,
        }
    }

    pub fn open(&self) -> JsonTreeStore {
        JsonTreeStore::open(&self.path).expect("open store")
    }
}
