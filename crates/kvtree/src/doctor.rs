//! Consistency check for metadata in a subtree.
//!
//! Propagation can stop halfway (a failed write), and stores can be edited
//! behind the engine's back. `doctor` walks a subtree parent-first and checks
//! every node against what its parent provides:
//!
//! - **missing**: the parent provides a key the node lacks
//! - **orphaned**: an inherited instance whose key the parent no longer provides
//! - **mismatched**: an inherited instance whose origin, type or format differs
//!   from the parent's
//! - **page declarations**: a page that declares a key itself
//! - **stale**: a stored virtual value that differs from the recomputed one
//! - **unparsable**: a raw value that no longer parses under its format
//!
//! With `fix` set, each finding is repaired in place. Parents are repaired
//! before their children are checked, so one pass is enough. Realigning an
//! instance to its parent's format converts its value; a value the new format
//! cannot hold is reset and counted in [`DoctorReport::dropped`].

use crate::error::Result;
use crate::kv::{InstanceSet, MetadataInstance, Redefinition, ValueOptions};
use crate::tree::{NodeId, NodeKind, TreeStore};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DoctorReport {
    pub nodes_checked: usize,
    pub missing: usize,
    pub orphaned: usize,
    pub mismatched: usize,
    pub page_declarations: usize,
    pub stale: usize,
    pub unparsable: usize,
    pub fixed: usize,
    /// Values reset by a repair because the realigned format cannot hold them
    pub dropped: usize,
}

impl DoctorReport {
    pub fn issues(&self) -> usize {
        self.missing
            + self.orphaned
            + self.mismatched
            + self.page_declarations
            + self.stale
            + self.unparsable
    }

    pub fn is_clean(&self) -> bool {
        self.issues() == 0
    }
}

#[tracing::instrument(skip(store, options))]
pub fn doctor<S: TreeStore>(
    store: &mut S,
    options: &ValueOptions,
    root: NodeId,
    fix: bool,
) -> Result<DoctorReport> {
    let mut nodes = vec![root];
    for node in store.descendants_of(root) {
        nodes.push(node?);
    }

    let mut report = DoctorReport::default();
    for node in nodes {
        check_node(store, options, node, fix, &mut report).map_err(|e| e.at_node(node))?;
        report.nodes_checked += 1;
    }

    if report.is_clean() {
        tracing::info!(
            target = "kvtree::doctor",
            %root,
            nodes = report.nodes_checked,
            "no inconsistencies found"
        );
    } else {
        tracing::warn!(
            target = "kvtree::doctor",
            %root,
            issues = report.issues(),
            fixed = report.fixed,
            dropped = report.dropped,
            "inconsistencies found"
        );
    }
    Ok(report)
}

fn check_node<S: TreeStore>(
    store: &mut S,
    options: &ValueOptions,
    node: NodeId,
    fix: bool,
    report: &mut DoctorReport,
) -> Result<()> {
    let kind = store.kind_of(node)?;
    let provided = match store.parent_of(node)? {
        Some(parent) => store.read_instances(parent)?,
        None => InstanceSet::new(),
    };
    let own = store.read_instances(node)?;

    for existing in &own {
        let mut instance = existing.clone();

        if instance.is_declared_by(node) {
            if kind == NodeKind::Page {
                report.page_declarations += 1;
                tracing::debug!(
                    target = "kvtree::doctor",
                    %node,
                    key = %instance.key,
                    "page declares a key"
                );
                if fix {
                    repair_from_parent(store, options, node, instance, &provided, report)?;
                    report.fixed += 1;
                }
                continue;
            }
        } else {
            match provided.get(&instance.key) {
                None => {
                    report.orphaned += 1;
                    tracing::debug!(
                        target = "kvtree::doctor",
                        %node,
                        key = %instance.key,
                        "orphaned instance"
                    );
                    if fix {
                        store.delete_instance(node, &instance.key)?;
                        report.fixed += 1;
                    }
                    continue;
                }
                Some(source)
                    if source.origin != instance.origin
                        || !instance.matches_schema(&source.schema_entry()) =>
                {
                    report.mismatched += 1;
                    tracing::debug!(
                        target = "kvtree::doctor",
                        %node,
                        key = %instance.key,
                        "instance out of date"
                    );
                    if fix {
                        realign(&mut instance, source, node, options, report);
                        store.write_instance(node, &instance)?;
                        report.fixed += 1;
                    }
                    continue;
                }
                Some(_) => {}
            }
        }

        match instance.refresh(options) {
            Ok(false) => {}
            Ok(true) => {
                report.stale += 1;
                tracing::debug!(
                    target = "kvtree::doctor",
                    %node,
                    key = %instance.key,
                    "stale virtual value"
                );
                if fix {
                    store.write_instance(node, &instance)?;
                    report.fixed += 1;
                }
            }
            Err(err) => {
                report.unparsable += 1;
                tracing::warn!(target = "kvtree::doctor", %node, error = %err, "unparsable value");
                if fix {
                    instance.set_value(None, options)?;
                    store.write_instance(node, &instance)?;
                    report.fixed += 1;
                }
            }
        }
    }

    for source in provided.iter().filter(|p| !own.contains(&p.key)) {
        report.missing += 1;
        tracing::debug!(
            target = "kvtree::doctor",
            %node,
            key = %source.key,
            "missing inherited instance"
        );
        if fix {
            let restored = MetadataInstance::new(&source.schema_entry(), source.origin);
            store.write_instance(node, &restored)?;
            report.fixed += 1;
        }
    }

    Ok(())
}

/// Replaces a page's own declaration with its document's, or drops it.
fn repair_from_parent<S: TreeStore>(
    store: &mut S,
    options: &ValueOptions,
    node: NodeId,
    mut instance: MetadataInstance,
    provided: &InstanceSet,
    report: &mut DoctorReport,
) -> Result<()> {
    match provided.get(&instance.key) {
        Some(source) => {
            realign(&mut instance, source, node, options, report);
            store.write_instance(node, &instance)
        }
        None => store.delete_instance(node, &instance.key),
    }
}

/// Redefines `instance` after `source`, counting a value the new format drops.
fn realign(
    instance: &mut MetadataInstance,
    source: &MetadataInstance,
    node: NodeId,
    options: &ValueOptions,
    report: &mut DoctorReport,
) {
    let outcome = instance.redefine(&source.schema_entry(), source.origin, options);
    if outcome == Redefinition::Dropped {
        report.dropped += 1;
        tracing::warn!(
            target = "kvtree::doctor",
            %node,
            key = %source.key,
            format = %source.kv_format,
            "value cannot be written in the parent's format; cleared"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvType, SchemaEntry};
    use crate::propagation::declare;
    use crate::test_utils::TreeFixture;

    fn opts() -> ValueOptions {
        ValueOptions::default()
    }

    fn price() -> SchemaEntry {
        SchemaEntry::new("price", KvType::Money, "dd,cc")
    }

    #[test]
    fn consistent_tree_is_clean() {
        let mut fx = TreeFixture::folder_with_document(3);
        declare(&mut fx.tree, &opts(), fx.folder, &price()).unwrap();

        let report = doctor(&mut fx.tree, &opts(), fx.folder, false).unwrap();
        assert!(report.is_clean());
        assert_eq!(report.nodes_checked, 5);
    }

    #[test]
    fn missing_instances_are_restored() {
        let mut fx = TreeFixture::folder_with_document(2);
        declare(&mut fx.tree, &opts(), fx.folder, &price()).unwrap();
        fx.tree.delete_instance(fx.document, "price").unwrap();
        fx.tree.delete_instance(fx.pages[1], "price").unwrap();

        // The first page keeps an instance its document no longer provides.
        let report = doctor(&mut fx.tree, &opts(), fx.folder, false).unwrap();
        assert_eq!(report.missing, 1);
        assert_eq!(report.orphaned, 1);
        assert_eq!(report.fixed, 0);

        let fixed = doctor(&mut fx.tree, &opts(), fx.folder, true).unwrap();
        assert_eq!(fixed.missing, 2);
        assert_eq!(fixed.orphaned, 0);

        assert!(doctor(&mut fx.tree, &opts(), fx.folder, false).unwrap().is_clean());
        for node in fx.document_and_pages() {
            assert_eq!(
                fx.tree.read_instances(node).unwrap().get("price").unwrap().origin,
                fx.folder
            );
        }
    }

    #[test]
    fn orphaned_instances_are_removed() {
        let mut fx = TreeFixture::folder_with_document(1);
        let stray = MetadataInstance::new(&price(), fx.folder);
        fx.tree.write_instance(fx.document, &stray).unwrap();

        let report = doctor(&mut fx.tree, &opts(), fx.folder, true).unwrap();
        assert_eq!(report.orphaned, 1);
        assert!(fx.tree.read_instances(fx.document).unwrap().is_empty());
    }

    #[test]
    fn page_declarations_are_replaced() {
        let mut fx = TreeFixture::folder_with_document(1);
        let page = fx.pages[0];
        let local = MetadataInstance::new(&SchemaEntry::new("note", KvType::Text, ""), page);
        fx.tree.write_instance(page, &local).unwrap();

        let report = doctor(&mut fx.tree, &opts(), fx.document, true).unwrap();
        assert_eq!(report.page_declarations, 1);
        assert!(!fx.tree.read_instances(page).unwrap().contains("note"));
    }

    #[test]
    fn mismatched_format_is_realigned() {
        let mut fx = TreeFixture::folder_with_document(0);
        declare(&mut fx.tree, &opts(), fx.folder, &price()).unwrap();
        let outdated = MetadataInstance::new(
            &SchemaEntry::new("price", KvType::Money, "dd.cc"),
            fx.folder,
        );
        fx.tree.write_instance(fx.document, &outdated).unwrap();

        let report = doctor(&mut fx.tree, &opts(), fx.folder, true).unwrap();
        assert_eq!(report.mismatched, 1);
        assert_eq!(report.dropped, 0);
        assert_eq!(
            fx.tree.read_instances(fx.document).unwrap().get("price").unwrap().kv_format,
            "dd,cc"
        );
    }

    #[test]
    fn realignment_converts_values_and_counts_drops() {
        let mut tree = crate::tree::memory::MemTree::new();
        let folder = tree.add_folder("Folder", None).unwrap();
        let kept = tree.add_document("kept.pdf", Some(folder), 0).unwrap();
        let lost = tree.add_document("lost.pdf", Some(folder), 0).unwrap();
        declare(&mut tree, &opts(), folder, &SchemaEntry::new("born", KvType::Date, "dd.mm.yy"))
            .unwrap();

        let long_year = SchemaEntry::new("born", KvType::Date, "dd.mm.yyyy");
        for (doc, value) in [(kept, "01.01.2001"), (lost, "01.01.1950")] {
            let mut outdated = MetadataInstance::new(&long_year, folder);
            outdated.set_value(Some(value), &opts()).unwrap();
            tree.write_instance(doc, &outdated).unwrap();
        }

        let report = doctor(&mut tree, &opts(), folder, true).unwrap();
        assert_eq!(report.mismatched, 2);
        assert_eq!(report.dropped, 1);

        let born = |node| tree.read_instances(node).unwrap().get("born").cloned().unwrap();
        assert_eq!(born(kept).raw_value(), Some("01.01.01"));
        assert_eq!(born(kept).virtual_value(), 20010101);
        assert!(!born(lost).is_set());
        assert!(doctor(&mut tree, &opts(), folder, false).unwrap().is_clean());
    }

    #[test]
    fn check_only_run_counts_no_drops() {
        let mut fx = TreeFixture::folder_with_document(0);
        declare(&mut fx.tree, &opts(), fx.folder, &SchemaEntry::new("d", KvType::Date, "dd.mm.yy"))
            .unwrap();
        let mut outdated =
            MetadataInstance::new(&SchemaEntry::new("d", KvType::Date, "dd.mm.yyyy"), fx.folder);
        outdated.set_value(Some("01.01.1950"), &opts()).unwrap();
        fx.tree.write_instance(fx.document, &outdated).unwrap();

        let report = doctor(&mut fx.tree, &opts(), fx.folder, false).unwrap();
        assert_eq!(report.mismatched, 1);
        assert_eq!(report.dropped, 0);
        let stored = fx.tree.read_instances(fx.document).unwrap();
        assert_eq!(stored.get("d").unwrap().raw_value(), Some("01.01.1950"));
    }

    #[test]
    fn stale_virtual_values_are_recomputed() {
        let mut fx = TreeFixture::folder_with_document(0);
        declare(&mut fx.tree, &opts(), fx.folder, &price()).unwrap();
        let stored: MetadataInstance = serde_json::from_value(serde_json::json!({
            "key": "price",
            "kv_type": "money",
            "kv_format": "dd,cc",
            "raw_value": "10,00",
            "virtual_value": 7,
            "origin": fx.folder,
        }))
        .unwrap();
        fx.tree.write_instance(fx.folder, &stored).unwrap();

        let report = doctor(&mut fx.tree, &opts(), fx.folder, true).unwrap();
        assert_eq!(report.stale, 1);
        assert_eq!(
            fx.tree.read_instances(fx.folder).unwrap().get("price").unwrap().virtual_value(),
            1000
        );
    }

    #[test]
    fn unparsable_values_are_cleared() {
        let mut fx = TreeFixture::folder_with_document(0);
        declare(&mut fx.tree, &opts(), fx.folder, &price()).unwrap();
        let broken: MetadataInstance = serde_json::from_value(serde_json::json!({
            "key": "price",
            "kv_type": "money",
            "kv_format": "dd,cc",
            "raw_value": "ten",
            "virtual_value": 0,
            "origin": fx.folder,
        }))
        .unwrap();
        fx.tree.write_instance(fx.folder, &broken).unwrap();

        let report = doctor(&mut fx.tree, &opts(), fx.folder, true).unwrap();
        assert_eq!(report.unparsable, 1);
        assert!(!fx.tree.read_instances(fx.folder).unwrap().get("price").unwrap().is_set());
    }
}
