//! # Value Assignment
//!
//! Setting values on a node, with a one-level cascade.
//!
//! [`assign_values`] takes a `key -> raw value` mapping for one node. Every
//! key the node has an instance for is parsed under that instance's type and
//! format; keys the node does not know are skipped and reported. The same raw
//! strings are then applied to each **direct** child that has the key, parsed
//! with the child's own type and format. Grandchildren are not touched.
//!
//! Assigning to a document therefore fills in its pages, while assigning to a
//! folder reaches its documents but not their pages.
//!
//! ## Atomicity
//!
//! All values are parsed before anything is written: a [`KvError::Parse`]
//! leaves the node and its children exactly as they were. Failures on a child,
//! whether its own format rejects the value or the store rejects the write,
//! surface as [`KvError::Propagation`] naming the child. Only a store failure
//! can leave values behind, those written before it.

use crate::error::{KvError, Result};
use crate::kv::{MetadataInstance, ValueOptions};
use crate::tree::{NodeId, TreeStore};

/// What an assignment changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AssignReport {
    /// `(node, key)` pairs whose value changed, the target node first
    pub updated: Vec<(NodeId, String)>,
    /// Keys from the mapping the target node has no instance for
    pub ignored: Vec<String>,
}

impl AssignReport {
    pub fn updated_on(&self, node: NodeId) -> usize {
        self.updated.iter().filter(|(n, _)| *n == node).count()
    }
}

/// Assigns raw values to `node` and cascades them to its direct children.
///
/// A blank value unsets the key.
#[tracing::instrument(skip(store, options, values))]
pub fn assign_values<S, I, K, V>(
    store: &mut S,
    options: &ValueOptions,
    node: NodeId,
    values: I,
) -> Result<AssignReport>
where
    S: TreeStore,
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut report = AssignReport::default();
    let own = store.read_instances(node)?;

    let mut accepted: Vec<(String, String)> = Vec::new();
    let mut staged: Vec<(NodeId, MetadataInstance)> = Vec::new();
    for (key, raw) in values {
        let (key, raw) = (key.as_ref(), raw.as_ref());
        match own.get(key) {
            Some(existing) => {
                let mut instance = existing.clone();
                instance.set_value(Some(raw), options)?;
                if instance != *existing {
                    staged.push((node, instance));
                }
                accepted.push((key.to_string(), raw.to_string()));
            }
            None => {
                tracing::debug!(target = "kvtree::assign", %node, key, "ignoring unknown key");
                report.ignored.push(key.to_string());
            }
        }
    }

    for child in store.children_of(node)? {
        let instances = store.read_instances(child).map_err(|e| e.at_node(child))?;
        for (key, raw) in &accepted {
            let Some(existing) = instances.get(key) else {
                continue;
            };
            let mut instance = existing.clone();
            instance
                .set_value(Some(raw), options)
                .map_err(|e| e.at_node(child))?;
            if instance != *existing {
                staged.push((child, instance));
            }
        }
    }

    for (target, instance) in staged {
        let written = store.write_instance(target, &instance);
        match written {
            Ok(()) => {}
            Err(err) if target == node => return Err(err),
            Err(err) => return Err(err.at_node(target)),
        }
        tracing::trace!(
            target = "kvtree::assign",
            node = %target,
            key = %instance.key,
            "value written"
        );
        report.updated.push((target, instance.key));
    }

    tracing::info!(
        target = "kvtree::assign",
        %node,
        updated = report.updated.len(),
        ignored = report.ignored.len(),
        "values assigned"
    );
    Ok(report)
}

/// Sets a single value on `node` only, without cascading.
///
/// `None` or a blank string unsets the key. Unlike [`assign_values`], a key
/// the node does not have is an error.
pub fn set_value<S: TreeStore>(
    store: &mut S,
    options: &ValueOptions,
    node: NodeId,
    key: &str,
    raw: Option<&str>,
) -> Result<MetadataInstance> {
    let mut instance = store
        .read_instances(node)?
        .get(key)
        .cloned()
        .ok_or_else(|| KvError::UnknownKey {
            node,
            key: key.to_string(),
        })?;
    instance.set_value(raw, options)?;
    store.write_instance(node, &instance)?;
    tracing::debug!(
        target = "kvtree::assign",
        %node,
        key,
        value = ?instance.raw_value(),
        "value set"
    );
    Ok(instance)
}
