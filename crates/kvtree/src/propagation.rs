//! # Schema Propagation
//!
//! Metadata *schema* (key, type, format) flows down the tree; *values* stay
//! with the node they were set on. Declaring a key on a folder gives every
//! document below it, and every page of those documents, its own empty
//! instance of that key.
//!
//! ## Closest Ancestor Wins
//!
//! A node's effective declaration for a key is the nearest ancestor-or-self
//! that declares it. Each instance records that node as its `origin`:
//!
//! ```text
//! Home            declares price (dd.cc)     origin = Home
//!  └─ Invoices    declares price (dd,cc)     origin = Invoices
//!      └─ a.pdf   inherits price (dd,cc)     origin = Invoices
//!          └─ p1  inherits price (dd,cc)     origin = Invoices
//! ```
//!
//! Re-declaring `price` on `Home` walks down, meets `Invoices` (which declares
//! `price` itself) and leaves that whole branch alone.
//!
//! ## Operations
//!
//! - [`declare`]: create/update a declaration on a node, then push it down
//! - [`undeclare`]: remove a declaration; the subtree falls back to the next
//!   declaring ancestor, or loses the key when there is none
//! - [`rename`]: rename a declaration and every instance inherited from it
//! - [`inherit`]: re-derive a node's inherited keys after it was attached or moved
//!
//! ## Failure Semantics
//!
//! Walks are synchronous and proportional to subtree size. A failing write on
//! a descendant aborts the walk with [`KvError::Propagation`] naming that node.
//! Instances written before the failure stay; every operation here is
//! idempotent, so the caller can simply run it again.
//!
//! Operations that take something away from a node ([`undeclare`], [`rename`],
//! [`inherit`]) change the descendants first and the node itself last. A
//! failure part way leaves the node's declaration in place, which is what the
//! retry looks for.

use crate::error::{KvError, Result};
use crate::kv::{
    effective_format, validate_format, MetadataInstance, Redefinition, SchemaEntry, ValueOptions,
};
use crate::tree::{NodeId, TreeStore};
use std::ops::AddAssign;

/// Counts of what a propagation did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PropagationReport {
    pub created: usize,
    /// Schema or origin changed, value kept
    pub updated: usize,
    /// Type changed, value reset
    pub cleared: usize,
    /// Value could not be written in the new format and was reset
    pub dropped: usize,
    pub removed: usize,
    pub unchanged: usize,
    /// Subtrees skipped because they declare the key themselves
    pub shadowed: usize,
}

impl PropagationReport {
    /// Number of instance writes and deletes performed.
    pub fn changes(&self) -> usize {
        self.created + self.updated + self.cleared + self.dropped + self.removed
    }

    fn record(&mut self, outcome: Redefinition) {
        match outcome {
            Redefinition::Unchanged => self.unchanged += 1,
            Redefinition::Updated => self.updated += 1,
            Redefinition::Cleared => self.cleared += 1,
            Redefinition::Dropped => self.dropped += 1,
        }
    }
}

impl AddAssign for PropagationReport {
    fn add_assign(&mut self, other: Self) {
        self.created += other.created;
        self.updated += other.updated;
        self.cleared += other.cleared;
        self.dropped += other.dropped;
        self.removed += other.removed;
        self.unchanged += other.unchanged;
        self.shadowed += other.shadowed;
    }
}

/// Declares `entry` on `node` and materializes it on every descendant.
///
/// Idempotent: declaring the same `(key, type, format)` again changes nothing
/// and keeps values. A blank format is replaced by the type's default.
#[tracing::instrument(skip(store, options, entry), fields(key = %entry.key))]
pub fn declare<S: TreeStore>(
    store: &mut S,
    options: &ValueOptions,
    node: NodeId,
    entry: &SchemaEntry,
) -> Result<PropagationReport> {
    if !store.kind_of(node)?.can_declare() {
        return Err(KvError::InvalidTarget(format!(
            "pages cannot declare metadata (key '{}')",
            entry.key
        )));
    }
    if entry.key.trim().is_empty() {
        return Err(KvError::InvalidTarget("metadata key cannot be empty".to_string()));
    }
    let entry = SchemaEntry::new(
        entry.key.trim(),
        entry.kv_type,
        effective_format(entry.kv_type, &entry.kv_format),
    );
    validate_format(entry.kv_type, &entry.kv_format)?;

    let mut report = PropagationReport::default();
    let instances = store.read_instances(node)?;
    match instances.get(&entry.key) {
        Some(existing) => {
            let mut instance = existing.clone();
            let outcome = instance.redefine(&entry, node, options);
            if outcome.is_change() {
                store.write_instance(node, &instance)?;
            }
            warn_if_dropped(outcome, node, &entry);
            report.record(outcome);
        }
        None => {
            store.write_instance(node, &MetadataInstance::new(&entry, node))?;
            report.created += 1;
        }
    }

    report += propagate(store, options, node, &entry, node)?;
    log_report("declare", node, &entry.key, &report);
    Ok(report)
}

/// Removes `node`'s own declaration of `key`.
///
/// When an ancestor also declares `key`, `node` and its subtree re-inherit
/// that declaration (values kept where the type matches). Otherwise the
/// instances inherited from `node` are deleted. Descendants that declare
/// `key` themselves are untouched either way.
#[tracing::instrument(skip(store, options))]
pub fn undeclare<S: TreeStore>(
    store: &mut S,
    options: &ValueOptions,
    node: NodeId,
    key: &str,
) -> Result<PropagationReport> {
    let instances = store.read_instances(node)?;
    let own = instances
        .get(key)
        .filter(|i| i.is_declared_by(node))
        .cloned()
        .ok_or_else(|| KvError::UnknownKey {
            node,
            key: key.to_string(),
        })?;

    let mut report = PropagationReport::default();
    match inherited_from_parent(store, node, key)? {
        Some(fallback) => {
            let entry = fallback.schema_entry();
            tracing::debug!(
                target = "kvtree::propagate",
                %node,
                key,
                fallback = %fallback.origin,
                "falling back to ancestor declaration"
            );
            report += propagate(store, options, node, &entry, fallback.origin)?;
            let mut instance = own;
            let outcome = instance.redefine(&entry, fallback.origin, options);
            store.write_instance(node, &instance)?;
            warn_if_dropped(outcome, node, &entry);
            report.record(outcome);
        }
        None => {
            report += remove_inherited(store, node, key, own.origin)?;
            store.delete_instance(node, key)?;
            report.removed += 1;
        }
    }

    log_report("undeclare", node, key, &report);
    Ok(report)
}

/// Renames `node`'s declaration `old_key` to `new_key`, carrying values along.
///
/// Fails before writing anything when `new_key` already exists on `node` or
/// on any descendant that would receive the renamed instance. A `new_key`
/// instance left behind by an interrupted rename of the same declaration is
/// not a conflict.
#[tracing::instrument(skip(store, options))]
pub fn rename<S: TreeStore>(
    store: &mut S,
    options: &ValueOptions,
    node: NodeId,
    old_key: &str,
    new_key: &str,
) -> Result<PropagationReport> {
    let new_key = new_key.trim();
    if new_key.is_empty() {
        return Err(KvError::InvalidTarget("metadata key cannot be empty".to_string()));
    }
    let instances = store.read_instances(node)?;
    if !instances.get(old_key).is_some_and(|i| i.is_declared_by(node)) {
        return Err(KvError::UnknownKey {
            node,
            key: old_key.to_string(),
        });
    }
    if old_key == new_key {
        return Ok(PropagationReport::default());
    }

    // Collect every instance to rename first, so a conflict leaves the tree untouched.
    let mut targets = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        let set = store.read_instances(current)?;
        match set.get(old_key) {
            Some(inst) if inst.is_declared_by(node) => {
                let leftover = set
                    .get(new_key)
                    .is_some_and(|existing| is_rename_leftover(existing, inst, node));
                if set.contains(new_key) && !leftover {
                    return Err(KvError::InvalidTarget(format!(
                        "node {current} already has metadata key '{new_key}'"
                    )));
                }
                targets.push((current, inst.clone()));
                stack.extend(store.children_of(current)?);
            }
            Some(_) => {}
            None => stack.extend(store.children_of(current)?),
        }
    }

    // Deepest first; `node` itself was collected first and is renamed last.
    let mut report = PropagationReport::default();
    let Some((_, root_instance)) = targets.first().cloned() else {
        return Ok(report);
    };
    for (target, instance) in targets.into_iter().skip(1).rev() {
        rename_instance(store, target, instance, old_key, new_key)
            .map_err(|e| e.at_node(target))?;
        report.updated += 1;
    }

    // A farther ancestor may also declare the old key; it now reaches this subtree.
    let fallback = inherited_from_parent(store, node, old_key)?;
    if let Some(fallback) = &fallback {
        report += propagate(store, options, node, &fallback.schema_entry(), fallback.origin)?;
    }

    let mut renamed = root_instance;
    renamed.key = new_key.to_string();
    store.write_instance(node, &renamed)?;
    report.updated += 1;
    match fallback {
        Some(fallback) => {
            let inherited = MetadataInstance::new(&fallback.schema_entry(), fallback.origin);
            store.write_instance(node, &inherited)?;
            report.created += 1;
        }
        None => store.delete_instance(node, old_key)?,
    }

    log_report("rename", node, new_key, &report);
    Ok(report)
}

/// Re-derives the inherited metadata of `node` and its subtree from its
/// current parent. Call after attaching or moving a node.
///
/// Inherited keys the new parent does not provide are removed; keys the new
/// parent provides are materialized. Declarations made inside the subtree
/// are kept and keep shadowing.
#[tracing::instrument(skip(store, options))]
pub fn inherit<S: TreeStore>(
    store: &mut S,
    options: &ValueOptions,
    node: NodeId,
) -> Result<PropagationReport> {
    let provided = match store.parent_of(node)? {
        Some(parent) => store.read_instances(parent)?,
        None => Default::default(),
    };
    let own = store.read_instances(node)?;
    let mut report = PropagationReport::default();

    for stale in own
        .iter()
        .filter(|i| !i.is_declared_by(node) && !provided.contains(&i.key))
    {
        report += remove_inherited(store, node, &stale.key, stale.origin)?;
        store.delete_instance(node, &stale.key)?;
        report.removed += 1;
    }

    for source in &provided {
        let entry = source.schema_entry();
        report += walk_declaration(store, options, vec![node], &entry, source.origin)?;
    }

    log_report("inherit", node, "*", &report);
    Ok(report)
}

/// Pushes `entry`, declared by `origin`, onto every descendant of `node`.
pub fn propagate<S: TreeStore>(
    store: &mut S,
    options: &ValueOptions,
    node: NodeId,
    entry: &SchemaEntry,
    origin: NodeId,
) -> Result<PropagationReport> {
    let children = store.children_of(node).map_err(|e| e.at_node(node))?;
    walk_declaration(store, options, children, entry, origin)
}

/// Deletes every instance of `key` declared by `origin` below `node`.
pub fn remove_inherited<S: TreeStore>(
    store: &mut S,
    node: NodeId,
    key: &str,
    origin: NodeId,
) -> Result<PropagationReport> {
    let mut report = PropagationReport::default();
    let mut stack = store.children_of(node).map_err(|e| e.at_node(node))?;

    while let Some(current) = stack.pop() {
        let instances = store.read_instances(current).map_err(|e| e.at_node(current))?;
        match instances.get(key) {
            Some(inst) if inst.origin != origin => {
                report.shadowed += 1;
                continue;
            }
            Some(_) => {
                store
                    .delete_instance(current, key)
                    .map_err(|e| e.at_node(current))?;
                report.removed += 1;
                tracing::trace!(target = "kvtree::propagate", node = %current, key, "removed");
            }
            None => {}
        }
        stack.extend(store.children_of(current).map_err(|e| e.at_node(current))?);
    }

    Ok(report)
}

/// Upserts `entry` on each node of `start` and their subtrees, stopping at
/// nodes that declare the key themselves.
fn walk_declaration<S: TreeStore>(
    store: &mut S,
    options: &ValueOptions,
    start: Vec<NodeId>,
    entry: &SchemaEntry,
    origin: NodeId,
) -> Result<PropagationReport> {
    let mut report = PropagationReport::default();
    let mut stack = start;

    while let Some(current) = stack.pop() {
        let instances = store.read_instances(current).map_err(|e| e.at_node(current))?;
        match instances.get(&entry.key) {
            Some(inst) if inst.is_declared_by(current) && current != origin => {
                tracing::trace!(
                    target = "kvtree::propagate",
                    node = %current,
                    key = %entry.key,
                    "shadowed"
                );
                report.shadowed += 1;
                continue;
            }
            Some(existing) => {
                let mut instance = existing.clone();
                let outcome = instance.redefine(entry, origin, options);
                if outcome.is_change() {
                    store
                        .write_instance(current, &instance)
                        .map_err(|e| e.at_node(current))?;
                }
                warn_if_dropped(outcome, current, entry);
                report.record(outcome);
            }
            None => {
                store
                    .write_instance(current, &MetadataInstance::new(entry, origin))
                    .map_err(|e| e.at_node(current))?;
                report.created += 1;
                tracing::trace!(
                    target = "kvtree::propagate",
                    node = %current,
                    key = %entry.key,
                    "created"
                );
            }
        }
        stack.extend(store.children_of(current).map_err(|e| e.at_node(current))?);
    }

    Ok(report)
}

/// The parent's instance of `key`, which carries the nearest declaring ancestor.
fn inherited_from_parent<S: TreeStore>(
    store: &S,
    node: NodeId,
    key: &str,
) -> Result<Option<MetadataInstance>> {
    match store.parent_of(node)? {
        Some(parent) => Ok(store.read_instances(parent)?.get(key).cloned()),
        None => Ok(None),
    }
}

fn rename_instance<S: TreeStore>(
    store: &mut S,
    node: NodeId,
    mut instance: MetadataInstance,
    old_key: &str,
    new_key: &str,
) -> Result<()> {
    instance.key = new_key.to_string();
    store.write_instance(node, &instance)?;
    store.delete_instance(node, old_key)
}

/// True when `existing` is the renamed copy of `instance` that an interrupted
/// rename already wrote.
fn is_rename_leftover(
    existing: &MetadataInstance,
    instance: &MetadataInstance,
    declared_by: NodeId,
) -> bool {
    existing.origin == declared_by
        && existing.kv_type == instance.kv_type
        && existing.kv_format == instance.kv_format
        && existing.raw_value() == instance.raw_value()
}

fn warn_if_dropped(outcome: Redefinition, node: NodeId, entry: &SchemaEntry) {
    if outcome == Redefinition::Dropped {
        tracing::warn!(
            target = "kvtree::propagate",
            %node,
            key = %entry.key,
            format = %entry.kv_format,
            "value cannot be written in the new format; cleared"
        );
    }
}

fn log_report(operation: &str, node: NodeId, key: &str, report: &PropagationReport) {
    tracing::info!(
        target = "kvtree::propagate",
        operation,
        %node,
        key,
        created = report.created,
        updated = report.updated,
        cleared = report.cleared,
        dropped = report.dropped,
        removed = report.removed,
        unchanged = report.unchanged,
        shadowed = report.shadowed,
        "propagation finished"
    );
}
