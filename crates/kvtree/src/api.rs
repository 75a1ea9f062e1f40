//! # API Facade
//!
//! [`KvApi`] is the single entry point for metadata operations. It is a thin
//! facade over the engine modules:
//!
//! - schema changes dispatch to [`crate::propagation`]
//! - value writes dispatch to [`crate::assign`]
//! - consistency checks dispatch to [`crate::doctor`]
//!
//! The facade owns the tree store and the [`ValueOptions`] derived from
//! [`KvConfig`], normalizes inputs (type names, blank formats) and returns
//! structured reports. It never prints.
//!
//! ## Generic Over TreeStore
//!
//! `KvApi<S: TreeStore>` works with any backend:
//! - Production: `KvApi<JsonTreeStore>`
//! - Testing: `KvApi<MemTree>`
//!
//! API tests check dispatch and argument handling; the behavior itself is
//! tested in the engine modules.

use crate::assign::{self, AssignReport};
use crate::config::KvConfig;
use crate::doctor::{self, DoctorReport};
use crate::error::{KvError, Result};
use crate::kv::{
    compare_virtual, display_value, InstanceSet, KvType, MetadataInstance, SchemaEntry,
    ValueOptions, VirtualFilter,
};
use crate::propagation::{self, PropagationReport};
use crate::tree::{NodeId, TreeStore};

pub struct KvApi<S: TreeStore> {
    store: S,
    options: ValueOptions,
}

impl<S: TreeStore> KvApi<S> {
    pub fn new(store: S) -> Self {
        Self::with_options(store, ValueOptions::default())
    }

    pub fn with_options(store: S, options: ValueOptions) -> Self {
        Self { store, options }
    }

    pub fn with_config(store: S, config: &KvConfig) -> Self {
        Self::with_options(store, config.value_options())
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Structural edits go straight to the store; follow a move with [`Self::inherit`].
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn options(&self) -> &ValueOptions {
        &self.options
    }

    // --- Schema ---

    /// Declares `key` on `node` with the named type and format.
    ///
    /// `kv_type` is matched case-insensitively against the type registry; a
    /// blank `kv_format` selects the type's default format.
    pub fn declare(
        &mut self,
        node: NodeId,
        key: &str,
        kv_type: &str,
        kv_format: &str,
    ) -> Result<PropagationReport> {
        let kind = KvType::from_name(kv_type).ok_or_else(|| {
            KvError::InvalidTarget(format!("unknown metadata type '{kv_type}'"))
        })?;
        self.declare_entry(node, &SchemaEntry::new(key, kind, kv_format))
    }

    pub fn declare_entry(
        &mut self,
        node: NodeId,
        entry: &SchemaEntry,
    ) -> Result<PropagationReport> {
        propagation::declare(&mut self.store, &self.options, node, entry)
    }

    /// Replaces the full local schema of `node`: entries are declared, and
    /// local keys missing from `entries` are undeclared.
    pub fn set_schema(
        &mut self,
        node: NodeId,
        entries: &[SchemaEntry],
    ) -> Result<PropagationReport> {
        let mut report = PropagationReport::default();
        let stale: Vec<String> = self
            .store
            .read_instances(node)?
            .declared_by(node)
            .filter(|i| !entries.iter().any(|e| e.key.trim() == i.key))
            .map(|i| i.key.clone())
            .collect();
        for key in stale {
            report += propagation::undeclare(&mut self.store, &self.options, node, &key)?;
        }
        for entry in entries {
            report += self.declare_entry(node, entry)?;
        }
        Ok(report)
    }

    pub fn undeclare(&mut self, node: NodeId, key: &str) -> Result<PropagationReport> {
        propagation::undeclare(&mut self.store, &self.options, node, key)
    }

    pub fn rename(
        &mut self,
        node: NodeId,
        old_key: &str,
        new_key: &str,
    ) -> Result<PropagationReport> {
        propagation::rename(&mut self.store, &self.options, node, old_key, new_key)
    }

    /// Re-derives inherited metadata after `node` was attached or moved.
    pub fn inherit(&mut self, node: NodeId) -> Result<PropagationReport> {
        propagation::inherit(&mut self.store, &self.options, node)
    }

    /// Effective schema of `node`: its own and inherited keys.
    pub fn list_schema(&self, node: NodeId) -> Result<Vec<SchemaEntry>> {
        Ok(self.store.read_instances(node)?.schema())
    }

    /// Keys `node` declares itself.
    pub fn local_schema(&self, node: NodeId) -> Result<Vec<SchemaEntry>> {
        Ok(self
            .store
            .read_instances(node)?
            .declared_by(node)
            .map(MetadataInstance::schema_entry)
            .collect())
    }

    // --- Values ---

    pub fn assign_values<I, K, V>(&mut self, node: NodeId, values: I) -> Result<AssignReport>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        assign::assign_values(&mut self.store, &self.options, node, values)
    }

    pub fn set_value(
        &mut self,
        node: NodeId,
        key: &str,
        raw: Option<&str>,
    ) -> Result<MetadataInstance> {
        assign::set_value(&mut self.store, &self.options, node, key, raw)
    }

    pub fn instances(&self, node: NodeId) -> Result<InstanceSet> {
        self.store.read_instances(node)
    }

    pub fn get_instance(&self, node: NodeId, key: &str) -> Result<Option<MetadataInstance>> {
        Ok(self.store.read_instances(node)?.get(key).cloned())
    }

    fn require_instance(&self, node: NodeId, key: &str) -> Result<MetadataInstance> {
        self.get_instance(node, key)?.ok_or_else(|| KvError::UnknownKey {
            node,
            key: key.to_string(),
        })
    }

    /// Raw value as entered, `None` when unset.
    pub fn value(&self, node: NodeId, key: &str) -> Result<Option<String>> {
        Ok(self.require_instance(node, key)?.raw_value().map(str::to_string))
    }

    pub fn virtual_value_of(&self, node: NodeId, key: &str) -> Result<i64> {
        Ok(self.require_instance(node, key)?.virtual_value())
    }

    /// Value rendered in the canonical form of the instance's format.
    pub fn display(&self, node: NodeId, key: &str) -> Result<String> {
        let instance = self.require_instance(node, key)?;
        display_value(
            &self.options,
            instance.kv_type,
            &instance.kv_format,
            instance.raw_value(),
        )
    }

    // --- Queries ---

    /// Nodes from `candidates` whose virtual value satisfies `filter`, in input order.
    pub fn filter_nodes(
        &self,
        candidates: &[NodeId],
        filter: &VirtualFilter,
    ) -> Result<Vec<NodeId>> {
        let mut matched = Vec::new();
        for node in candidates {
            if filter.matches(&self.store.read_instances(*node)?) {
                matched.push(*node);
            }
        }
        Ok(matched)
    }

    /// Sorts `nodes` by the virtual value of `key`, ascending. Nodes without
    /// the key sort as unset; ties are ordered by node id.
    pub fn sort_by_virtual_value(&self, nodes: &mut [NodeId], key: &str) -> Result<()> {
        let mut keyed = Vec::with_capacity(nodes.len());
        for node in nodes.iter() {
            keyed.push((*node, self.store.read_instances(*node)?.get(key).cloned()));
        }
        keyed.sort_by(|(a_node, a), (b_node, b)| {
            compare_virtual(a.as_ref(), b.as_ref()).then_with(|| a_node.cmp(b_node))
        });
        for (slot, (node, _)) in nodes.iter_mut().zip(keyed) {
            *slot = node;
        }
        Ok(())
    }

    // --- Maintenance ---

    pub fn doctor(&mut self, root: NodeId, fix: bool) -> Result<DoctorReport> {
        doctor::doctor(&mut self.store, &self.options, root, fix)
    }
}
