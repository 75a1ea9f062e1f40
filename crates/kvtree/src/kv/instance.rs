//! Metadata instances and the per-node instance set.
//!
//! A [`MetadataInstance`] is the concrete (possibly empty) value of one key on
//! one node. Its `origin` records which node's declaration it materializes:
//! the owner itself for a local declaration, an ancestor for an inherited key.
//! Propagation uses the origin to decide what it may overwrite, so inherited
//! schema never needs to be re-derived by walking ancestors on reads.
//!
//! The raw value and the virtual value are private and only change together,
//! which keeps the virtual value from ever going stale in memory.

use super::value::{compute_virtual_value_with, reformat_value, ValueOptions};
use super::KvType;
use crate::error::Result;
use crate::tree::NodeId;
use serde::{Deserialize, Serialize};

/// One `(key, type, format)` declaration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaEntry {
    pub key: String,
    pub kv_type: KvType,
    pub kv_format: String,
}

impl SchemaEntry {
    pub fn new(key: impl Into<String>, kv_type: KvType, kv_format: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            kv_type,
            kv_format: kv_format.into(),
        }
    }
}

/// What happened to an instance when its type or format was redefined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Redefinition {
    /// Same type, format and origin; nothing to write.
    Unchanged,
    /// Schema or origin changed; the value was kept, rewritten in the new
    /// format where the format changed.
    Updated,
    /// The type changed, so the value was reset.
    Cleared,
    /// Same type, but the value cannot be written in the new format.
    Dropped,
}

impl Redefinition {
    pub fn is_change(self) -> bool {
        self != Redefinition::Unchanged
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataInstance {
    pub key: String,
    pub kv_type: KvType,
    pub kv_format: String,
    raw_value: Option<String>,
    virtual_value: i64,
    /// Node whose declaration this instance materializes
    pub origin: NodeId,
}

impl MetadataInstance {
    /// A fresh, unset instance of `entry` declared by `origin`.
    pub fn new(entry: &SchemaEntry, origin: NodeId) -> Self {
        Self {
            key: entry.key.clone(),
            kv_type: entry.kv_type,
            kv_format: entry.kv_format.clone(),
            raw_value: None,
            virtual_value: 0,
            origin,
        }
    }

    pub fn raw_value(&self) -> Option<&str> {
        self.raw_value.as_deref()
    }

    pub fn virtual_value(&self) -> i64 {
        self.virtual_value
    }

    pub fn is_set(&self) -> bool {
        self.raw_value.is_some()
    }

    pub fn is_declared_by(&self, node: NodeId) -> bool {
        self.origin == node
    }

    pub fn schema_entry(&self) -> SchemaEntry {
        SchemaEntry::new(self.key.clone(), self.kv_type, self.kv_format.clone())
    }

    pub fn matches_schema(&self, entry: &SchemaEntry) -> bool {
        self.key == entry.key && self.kv_type == entry.kv_type && self.kv_format == entry.kv_format
    }

    /// Sets the raw value, recomputing the virtual value.
    ///
    /// Blank input stores the unset state. On a parse error the instance is
    /// left untouched.
    pub fn set_value(&mut self, raw: Option<&str>, options: &ValueOptions) -> Result<()> {
        let raw = raw.map(str::trim).filter(|v| !v.is_empty());
        let virtual_value =
            compute_virtual_value_with(options, self.kv_type, &self.kv_format, raw)?;
        self.raw_value = raw.map(str::to_string);
        self.virtual_value = virtual_value;
        Ok(())
    }

    /// Applies a new declaration to an existing instance.
    ///
    /// A type change resets the value. A format change of the same type
    /// rewrites the value in the new layout (see [`reformat_value`]); only a
    /// value the new layout cannot hold is reset.
    pub fn redefine(
        &mut self,
        entry: &SchemaEntry,
        origin: NodeId,
        options: &ValueOptions,
    ) -> Redefinition {
        if self.matches_schema(entry) && self.origin == origin {
            return Redefinition::Unchanged;
        }

        let type_changed = self.kv_type != entry.kv_type;
        let old_format = std::mem::replace(&mut self.kv_format, entry.kv_format.clone());
        self.key = entry.key.clone();
        self.kv_type = entry.kv_type;
        self.origin = origin;

        if type_changed {
            self.clear();
            return Redefinition::Cleared;
        }

        let raw = self.raw_value.take();
        let converted = self
            .converted_raw(&old_format, raw.as_deref(), options)
            .and_then(|value| self.set_value(value.as_deref(), options));
        match converted {
            Ok(()) => Redefinition::Updated,
            Err(_) => {
                self.clear();
                Redefinition::Dropped
            }
        }
    }

    /// The stored value rewritten for the current format. A value that
    /// already reads under the current format is kept when the old one no
    /// longer applies.
    fn converted_raw(
        &self,
        old_format: &str,
        raw: Option<&str>,
        options: &ValueOptions,
    ) -> Result<Option<String>> {
        if old_format == self.kv_format {
            return Ok(raw.map(str::to_string));
        }
        reformat_value(options, self.kv_type, old_format, &self.kv_format, raw).or_else(|err| {
            compute_virtual_value_with(options, self.kv_type, &self.kv_format, raw)
                .map(|_| raw.map(str::to_string))
                .map_err(|_| err)
        })
    }

    /// Recomputes the virtual value from the stored raw value.
    ///
    /// Returns `Ok(true)` when the stored virtual value was stale.
    pub fn refresh(&mut self, options: &ValueOptions) -> Result<bool> {
        let fresh =
            compute_virtual_value_with(options, self.kv_type, &self.kv_format, self.raw_value())?;
        let stale = fresh != self.virtual_value;
        self.virtual_value = fresh;
        Ok(stale)
    }

    fn clear(&mut self) {
        self.raw_value = None;
        self.virtual_value = 0;
    }
}

/// The instances owned by one node, in declaration order, unique by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceSet {
    instances: Vec<MetadataInstance>,
}

impl InstanceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&MetadataInstance> {
        self.instances.iter().find(|i| i.key == key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut MetadataInstance> {
        self.instances.iter_mut().find(|i| i.key == key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Inserts `instance`, replacing an existing one with the same key in place.
    pub fn upsert(&mut self, instance: MetadataInstance) {
        match self.instances.iter_mut().find(|i| i.key == instance.key) {
            Some(slot) => *slot = instance,
            None => self.instances.push(instance),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<MetadataInstance> {
        let pos = self.instances.iter().position(|i| i.key == key)?;
        Some(self.instances.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetadataInstance> {
        self.instances.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.instances.iter().map(|i| i.key.as_str())
    }

    /// The effective schema of the owner: every key it carries.
    pub fn schema(&self) -> Vec<SchemaEntry> {
        self.instances
            .iter()
            .map(MetadataInstance::schema_entry)
            .collect()
    }

    /// Instances the owner declares itself rather than inherits.
    pub fn declared_by(&self, owner: NodeId) -> impl Iterator<Item = &MetadataInstance> {
        self.instances
            .iter()
            .filter(move |i| i.is_declared_by(owner))
    }
}

impl<'a> IntoIterator for &'a InstanceSet {
    type Item = &'a MetadataInstance;
    type IntoIter = std::slice::Iter<'a, MetadataInstance>;

    fn into_iter(self) -> Self::IntoIter {
        self.instances.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date_entry() -> SchemaEntry {
        SchemaEntry::new("date", KvType::Date, "dd.mm.yy")
    }

    #[test]
    fn new_instance_is_unset() {
        let inst = MetadataInstance::new(&date_entry(), NodeId::new());
        assert!(!inst.is_set());
        assert_eq!(inst.raw_value(), None);
        assert_eq!(inst.virtual_value(), 0);
    }

    #[test]
    fn set_value_round_trip() {
        let options = ValueOptions::default();
        let mut inst = MetadataInstance::new(&date_entry(), NodeId::new());

        inst.set_value(Some("23.07.20"), &options).unwrap();
        assert_eq!(inst.raw_value(), Some("23.07.20"));
        assert_eq!(inst.virtual_value(), 20200723);

        inst.set_value(None, &options).unwrap();
        assert!(!inst.is_set());
        assert_eq!(inst.virtual_value(), 0);

        inst.set_value(Some("   "), &options).unwrap();
        assert!(!inst.is_set());
    }

    #[test]
    fn failed_set_value_keeps_previous_state() {
        let options = ValueOptions::default();
        let mut inst = MetadataInstance::new(&date_entry(), NodeId::new());
        inst.set_value(Some("23.07.20"), &options).unwrap();

        assert!(inst.set_value(Some("not a date"), &options).is_err());
        assert_eq!(inst.raw_value(), Some("23.07.20"));
        assert_eq!(inst.virtual_value(), 20200723);
    }

    #[test]
    fn redefine_same_schema_is_unchanged() {
        let options = ValueOptions::default();
        let origin = NodeId::new();
        let mut inst = MetadataInstance::new(&date_entry(), origin);
        assert_eq!(
            inst.redefine(&date_entry(), origin, &options),
            Redefinition::Unchanged
        );
    }

    #[test]
    fn redefine_format_rewrites_money_separator() {
        let options = ValueOptions::default();
        let origin = NodeId::new();
        let dotted = SchemaEntry::new("p", KvType::Money, "dd.cc");
        let mut inst = MetadataInstance::new(&dotted, origin);
        inst.set_value(Some("45.00"), &options).unwrap();

        let comma = SchemaEntry::new("p", KvType::Money, "dd,cc");
        let outcome = inst.redefine(&comma, origin, &options);
        assert_eq!(outcome, Redefinition::Updated);
        assert_eq!(inst.raw_value(), Some("45,00"));
        assert_eq!(inst.virtual_value(), 4500);
    }

    #[test]
    fn redefine_format_converts_dates() {
        let options = ValueOptions::default();
        let origin = NodeId::new();
        let mut inst = MetadataInstance::new(&date_entry(), origin);
        inst.set_value(Some("23.07.20"), &options).unwrap();

        let outcome = inst.redefine(
            &SchemaEntry::new("date", KvType::Date, "yyyy-mm-dd"),
            origin,
            &options,
        );
        assert_eq!(outcome, Redefinition::Updated);
        assert_eq!(inst.raw_value(), Some("2020-07-23"));
        assert_eq!(inst.virtual_value(), 20200723);
        assert_eq!(inst.kv_format, "yyyy-mm-dd");
    }

    #[test]
    fn redefine_format_drops_value_the_new_layout_cannot_hold() {
        let options = ValueOptions::default();
        let origin = NodeId::new();
        let long_year = SchemaEntry::new("date", KvType::Date, "dd.mm.yyyy");
        let mut inst = MetadataInstance::new(&long_year, origin);
        inst.set_value(Some("01.01.1950"), &options).unwrap();

        let outcome = inst.redefine(&date_entry(), origin, &options);
        assert_eq!(outcome, Redefinition::Dropped);
        assert!(!inst.is_set());
        assert_eq!(inst.virtual_value(), 0);
        assert_eq!(inst.kv_format, "dd.mm.yy");
    }

    #[test]
    fn redefine_type_clears_value() {
        let options = ValueOptions::default();
        let origin = NodeId::new();
        let numeric = SchemaEntry::new("n", KvType::Numeric, "dddd");
        let mut inst = MetadataInstance::new(&numeric, origin);
        inst.set_value(Some("4500"), &options).unwrap();

        let money = SchemaEntry::new("n", KvType::Money, "dd.cc");
        let outcome = inst.redefine(&money, origin, &options);
        assert_eq!(outcome, Redefinition::Cleared);
        assert_eq!(inst.virtual_value(), 0);
        assert!(!inst.is_set());
    }

    #[test]
    fn redefine_origin_only_is_an_update() {
        let options = ValueOptions::default();
        let mut inst = MetadataInstance::new(&date_entry(), NodeId::new());
        inst.set_value(Some("01.01.21"), &options).unwrap();

        let new_origin = NodeId::new();
        assert_eq!(
            inst.redefine(&date_entry(), new_origin, &options),
            Redefinition::Updated
        );
        assert_eq!(inst.origin, new_origin);
        assert_eq!(inst.raw_value(), Some("01.01.21"));
    }

    #[test]
    fn instance_set_upsert_replaces_in_place() {
        let owner = NodeId::new();
        let mut set = InstanceSet::new();
        set.upsert(MetadataInstance::new(&date_entry(), owner));
        set.upsert(MetadataInstance::new(
            &SchemaEntry::new("price", KvType::Money, "dd,cc"),
            owner,
        ));
        set.upsert(MetadataInstance::new(
            &SchemaEntry::new("date", KvType::Date, "dd/mm/yyyy"),
            owner,
        ));

        assert_eq!(set.len(), 2);
        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["date", "price"]);
        assert_eq!(set.get("date").unwrap().kv_format, "dd/mm/yyyy");
    }

    #[test]
    fn declared_by_filters_on_origin() {
        let owner = NodeId::new();
        let ancestor = NodeId::new();
        let mut set = InstanceSet::new();
        set.upsert(MetadataInstance::new(&date_entry(), ancestor));
        set.upsert(MetadataInstance::new(
            &SchemaEntry::new("price", KvType::Money, "dd,cc"),
            owner,
        ));

        let local: Vec<_> = set.declared_by(owner).map(|i| i.key.as_str()).collect();
        assert_eq!(local, vec!["price"]);
        assert_eq!(set.schema().len(), 2);
    }

    #[test]
    fn remove_returns_instance() {
        let owner = NodeId::new();
        let mut set = InstanceSet::new();
        set.upsert(MetadataInstance::new(&date_entry(), owner));
        assert!(set.remove("date").is_some());
        assert!(set.remove("date").is_none());
        assert!(set.is_empty());
    }
}
