//! Virtual value filtering and ordering.
//!
//! Sort and range queries never look at raw strings: they compare virtual
//! values, so `"1.234,50"` and `"999.00"` order by amount, not by text.
//! A node without the key never matches a filter and sorts as unset (`0`).

use super::value::{compute_virtual_value_with, ValueOptions};
use super::{InstanceSet, KvType, MetadataInstance};
use crate::error::Result;
use std::cmp::Ordering;

/// Comparison applied between a node's virtual value and the filter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl FilterOp {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            FilterOp::Eq => ordering == Ordering::Equal,
            FilterOp::Ne => ordering != Ordering::Equal,
            FilterOp::Lt => ordering == Ordering::Less,
            FilterOp::Le => ordering != Ordering::Greater,
            FilterOp::Gt => ordering == Ordering::Greater,
            FilterOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// A condition such as "metadata `price` greater than 100.00".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFilter {
    pub key: String,
    pub op: FilterOp,
    pub value: i64,
}

impl VirtualFilter {
    pub fn new(key: impl Into<String>, op: FilterOp, value: i64) -> Self {
        Self {
            key: key.into(),
            op,
            value,
        }
    }

    /// Builds a filter from a value written the way users type it
    /// (`"45,00"` for a `dd,cc` key), converting it to a virtual value first.
    pub fn from_raw(
        key: impl Into<String>,
        op: FilterOp,
        kv_type: KvType,
        kv_format: &str,
        raw: &str,
        options: &ValueOptions,
    ) -> Result<Self> {
        let value = compute_virtual_value_with(options, kv_type, kv_format, Some(raw))?;
        Ok(Self::new(key, op, value))
    }

    pub fn matches(&self, instances: &InstanceSet) -> bool {
        let Some(instance) = instances.get(&self.key) else {
            return false;
        };
        self.op.holds(instance.virtual_value().cmp(&self.value))
    }
}

/// Orders two optional instances by virtual value; a missing instance counts as unset.
pub fn compare_virtual(a: Option<&MetadataInstance>, b: Option<&MetadataInstance>) -> Ordering {
    let value = |i: Option<&MetadataInstance>| i.map_or(0, MetadataInstance::virtual_value);
    value(a).cmp(&value(b))
}
