//! # Typed Metadata
//!
//! Nodes carry named, typed metadata fields. This module holds everything that
//! does not depend on the tree:
//!
//! - **Types**: the closed [`KvType`] enum and its [`KV_TYPES`] registry
//! - **Formats**: token grammars compiled into a [`FormatSpec`]
//! - **Virtual values**: reduction of `(type, format, raw)` to one sortable `i64`
//! - **Instances**: the per-node [`MetadataInstance`] and [`InstanceSet`]
//! - **Filtering**: [`VirtualFilter`] and [`compare_virtual`] for queries
//!
//! ## Usage
//!
//! ```
//! use kvtree::kv::{compute_virtual_value, KvType};
//!
//! let a = compute_virtual_value(KvType::Money, "dd.cc", Some("45.00")).unwrap();
//! let b = compute_virtual_value(KvType::Money, "dd,cc", Some("45,00")).unwrap();
//! assert_eq!(a, b);
//! ```

mod filter;
mod format;
mod instance;
mod kind;
mod value;

pub use filter::{compare_virtual, FilterOp, VirtualFilter};
pub use format::{
    effective_format, validate_format, BoolStyle, DateLayout, DatePart, FormatSpec, MoneyLayout,
    NumericLayout,
};
pub use instance::{InstanceSet, MetadataInstance, Redefinition, SchemaEntry};
pub use kind::{get_type_spec, orderable_types, KvType, KvTypeSpec, KV_TYPES};
pub use value::{
    compute_virtual_value, compute_virtual_value_with, display_value, reformat_value, ValueOptions,
};
