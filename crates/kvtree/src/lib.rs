//! # kvtree Architecture
//!
//! kvtree attaches **typed key-value metadata** to a tree of folders,
//! documents and pages. A key is *declared* once on a folder or document
//! (name, type, format) and every node below it gets its own instance of that
//! key to hold a value.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  API Layer (api.rs)                                         │
//! │  - KvApi: thin facade, resolves type names, owns options    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Engine (propagation.rs, assign.rs, doctor.rs)              │
//! │  - Schema flows down the whole subtree                      │
//! │  - Values flow down exactly one level                       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Model (kv/)                                                │
//! │  - Types, formats, virtual values, instances, filters       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Tree (tree/)                                               │
//! │  - TreeStore trait; MemTree (in memory), JsonTreeStore      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Virtual Values
//!
//! Every value is stored twice: the raw string the user typed and an `i64`
//! *virtual value* used for sorting and range queries. Dates become
//! `YYYYMMDD`, money becomes cents, numbers lose their grouping:
//!
//! ```
//! use kvtree::kv::{compute_virtual_value, KvType};
//!
//! let total = compute_virtual_value(KvType::Money, "dd,cc", Some("1.234,50")).unwrap();
//! assert_eq!(total, 123450);
//! let due = compute_virtual_value(KvType::Date, "dd.mm.yyyy", Some("23.07.2020")).unwrap();
//! assert_eq!(due, 20200723);
//! ```
//!
//! ## Key Principle: No I/O in the Engine
//!
//! The engine talks to the tree only through [`tree::TreeStore`]. Everything
//! it does is logged through `tracing`; it never prints, and it leaves
//! installing a subscriber to the application.
//!
//! ## Module Overview
//!
//! - [`api`]: `KvApi`, the entry point
//! - [`propagation`]: declare, undeclare, rename, inherit
//! - [`assign`]: value assignment with the one-level cascade
//! - [`doctor`]: consistency check and repair
//! - [`kv`]: the metadata model
//! - [`tree`]: the tree collaborator interface and its implementations
//! - [`config`]: configuration via `confique`
//! - [`error`]: `KvError` and `Result`

pub mod api;
pub mod assign;
pub mod config;
pub mod doctor;
pub mod error;
pub mod kv;
pub mod propagation;
pub mod tree;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use api::KvApi;
pub use config::KvConfig;
pub use error::{KvError, Result};
