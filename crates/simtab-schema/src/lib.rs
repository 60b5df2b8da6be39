//! Schema definition for simtab output tables.
//!
//! Tables and their columns are declared on a [`SchemaRegistry`] before the
//! first run. Sealing the registry freezes every table and produces the
//! shared, immutable [`Schema`](simtab_core::Schema) consumed by record
//! buffers and the output aggregator.
//!
//! [`presets`] holds ready-made schemas for known detector setups.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod presets;
pub mod registry;

pub use registry::SchemaRegistry;
