//! Core types for the simtab run-output framework.
//!
//! This is the leaf crate with zero internal dependencies. It defines
//! the fundamental vocabulary used throughout the workspace: typed IDs,
//! column kinds, cell values, the frozen [`Schema`], and the error types
//! shared by schema definition and row assembly.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod column;
pub mod error;
pub mod id;
pub mod value;

pub use column::{ColumnDef, ColumnKind, Schema, TableSchema};
pub use error::{RecordError, SchemaViolation};
pub use id::{ColumnId, EventId, RunId, TableId, WorkerId};
pub use value::{Element, IntSeq, RealSeq, Value};
