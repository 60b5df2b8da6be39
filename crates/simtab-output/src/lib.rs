//! Run output files for simtab.
//!
//! One file per run holds the frozen table schemas and every row the
//! workers committed. The [`OutputAggregator`] owns the file for the
//! lifetime of a run: it writes the header at run start and merges all
//! worker buffers at run end, publishing the file only once it is
//! complete.
//!
//! # Architecture
//!
//! - [`TableFileWriter`] encodes a run file to any `Write` sink
//! - [`OutputFile`] loads a run file for random read-back by table and row
//! - [`compare_outputs`] locates the first difference between two runs
//! - All I/O uses a custom binary codec (no serde dependency)
//!
//! # Format
//!
//! ```text
//! [MAGIC "SMTB"] [VERSION u8] [RunHeader] [SchemaBlock]
//! [TableBlock 0] [TableBlock 1] ... [TableBlock N-1]
//! [Footer] [END "BTMS"]
//! ```
//!
//! Each table block holds the table ID, its row count, and the rows in
//! merge order. The footer repeats the row counts and carries an FNV-1a
//! hash of all row content.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod aggregator;
pub mod codec;
pub mod compare;
pub mod error;
pub mod hash;
pub mod reader;
pub mod types;
pub mod writer;

pub use aggregator::{MergedOutput, OutputAggregator, RunSummary};
pub use compare::{compare_outputs, Divergence, DivergenceKind};
pub use error::OutputError;
pub use hash::{schema_hash, ContentHasher};
pub use reader::OutputFile;
pub use types::{BuildMetadata, Footer, RunHeader, RunStatus};
pub use writer::TableFileWriter;

/// Magic bytes at the start of every run file.
pub const MAGIC: [u8; 4] = *b"SMTB";

/// Magic bytes closing a complete run file.
pub const END_MAGIC: [u8; 4] = *b"BTMS";

/// Current binary format version.
pub const FORMAT_VERSION: u8 = 1;
