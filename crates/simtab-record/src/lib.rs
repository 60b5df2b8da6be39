//! Per-worker row staging.
//!
//! Each worker owns one [`RecordBuffer`]. Event-producing code writes cells
//! through an [`EventRecorder`] between `begin_event` and `end_event`; rows
//! only become part of the worker's accumulation when the event closes
//! cleanly. At run end the buffer is consumed into [`WorkerRows`] and handed
//! to the output aggregator.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod row;

pub use buffer::{EventRecorder, RecordBuffer};
pub use row::{Row, WorkerRows};
