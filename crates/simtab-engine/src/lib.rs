//! Run lifecycle for simtab.
//!
//! [`RunController`] seals the schema, derives one random stream per
//! worker, starts a fixed pool of worker threads, dispatches events to
//! them and merges their rows into one output file at run end. Event
//! processing itself is delegated to an [`EventProducer`] per worker.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod metrics;
pub mod producer;
pub mod seeds;
mod worker;

pub use config::{ConfigError, EventPartition, EventSlice, RunConfig, DEFAULT_WORKER_COUNT};
pub use controller::{AbortHandle, RunController, RunError, RunState};
pub use metrics::{BatchSummary, EventFailure, RunReport, WorkerMetrics};
pub use producer::{EventContext, EventError, EventProducer, ProducerFactory};
pub use seeds::{
    assign_seeds, derive_worker_seed, time_derived_seed, SeedAssignment, SeedError, WorkerRng,
    WorkerSeed, MAX_WORKERS,
};
