//! Simtab: run control and columnar event output for multi-threaded
//! Monte Carlo simulations.
//!
//! This is the top-level facade crate that re-exports the public API from all
//! simtab sub-crates. For most users, adding `simtab` as a single dependency
//! is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use rand::Rng;
//! use simtab::prelude::*;
//!
//! // One row per event: an energy deposit drawn from the worker's stream.
//! struct Deposit(TableId, ColumnId);
//! impl EventProducer for Deposit {
//!     fn produce(&mut self, ctx: &mut EventContext<'_>) -> Result<(), EventError> {
//!         let e: f64 = ctx.rng().random_range(0.0..10.0);
//!         ctx.set_scalar(self.0, self.1, e)?;
//!         Ok(())
//!     }
//! }
//!
//! let mut registry = SchemaRegistry::new();
//! let table = registry.define_table("deposits", "energy per event").unwrap();
//! let energy = registry.add_column(table, "energy", ColumnKind::Real).unwrap();
//!
//! let factory = move |_w: WorkerId| -> Box<dyn EventProducer> {
//!     Box::new(Deposit(table, energy))
//! };
//! let mut controller = RunController::new(registry, OutputAggregator::new(), Arc::new(factory));
//!
//! let dir = tempfile::tempdir().unwrap();
//! controller
//!     .begin_run(RunConfig {
//!         worker_count: Some(2),
//!         master_seed: Some(7),
//!         output_dir: dir.path().to_path_buf(),
//!         ..RunConfig::default()
//!     })
//!     .unwrap();
//! controller.run_events(100).unwrap();
//! let report = controller.end_run().unwrap();
//!
//! assert_eq!(report.rows("deposits"), Some(100));
//! let file = OutputFile::open(report.output.unwrap()).unwrap();
//! assert_eq!(file.row_count("deposits"), Some(100));
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `simtab-core` | IDs, column kinds, values, error types |
//! | [`schema`] | `simtab-schema` | Table registry and the K600 preset |
//! | [`record`] | `simtab-record` | Per-worker row buffers |
//! | [`output`] | `simtab-output` | File format, merge, reader, comparison |
//! | [`engine`] | `simtab-engine` | Run controller, workers, seeds, configuration |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// IDs, column kinds, cell values and errors (`simtab-core`).
pub use simtab_core as types;

/// Table and column registry (`simtab-schema`).
///
/// [`schema::SchemaRegistry`] collects table definitions before a run and
/// seals them into an immutable [`types::Schema`]. The K600 spectrometer
/// tables live in [`schema::presets`].
pub use simtab_schema as schema;

/// Per-worker row buffers (`simtab-record`).
pub use simtab_record as record;

/// Output files (`simtab-output`).
///
/// [`output::OutputAggregator`] merges worker buffers into one published
/// file per run; [`output::OutputFile`] reads it back and
/// [`output::compare_outputs`] locates the first divergence between two.
pub use simtab_output as output;

/// Run lifecycle (`simtab-engine`).
///
/// [`engine::RunController`] drives runs through
/// `Idle → Configuring → Running → Finalizing → Idle`.
pub use simtab_engine as engine;

/// Common imports for typical simtab usage.
///
/// ```rust
/// use simtab::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use simtab_core::{
        ColumnId, ColumnKind, Element, EventId, RunId, Schema, TableId, Value, WorkerId,
    };

    // Errors
    pub use simtab_core::{RecordError, SchemaViolation};
    pub use simtab_output::OutputError;

    // Schema
    pub use simtab_schema::SchemaRegistry;

    // Output
    pub use simtab_output::{OutputAggregator, OutputFile, RunStatus};

    // Engine
    pub use simtab_engine::{
        AbortHandle, EventContext, EventError, EventPartition, EventProducer, ProducerFactory,
        RunConfig, RunController, RunError, RunReport, RunState,
    };
}
