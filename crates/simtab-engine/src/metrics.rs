//! Run statistics and failure attribution.
//!
//! [`WorkerMetrics`] is accumulated by each worker thread and returned at
//! run end. [`RunReport`] is the end-of-run summary handed back by
//! [`RunController::end_run`](crate::RunController::end_run).

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use indexmap::IndexMap;
use simtab_core::{EventId, RunId, TableId, WorkerId};
use simtab_output::RunStatus;

use crate::producer::EventError;

/// Counters collected by one worker over a run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerMetrics {
    /// Worker the counters belong to.
    pub worker: WorkerId,
    /// Events whose rows were committed.
    pub events_completed: u64,
    /// Events whose rows were discarded.
    pub events_failed: u64,
    /// Rows committed across all tables.
    pub rows_committed: u64,
    /// Time spent inside event processing.
    pub busy: Duration,
}

/// One failed event, attributed as precisely as the error allows.
#[derive(Clone, Debug, PartialEq)]
pub struct EventFailure {
    /// Run.
    pub run: RunId,
    /// Worker that processed the event.
    pub worker: WorkerId,
    /// The event.
    pub event: EventId,
    /// Table involved, when the error names one.
    pub table: Option<TableId>,
    /// Index the row would have had in the worker's buffer for `table`.
    pub row: Option<u64>,
    /// The error.
    pub error: EventError,
}

impl fmt::Display for EventFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {} worker {} event {}", self.run, self.worker, self.event)?;
        if let Some(table) = self.table {
            write!(f, " table {table}")?;
        }
        if let Some(row) = self.row {
            write!(f, " row {row}")?;
        }
        write!(f, ": {}", self.error)
    }
}

/// Result of one [`run_events`](crate::RunController::run_events) call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// First event ID of the batch.
    pub first_event: u64,
    /// Events requested.
    pub requested: u64,
    /// Events committed.
    pub completed: u64,
    /// Events discarded.
    pub failed: u64,
    /// Whether the batch stopped early on an abort request.
    pub aborted: bool,
}

impl BatchSummary {
    /// Events never started because of an abort.
    pub fn skipped(&self) -> u64 {
        self.requested - self.completed - self.failed
    }
}

/// End-of-run statistics.
#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    /// Run.
    pub run: RunId,
    /// Final status.
    pub status: RunStatus,
    /// Effective master seed.
    pub master_seed: u64,
    /// Seed fingerprint per worker, worker 0 first.
    pub seed_fingerprints: Vec<u64>,
    /// Per-worker counters, worker 0 first.
    pub workers: Vec<WorkerMetrics>,
    /// Events requested over every batch.
    pub events_requested: u64,
    /// Events committed.
    pub events_completed: u64,
    /// Events discarded.
    pub events_failed: u64,
    /// Rows per table, in table order.
    pub rows_per_table: IndexMap<String, u64>,
    /// Every failed event.
    pub failures: Vec<EventFailure>,
    /// The published output file. `None` if the run failed.
    pub output: Option<PathBuf>,
    /// Wall time from `begin_run` to the end of the merge.
    pub elapsed: Duration,
    /// Content hash from the output footer. `None` if the run failed.
    pub content_hash: Option<u64>,
}

impl RunReport {
    /// Total rows across every table.
    pub fn total_rows(&self) -> u64 {
        self.rows_per_table.values().sum()
    }

    /// Rows in the named table.
    pub fn rows(&self, table: &str) -> Option<u64> {
        self.rows_per_table.get(table).copied()
    }
}
