//! Committed rows and the end-of-run hand-off structure.

use simtab_core::{EventId, TableId, Value, WorkerId};

/// One committed table row.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    /// Event that produced the row.
    pub event: EventId,
    /// One cell per column, in column order.
    pub cells: Vec<Value>,
}

/// Everything a worker committed during a run.
///
/// `committed[t]` is counted independently of `tables[t]` as rows are
/// closed, so the aggregator can check that no row went missing between
/// `end_event` and the merge.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkerRows {
    /// Producing worker.
    pub worker: WorkerId,
    /// Rows per table, indexed by `TableId`, in arrival order.
    pub tables: Vec<Vec<Row>>,
    /// Number of rows committed per table.
    pub committed: Vec<u64>,
}

impl WorkerRows {
    /// Rows for `table`, empty if the table is unknown.
    pub fn rows(&self, table: TableId) -> &[Row] {
        self.tables
            .get(table.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Total rows across all tables.
    pub fn total_rows(&self) -> usize {
        self.tables.iter().map(Vec::len).sum()
    }
}
