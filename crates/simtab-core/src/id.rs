//! Strongly-typed identifiers for runs, workers, events, tables and columns.

use std::fmt;

/// Identifies a table within a schema.
///
/// Tables are registered before the first run and assigned sequential IDs.
/// `TableId(n)` corresponds to the n-th table defined in the registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

impl TableId {
    /// The ID as a `usize` index into per-table storage.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TableId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Identifies a column within its table.
///
/// Column IDs are scoped to a single table: `ColumnId(0)` of one table
/// and `ColumnId(0)` of another refer to different columns.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnId(pub u32);

impl ColumnId {
    /// The ID as a `usize` index into a row's cells.
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ColumnId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Sequential run number, starting at 0 for the first run of a process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(pub u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for RunId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Identifies a worker thread within a run.
///
/// Workers are numbered `0..worker_count`. The ID doubles as the worker's
/// random stream selector, so it must be stable for the life of a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(pub u32);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for WorkerId {
    fn from(v: u32) -> Self {
        Self(v)
    }
}

/// Run-global event number.
///
/// Event IDs increase monotonically across successive event batches of
/// one run, independent of which worker processes the event.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EventId {
    fn from(v: u64) -> Self {
        Self(v)
    }
}
