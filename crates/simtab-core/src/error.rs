//! Error types shared by the schema registry and the record buffers.
//!
//! Both families describe structural defects (bad schema, malformed rows)
//! rather than transient failures, so callers never retry them.

use std::error::Error;
use std::fmt;

use crate::id::{ColumnId, TableId};

/// A schema definition or usage that contradicts the registered tables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SchemaViolation {
    /// A table or column name is empty.
    EmptyName,
    /// A table with this name is already defined.
    DuplicateTable {
        /// The conflicting name.
        name: String,
    },
    /// A column with this name already exists in the table.
    DuplicateColumn {
        /// Owning table.
        table: String,
        /// The conflicting column name.
        name: String,
    },
    /// No table with this ID exists.
    UnknownTable {
        /// The unknown ID.
        table: TableId,
    },
    /// No column with this ID exists in the table.
    UnknownColumn {
        /// Owning table.
        table: String,
        /// The unknown column ID.
        column: ColumnId,
    },
    /// The table is frozen; its column list can no longer change.
    TableFrozen {
        /// The frozen table.
        table: String,
    },
    /// All tables were frozen for a run; no new tables may be defined.
    RegistrySealed,
    /// Sequence capacity must be a positive integer.
    InvalidCapacity {
        /// Owning table.
        table: String,
        /// Offending column.
        column: String,
    },
    /// A table was frozen without any columns.
    EmptyTable {
        /// The empty table.
        table: String,
    },
    /// A value or element does not match the column kind.
    TypeMismatch {
        /// Owning table.
        table: String,
        /// Target column.
        column: String,
        /// The column kind name.
        expected: &'static str,
        /// The supplied value kind name.
        found: &'static str,
    },
    /// A declared default does not fit its column.
    InvalidDefault {
        /// Owning table.
        table: String,
        /// Offending column.
        column: String,
    },
    /// A fold binding does not pair a sequence column with an integer column.
    InvalidFoldBinding {
        /// Owning table.
        table: String,
        /// Description of what is wrong with the binding.
        reason: String,
    },
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyName => write!(f, "table and column names must not be empty"),
            Self::DuplicateTable { name } => write!(f, "table '{name}' is already defined"),
            Self::DuplicateColumn { table, name } => {
                write!(f, "column '{name}' is already defined in table '{table}'")
            }
            Self::UnknownTable { table } => write!(f, "unknown table {table}"),
            Self::UnknownColumn { table, column } => {
                write!(f, "unknown column {column} in table '{table}'")
            }
            Self::TableFrozen { table } => write!(f, "table '{table}' is frozen"),
            Self::RegistrySealed => write!(f, "schema registry is sealed"),
            Self::InvalidCapacity { table, column } => {
                write!(f, "column '{table}.{column}' needs a positive capacity")
            }
            Self::EmptyTable { table } => write!(f, "table '{table}' has no columns"),
            Self::TypeMismatch {
                table,
                column,
                expected,
                found,
            } => write!(f, "column '{table}.{column}' is {expected}, got {found}"),
            Self::InvalidDefault { table, column } => {
                write!(f, "default for '{table}.{column}' does not fit the column")
            }
            Self::InvalidFoldBinding { table, reason } => {
                write!(f, "invalid fold binding in table '{table}': {reason}")
            }
        }
    }
}

impl Error for SchemaViolation {}

/// Errors raised while assembling rows for one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordError {
    /// The write referenced the schema incorrectly.
    Schema(SchemaViolation),
    /// A row was closed while a column without default was unset.
    IncompleteRow {
        /// Table of the incomplete row.
        table: TableId,
        /// Table name.
        table_name: String,
        /// First unset column.
        column: String,
    },
    /// An append would exceed the column's declared capacity.
    SequenceOverflow {
        /// Table of the offending column.
        table: TableId,
        /// Table name.
        table_name: String,
        /// Column name.
        column: String,
        /// Declared capacity.
        capacity: u32,
    },
    /// A fold column disagrees with the length of its bound sequences.
    FoldMismatch {
        /// Table of the offending row.
        table: TableId,
        /// Table name.
        table_name: String,
        /// Fold column name.
        column: String,
        /// Value found in the fold column.
        fold: i64,
        /// Length of the first bound sequence.
        populated: usize,
    },
    /// Two sequences bound to one fold column have different lengths.
    UnevenSequences {
        /// Table of the offending row.
        table: TableId,
        /// Table name.
        table_name: String,
        /// Fold column the sequences are bound to.
        fold_column: String,
        /// First bound sequence and its length.
        first: (String, usize),
        /// First bound sequence whose length differs.
        other: (String, usize),
    },
    /// A write arrived outside `begin_event`/`end_event`.
    NoOpenEvent,
    /// `begin_event` was called while an event was still open.
    EventAlreadyOpen,
}

impl RecordError {
    /// The table the error is attributed to, if any.
    pub fn table(&self) -> Option<TableId> {
        match self {
            Self::IncompleteRow { table, .. }
            | Self::SequenceOverflow { table, .. }
            | Self::FoldMismatch { table, .. }
            | Self::UnevenSequences { table, .. } => Some(*table),
            Self::Schema(SchemaViolation::UnknownTable { table }) => Some(*table),
            _ => None,
        }
    }
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Schema(e) => write!(f, "schema violation: {e}"),
            Self::IncompleteRow {
                table_name, column, ..
            } => write!(f, "incomplete row in '{table_name}': column '{column}' unset"),
            Self::SequenceOverflow {
                table_name,
                column,
                capacity,
                ..
            } => write!(
                f,
                "sequence overflow in '{table_name}.{column}': capacity {capacity}"
            ),
            Self::FoldMismatch {
                table_name,
                column,
                fold,
                populated,
                ..
            } => write!(
                f,
                "fold '{table_name}.{column}' is {fold} but {populated} slots are populated"
            ),
            Self::UnevenSequences {
                table_name,
                fold_column,
                first,
                other,
                ..
            } => write!(
                f,
                "sequences bound to '{table_name}.{fold_column}' differ: '{}' has {}, '{}' has {}",
                first.0, first.1, other.0, other.1
            ),
            Self::NoOpenEvent => write!(f, "no event is open"),
            Self::EventAlreadyOpen => write!(f, "an event is already open"),
        }
    }
}

impl Error for RecordError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Schema(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SchemaViolation> for RecordError {
    fn from(e: SchemaViolation) -> Self {
        Self::Schema(e)
    }
}
