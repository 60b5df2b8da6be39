//! Column kinds, column and table definitions, and the frozen [`Schema`].

use std::sync::Arc;

use crate::id::{ColumnId, TableId};
use crate::value::{Element, Value};

/// Classification of a column's data type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    /// A single integer per row.
    Int,
    /// A single real per row.
    Real,
    /// Up to `capacity` integers per row.
    IntArray {
        /// Maximum number of populated slots. Always at least 1.
        capacity: u32,
    },
    /// Up to `capacity` reals per row.
    RealArray {
        /// Maximum number of populated slots. Always at least 1.
        capacity: u32,
    },
    /// A UTF-8 string per row.
    Text,
}

impl ColumnKind {
    /// Whether this is a fixed-capacity sequence kind.
    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::IntArray { .. } | Self::RealArray { .. })
    }

    /// Declared capacity for sequence kinds, `None` for scalars and text.
    pub fn capacity(&self) -> Option<u32> {
        match self {
            Self::IntArray { capacity } | Self::RealArray { capacity } => Some(*capacity),
            _ => None,
        }
    }

    /// Short name used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Real => "real",
            Self::IntArray { .. } => "int-array",
            Self::RealArray { .. } => "real-array",
            Self::Text => "text",
        }
    }

    /// Whether `value` is a well-formed cell for this kind, including the
    /// capacity bound for sequences.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Int, Value::Int(_)) => true,
            (Self::Real, Value::Real(_)) => true,
            (Self::Text, Value::Text(_)) => true,
            (Self::IntArray { capacity }, Value::IntSeq(v)) => v.len() <= *capacity as usize,
            (Self::RealArray { capacity }, Value::RealSeq(v)) => v.len() <= *capacity as usize,
            _ => false,
        }
    }

    /// Whether `element` may be appended to a column of this kind.
    pub fn accepts_element(&self, element: &Element) -> bool {
        matches!(
            (self, element),
            (Self::IntArray { .. }, Element::Int(_)) | (Self::RealArray { .. }, Element::Real(_))
        )
    }

    /// The empty cell for sequence kinds (fold 0).
    pub fn empty_sequence(&self) -> Option<Value> {
        match self {
            Self::IntArray { .. } => Some(Value::IntSeq(Default::default())),
            Self::RealArray { .. } => Some(Value::RealSeq(Default::default())),
            _ => None,
        }
    }
}

/// Definition of a column within a table.
#[derive(Clone, Debug, PartialEq)]
pub struct ColumnDef {
    /// Column name, unique within its table.
    pub name: String,
    /// Data type and capacity.
    pub kind: ColumnKind,
    /// Value used when the column is not set during an event.
    pub default: Option<Value>,
    /// For sequence columns: the integer column recording the fold.
    pub fold: Option<ColumnId>,
}

impl ColumnDef {
    /// A column with no default and no fold binding.
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: None,
            fold: None,
        }
    }
}

/// Frozen definition of one output table.
#[derive(Clone, Debug, PartialEq)]
pub struct TableSchema {
    /// Table ID (index into [`Schema::tables`]).
    pub id: TableId,
    /// Table name, unique within the schema.
    pub name: String,
    /// Free-form description written to the output file.
    pub description: String,
    /// Columns in declaration order. `ColumnId(n)` is `columns[n]`.
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    /// Look up a column definition by ID.
    pub fn column(&self, id: ColumnId) -> Option<&ColumnDef> {
        self.columns.get(id.index())
    }

    /// Look up a column ID by name.
    pub fn column_id(&self, name: &str) -> Option<ColumnId> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .map(|i| ColumnId(i as u32))
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Whether `cells` has exactly this table's column count and every
    /// cell matches its column kind.
    pub fn row_conforms(&self, cells: &[Value]) -> bool {
        cells.len() == self.columns.len()
            && self
                .columns
                .iter()
                .zip(cells)
                .all(|(col, cell)| col.kind.accepts(cell))
    }
}

/// The complete, immutable set of tables for a process.
///
/// Produced by freezing a schema registry; shared read-only between the
/// run controller, worker buffers and the output aggregator.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Schema {
    /// Tables in definition order. `TableId(n)` is `tables[n]`.
    pub tables: Vec<TableSchema>,
}

impl Schema {
    /// Look up a table by ID.
    pub fn table(&self, id: TableId) -> Option<&TableSchema> {
        self.tables.get(id.index())
    }

    /// Look up a table by name.
    pub fn table_by_name(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// Number of tables.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Wrap in an `Arc` for sharing with worker threads.
    pub fn into_shared(self) -> Arc<Schema> {
        Arc::new(self)
    }
}
