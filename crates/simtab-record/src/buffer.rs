//! The per-worker record buffer.

use std::sync::Arc;

use simtab_core::{
    ColumnDef, ColumnId, Element, EventId, RecordError, Schema, SchemaViolation, TableId,
    TableSchema, Value, WorkerId,
};

use crate::row::{Row, WorkerRows};

/// Cells of one table's row while its event is still open.
type PendingRow = Vec<Option<Value>>;

struct OpenEvent {
    id: EventId,
    /// First error raised inside the event. Once set, every later write
    /// fails with it and `end_event` discards the whole event.
    poisoned: Option<RecordError>,
}

/// Staging area for the rows one worker produces.
///
/// A table touched during an event gets exactly one row for that event;
/// untouched tables get none. Rows are validated against the frozen
/// [`Schema`] as cells are written and again when the event closes.
/// Nothing is visible through [`rows`](Self::rows) until `end_event`
/// succeeds, and a failed event leaves no trace in any table.
///
/// # Examples
///
/// ```
/// use simtab_core::{ColumnId, ColumnKind, EventId, WorkerId};
/// use simtab_record::RecordBuffer;
/// use simtab_schema::SchemaRegistry;
///
/// let mut reg = SchemaRegistry::new();
/// let t = reg.define_table("events", "").unwrap();
/// let id = reg.add_column(t, "id", ColumnKind::Int).unwrap();
/// let hits = reg.add_column(t, "hits", ColumnKind::RealArray { capacity: 3 }).unwrap();
///
/// let mut buf = RecordBuffer::new(reg.seal().unwrap(), WorkerId(0));
/// buf.begin_event(EventId(0)).unwrap();
/// buf.set_scalar(t, id, 1).unwrap();
/// buf.append_to_sequence(t, hits, 1.5).unwrap();
/// assert_eq!(buf.end_event().unwrap(), 1);
/// assert_eq!(buf.row_count(t), 1);
/// ```
pub struct RecordBuffer {
    schema: Arc<Schema>,
    worker: WorkerId,
    tables: Vec<Vec<Row>>,
    committed: Vec<u64>,
    pending: Vec<Option<PendingRow>>,
    open: Option<OpenEvent>,
}

impl RecordBuffer {
    /// Create an empty buffer for `worker` over a frozen schema.
    pub fn new(schema: Arc<Schema>, worker: WorkerId) -> Self {
        let n = schema.table_count();
        Self {
            schema,
            worker,
            tables: vec![Vec::new(); n],
            committed: vec![0; n],
            pending: vec![None; n],
            open: None,
        }
    }

    /// Open a new event. Fails if the previous event was not closed.
    pub fn begin_event(&mut self, event: EventId) -> Result<(), RecordError> {
        if self.open.is_some() {
            return Err(RecordError::EventAlreadyOpen);
        }
        self.open = Some(OpenEvent {
            id: event,
            poisoned: None,
        });
        Ok(())
    }

    /// Set a cell of `table`'s row for the open event, opening that row if
    /// this is the table's first write in the event.
    ///
    /// Sequence columns may be set wholesale with an `IntSeq`/`RealSeq`
    /// value; a value longer than the capacity is a
    /// [`RecordError::SequenceOverflow`]. Setting a cell twice overwrites it.
    pub fn set_scalar(
        &mut self,
        table: TableId,
        column: ColumnId,
        value: impl Into<Value>,
    ) -> Result<(), RecordError> {
        self.check_writable()?;
        let result = self.write_cell(table, column, value.into());
        self.poison_on_err(result)
    }

    /// Append one element to a sequence column of `table`'s row.
    ///
    /// An append that would exceed the column's capacity fails with
    /// [`RecordError::SequenceOverflow`] and leaves the row unchanged.
    pub fn append_to_sequence(
        &mut self,
        table: TableId,
        column: ColumnId,
        element: impl Into<Element>,
    ) -> Result<(), RecordError> {
        self.check_writable()?;
        let result = self.push_element(table, column, element.into());
        self.poison_on_err(result)
    }

    /// Close the open event and commit its rows.
    ///
    /// Returns the number of rows committed (one per touched table). On
    /// error no row of the event is committed.
    pub fn end_event(&mut self) -> Result<usize, RecordError> {
        let open = self.open.take().ok_or(RecordError::NoOpenEvent)?;

        let mut finished = Vec::new();
        let mut failure = open.poisoned;
        for (t, slot) in self.pending.iter_mut().enumerate() {
            let Some(cells) = slot.take() else {
                continue;
            };
            if failure.is_some() {
                continue;
            }
            match finalize_row(&self.schema.tables[t], cells) {
                Ok(cells) => finished.push((t, cells)),
                Err(e) => failure = Some(e),
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let count = finished.len();
        for (t, cells) in finished {
            self.tables[t].push(Row {
                event: open.id,
                cells,
            });
            self.committed[t] += 1;
        }
        tracing::trace!(worker = %self.worker, event = %open.id, rows = count, "event committed");
        Ok(count)
    }

    /// Drop the open event and its pending rows without committing.
    ///
    /// Returns `false` if no event was open.
    pub fn abort_event(&mut self) -> bool {
        for slot in &mut self.pending {
            *slot = None;
        }
        self.open.take().is_some()
    }

    /// A write-only view for event-producing code.
    pub fn recorder(&mut self) -> EventRecorder<'_> {
        EventRecorder { buffer: self }
    }

    /// The currently open event, if any.
    pub fn current_event(&self) -> Option<EventId> {
        self.open.as_ref().map(|o| o.id)
    }

    /// The error that poisoned the open event, if any.
    pub fn poisoned(&self) -> Option<&RecordError> {
        self.open.as_ref().and_then(|o| o.poisoned.as_ref())
    }

    /// Owning worker.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// The frozen schema rows are validated against.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Committed rows of `table`, in arrival order.
    pub fn rows(&self, table: TableId) -> &[Row] {
        self.tables
            .get(table.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of committed rows in `table`.
    pub fn row_count(&self, table: TableId) -> usize {
        self.rows(table).len()
    }

    /// Committed-row counters, indexed by table.
    pub fn committed(&self) -> &[u64] {
        &self.committed
    }

    /// Consume the buffer into the structure handed to the aggregator.
    ///
    /// An event still open at this point is discarded.
    pub fn into_rows(self) -> WorkerRows {
        WorkerRows {
            worker: self.worker,
            tables: self.tables,
            committed: self.committed,
        }
    }

    fn check_writable(&self) -> Result<(), RecordError> {
        match &self.open {
            None => Err(RecordError::NoOpenEvent),
            Some(OpenEvent {
                poisoned: Some(e), ..
            }) => Err(e.clone()),
            Some(_) => Ok(()),
        }
    }

    fn poison_on_err(&mut self, result: Result<(), RecordError>) -> Result<(), RecordError> {
        if let (Err(e), Some(open)) = (&result, &mut self.open) {
            open.poisoned = Some(e.clone());
        }
        result
    }

    fn write_cell(
        &mut self,
        table: TableId,
        column: ColumnId,
        value: Value,
    ) -> Result<(), RecordError> {
        let (ts, col) = column_def(&self.schema, table, column)?;
        if !col.kind.accepts(&value) {
            if value.kind_name() == col.kind.name() {
                return Err(overflow(ts, col));
            }
            return Err(mismatch(ts, col, value.kind_name()));
        }
        let row = self.pending[table.index()].get_or_insert_with(|| vec![None; ts.width()]);
        row[column.index()] = Some(value);
        Ok(())
    }

    fn push_element(
        &mut self,
        table: TableId,
        column: ColumnId,
        element: Element,
    ) -> Result<(), RecordError> {
        let (ts, col) = column_def(&self.schema, table, column)?;
        let (Some(capacity), Some(empty)) = (col.kind.capacity(), col.kind.empty_sequence()) else {
            return Err(mismatch(ts, col, element.kind_name()));
        };
        if !col.kind.accepts_element(&element) {
            return Err(mismatch(ts, col, element.kind_name()));
        }

        let row = self.pending[table.index()].get_or_insert_with(|| vec![None; ts.width()]);
        let cell = row[column.index()].get_or_insert(empty);
        if cell.fold().unwrap_or(0) >= capacity as usize {
            return Err(overflow(ts, col));
        }
        match (cell, element) {
            (Value::IntSeq(v), Element::Int(x)) => v.push(x),
            (Value::RealSeq(v), Element::Real(x)) => v.push(x),
            _ => return Err(mismatch(ts, col, element.kind_name())),
        }
        Ok(())
    }
}

impl std::fmt::Debug for RecordBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordBuffer")
            .field("worker", &self.worker)
            .field("committed", &self.committed)
            .field("open", &self.current_event())
            .finish()
    }
}

/// Write access to the open event of one [`RecordBuffer`].
///
/// Handed to event producers so they can fill cells but not open, close
/// or inspect committed rows.
pub struct EventRecorder<'a> {
    buffer: &'a mut RecordBuffer,
}

impl EventRecorder<'_> {
    /// See [`RecordBuffer::set_scalar`].
    pub fn set_scalar(
        &mut self,
        table: TableId,
        column: ColumnId,
        value: impl Into<Value>,
    ) -> Result<(), RecordError> {
        self.buffer.set_scalar(table, column, value)
    }

    /// See [`RecordBuffer::append_to_sequence`].
    pub fn append_to_sequence(
        &mut self,
        table: TableId,
        column: ColumnId,
        element: impl Into<Element>,
    ) -> Result<(), RecordError> {
        self.buffer.append_to_sequence(table, column, element)
    }

    /// The event being recorded.
    pub fn event(&self) -> Option<EventId> {
        self.buffer.current_event()
    }

    /// The frozen schema.
    pub fn schema(&self) -> &Schema {
        self.buffer.schema()
    }
}

fn column_def(
    schema: &Schema,
    table: TableId,
    column: ColumnId,
) -> Result<(&TableSchema, &ColumnDef), RecordError> {
    let ts = schema
        .table(table)
        .ok_or(SchemaViolation::UnknownTable { table })?;
    let col = ts.column(column).ok_or_else(|| SchemaViolation::UnknownColumn {
        table: ts.name.clone(),
        column,
    })?;
    Ok((ts, col))
}

/// Resolve fold columns and defaults for a row whose event is closing.
fn finalize_row(table: &TableSchema, mut cells: PendingRow) -> Result<Vec<Value>, RecordError> {
    for (f, fold_col) in table.columns.iter().enumerate() {
        let fold_id = ColumnId(f as u32);
        let mut lengths = table
            .columns
            .iter()
            .zip(&cells)
            .filter(|(c, _)| c.fold == Some(fold_id))
            .map(|(c, cell)| (c, cell.as_ref().and_then(Value::fold).unwrap_or(0)));
        let Some((first, populated)) = lengths.next() else {
            continue;
        };
        if let Some((other, len)) = lengths.find(|&(_, len)| len != populated) {
            return Err(RecordError::UnevenSequences {
                table: table.id,
                table_name: table.name.clone(),
                fold_column: fold_col.name.clone(),
                first: (first.name.clone(), populated),
                other: (other.name.clone(), len),
            });
        }
        match cells[f].as_ref().and_then(Value::as_int) {
            None => cells[f] = Some(Value::Int(populated as i64)),
            Some(v) if v == populated as i64 => {}
            Some(v) => return Err(fold_mismatch(table, fold_col, v, populated)),
        }
    }

    table
        .columns
        .iter()
        .zip(cells)
        .map(|(col, cell)| match cell {
            Some(v) => Ok(v),
            None => col
                .default
                .clone()
                .or_else(|| col.kind.empty_sequence())
                .ok_or_else(|| RecordError::IncompleteRow {
                    table: table.id,
                    table_name: table.name.clone(),
                    column: col.name.clone(),
                }),
        })
        .collect()
}

fn overflow(table: &TableSchema, col: &ColumnDef) -> RecordError {
    RecordError::SequenceOverflow {
        table: table.id,
        table_name: table.name.clone(),
        column: col.name.clone(),
        capacity: col.kind.capacity().unwrap_or(0),
    }
}

fn mismatch(table: &TableSchema, col: &ColumnDef, found: &'static str) -> RecordError {
    RecordError::Schema(SchemaViolation::TypeMismatch {
        table: table.name.clone(),
        column: col.name.clone(),
        expected: col.kind.name(),
        found,
    })
}

fn fold_mismatch(table: &TableSchema, col: &ColumnDef, fold: i64, populated: usize) -> RecordError {
    RecordError::FoldMismatch {
        table: table.id,
        table_name: table.name.clone(),
        column: col.name.clone(),
        fold,
        populated,
    }
}
