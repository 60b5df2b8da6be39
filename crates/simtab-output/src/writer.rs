//! Run file writer.
//!
//! [`TableFileWriter`] streams a run file to any `Write` sink. The header
//! and schema block are written on construction; table blocks must follow
//! in table-ID order, each declaring its row count up front.

use std::io::Write;
use std::sync::Arc;

use simtab_core::{Schema, TableId};
use simtab_record::Row;

use crate::codec::{encode_footer, encode_header, encode_row, encode_schema, encode_table_header};
use crate::error::OutputError;
use crate::hash::{schema_hash, ContentHasher};
use crate::types::{Footer, RunHeader, RunStatus};

struct OpenBlock {
    table: TableId,
    declared: u64,
    written: u64,
}

/// Writes a run file to a byte stream.
///
/// Generic over `W: Write` so tests can use `Vec<u8>` and the aggregator
/// can use `BufWriter<File>`. Every row is checked against its table
/// definition before it is encoded.
///
/// # Examples
///
/// ```
/// use simtab_core::{ColumnKind, EventId, RunId, Value};
/// use simtab_output::{
///     schema_hash, BuildMetadata, OutputFile, RunHeader, RunStatus, TableFileWriter,
/// };
/// use simtab_record::Row;
/// use simtab_schema::SchemaRegistry;
///
/// let mut reg = SchemaRegistry::new();
/// let t = reg.define_table("events", "").unwrap();
/// reg.add_column(t, "id", ColumnKind::Int).unwrap();
/// let schema = reg.seal().unwrap();
///
/// let header = RunHeader {
///     run_id: RunId(0),
///     master_seed: 42,
///     worker_count: 1,
///     metadata: BuildMetadata::current(),
///     schema_hash: schema_hash(&schema),
/// };
///
/// let mut buf = Vec::new();
/// let mut writer = TableFileWriter::new(&mut buf, &header, schema).unwrap();
/// writer.begin_table(t, 2).unwrap();
/// for i in 0..2 {
///     writer.write_row(&Row { event: EventId(i), cells: vec![Value::Int(i as i64)] }).unwrap();
/// }
/// writer.end_table().unwrap();
/// let (_, footer) = writer.finish(RunStatus::Completed, 2, 0).unwrap();
/// assert_eq!(footer.row_counts, vec![2]);
///
/// let file = OutputFile::read(&mut buf.as_slice()).unwrap();
/// assert_eq!(file.row("events", 1).unwrap().cells[0], Value::Int(1));
/// ```
pub struct TableFileWriter<W: Write> {
    writer: W,
    schema: Arc<Schema>,
    block: Option<OpenBlock>,
    row_counts: Vec<u64>,
    hasher: ContentHasher,
}

impl<W: Write> TableFileWriter<W> {
    /// Create a writer, immediately writing the header and schema block.
    ///
    /// Fails with [`OutputError::SchemaMismatch`] if the header's schema
    /// hash does not describe `schema`.
    pub fn new(
        mut writer: W,
        header: &RunHeader,
        schema: Arc<Schema>,
    ) -> Result<Self, OutputError> {
        let computed = schema_hash(&schema);
        if header.schema_hash != computed {
            return Err(OutputError::SchemaMismatch {
                detail: format!(
                    "header schema hash {:#018x} does not match schema {computed:#018x}",
                    header.schema_hash
                ),
            });
        }
        encode_header(&mut writer, header)?;
        encode_schema(&mut writer, &schema)?;
        Ok(Self {
            writer,
            row_counts: Vec::with_capacity(schema.table_count()),
            schema,
            block: None,
            hasher: ContentHasher::new(),
        })
    }

    /// Start the block for `table`, which will hold exactly `row_count` rows.
    pub fn begin_table(&mut self, table: TableId, row_count: u64) -> Result<(), OutputError> {
        if let Some(open) = &self.block {
            return Err(OutputError::SchemaMismatch {
                detail: format!("block for table {} is still open", open.table),
            });
        }
        let next = self.row_counts.len();
        if table.index() != next {
            return Err(OutputError::SchemaMismatch {
                detail: format!("expected block for table {next}, got {table}"),
            });
        }
        if self.schema.table(table).is_none() {
            return Err(OutputError::SchemaMismatch {
                detail: format!("table {table} is not in the schema"),
            });
        }
        encode_table_header(&mut self.writer, table, row_count)?;
        self.hasher.begin_table(table);
        self.block = Some(OpenBlock {
            table,
            declared: row_count,
            written: 0,
        });
        Ok(())
    }

    /// Append one row to the open block.
    pub fn write_row(&mut self, row: &Row) -> Result<(), OutputError> {
        let Some(block) = &mut self.block else {
            return Err(OutputError::SchemaMismatch {
                detail: "row written outside a table block".into(),
            });
        };
        let Some(table) = self.schema.table(block.table) else {
            return Err(OutputError::SchemaMismatch {
                detail: format!("table {} is not in the schema", block.table),
            });
        };
        if block.written == block.declared {
            return Err(OutputError::RowCountMismatch {
                table: table.name.clone(),
                expected: block.declared,
                found: block.written + 1,
            });
        }
        if !table.row_conforms(&row.cells) {
            return Err(OutputError::SchemaMismatch {
                detail: format!(
                    "row for event {} does not fit table '{}'",
                    row.event, table.name
                ),
            });
        }
        encode_row(&mut self.writer, row)?;
        self.hasher.row(row);
        block.written += 1;
        Ok(())
    }

    /// Close the open block, checking the declared row count was met.
    pub fn end_table(&mut self) -> Result<(), OutputError> {
        let Some(block) = self.block.take() else {
            return Err(OutputError::SchemaMismatch {
                detail: "no table block is open".into(),
            });
        };
        if block.written != block.declared {
            let table = self
                .schema
                .table(block.table)
                .map(|t| t.name.clone())
                .unwrap_or_default();
            return Err(OutputError::RowCountMismatch {
                table,
                expected: block.declared,
                found: block.written,
            });
        }
        self.row_counts.push(block.written);
        Ok(())
    }

    /// Write the footer once every table block is complete, flush, and
    /// return the sink together with the footer written.
    pub fn finish(
        mut self,
        status: RunStatus,
        events_completed: u64,
        events_failed: u64,
    ) -> Result<(W, Footer), OutputError> {
        if self.block.is_some() || self.row_counts.len() != self.schema.table_count() {
            return Err(OutputError::SchemaMismatch {
                detail: format!(
                    "{} of {} table blocks complete",
                    self.row_counts.len(),
                    self.schema.table_count()
                ),
            });
        }
        let footer = Footer {
            status,
            events_completed,
            events_failed,
            row_counts: self.row_counts,
            content_hash: self.hasher.finish(),
        };
        encode_footer(&mut self.writer, &footer)?;
        self.writer.flush()?;
        Ok((self.writer, footer))
    }

    /// Number of completed table blocks.
    pub fn tables_written(&self) -> usize {
        self.row_counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildMetadata;
    use simtab_core::{ColumnKind, EventId, RunId, Value};
    use simtab_schema::SchemaRegistry;
    use std::io;

    /// Accepts `budget` bytes, then fails every write.
    struct FailingWriter {
        budget: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget < buf.len() {
                return Err(io::Error::other("disk full"));
            }
            self.budget -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn setup() -> (Arc<Schema>, RunHeader) {
        let mut reg = SchemaRegistry::new();
        let a = reg.define_table("a", "").unwrap();
        reg.add_column(a, "x", ColumnKind::Int).unwrap();
        let b = reg.define_table("b", "").unwrap();
        reg.add_column(b, "y", ColumnKind::Real).unwrap();
        let schema = reg.seal().unwrap();
        let header = RunHeader {
            run_id: RunId(0),
            master_seed: 1,
            worker_count: 1,
            metadata: BuildMetadata::current(),
            schema_hash: schema_hash(&schema),
        };
        (schema, header)
    }

    fn int_row(v: i64) -> Row {
        Row {
            event: EventId(v as u64),
            cells: vec![Value::Int(v)],
        }
    }

    #[test]
    fn wrong_schema_hash_rejected() {
        let (schema, mut header) = setup();
        header.schema_hash ^= 1;
        assert!(matches!(
            TableFileWriter::new(Vec::new(), &header, schema),
            Err(OutputError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn blocks_must_come_in_table_order() {
        let (schema, header) = setup();
        let mut w = TableFileWriter::new(Vec::new(), &header, schema).unwrap();
        assert!(w.begin_table(TableId(1), 0).is_err());
        w.begin_table(TableId(0), 0).unwrap();
        assert!(w.begin_table(TableId(1), 0).is_err());
    }

    #[test]
    fn extra_row_is_row_count_mismatch() {
        let (schema, header) = setup();
        let mut w = TableFileWriter::new(Vec::new(), &header, schema).unwrap();
        w.begin_table(TableId(0), 1).unwrap();
        w.write_row(&int_row(1)).unwrap();
        assert!(matches!(
            w.write_row(&int_row(2)),
            Err(OutputError::RowCountMismatch {
                expected: 1,
                found: 2,
                ..
            })
        ));
    }

    #[test]
    fn missing_row_is_row_count_mismatch() {
        let (schema, header) = setup();
        let mut w = TableFileWriter::new(Vec::new(), &header, schema).unwrap();
        w.begin_table(TableId(0), 2).unwrap();
        w.write_row(&int_row(1)).unwrap();
        assert!(matches!(
            w.end_table(),
            Err(OutputError::RowCountMismatch {
                expected: 2,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn nonconforming_row_rejected() {
        let (schema, header) = setup();
        let mut w = TableFileWriter::new(Vec::new(), &header, schema).unwrap();
        w.begin_table(TableId(0), 1).unwrap();
        let bad = Row {
            event: EventId(0),
            cells: vec![Value::Real(1.0)],
        };
        assert!(matches!(
            w.write_row(&bad),
            Err(OutputError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn finish_requires_every_table() {
        let (schema, header) = setup();
        let mut w = TableFileWriter::new(Vec::new(), &header, schema).unwrap();
        w.begin_table(TableId(0), 0).unwrap();
        w.end_table().unwrap();
        assert!(w.finish(RunStatus::Completed, 0, 0).is_err());
    }

    #[test]
    fn sink_failure_surfaces_as_io_error() {
        let (schema, header) = setup();
        let mut w = TableFileWriter::new(FailingWriter { budget: 4096 }, &header, schema).unwrap();
        w.begin_table(TableId(0), 1000).unwrap();
        let err = (0..1000)
            .map(|i| w.write_row(&int_row(i)))
            .find_map(Result::err)
            .unwrap();
        assert!(matches!(err, OutputError::Io(_)));
    }
}
