//! Run file reader.
//!
//! [`OutputFile`] loads a complete run file into memory and validates it:
//! header, schema hash, per-table row counts against the footer, and the
//! content hash. Rows can then be read back by table name and row index.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use simtab_core::{Schema, TableId, Value};
use simtab_record::Row;

use crate::codec::{decode_footer, decode_header, decode_row, decode_schema, decode_table_header};
use crate::error::OutputError;
use crate::hash::{schema_hash, ContentHasher};
use crate::types::{Footer, RunHeader, RunStatus};

/// A fully loaded and validated run file.
#[derive(Clone, Debug)]
pub struct OutputFile {
    header: RunHeader,
    schema: Schema,
    tables: Vec<Vec<Row>>,
    footer: Footer,
}

impl OutputFile {
    /// Open and read the run file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, OutputError> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read(&mut reader)
    }

    /// Read a run file from a byte stream.
    pub fn read(r: &mut dyn Read) -> Result<Self, OutputError> {
        let header = decode_header(r)?;
        let schema = decode_schema(r)?;
        let computed = schema_hash(&schema);
        if computed != header.schema_hash {
            return Err(OutputError::SchemaMismatch {
                detail: format!(
                    "schema block hashes to {computed:#018x}, header says {:#018x}",
                    header.schema_hash
                ),
            });
        }

        let mut hasher = ContentHasher::new();
        let mut tables = Vec::with_capacity(schema.table_count());
        for table in &schema.tables {
            let count = match decode_table_header(r, table.id) {
                Ok(n) => n,
                Err(OutputError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(OutputError::MissingFooter)
                }
                Err(e) => return Err(e),
            };
            hasher.begin_table(table.id);
            let mut rows = Vec::with_capacity(count.min(1 << 16) as usize);
            for _ in 0..count {
                let row = decode_row(r, table)?;
                hasher.row(&row);
                rows.push(row);
            }
            tables.push(rows);
        }

        let footer = decode_footer(r)?;
        if footer.row_counts.len() != tables.len() {
            return Err(OutputError::Malformed {
                detail: format!(
                    "footer lists {} tables, schema has {}",
                    footer.row_counts.len(),
                    tables.len()
                ),
            });
        }
        let counted = schema.tables.iter().zip(&tables).zip(&footer.row_counts);
        for ((table, rows), &expected) in counted {
            if rows.len() as u64 != expected {
                return Err(OutputError::RowCountMismatch {
                    table: table.name.clone(),
                    expected,
                    found: rows.len() as u64,
                });
            }
        }
        let computed = hasher.finish();
        if computed != footer.content_hash {
            return Err(OutputError::HashMismatch {
                recorded: footer.content_hash,
                computed,
            });
        }

        Ok(Self {
            header,
            schema,
            tables,
            footer,
        })
    }

    /// Run header.
    pub fn header(&self) -> &RunHeader {
        &self.header
    }

    /// Schema the rows were written under.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Footer.
    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// Run status recorded at merge time.
    pub fn status(&self) -> RunStatus {
        self.footer.status
    }

    /// All rows of the named table, in file order.
    pub fn rows(&self, table: &str) -> Option<&[Row]> {
        let id = self.schema.table_by_name(table)?.id;
        self.rows_by_id(id)
    }

    /// All rows of a table by ID.
    pub fn rows_by_id(&self, table: TableId) -> Option<&[Row]> {
        self.tables.get(table.index()).map(Vec::as_slice)
    }

    /// Number of rows in the named table.
    pub fn row_count(&self, table: &str) -> Option<usize> {
        self.rows(table).map(<[Row]>::len)
    }

    /// One row by table name and row index.
    pub fn row(&self, table: &str, index: usize) -> Option<&Row> {
        self.rows(table)?.get(index)
    }

    /// One cell by table name, row index and column name.
    pub fn cell(&self, table: &str, index: usize, column: &str) -> Option<&Value> {
        let col = self.schema.table_by_name(table)?.column_id(column)?;
        self.row(table, index)?.cells.get(col.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BuildMetadata;
    use crate::writer::TableFileWriter;
    use simtab_core::{ColumnKind, EventId, RunId};
    use simtab_schema::SchemaRegistry;
    use smallvec::smallvec;
    use std::sync::Arc;

    fn scenario_file() -> Vec<u8> {
        let mut reg = SchemaRegistry::new();
        let t = reg.define_table("events", "").unwrap();
        reg.add_column(t, "id", ColumnKind::Int).unwrap();
        reg.add_column(t, "hits", ColumnKind::RealArray { capacity: 3 })
            .unwrap();
        reg.add_column(t, "hitFold", ColumnKind::Int).unwrap();
        let schema: Arc<Schema> = reg.seal().unwrap();
        let header = RunHeader {
            run_id: RunId(0),
            master_seed: 5,
            worker_count: 1,
            metadata: BuildMetadata::current(),
            schema_hash: schema_hash(&schema),
        };
        let rows = [
            Row {
                event: EventId(0),
                cells: vec![Value::Int(1), Value::RealSeq(smallvec![1.5, 2.5]), Value::Int(2)],
            },
            Row {
                event: EventId(1),
                cells: vec![Value::Int(2), Value::RealSeq(smallvec![]), Value::Int(0)],
            },
        ];
        let mut w = TableFileWriter::new(Vec::new(), &header, schema).unwrap();
        w.begin_table(t, 2).unwrap();
        for row in &rows {
            w.write_row(row).unwrap();
        }
        w.end_table().unwrap();
        w.finish(RunStatus::Completed, 2, 0).unwrap().0
    }

    #[test]
    fn random_read_back_by_table_and_row() {
        let file = OutputFile::read(&mut scenario_file().as_slice()).unwrap();
        assert_eq!(file.status(), RunStatus::Completed);
        assert_eq!(file.row_count("events"), Some(2));
        assert_eq!(
            file.cell("events", 0, "hits").and_then(Value::as_real_seq),
            Some(&[1.5, 2.5][..])
        );
        assert_eq!(file.cell("events", 1, "hitFold"), Some(&Value::Int(0)));
        assert_eq!(file.cell("events", 1, "hits").and_then(Value::fold), Some(0));
        assert!(file.row("events", 2).is_none());
        assert!(file.rows("missing").is_none());
    }

    #[test]
    fn truncated_before_footer_is_missing_footer() {
        let buf = scenario_file();
        // Footer: status + 2×u64 + u32 + 1×u64 + hash + end magic.
        let footer_len = 1 + 16 + 4 + 8 + 8 + 4;
        let cut = &buf[..buf.len() - footer_len];
        assert!(matches!(
            OutputFile::read(&mut &*cut),
            Err(OutputError::MissingFooter)
        ));
    }

    #[test]
    fn corrupted_cell_fails_hash_check() {
        let mut buf = scenario_file();
        let file = OutputFile::read(&mut buf.as_slice()).unwrap();
        // Flip the lowest mantissa bit of the 2.5 hit in row 0.
        let needle = 2.5f64.to_le_bytes();
        let pos = buf
            .windows(8)
            .position(|w| w == needle)
            .unwrap();
        buf[pos] ^= 0x01;
        let err = OutputFile::read(&mut buf.as_slice()).unwrap_err();
        let stored = file.footer().content_hash;
        assert!(
            matches!(err, OutputError::HashMismatch { recorded, .. } if recorded == stored),
            "got {err:?}"
        );
    }
}
