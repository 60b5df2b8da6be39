//! Binary encode/decode for the run file format.
//!
//! All integers are little-endian. Strings are length-prefixed with a
//! `u32` length. The format has no compression and no alignment padding;
//! column types come from the schema block, so cells carry no tags.
//!
//! Sequence cells store their fold as a `u32` followed by exactly that
//! many elements. Unpopulated slots do not exist on disk.

use std::io::{self, Read, Write};

use simtab_core::{
    ColumnDef, ColumnId, ColumnKind, EventId, IntSeq, RealSeq, RunId, Schema, TableId,
    TableSchema, Value,
};
use simtab_record::Row;

use crate::error::OutputError;
use crate::types::{BuildMetadata, Footer, RunHeader, RunStatus};
use crate::{END_MAGIC, FORMAT_VERSION, MAGIC};

// ── Primitive writers ───────────────────────────────────────────

/// Write a single byte.
pub fn write_u8(w: &mut dyn Write, v: u8) -> Result<(), OutputError> {
    w.write_all(&[v])?;
    Ok(())
}

/// Write a little-endian u32.
pub fn write_u32_le(w: &mut dyn Write, v: u32) -> Result<(), OutputError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian u64.
pub fn write_u64_le(w: &mut dyn Write, v: u64) -> Result<(), OutputError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian i64.
pub fn write_i64_le(w: &mut dyn Write, v: i64) -> Result<(), OutputError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian f64.
pub fn write_f64_le(w: &mut dyn Write, v: f64) -> Result<(), OutputError> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a length-prefixed UTF-8 string (u32 length + bytes).
pub fn write_length_prefixed_str(w: &mut dyn Write, s: &str) -> Result<(), OutputError> {
    write_u32_le(w, s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

// ── Primitive readers ───────────────────────────────────────────

/// Read a single byte.
pub fn read_u8(r: &mut dyn Read) -> Result<u8, OutputError> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

/// Read a little-endian u32.
pub fn read_u32_le(r: &mut dyn Read) -> Result<u32, OutputError> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Read a little-endian u64.
pub fn read_u64_le(r: &mut dyn Read) -> Result<u64, OutputError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Read a little-endian i64.
pub fn read_i64_le(r: &mut dyn Read) -> Result<i64, OutputError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

/// Read a little-endian f64.
pub fn read_f64_le(r: &mut dyn Read) -> Result<f64, OutputError> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

/// Read a length-prefixed UTF-8 string.
pub fn read_length_prefixed_str(r: &mut dyn Read) -> Result<String, OutputError> {
    let len = read_u32_le(r)? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| OutputError::Malformed {
        detail: format!("invalid UTF-8 string: {e}"),
    })
}

fn read_flag(r: &mut dyn Read, what: &str) -> Result<bool, OutputError> {
    match read_u8(r)? {
        0 => Ok(false),
        1 => Ok(true),
        v => Err(OutputError::Malformed {
            detail: format!("invalid {what} presence flag {v}, expected 0 or 1"),
        }),
    }
}

// ── Header encode/decode ────────────────────────────────────────

/// Encode the run file header (magic, version, run header).
pub fn encode_header(w: &mut dyn Write, header: &RunHeader) -> Result<(), OutputError> {
    w.write_all(&MAGIC)?;
    write_u8(w, FORMAT_VERSION)?;

    write_u64_le(w, header.run_id.0)?;
    write_u64_le(w, header.master_seed)?;
    write_u32_le(w, header.worker_count)?;

    let meta = &header.metadata;
    write_length_prefixed_str(w, &meta.toolchain)?;
    write_length_prefixed_str(w, &meta.target_triple)?;
    write_length_prefixed_str(w, &meta.simtab_version)?;
    write_length_prefixed_str(w, &meta.compile_flags)?;

    write_u64_le(w, header.schema_hash)?;
    Ok(())
}

/// Decode and validate the run file header.
pub fn decode_header(r: &mut dyn Read) -> Result<RunHeader, OutputError> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(OutputError::InvalidMagic);
    }

    let version = read_u8(r)?;
    if version != FORMAT_VERSION {
        return Err(OutputError::UnsupportedVersion { found: version });
    }

    let run_id = RunId(read_u64_le(r)?);
    let master_seed = read_u64_le(r)?;
    let worker_count = read_u32_le(r)?;
    let metadata = BuildMetadata {
        toolchain: read_length_prefixed_str(r)?,
        target_triple: read_length_prefixed_str(r)?,
        simtab_version: read_length_prefixed_str(r)?,
        compile_flags: read_length_prefixed_str(r)?,
    };
    let schema_hash = read_u64_le(r)?;

    Ok(RunHeader {
        run_id,
        master_seed,
        worker_count,
        metadata,
        schema_hash,
    })
}

// ── Schema encode/decode ────────────────────────────────────────

const KIND_INT: u8 = 0;
const KIND_REAL: u8 = 1;
const KIND_INT_ARRAY: u8 = 2;
const KIND_REAL_ARRAY: u8 = 3;
const KIND_TEXT: u8 = 4;

fn encode_kind(w: &mut dyn Write, kind: ColumnKind) -> Result<(), OutputError> {
    match kind {
        ColumnKind::Int => write_u8(w, KIND_INT),
        ColumnKind::Real => write_u8(w, KIND_REAL),
        ColumnKind::IntArray { capacity } => {
            write_u8(w, KIND_INT_ARRAY)?;
            write_u32_le(w, capacity)
        }
        ColumnKind::RealArray { capacity } => {
            write_u8(w, KIND_REAL_ARRAY)?;
            write_u32_le(w, capacity)
        }
        ColumnKind::Text => write_u8(w, KIND_TEXT),
    }
}

fn decode_kind(r: &mut dyn Read) -> Result<ColumnKind, OutputError> {
    let kind = match read_u8(r)? {
        KIND_INT => ColumnKind::Int,
        KIND_REAL => ColumnKind::Real,
        KIND_INT_ARRAY => ColumnKind::IntArray {
            capacity: read_u32_le(r)?,
        },
        KIND_REAL_ARRAY => ColumnKind::RealArray {
            capacity: read_u32_le(r)?,
        },
        KIND_TEXT => ColumnKind::Text,
        tag => {
            return Err(OutputError::Malformed {
                detail: format!("unknown column kind tag {tag}"),
            })
        }
    };
    if kind.capacity() == Some(0) {
        return Err(OutputError::Malformed {
            detail: "sequence column with zero capacity".into(),
        });
    }
    Ok(kind)
}

/// Encode the schema block: every table with its columns.
pub fn encode_schema(w: &mut dyn Write, schema: &Schema) -> Result<(), OutputError> {
    write_u32_le(w, schema.tables.len() as u32)?;
    for table in &schema.tables {
        write_length_prefixed_str(w, &table.name)?;
        write_length_prefixed_str(w, &table.description)?;
        write_u32_le(w, table.columns.len() as u32)?;
        for col in &table.columns {
            write_length_prefixed_str(w, &col.name)?;
            encode_kind(w, col.kind)?;
            match col.fold {
                Some(f) => {
                    write_u8(w, 1)?;
                    write_u32_le(w, f.0)?;
                }
                None => write_u8(w, 0)?,
            }
            match &col.default {
                Some(v) => {
                    write_u8(w, 1)?;
                    encode_value(w, v)?;
                }
                None => write_u8(w, 0)?,
            }
        }
    }
    Ok(())
}

/// Decode the schema block.
pub fn decode_schema(r: &mut dyn Read) -> Result<Schema, OutputError> {
    let table_count = read_u32_le(r)?;
    let mut tables = Vec::with_capacity(table_count.min(1024) as usize);
    for t in 0..table_count {
        let name = read_length_prefixed_str(r)?;
        let description = read_length_prefixed_str(r)?;
        let column_count = read_u32_le(r)?;
        let mut columns = Vec::with_capacity(column_count.min(1024) as usize);
        for _ in 0..column_count {
            let mut col = ColumnDef::new(read_length_prefixed_str(r)?, decode_kind(r)?);
            if read_flag(r, "fold")? {
                let fold = read_u32_le(r)?;
                if fold >= column_count {
                    return Err(OutputError::Malformed {
                        detail: format!("fold column {fold} out of range in table '{name}'"),
                    });
                }
                col.fold = Some(ColumnId(fold));
            }
            if read_flag(r, "default")? {
                col.default = Some(decode_value(r, col.kind)?);
            }
            columns.push(col);
        }
        tables.push(TableSchema {
            id: TableId(t),
            name,
            description,
            columns,
        });
    }
    Ok(Schema { tables })
}

// ── Cell and row encode/decode ──────────────────────────────────

/// Encode one cell. The column kind is implied by the schema.
pub fn encode_value(w: &mut dyn Write, value: &Value) -> Result<(), OutputError> {
    match value {
        Value::Int(v) => write_i64_le(w, *v),
        Value::Real(v) => write_f64_le(w, *v),
        Value::IntSeq(seq) => {
            write_u32_le(w, seq.len() as u32)?;
            for &v in seq {
                write_i64_le(w, v)?;
            }
            Ok(())
        }
        Value::RealSeq(seq) => {
            write_u32_le(w, seq.len() as u32)?;
            for &v in seq {
                write_f64_le(w, v)?;
            }
            Ok(())
        }
        Value::Text(s) => write_length_prefixed_str(w, s),
    }
}

/// Decode one cell of the given kind.
///
/// A sequence whose stored fold exceeds the column capacity is rejected.
pub fn decode_value(r: &mut dyn Read, kind: ColumnKind) -> Result<Value, OutputError> {
    Ok(match kind {
        ColumnKind::Int => Value::Int(read_i64_le(r)?),
        ColumnKind::Real => Value::Real(read_f64_le(r)?),
        ColumnKind::IntArray { capacity } => {
            let n = read_fold(r, capacity)?;
            let mut seq = IntSeq::with_capacity(n);
            for _ in 0..n {
                seq.push(read_i64_le(r)?);
            }
            Value::IntSeq(seq)
        }
        ColumnKind::RealArray { capacity } => {
            let n = read_fold(r, capacity)?;
            let mut seq = RealSeq::with_capacity(n);
            for _ in 0..n {
                seq.push(read_f64_le(r)?);
            }
            Value::RealSeq(seq)
        }
        ColumnKind::Text => Value::Text(read_length_prefixed_str(r)?),
    })
}

fn read_fold(r: &mut dyn Read, capacity: u32) -> Result<usize, OutputError> {
    let fold = read_u32_le(r)?;
    if fold > capacity {
        return Err(OutputError::Malformed {
            detail: format!("fold {fold} exceeds capacity {capacity}"),
        });
    }
    Ok(fold as usize)
}

/// Encode one row: event ID, then each cell in column order.
pub fn encode_row(w: &mut dyn Write, row: &Row) -> Result<(), OutputError> {
    write_u64_le(w, row.event.0)?;
    for cell in &row.cells {
        encode_value(w, cell)?;
    }
    Ok(())
}

/// Decode one row of `table`.
pub fn decode_row(r: &mut dyn Read, table: &TableSchema) -> Result<Row, OutputError> {
    let event = EventId(read_u64_le(r)?);
    let cells = table
        .columns
        .iter()
        .map(|col| decode_value(r, col.kind))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Row { event, cells })
}

/// Encode a table block header.
pub fn encode_table_header(
    w: &mut dyn Write,
    table: TableId,
    row_count: u64,
) -> Result<(), OutputError> {
    write_u32_le(w, table.0)?;
    write_u64_le(w, row_count)
}

/// Decode a table block header, checking it introduces `expected`.
pub fn decode_table_header(r: &mut dyn Read, expected: TableId) -> Result<u64, OutputError> {
    let table = read_u32_le(r)?;
    if table != expected.0 {
        return Err(OutputError::Malformed {
            detail: format!("expected block for table {expected}, found {table}"),
        });
    }
    read_u64_le(r)
}

// ── Footer encode/decode ────────────────────────────────────────

/// Encode the footer followed by the end magic.
pub fn encode_footer(w: &mut dyn Write, footer: &Footer) -> Result<(), OutputError> {
    write_u8(w, footer.status.as_u8())?;
    write_u64_le(w, footer.events_completed)?;
    write_u64_le(w, footer.events_failed)?;
    write_u32_le(w, footer.row_counts.len() as u32)?;
    for &n in &footer.row_counts {
        write_u64_le(w, n)?;
    }
    write_u64_le(w, footer.content_hash)?;
    w.write_all(&END_MAGIC)?;
    Ok(())
}

/// Decode the footer and end magic.
///
/// A stream that ends where the footer should begin yields
/// [`OutputError::MissingFooter`].
pub fn decode_footer(r: &mut dyn Read) -> Result<Footer, OutputError> {
    let status_tag = match read_u8(r) {
        Ok(tag) => tag,
        Err(OutputError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
            return Err(OutputError::MissingFooter)
        }
        Err(e) => return Err(e),
    };
    let status = RunStatus::from_u8(status_tag).ok_or_else(|| OutputError::Malformed {
        detail: format!("unknown run status tag {status_tag}"),
    })?;
    let events_completed = read_u64_le(r)?;
    let events_failed = read_u64_le(r)?;
    let n = read_u32_le(r)?;
    let row_counts = (0..n)
        .map(|_| read_u64_le(r))
        .collect::<Result<Vec<_>, _>>()?;
    let content_hash = read_u64_le(r)?;

    let mut end = [0u8; 4];
    r.read_exact(&mut end)?;
    if end != END_MAGIC {
        return Err(OutputError::Malformed {
            detail: "missing end magic".into(),
        });
    }

    Ok(Footer {
        status,
        events_completed,
        events_failed,
        row_counts,
        content_hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use smallvec::smallvec;

    fn header() -> RunHeader {
        RunHeader {
            run_id: RunId(3),
            master_seed: 0xDEAD_BEEF,
            worker_count: 4,
            metadata: BuildMetadata {
                toolchain: "1.87".into(),
                target_triple: "x86_64-linux".into(),
                simtab_version: "0.1.0".into(),
                compile_flags: "release".into(),
            },
            schema_hash: 77,
        }
    }

    fn events_table() -> TableSchema {
        let mut hits = ColumnDef::new("hits", ColumnKind::RealArray { capacity: 3 });
        hits.fold = Some(ColumnId(2));
        let mut label = ColumnDef::new("label", ColumnKind::Text);
        label.default = Some(Value::Text("none".into()));
        TableSchema {
            id: TableId(0),
            name: "events".into(),
            description: "per-event records".into(),
            columns: vec![
                ColumnDef::new("id", ColumnKind::Int),
                hits,
                ColumnDef::new("hitFold", ColumnKind::Int),
                label,
            ],
        }
    }

    proptest! {
        #[test]
        fn f64_bits_survive(v in any::<u64>()) {
            let mut buf = Vec::new();
            write_f64_le(&mut buf, f64::from_bits(v)).unwrap();
            let got = read_f64_le(&mut buf.as_slice()).unwrap();
            prop_assert_eq!(v, got.to_bits());
        }

        #[test]
        fn int_sequence_cells_survive(
            seq in prop::collection::vec(any::<i64>(), 0..=16)
        ) {
            let value = Value::IntSeq(seq.iter().copied().collect());
            let mut buf = Vec::new();
            encode_value(&mut buf, &value).unwrap();
            prop_assert_eq!(buf.len(), 4 + 8 * seq.len());
            let kind = ColumnKind::IntArray { capacity: 16 };
            let got = decode_value(&mut buf.as_slice(), kind).unwrap();
            prop_assert_eq!(got, value);
        }
    }

    #[test]
    fn header_roundtrip() {
        let mut buf = Vec::new();
        encode_header(&mut buf, &header()).unwrap();
        assert_eq!(decode_header(&mut buf.as_slice()).unwrap(), header());
    }

    #[test]
    fn bad_magic_rejected() {
        let data = b"XMTB\x01";
        assert!(matches!(
            decode_header(&mut data.as_slice()),
            Err(OutputError::InvalidMagic)
        ));
    }

    #[test]
    fn bad_version_rejected() {
        let mut buf = MAGIC.to_vec();
        buf.push(99);
        assert!(matches!(
            decode_header(&mut buf.as_slice()),
            Err(OutputError::UnsupportedVersion { found: 99 })
        ));
    }

    #[test]
    fn schema_roundtrip_keeps_fold_and_default() {
        let schema = Schema {
            tables: vec![events_table()],
        };
        let mut buf = Vec::new();
        encode_schema(&mut buf, &schema).unwrap();
        assert_eq!(decode_schema(&mut buf.as_slice()).unwrap(), schema);
    }

    #[test]
    fn sequence_cell_stores_only_populated_slots() {
        let table = events_table();
        let row = Row {
            event: EventId(9),
            cells: vec![
                Value::Int(1),
                Value::RealSeq(smallvec![1.5, 2.5]),
                Value::Int(2),
                Value::Text("gamma".into()),
            ],
        };
        let mut buf = Vec::new();
        encode_row(&mut buf, &row).unwrap();
        // event + id + (fold + 2 reals) + hitFold + (len + "gamma")
        assert_eq!(buf.len(), 8 + 8 + (4 + 16) + 8 + (4 + 5));
        assert_eq!(decode_row(&mut buf.as_slice(), &table).unwrap(), row);
    }

    #[test]
    fn fold_beyond_capacity_is_malformed() {
        let mut buf = Vec::new();
        write_u32_le(&mut buf, 4).unwrap();
        for _ in 0..4 {
            write_f64_le(&mut buf, 0.0).unwrap();
        }
        let err = decode_value(&mut buf.as_slice(), ColumnKind::RealArray { capacity: 3 });
        assert!(matches!(err, Err(OutputError::Malformed { .. })));
    }

    #[test]
    fn table_header_must_match_expected_table() {
        let mut buf = Vec::new();
        encode_table_header(&mut buf, TableId(1), 5).unwrap();
        assert!(decode_table_header(&mut buf.as_slice(), TableId(0)).is_err());
        assert_eq!(decode_table_header(&mut buf.as_slice(), TableId(1)).unwrap(), 5);
    }

    #[test]
    fn empty_footer_position_is_missing_footer() {
        let empty: &[u8] = &[];
        assert!(matches!(
            decode_footer(&mut &*empty),
            Err(OutputError::MissingFooter)
        ));
    }

    #[test]
    fn footer_roundtrip() {
        let footer = Footer {
            status: RunStatus::Aborted,
            events_completed: 10,
            events_failed: 1,
            row_counts: vec![10, 0, 3],
            content_hash: 0xABCD,
        };
        let mut buf = Vec::new();
        encode_footer(&mut buf, &footer).unwrap();
        assert_eq!(&buf[buf.len() - 4..], &END_MAGIC);
        assert_eq!(decode_footer(&mut buf.as_slice()).unwrap(), footer);
    }
}
