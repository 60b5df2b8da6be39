//! Hashing utilities for row content and schema comparison.
//!
//! Uses FNV-1a for fast, deterministic hashing. These hashes are not
//! cryptographically secure; they detect accidental divergence between
//! runs and corruption of files on disk.

use simtab_core::{ColumnKind, Schema, TableId, Value};
use simtab_record::Row;

/// FNV-1a offset basis for 64-bit.
const FNV_OFFSET: u64 = 0xcbf29ce484222325;
/// FNV-1a prime for 64-bit.
const FNV_PRIME: u64 = 0x00000100000001B3;

/// Feed a single byte into an FNV-1a hash state.
#[inline]
fn fnv1a_byte(hash: u64, byte: u8) -> u64 {
    (hash ^ byte as u64).wrapping_mul(FNV_PRIME)
}

#[inline]
fn fnv1a_bytes(mut hash: u64, bytes: &[u8]) -> u64 {
    for &b in bytes {
        hash = fnv1a_byte(hash, b);
    }
    hash
}

/// Feed a u32 (as 4 LE bytes) into an FNV-1a hash state.
#[inline]
fn fnv1a_u32(hash: u64, v: u32) -> u64 {
    fnv1a_bytes(hash, &v.to_le_bytes())
}

/// Feed a u64 (as 8 LE bytes) into an FNV-1a hash state.
#[inline]
fn fnv1a_u64(hash: u64, v: u64) -> u64 {
    fnv1a_bytes(hash, &v.to_le_bytes())
}

fn fnv1a_str(hash: u64, s: &str) -> u64 {
    fnv1a_bytes(fnv1a_u32(hash, s.len() as u32), s.as_bytes())
}

fn fnv1a_value(mut hash: u64, value: &Value) -> u64 {
    match value {
        Value::Int(v) => fnv1a_u64(fnv1a_byte(hash, 0), *v as u64),
        Value::Real(v) => fnv1a_u64(fnv1a_byte(hash, 1), v.to_bits()),
        Value::IntSeq(seq) => {
            hash = fnv1a_u32(fnv1a_byte(hash, 2), seq.len() as u32);
            for &v in seq {
                hash = fnv1a_u64(hash, v as u64);
            }
            hash
        }
        Value::RealSeq(seq) => {
            hash = fnv1a_u32(fnv1a_byte(hash, 3), seq.len() as u32);
            for &v in seq {
                hash = fnv1a_u64(hash, v.to_bits());
            }
            hash
        }
        Value::Text(s) => fnv1a_str(fnv1a_byte(hash, 4), s),
    }
}

/// Incremental hash over the rows of a run file, in file order.
///
/// The table ID is folded in at each table boundary so that moving a row
/// from one table to another changes the hash. Reals are hashed by bit
/// pattern, so `NaN` payloads and signed zeros are distinguished.
///
/// # Examples
///
/// ```
/// use simtab_core::{EventId, TableId, Value};
/// use simtab_output::ContentHasher;
/// use simtab_record::Row;
///
/// let row = Row { event: EventId(0), cells: vec![Value::Int(1)] };
///
/// let mut a = ContentHasher::new();
/// a.begin_table(TableId(0));
/// a.row(&row);
///
/// let mut b = ContentHasher::new();
/// b.begin_table(TableId(1));
/// b.row(&row);
///
/// assert_ne!(a.finish(), b.finish());
/// ```
#[derive(Clone, Debug)]
pub struct ContentHasher {
    hash: u64,
}

impl ContentHasher {
    /// Start from the FNV-1a offset basis.
    pub fn new() -> Self {
        Self { hash: FNV_OFFSET }
    }

    /// Mark the start of a table block.
    pub fn begin_table(&mut self, table: TableId) {
        self.hash = fnv1a_u32(self.hash, table.0);
    }

    /// Fold in one row.
    pub fn row(&mut self, row: &Row) {
        let mut hash = fnv1a_u64(self.hash, row.event.0);
        for cell in &row.cells {
            hash = fnv1a_value(hash, cell);
        }
        self.hash = hash;
    }

    /// The hash of everything fed so far.
    pub fn finish(&self) -> u64 {
        self.hash
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_tag(kind: ColumnKind) -> (u8, u32) {
    match kind {
        ColumnKind::Int => (0, 0),
        ColumnKind::Real => (1, 0),
        ColumnKind::IntArray { capacity } => (2, capacity),
        ColumnKind::RealArray { capacity } => (3, capacity),
        ColumnKind::Text => (4, 0),
    }
}

/// Compute a hash over every table and column definition in a schema.
///
/// Covers names, descriptions, kinds, capacities, fold bindings and
/// defaults, in definition order.
pub fn schema_hash(schema: &Schema) -> u64 {
    let mut hash = fnv1a_u32(FNV_OFFSET, schema.tables.len() as u32);
    for table in &schema.tables {
        hash = fnv1a_str(hash, &table.name);
        hash = fnv1a_str(hash, &table.description);
        hash = fnv1a_u32(hash, table.columns.len() as u32);
        for col in &table.columns {
            let (tag, capacity) = kind_tag(col.kind);
            hash = fnv1a_str(hash, &col.name);
            hash = fnv1a_u32(fnv1a_byte(hash, tag), capacity);
            hash = match col.fold {
                Some(f) => fnv1a_u32(fnv1a_byte(hash, 1), f.0),
                None => fnv1a_byte(hash, 0),
            };
            hash = match &col.default {
                Some(v) => fnv1a_value(fnv1a_byte(hash, 1), v),
                None => fnv1a_byte(hash, 0),
            };
        }
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use simtab_core::{ColumnDef, EventId, TableSchema};
    use smallvec::smallvec;

    fn events_schema(capacity: u32) -> Schema {
        Schema {
            tables: vec![TableSchema {
                id: TableId(0),
                name: "events".into(),
                description: String::new(),
                columns: vec![
                    ColumnDef::new("id", ColumnKind::Int),
                    ColumnDef::new("hits", ColumnKind::RealArray { capacity }),
                ],
            }],
        }
    }

    fn row(event: u64, hits: &[f64]) -> Row {
        Row {
            event: EventId(event),
            cells: vec![Value::Int(event as i64), Value::RealSeq(hits.iter().copied().collect())],
        }
    }

    fn hash_rows(rows: &[Row]) -> u64 {
        let mut h = ContentHasher::new();
        h.begin_table(TableId(0));
        for r in rows {
            h.row(r);
        }
        h.finish()
    }

    #[test]
    fn same_rows_same_hash() {
        let rows = [row(0, &[1.0, 2.0]), row(1, &[])];
        assert_eq!(hash_rows(&rows), hash_rows(&rows.clone()));
    }

    #[test]
    fn row_order_matters() {
        let a = [row(0, &[1.0]), row(1, &[2.0])];
        let b = [row(1, &[2.0]), row(0, &[1.0])];
        assert_ne!(hash_rows(&a), hash_rows(&b));
    }

    #[test]
    fn fold_boundary_matters() {
        // [1.0] followed by an empty sequence vs. [] followed by [1.0].
        let a = Row {
            event: EventId(0),
            cells: vec![Value::RealSeq(smallvec![1.0]), Value::RealSeq(smallvec![])],
        };
        let b = Row {
            event: EventId(0),
            cells: vec![Value::RealSeq(smallvec![]), Value::RealSeq(smallvec![1.0])],
        };
        assert_ne!(hash_rows(&[a]), hash_rows(&[b]));
    }

    #[test]
    fn empty_hash_is_fnv_offset() {
        assert_eq!(ContentHasher::new().finish(), FNV_OFFSET);
    }

    #[test]
    fn schema_hash_sees_capacity() {
        assert_eq!(schema_hash(&events_schema(3)), schema_hash(&events_schema(3)));
        assert_ne!(schema_hash(&events_schema(3)), schema_hash(&events_schema(4)));
    }

    #[test]
    fn schema_hash_sees_fold_binding() {
        let plain = events_schema(3);
        let mut bound = plain.clone();
        bound.tables[0].columns[1].fold = Some(simtab_core::ColumnId(0));
        assert_ne!(schema_hash(&plain), schema_hash(&bound));
    }
}
