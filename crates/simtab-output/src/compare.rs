//! Run output comparison for reproducibility checks.
//!
//! Hash-first comparison (fast path) with a row-by-row, cell-by-cell
//! fallback that pinpoints the first difference.

use simtab_core::Value;

use crate::reader::OutputFile;

/// What kind of difference was found.
#[derive(Clone, Debug, PartialEq)]
pub enum DivergenceKind {
    /// The two files were written under different schemas.
    Schema,
    /// A table holds a different number of rows.
    RowCount {
        /// Rows in the first file.
        left: usize,
        /// Rows in the second file.
        right: usize,
    },
    /// Rows at the same index were produced by different events.
    Event {
        /// Event ID in the first file.
        left: u64,
        /// Event ID in the second file.
        right: u64,
    },
    /// A cell differs. Reals are compared by bit pattern.
    Cell {
        /// Value in the first file.
        left: Value,
        /// Value in the second file.
        right: Value,
    },
}

/// The first point at which two run files differ.
#[derive(Clone, Debug, PartialEq)]
pub struct Divergence {
    /// Table name (empty for a schema difference).
    pub table: String,
    /// Row index, when the difference is within a row.
    pub row: Option<usize>,
    /// Column name, when the difference is a cell.
    pub column: Option<String>,
    /// The difference itself.
    pub kind: DivergenceKind,
}

fn bitwise_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Real(x), Value::Real(y)) => x.to_bits() == y.to_bits(),
        (Value::RealSeq(x), Value::RealSeq(y)) => {
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| a.to_bits() == b.to_bits())
        }
        _ => a == b,
    }
}

/// Compare the rows of two run files.
///
/// Returns `None` when both files hold the same schema and bit-identical
/// rows in the same order. Run headers (seed, run ID, build metadata) and
/// footer event counts are not compared.
pub fn compare_outputs(left: &OutputFile, right: &OutputFile) -> Option<Divergence> {
    if left.schema() != right.schema() {
        return Some(Divergence {
            table: String::new(),
            row: None,
            column: None,
            kind: DivergenceKind::Schema,
        });
    }
    if left.footer().content_hash == right.footer().content_hash
        && left.footer().row_counts == right.footer().row_counts
    {
        return None;
    }

    for table in &left.schema().tables {
        let l = left.rows_by_id(table.id).unwrap_or(&[]);
        let r = right.rows_by_id(table.id).unwrap_or(&[]);
        for (i, (lrow, rrow)) in l.iter().zip(r).enumerate() {
            if lrow.event != rrow.event {
                return Some(Divergence {
                    table: table.name.clone(),
                    row: Some(i),
                    column: None,
                    kind: DivergenceKind::Event {
                        left: lrow.event.0,
                        right: rrow.event.0,
                    },
                });
            }
            for (col, (a, b)) in table.columns.iter().zip(lrow.cells.iter().zip(&rrow.cells)) {
                if !bitwise_eq(a, b) {
                    return Some(Divergence {
                        table: table.name.clone(),
                        row: Some(i),
                        column: Some(col.name.clone()),
                        kind: DivergenceKind::Cell {
                            left: a.clone(),
                            right: b.clone(),
                        },
                    });
                }
            }
        }
        if l.len() != r.len() {
            return Some(Divergence {
                table: table.name.clone(),
                row: Some(l.len().min(r.len())),
                column: None,
                kind: DivergenceKind::RowCount {
                    left: l.len(),
                    right: r.len(),
                },
            });
        }
    }
    None
}
