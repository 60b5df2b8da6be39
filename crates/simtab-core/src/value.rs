//! Cell values stored in table rows.

use smallvec::SmallVec;

/// Inline storage for an integer sequence cell.
///
/// Detector multiplicities are small in practice; up to 8 hits stay
/// inline and larger folds spill to the heap transparently.
pub type IntSeq = SmallVec<[i64; 8]>;

/// Inline storage for a real sequence cell.
pub type RealSeq = SmallVec<[f64; 8]>;

/// The contents of one cell of a row.
///
/// The variant always matches the column's [`ColumnKind`](crate::ColumnKind).
/// For sequence cells the vector length *is* the fold: slots beyond it do
/// not exist in memory or on disk.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    /// Scalar integer.
    Int(i64),
    /// Scalar real.
    Real(f64),
    /// Populated prefix of a fixed-capacity integer sequence.
    IntSeq(IntSeq),
    /// Populated prefix of a fixed-capacity real sequence.
    RealSeq(RealSeq),
    /// UTF-8 text.
    Text(String),
}

impl Value {
    /// Short name of the variant, used in type-mismatch diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Real(_) => "real",
            Self::IntSeq(_) => "int-array",
            Self::RealSeq(_) => "real-array",
            Self::Text(_) => "text",
        }
    }

    /// Number of populated slots for sequence values, `None` for scalars.
    pub fn fold(&self) -> Option<usize> {
        match self {
            Self::IntSeq(v) => Some(v.len()),
            Self::RealSeq(v) => Some(v.len()),
            _ => None,
        }
    }

    /// The integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The real payload, if this is a `Real`.
    pub fn as_real(&self) -> Option<f64> {
        match self {
            Self::Real(v) => Some(*v),
            _ => None,
        }
    }

    /// The text payload, if this is `Text`.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    /// The populated integer slots, if this is an `IntSeq`.
    pub fn as_int_seq(&self) -> Option<&[i64]> {
        match self {
            Self::IntSeq(v) => Some(v),
            _ => None,
        }
    }

    /// The populated real slots, if this is a `RealSeq`.
    pub fn as_real_seq(&self) -> Option<&[f64]> {
        match self {
            Self::RealSeq(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// A single element appended to a sequence column.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Element {
    /// Integer element for an int-array column.
    Int(i64),
    /// Real element for a real-array column.
    Real(f64),
}

impl Element {
    /// Short name of the variant, used in type-mismatch diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "int",
            Self::Real(_) => "real",
        }
    }
}

impl From<i64> for Element {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Element {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Element {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}
