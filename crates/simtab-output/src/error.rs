//! Error types for run output files.

use std::fmt;
use std::io;

use simtab_core::WorkerId;

/// Errors that can occur while writing, merging or reading a run file.
#[derive(Debug)]
pub enum OutputError {
    /// An I/O error occurred during read or write.
    Io(io::Error),
    /// The file does not start with the expected `b"SMTB"` magic bytes.
    InvalidMagic,
    /// The format version is not supported by this build.
    UnsupportedVersion {
        /// The version found in the file.
        found: u8,
    },
    /// The data could not be decoded (truncated or corrupt).
    Malformed {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// `merge_and_close` was called with no run open.
    NotOpen,
    /// `open_run` was called while another run's file is open.
    AlreadyOpen,
    /// Rows written for a table do not match the rows accounted for.
    RowCountMismatch {
        /// Table name.
        table: String,
        /// Rows the producers reported committing.
        expected: u64,
        /// Rows actually present.
        found: u64,
    },
    /// The run was opened for more workers than handed over rows.
    MissingWorker {
        /// The first worker with no rows.
        worker: WorkerId,
    },
    /// Rows came from a worker outside the run's worker range.
    UnknownWorker {
        /// The worker.
        worker: WorkerId,
        /// Worker count the run was opened with.
        worker_count: u32,
    },
    /// A row or block does not fit the schema it is written under.
    SchemaMismatch {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// The file ends before its footer: it was never completed.
    MissingFooter,
    /// The recorded content hash does not match the rows read back.
    HashMismatch {
        /// Hash stored in the footer.
        recorded: u64,
        /// Hash computed from the rows.
        computed: u64,
    },
}

impl fmt::Display for OutputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidMagic => write!(f, "invalid magic bytes (expected b\"SMTB\")"),
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported format version {found}")
            }
            Self::Malformed { detail } => write!(f, "malformed run file: {detail}"),
            Self::NotOpen => write!(f, "no run output is open"),
            Self::AlreadyOpen => write!(f, "a run output is already open"),
            Self::RowCountMismatch {
                table,
                expected,
                found,
            } => write!(
                f,
                "row count mismatch in table '{table}': expected {expected}, found {found}"
            ),
            Self::MissingWorker { worker } => write!(f, "no rows handed over for worker {worker}"),
            Self::UnknownWorker {
                worker,
                worker_count,
            } => write!(f, "worker {worker} is outside a run of {worker_count} workers"),
            Self::SchemaMismatch { detail } => write!(f, "schema mismatch: {detail}"),
            Self::MissingFooter => write!(f, "run file has no footer (incomplete write)"),
            Self::HashMismatch { recorded, computed } => write!(
                f,
                "content hash mismatch: recorded={recorded:#018x}, computed={computed:#018x}"
            ),
        }
    }
}

impl std::error::Error for OutputError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OutputError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
