//! Data types stored in run file headers and footers.

use std::fmt;

use simtab_core::RunId;

/// Build environment metadata stored in the run header.
///
/// Enables detection of outputs produced by builds with different
/// toolchains or flags that might affect floating-point reproducibility.
///
/// # Examples
///
/// ```
/// use simtab_output::BuildMetadata;
///
/// let meta = BuildMetadata {
///     toolchain: "1.87".into(),
///     target_triple: "x86_64-linux".into(),
///     simtab_version: "0.1.0".into(),
///     compile_flags: "release".into(),
/// };
///
/// assert_eq!(meta.simtab_version, "0.1.0");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildMetadata {
    /// Minimum supported Rust toolchain of the producing build.
    pub toolchain: String,
    /// Architecture and OS of the producing build.
    pub target_triple: String,
    /// simtab crate version.
    pub simtab_version: String,
    /// Compilation profile (`"release"` or `"debug"`).
    pub compile_flags: String,
}

impl BuildMetadata {
    /// Metadata describing the running build.
    pub fn current() -> Self {
        Self {
            toolchain: option_env!("CARGO_PKG_RUST_VERSION")
                .unwrap_or("unknown")
                .to_owned(),
            target_triple: format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS),
            simtab_version: env!("CARGO_PKG_VERSION").to_owned(),
            compile_flags: if cfg!(debug_assertions) {
                "debug"
            } else {
                "release"
            }
            .to_owned(),
        }
    }
}

/// Run identification written at the start of every run file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunHeader {
    /// Run number within the producing process.
    pub run_id: RunId,
    /// Effective master seed, so the run can be reproduced.
    pub master_seed: u64,
    /// Number of workers that produced the rows.
    pub worker_count: u32,
    /// Producing build.
    pub metadata: BuildMetadata,
    /// Hash of the schema block that follows.
    pub schema_hash: u64,
}

/// Final state of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// Every requested event was attempted.
    Completed,
    /// The run was stopped early; only completed events are present.
    Aborted,
    /// The run could not be merged or lost a worker. Never written to a
    /// published file.
    Failed,
}

impl RunStatus {
    /// Wire tag.
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Completed => 0,
            Self::Aborted => 1,
            Self::Failed => 2,
        }
    }

    /// Decode a wire tag.
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Completed),
            1 => Some(Self::Aborted),
            2 => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Completed => "completed",
            Self::Aborted => "aborted",
            Self::Failed => "failed",
        })
    }
}

/// Trailer proving a run file was written to completion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Footer {
    /// Run status at merge time.
    pub status: RunStatus,
    /// Events that committed their rows.
    pub events_completed: u64,
    /// Events whose rows were discarded after an error.
    pub events_failed: u64,
    /// Rows per table, indexed by table ID.
    pub row_counts: Vec<u64>,
    /// FNV-1a hash over all rows in file order.
    pub content_hash: u64,
}
