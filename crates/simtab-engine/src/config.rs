//! Run configuration, validation, and error types.
//!
//! [`RunConfig`] is the input to
//! [`RunController::begin_run`](crate::RunController::begin_run).
//! [`apply_env()`](RunConfig::apply_env) overlays the process-external
//! overrides (`SIMTAB_THREADS`, `SIMTAB_SEED`, `SIMTAB_OUTPUT`) on top of
//! whatever the caller set in code.

use std::error::Error;
use std::fmt;
use std::path::PathBuf;

use simtab_core::RunId;
use simtab_schema::presets::K600_BASE_NAME;

use crate::seeds::{parse_master_seed, SeedError};

/// Worker count when neither the caller nor the environment picks one.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Environment variable overriding the worker count.
pub const ENV_THREADS: &str = "SIMTAB_THREADS";
/// Environment variable overriding the master seed.
pub const ENV_SEED: &str = "SIMTAB_SEED";
/// Environment variable overriding the output base name.
pub const ENV_OUTPUT: &str = "SIMTAB_OUTPUT";

/// File extension of run output files.
pub const OUTPUT_EXTENSION: &str = "simtab";

// ── EventPartition ────────────────────────────────────────────────

/// How a batch of events is split across workers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EventPartition {
    /// Each worker takes one contiguous block of event IDs. The first
    /// `count % workers` workers take one event more than the rest.
    #[default]
    Contiguous,
    /// Worker `w` takes events `first + w`, `first + w + workers`, ...
    Interleaved,
}

/// The events one worker processes in one batch: `count` IDs starting at
/// `first`, `stride` apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventSlice {
    /// First event ID.
    pub first: u64,
    /// Number of events.
    pub count: u64,
    /// Distance between consecutive IDs.
    pub stride: u64,
}

impl EventSlice {
    /// Iterate the event IDs of the slice.
    pub fn iter(&self) -> impl Iterator<Item = u64> {
        let EventSlice {
            first,
            count,
            stride,
        } = *self;
        (0..count).map(move |i| first + i * stride)
    }
}

impl EventPartition {
    /// The share of `count` events starting at `first` that worker
    /// `index` of `workers` processes.
    pub fn slice(self, first: u64, count: u64, workers: usize, index: usize) -> EventSlice {
        let n = workers.max(1) as u64;
        let i = index as u64;
        match self {
            Self::Contiguous => {
                let base = count / n;
                let extra = count % n;
                let start = i * base + i.min(extra);
                EventSlice {
                    first: first + start,
                    count: base + u64::from(i < extra),
                    stride: 1,
                }
            }
            Self::Interleaved => EventSlice {
                first: first + i,
                count: if i < count { (count - i).div_ceil(n) } else { 0 },
                stride: n,
            },
        }
    }
}

// ── ConfigError ───────────────────────────────────────────────────

/// Errors detected while building or validating a [`RunConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The output base name is empty.
    EmptyBaseName,
    /// The output base name contains a path separator.
    InvalidBaseName {
        /// The rejected name.
        name: String,
    },
    /// An environment override could not be parsed.
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },
    /// The master seed override was rejected.
    Seed(SeedError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyBaseName => write!(f, "output base name is empty"),
            Self::InvalidBaseName { name } => {
                write!(f, "output base name '{name}' must not contain a path separator")
            }
            Self::InvalidEnv { var, value } => write!(f, "invalid {var}='{value}'"),
            Self::Seed(e) => write!(f, "seed: {e}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Seed(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SeedError> for ConfigError {
    fn from(e: SeedError) -> Self {
        Self::Seed(e)
    }
}

// ── RunConfig ─────────────────────────────────────────────────────

/// Configuration for one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    /// Worker threads for the run. `None` = [`DEFAULT_WORKER_COUNT`].
    /// Zero or more than [`MAX_WORKERS`](crate::MAX_WORKERS) fails seed
    /// derivation at `begin_run`.
    pub worker_count: Option<usize>,
    /// Master seed. `None` = derived from the clock at `begin_run`; the
    /// effective value is logged and written to the output header.
    pub master_seed: Option<u64>,
    /// Directory the output file is written to. Created if missing.
    pub output_dir: PathBuf,
    /// Output file stem; the file is `<base>_run<id>.simtab`.
    pub output_base_name: String,
    /// Event split across workers.
    pub partition: EventPartition,
    /// Log progress every this many completed events. 0 disables.
    pub print_progress: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            worker_count: None,
            master_seed: None,
            output_dir: PathBuf::from("."),
            output_base_name: K600_BASE_NAME.to_string(),
            partition: EventPartition::Contiguous,
            print_progress: 1000,
        }
    }
}

impl RunConfig {
    /// Check the configuration. Worker count and seed are checked by
    /// seed derivation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_base_name.is_empty() {
            return Err(ConfigError::EmptyBaseName);
        }
        if self
            .output_base_name
            .chars()
            .any(std::path::is_separator)
        {
            return Err(ConfigError::InvalidBaseName {
                name: self.output_base_name.clone(),
            });
        }
        Ok(())
    }

    /// The worker count the run will use.
    pub fn resolved_worker_count(&self) -> usize {
        self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT)
    }

    /// Output file path for run `run`.
    pub fn output_path(&self, run: RunId) -> PathBuf {
        self.output_dir.join(format!(
            "{}_run{}.{OUTPUT_EXTENSION}",
            self.output_base_name, run.0
        ))
    }

    /// Overlay overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Overlay overrides from `lookup`, which maps a variable name to its
    /// value. Unset variables leave the field unchanged.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup(ENV_THREADS) {
            let n = value
                .trim()
                .parse::<usize>()
                .map_err(|_| ConfigError::InvalidEnv {
                    var: ENV_THREADS,
                    value: value.clone(),
                })?;
            self.worker_count = Some(n);
        }
        if let Some(value) = lookup(ENV_SEED) {
            self.master_seed = Some(parse_master_seed(&value)?);
        }
        if let Some(value) = lookup(ENV_OUTPUT) {
            self.output_base_name = value;
        }
        self.validate()
    }
}
