//! Run lifecycle: begin, dispatch, end.
//!
//! [`RunController`] owns the schema registry and the output aggregator
//! for the life of the process and drives one run at a time through
//! `Idle → Configuring → Running → Finalizing → Idle`.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;

use simtab_core::{RunId, Schema, SchemaViolation, WorkerId};
use simtab_output::{OutputAggregator, OutputError, RunStatus, RunSummary};
use simtab_record::{RecordBuffer, WorkerRows};
use simtab_schema::SchemaRegistry;

use crate::config::{ConfigError, EventPartition, RunConfig};
use crate::metrics::{BatchSummary, EventFailure, RunReport, WorkerMetrics};
use crate::producer::ProducerFactory;
use crate::seeds::{assign_seeds, time_derived_seed, SeedAssignment, SeedError};
use crate::worker::{self, SharedRunState, Worker, WorkerHandle, WorkerTask};

// ── RunState ──────────────────────────────────────────────────────

/// Lifecycle state of the controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// No run is active.
    Idle,
    /// `begin_run` is sealing the schema, deriving seeds and starting workers.
    Configuring,
    /// Workers are up; `run_events` may be called.
    Running,
    /// `end_run` is collecting rows and merging.
    Finalizing,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Configuring => "configuring",
            Self::Running => "running",
            Self::Finalizing => "finalizing",
        };
        f.write_str(name)
    }
}

// ── RunError ──────────────────────────────────────────────────────

/// Errors from the run lifecycle.
#[derive(Debug)]
pub enum RunError {
    /// A run is already active; it is left untouched.
    RunAlreadyActive {
        /// The active run.
        active: RunId,
    },
    /// The operation is not valid in the current state.
    InvalidState {
        /// Operation attempted.
        operation: &'static str,
        /// State at the time.
        state: RunState,
    },
    /// Seed derivation failed.
    Seed(SeedError),
    /// The run configuration is invalid.
    Config(ConfigError),
    /// The schema could not be sealed.
    Schema(SchemaViolation),
    /// Opening, writing or publishing the output failed. The run is failed
    /// and no output file is left behind.
    Merge(OutputError),
    /// A worker thread died. The run is failed.
    WorkerLost {
        /// The lost worker.
        worker: WorkerId,
    },
    /// A worker thread could not be started.
    ThreadSpawnFailed {
        /// OS error text.
        reason: String,
    },
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RunAlreadyActive { active } => write!(f, "run {active} is already active"),
            Self::InvalidState { operation, state } => {
                write!(f, "{operation} is not valid while {state}")
            }
            Self::Seed(e) => write!(f, "seed derivation: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Schema(e) => write!(f, "schema: {e}"),
            Self::Merge(e) => write!(f, "output: {e}"),
            Self::WorkerLost { worker } => write!(f, "worker {worker} was lost"),
            Self::ThreadSpawnFailed { reason } => write!(f, "thread spawn failed: {reason}"),
        }
    }
}

impl Error for RunError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Seed(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::Schema(e) => Some(e),
            Self::Merge(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SeedError> for RunError {
    fn from(e: SeedError) -> Self {
        Self::Seed(e)
    }
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        match e {
            ConfigError::Seed(e) => Self::Seed(e),
            other => Self::Config(other),
        }
    }
}

impl From<SchemaViolation> for RunError {
    fn from(e: SchemaViolation) -> Self {
        Self::Schema(e)
    }
}

impl From<OutputError> for RunError {
    fn from(e: OutputError) -> Self {
        Self::Merge(e)
    }
}

// ── AbortHandle ───────────────────────────────────────────────────

/// Requests an abort of the active run from any thread.
///
/// Workers check the flag before each event. The flag is cleared by the
/// next `begin_run`. A run is only reported aborted if the flag caused
/// at least one requested event to be skipped.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Stop the active run before each worker's next event.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether an abort has been requested for the current run.
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

// ── RunController ─────────────────────────────────────────────────

struct ActiveRun {
    run: RunId,
    schema: Arc<Schema>,
    seeds: SeedAssignment,
    partition: EventPartition,
    workers: Vec<WorkerHandle>,
    next_event: u64,
    requested: u64,
    completed: u64,
    failed: u64,
    failures: Vec<EventFailure>,
    started: Instant,
}

impl ActiveRun {
    /// Stop every worker and collect what they return. The first worker
    /// that cannot be joined is reported.
    fn finish_workers(&mut self) -> (Vec<WorkerRows>, Vec<WorkerMetrics>, Option<WorkerId>) {
        let mut rows = Vec::with_capacity(self.workers.len());
        let mut metrics = Vec::with_capacity(self.workers.len());
        let mut lost = None;
        for handle in &mut self.workers {
            match handle.finish() {
                Some(exit) => {
                    rows.push(exit.rows);
                    metrics.push(exit.metrics);
                }
                None => {
                    lost.get_or_insert(handle.id);
                }
            }
        }
        (rows, metrics, lost)
    }

    fn report(
        &mut self,
        status: RunStatus,
        workers: Vec<WorkerMetrics>,
        rows: &[WorkerRows],
    ) -> RunReport {
        let rows_per_table: IndexMap<String, u64> = self
            .schema
            .tables
            .iter()
            .map(|t| {
                let n = rows
                    .iter()
                    .filter_map(|w| w.committed.get(t.id.index()))
                    .sum::<u64>();
                (t.name.clone(), n)
            })
            .collect();
        RunReport {
            run: self.run,
            status,
            master_seed: self.seeds.master_seed(),
            seed_fingerprints: self.seeds.fingerprints(),
            workers,
            events_requested: self.requested,
            events_completed: self.completed,
            events_failed: self.failed,
            rows_per_table,
            failures: std::mem::take(&mut self.failures),
            output: None,
            elapsed: self.started.elapsed(),
            content_hash: None,
        }
    }
}

/// Drives runs: seeds workers, dispatches events, merges output.
///
/// Constructed once per process with the schema registry, the output
/// aggregator and the producer factory. Tables are defined on the
/// registry before the first run; `begin_run` seals it.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use simtab_core::{ColumnKind, WorkerId};
/// use simtab_engine::{EventContext, EventError, EventProducer, RunConfig, RunController};
/// use simtab_output::{OutputAggregator, OutputFile, RunStatus};
/// use simtab_schema::SchemaRegistry;
///
/// let mut registry = SchemaRegistry::new();
/// let events = registry.define_table("events", "one row per event").unwrap();
/// let id = registry.add_column(events, "id", ColumnKind::Int).unwrap();
///
/// struct Ids {
///     table: simtab_core::TableId,
///     column: simtab_core::ColumnId,
/// }
///
/// impl EventProducer for Ids {
///     fn produce(&mut self, ctx: &mut EventContext<'_>) -> Result<(), EventError> {
///         let event = ctx.event().0 as i64;
///         ctx.set_scalar(self.table, self.column, event)?;
///         Ok(())
///     }
/// }
///
/// let factory = move |_w: WorkerId| -> Box<dyn EventProducer> {
///     Box::new(Ids { table: events, column: id })
/// };
/// let mut controller = RunController::new(registry, OutputAggregator::new(), Arc::new(factory));
///
/// let dir = tempfile::tempdir().unwrap();
/// let config = RunConfig {
///     worker_count: Some(2),
///     master_seed: Some(7),
///     output_dir: dir.path().to_path_buf(),
///     ..RunConfig::default()
/// };
/// controller.begin_run(config).unwrap();
/// controller.run_events(10).unwrap();
/// let report = controller.end_run().unwrap();
///
/// assert_eq!(report.status, RunStatus::Completed);
/// assert_eq!(report.rows("events"), Some(10));
/// let file = OutputFile::open(report.output.unwrap()).unwrap();
/// assert_eq!(file.row_count("events"), Some(10));
/// ```
pub struct RunController {
    registry: SchemaRegistry,
    aggregator: OutputAggregator,
    factory: Arc<dyn ProducerFactory>,
    abort: Arc<AtomicBool>,
    state: RunState,
    next_run: u64,
    active: Option<ActiveRun>,
    last_report: Option<RunReport>,
}

impl RunController {
    /// A controller in the `Idle` state.
    pub fn new(
        registry: SchemaRegistry,
        aggregator: OutputAggregator,
        factory: Arc<dyn ProducerFactory>,
    ) -> Self {
        Self {
            registry,
            aggregator,
            factory,
            abort: Arc::new(AtomicBool::new(false)),
            state: RunState::Idle,
            next_run: 0,
            active: None,
            last_report: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// The active run, if any.
    pub fn current_run(&self) -> Option<RunId> {
        self.active.as_ref().map(|a| a.run)
    }

    /// Report of the most recent run that ended, including failed runs.
    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    /// A handle that can abort the active run from another thread.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            flag: Arc::clone(&self.abort),
        }
    }

    /// The schema registry.
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Mutable access to the registry. Definitions are rejected once the
    /// first run has sealed it.
    pub fn registry_mut(&mut self) -> &mut SchemaRegistry {
        &mut self.registry
    }

    /// The output aggregator.
    pub fn aggregator(&self) -> &OutputAggregator {
        &self.aggregator
    }

    /// Start a run: seal the schema, derive seeds, open the output and
    /// start the worker pool.
    ///
    /// Fails with [`RunError::RunAlreadyActive`] while another run is
    /// running or finalizing. Any other failure leaves the controller
    /// `Idle` with nothing opened.
    pub fn begin_run(&mut self, config: RunConfig) -> Result<RunId, RunError> {
        if let Some(active) = &self.active {
            return Err(RunError::RunAlreadyActive { active: active.run });
        }
        if self.state != RunState::Idle {
            return Err(RunError::InvalidState {
                operation: "begin_run",
                state: self.state,
            });
        }

        self.state = RunState::Configuring;
        match self.configure(&config) {
            Ok(active) => {
                let run = active.run;
                self.active = Some(active);
                self.next_run += 1;
                self.state = RunState::Running;
                Ok(run)
            }
            Err(e) => {
                self.state = RunState::Idle;
                Err(e)
            }
        }
    }

    fn configure(&mut self, config: &RunConfig) -> Result<ActiveRun, RunError> {
        config.validate()?;
        let schema = self.registry.seal()?;
        let worker_count = config.resolved_worker_count();
        let master_seed = config.master_seed.unwrap_or_else(time_derived_seed);
        let seeds = assign_seeds(master_seed, worker_count)?;

        let run = RunId(self.next_run);
        let path = config.output_path(run);
        self.aggregator.open_run(
            &path,
            run,
            master_seed,
            worker_count as u32,
            Arc::clone(&schema),
        )?;

        self.abort.store(false, Ordering::Release);
        let shared = SharedRunState {
            run,
            abort: Arc::clone(&self.abort),
            events_done: Arc::new(AtomicU64::new(0)),
            print_progress: config.print_progress,
        };

        let mut workers = Vec::with_capacity(worker_count);
        for seed in seeds.seeds() {
            tracing::debug!(
                run = %run,
                worker = %seed.worker,
                stream = seed.stream,
                fingerprint = seed.fingerprint(),
                "worker seed assigned"
            );
            let worker = Worker::new(
                shared.clone(),
                self.factory.create(seed.worker),
                seed.rng(),
                RecordBuffer::new(Arc::clone(&schema), seed.worker),
            );
            match worker::spawn(worker) {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    self.abort.store(true, Ordering::Release);
                    for handle in &mut workers {
                        handle.finish();
                    }
                    self.aggregator.discard();
                    return Err(RunError::ThreadSpawnFailed {
                        reason: format!("worker {}: {e}", seed.worker),
                    });
                }
            }
        }

        tracing::info!(
            run = %run,
            master_seed,
            seed_source = if config.master_seed.is_some() { "configured" } else { "clock" },
            workers = worker_count,
            partition = ?config.partition,
            path = %path.display(),
            "run started"
        );

        Ok(ActiveRun {
            run,
            schema,
            seeds,
            partition: config.partition,
            workers,
            next_event: 0,
            requested: 0,
            completed: 0,
            failed: 0,
            failures: Vec::new(),
            started: Instant::now(),
        })
    }

    /// Process `count` more events across the worker pool and wait for
    /// every worker to finish its share.
    ///
    /// Event IDs continue from the previous batch of the same run. Failed
    /// events are recorded and skipped. If a worker is lost the run is
    /// failed and torn down.
    pub fn run_events(&mut self, count: u64) -> Result<BatchSummary, RunError> {
        if self.state != RunState::Running {
            return Err(RunError::InvalidState {
                operation: "run_events",
                state: self.state,
            });
        }
        let Some(active) = self.active.as_mut() else {
            return Err(RunError::InvalidState {
                operation: "run_events",
                state: self.state,
            });
        };

        let run = active.run;
        let first = active.next_event;
        let n = active.workers.len();
        let mut lost = None;
        let mut replies = Vec::with_capacity(n);
        for (i, handle) in active.workers.iter().enumerate() {
            let (reply, rx) = crossbeam_channel::bounded(1);
            let slice = active.partition.slice(first, count, n, i);
            if handle.send(WorkerTask::Events { slice, reply }).is_err() {
                lost = Some(handle.id);
                break;
            }
            replies.push((handle.id, rx));
        }

        let mut summary = BatchSummary {
            first_event: first,
            requested: count,
            ..BatchSummary::default()
        };
        for (id, rx) in replies {
            match rx.recv() {
                Ok(outcome) => {
                    summary.completed += outcome.completed;
                    summary.failed += outcome.failed;
                    summary.aborted |= outcome.aborted;
                    active.failures.extend(outcome.failures);
                }
                Err(_) => {
                    lost.get_or_insert(id);
                }
            }
        }
        summary.aborted |= self.abort.load(Ordering::Acquire);

        active.next_event += count;
        active.requested += count;
        active.completed += summary.completed;
        active.failed += summary.failed;

        if let Some(worker) = lost {
            return Err(self.fail_run(RunError::WorkerLost { worker }));
        }
        if summary.aborted {
            tracing::info!(
                run = %run,
                completed = summary.completed,
                skipped = summary.skipped(),
                "abort requested, remaining events skipped"
            );
        }
        Ok(summary)
    }

    /// Finish the run: wait for every worker, merge their rows into the
    /// output file and return the run report.
    ///
    /// A run in which an abort skipped at least one requested event is
    /// merged like a completed one and marked [`RunStatus::Aborted`]; an
    /// abort that arrives after every event was processed leaves the run
    /// [`RunStatus::Completed`]. A merge failure fails the run, removes the
    /// partial file and returns [`RunError::Merge`]; the failed run's
    /// report is still available from [`last_report`](Self::last_report).
    pub fn end_run(&mut self) -> Result<RunReport, RunError> {
        if self.state != RunState::Running {
            return Err(RunError::InvalidState {
                operation: "end_run",
                state: self.state,
            });
        }
        let Some(mut active) = self.active.take() else {
            return Err(RunError::InvalidState {
                operation: "end_run",
                state: self.state,
            });
        };
        self.state = RunState::Finalizing;

        let (rows, metrics, lost) = active.finish_workers();
        if let Some(worker) = lost {
            self.aggregator.discard();
            let report = active.report(RunStatus::Failed, metrics, &rows);
            return Err(self.record_failure(report, RunError::WorkerLost { worker }));
        }

        let skipped = active.completed + active.failed < active.requested;
        let status = if skipped {
            RunStatus::Aborted
        } else {
            RunStatus::Completed
        };
        let mut report = active.report(status, metrics, &rows);
        let summary = RunSummary {
            status,
            events_completed: active.completed,
            events_failed: active.failed,
        };
        match self.aggregator.merge_and_close(rows, summary) {
            Ok(merged) => {
                report.output = Some(merged.path);
                report.content_hash = Some(merged.footer.content_hash);
                report.elapsed = active.started.elapsed();
                tracing::info!(
                    run = %report.run,
                    status = %report.status,
                    events_completed = report.events_completed,
                    events_failed = report.events_failed,
                    rows = ?report.rows_per_table,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "run finished"
                );
                self.last_report = Some(report.clone());
                self.state = RunState::Idle;
                Ok(report)
            }
            Err(e) => {
                report.status = RunStatus::Failed;
                Err(self.record_failure(report, RunError::Merge(e)))
            }
        }
    }

    /// Tear down the active run after a worker loss.
    fn fail_run(&mut self, error: RunError) -> RunError {
        self.abort.store(true, Ordering::Release);
        match self.active.take() {
            Some(mut active) => {
                let (rows, metrics, _) = active.finish_workers();
                self.aggregator.discard();
                let report = active.report(RunStatus::Failed, metrics, &rows);
                self.record_failure(report, error)
            }
            None => {
                self.state = RunState::Idle;
                error
            }
        }
    }

    fn record_failure(&mut self, report: RunReport, error: RunError) -> RunError {
        tracing::error!(
            run = %report.run,
            error = %error,
            events_completed = report.events_completed,
            "run failed, no output published"
        );
        self.last_report = Some(report);
        self.state = RunState::Idle;
        error
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        if let Some(mut active) = self.active.take() {
            self.abort.store(true, Ordering::Release);
            active.finish_workers();
        }
    }
}

impl fmt::Debug for RunController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunController")
            .field("state", &self.state)
            .field("current_run", &self.current_run())
            .field("next_run", &self.next_run)
            .field("registry", &self.registry)
            .finish()
    }
}
