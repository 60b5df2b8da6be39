//! The per-event hook between the simulation and the record buffers.
//!
//! A [`ProducerFactory`] creates one [`EventProducer`] per worker at run
//! start. For every event the worker hands its producer an
//! [`EventContext`]: the event and worker IDs, the worker's random
//! stream, and write access to the worker's open event rows.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use simtab_core::{ColumnId, Element, EventId, RecordError, RunId, TableId, Value, WorkerId};
use simtab_record::EventRecorder;

use crate::seeds::WorkerRng;

// ── EventError ────────────────────────────────────────────────────

/// Why an event failed. The event's rows are discarded.
#[derive(Clone, Debug, PartialEq)]
pub enum EventError {
    /// A cell write or the row close failed.
    Record(RecordError),
    /// The producer itself gave up on the event.
    Producer {
        /// Producer-supplied reason.
        reason: String,
    },
}

impl EventError {
    /// A producer-side failure with the given reason.
    pub fn producer(reason: impl Into<String>) -> Self {
        Self::Producer {
            reason: reason.into(),
        }
    }

    /// The table involved, for record errors that name one.
    pub fn table(&self) -> Option<TableId> {
        match self {
            Self::Record(e) => e.table(),
            Self::Producer { .. } => None,
        }
    }
}

impl fmt::Display for EventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Record(e) => write!(f, "{e}"),
            Self::Producer { reason } => write!(f, "producer failed: {reason}"),
        }
    }
}

impl Error for EventError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Record(e) => Some(e),
            Self::Producer { .. } => None,
        }
    }
}

impl From<RecordError> for EventError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}

// ── EventContext ──────────────────────────────────────────────────

/// Everything a producer may touch while processing one event.
pub struct EventContext<'a> {
    run: RunId,
    worker: WorkerId,
    event: EventId,
    rng: &'a mut WorkerRng,
    recorder: EventRecorder<'a>,
    abort: &'a AtomicBool,
}

impl<'a> EventContext<'a> {
    pub(crate) fn new(
        run: RunId,
        worker: WorkerId,
        event: EventId,
        rng: &'a mut WorkerRng,
        recorder: EventRecorder<'a>,
        abort: &'a AtomicBool,
    ) -> Self {
        Self {
            run,
            worker,
            event,
            rng,
            recorder,
            abort,
        }
    }

    /// Run being processed.
    pub fn run(&self) -> RunId {
        self.run
    }

    /// Worker processing the event.
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Event being processed. IDs are unique across the whole run.
    pub fn event(&self) -> EventId {
        self.event
    }

    /// The worker's random stream.
    pub fn rng(&mut self) -> &mut WorkerRng {
        self.rng
    }

    /// Write access to the event's rows.
    pub fn recorder(&mut self) -> &mut EventRecorder<'a> {
        &mut self.recorder
    }

    /// Shorthand for [`EventRecorder::set_scalar`].
    pub fn set_scalar(
        &mut self,
        table: TableId,
        column: ColumnId,
        value: impl Into<Value>,
    ) -> Result<(), RecordError> {
        self.recorder.set_scalar(table, column, value)
    }

    /// Shorthand for [`EventRecorder::append_to_sequence`].
    pub fn append_to_sequence(
        &mut self,
        table: TableId,
        column: ColumnId,
        element: impl Into<Element>,
    ) -> Result<(), RecordError> {
        self.recorder.append_to_sequence(table, column, element)
    }

    /// Ask every worker to stop before its next event. The current event
    /// still completes; the run ends as aborted if any requested event is
    /// left unprocessed.
    pub fn abort_run(&self) {
        self.abort.store(true, Ordering::Release);
    }
}

// ── EventProducer / ProducerFactory ───────────────────────────────

/// Per-worker simulation hook.
///
/// Called once per event on the worker's own thread. Returning an error
/// (or leaving a record error behind) discards every row of the event and
/// records a failure; the worker moves on to its next event.
pub trait EventProducer: Send {
    /// Process one event.
    fn produce(&mut self, ctx: &mut EventContext<'_>) -> Result<(), EventError>;
}

/// Creates the [`EventProducer`] for each worker at run start.
pub trait ProducerFactory: Send + Sync {
    /// A producer for `worker`.
    fn create(&self, worker: WorkerId) -> Box<dyn EventProducer>;
}

impl<F> ProducerFactory for F
where
    F: Fn(WorkerId) -> Box<dyn EventProducer> + Send + Sync,
{
    fn create(&self, worker: WorkerId) -> Box<dyn EventProducer> {
        self(worker)
    }
}
