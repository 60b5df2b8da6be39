//! Worker threads.
//!
//! Each worker owns its producer, random stream and record buffer for
//! the whole run. Batches of events arrive over a bounded crossbeam
//! channel; each batch carries its own bounded(1) reply channel. A
//! `Finish` task (or a closed channel) ends the loop and the worker's
//! rows travel back through its `JoinHandle`.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};

use simtab_core::{EventId, RunId, WorkerId};
use simtab_record::{RecordBuffer, WorkerRows};

use crate::config::EventSlice;
use crate::metrics::{EventFailure, WorkerMetrics};
use crate::producer::{EventContext, EventError, EventProducer};
use crate::seeds::WorkerRng;

/// A request sent to a worker thread.
pub(crate) enum WorkerTask {
    /// Process a slice of events and report back.
    Events {
        slice: EventSlice,
        reply: Sender<BatchOutcome>,
    },
    /// Return the buffered rows and exit.
    Finish,
}

/// A worker's account of one batch.
#[derive(Debug, Default)]
pub(crate) struct BatchOutcome {
    pub completed: u64,
    pub failed: u64,
    pub failures: Vec<EventFailure>,
    pub aborted: bool,
}

/// What a worker thread returns when it exits.
pub(crate) struct WorkerExit {
    pub rows: WorkerRows,
    pub metrics: WorkerMetrics,
}

/// Run-wide state shared by every worker.
#[derive(Clone)]
pub(crate) struct SharedRunState {
    pub run: RunId,
    pub abort: Arc<AtomicBool>,
    pub events_done: Arc<AtomicU64>,
    pub print_progress: u64,
}

pub(crate) struct Worker {
    id: WorkerId,
    shared: SharedRunState,
    producer: Box<dyn EventProducer>,
    rng: WorkerRng,
    buffer: RecordBuffer,
    metrics: WorkerMetrics,
}

impl Worker {
    pub fn new(
        shared: SharedRunState,
        producer: Box<dyn EventProducer>,
        rng: WorkerRng,
        buffer: RecordBuffer,
    ) -> Self {
        let id = buffer.worker();
        Self {
            id,
            shared,
            producer,
            rng,
            buffer,
            metrics: WorkerMetrics {
                worker: id,
                ..WorkerMetrics::default()
            },
        }
    }

    fn run(mut self, tasks: Receiver<WorkerTask>) -> WorkerExit {
        while let Ok(task) = tasks.recv() {
            match task {
                WorkerTask::Events { slice, reply } => {
                    let outcome = self.process(slice);
                    // The controller may have given up on this batch.
                    let _ = reply.send(outcome);
                }
                WorkerTask::Finish => break,
            }
        }
        WorkerExit {
            rows: self.buffer.into_rows(),
            metrics: self.metrics,
        }
    }

    fn process(&mut self, slice: EventSlice) -> BatchOutcome {
        let started = Instant::now();
        let mut outcome = BatchOutcome::default();
        for id in slice.iter() {
            if self.shared.abort.load(Ordering::Acquire) {
                outcome.aborted = true;
                break;
            }
            match self.process_event(EventId(id)) {
                Ok(rows) => {
                    outcome.completed += 1;
                    self.metrics.events_completed += 1;
                    self.metrics.rows_committed += rows as u64;
                    self.report_progress();
                }
                Err(failure) => {
                    tracing::warn!(
                        run = %failure.run,
                        worker = %failure.worker,
                        event = %failure.event,
                        table = ?failure.table,
                        row = ?failure.row,
                        error = %failure.error,
                        "event failed, rows discarded"
                    );
                    outcome.failed += 1;
                    self.metrics.events_failed += 1;
                    outcome.failures.push(failure);
                }
            }
        }
        self.metrics.busy += started.elapsed();
        outcome
    }

    /// Run one event through the producer and commit its rows.
    fn process_event(&mut self, event: EventId) -> Result<usize, EventFailure> {
        if let Err(e) = self.buffer.begin_event(event) {
            return Err(self.failure(event, e.into()));
        }
        let produced = {
            let mut ctx = EventContext::new(
                self.shared.run,
                self.id,
                event,
                &mut self.rng,
                self.buffer.recorder(),
                &self.shared.abort,
            );
            self.producer.produce(&mut ctx)
        };
        match produced {
            Ok(()) => match self.buffer.end_event() {
                Ok(rows) => Ok(rows),
                Err(e) => Err(self.failure(event, e.into())),
            },
            Err(e) => {
                self.buffer.abort_event();
                Err(self.failure(event, e))
            }
        }
    }

    fn failure(&self, event: EventId, error: EventError) -> EventFailure {
        let table = error.table();
        EventFailure {
            run: self.shared.run,
            worker: self.id,
            event,
            table,
            row: table.map(|t| self.buffer.row_count(t) as u64),
            error,
        }
    }

    fn report_progress(&self) {
        let done = self.shared.events_done.fetch_add(1, Ordering::Relaxed) + 1;
        let every = self.shared.print_progress;
        if every > 0 && done % every == 0 {
            tracing::info!(run = %self.shared.run, events = done, "progress");
        }
    }
}

/// The controller's side of one worker thread.
pub(crate) struct WorkerHandle {
    pub id: WorkerId,
    tasks: Option<Sender<WorkerTask>>,
    thread: Option<JoinHandle<WorkerExit>>,
}

impl WorkerHandle {
    /// Hand a batch to the worker. Fails if the worker is gone.
    pub fn send(&self, task: WorkerTask) -> Result<(), WorkerTask> {
        match &self.tasks {
            Some(tx) => tx.send(task).map_err(|e| e.into_inner()),
            None => Err(task),
        }
    }

    /// Stop the worker and collect its rows. `None` if the thread
    /// panicked or was already finished.
    pub fn finish(&mut self) -> Option<WorkerExit> {
        if let Some(tx) = self.tasks.take() {
            let _ = tx.send(WorkerTask::Finish);
        }
        self.thread.take()?.join().ok()
    }
}

/// Start a worker on its own named thread.
pub(crate) fn spawn(worker: Worker) -> io::Result<WorkerHandle> {
    let id = worker.id;
    let (tx, rx) = crossbeam_channel::bounded(1);
    let thread = thread::Builder::new()
        .name(format!("simtab-worker-{id}"))
        .spawn(move || worker.run(rx))?;
    Ok(WorkerHandle {
        id,
        tasks: Some(tx),
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventPartition;
    use crate::seeds::assign_seeds;
    use simtab_core::{ColumnKind, TableId};
    use simtab_schema::SchemaRegistry;

    /// Writes the event ID; fails every event divisible by `fail_every`.
    struct Counter {
        fail_every: Option<u64>,
    }

    impl EventProducer for Counter {
        fn produce(&mut self, ctx: &mut EventContext<'_>) -> Result<(), EventError> {
            let id = ctx.event().0;
            ctx.set_scalar(TableId(0), simtab_core::ColumnId(0), id as i64)?;
            if self.fail_every.is_some_and(|n| id % n == 0) {
                return Err(EventError::producer("unlucky"));
            }
            Ok(())
        }
    }

    fn worker(fail_every: Option<u64>, abort: Arc<AtomicBool>) -> Worker {
        let mut reg = SchemaRegistry::new();
        let t = reg.define_table("events", "").unwrap();
        reg.add_column(t, "id", ColumnKind::Int).unwrap();
        let schema = reg.seal().unwrap();
        let seed = assign_seeds(1, 1).unwrap().seeds()[0];
        Worker::new(
            SharedRunState {
                run: RunId(0),
                abort,
                events_done: Arc::new(AtomicU64::new(0)),
                print_progress: 0,
            },
            Box::new(Counter { fail_every }),
            seed.rng(),
            RecordBuffer::new(schema, WorkerId(0)),
        )
    }

    #[test]
    fn failed_events_are_counted_and_discarded() {
        let mut w = worker(Some(3), Arc::new(AtomicBool::new(false)));
        let outcome = w.process(EventPartition::Contiguous.slice(1, 9, 1, 0));
        assert_eq!(outcome.completed, 6);
        assert_eq!(outcome.failed, 3);
        let failed: Vec<u64> = outcome.failures.iter().map(|f| f.event.0).collect();
        assert_eq!(failed, vec![3, 6, 9]);
        assert_eq!(w.buffer.row_count(TableId(0)), 6);
        assert!(outcome.failures.iter().all(|f| f.table.is_none()));
    }

    #[test]
    fn abort_flag_stops_before_next_event() {
        let abort = Arc::new(AtomicBool::new(true));
        let mut w = worker(None, abort);
        let outcome = w.process(EventPartition::Contiguous.slice(0, 5, 1, 0));
        assert!(outcome.aborted);
        assert_eq!(outcome.completed, 0);
    }

    #[test]
    fn spawned_worker_returns_rows_on_finish() {
        let mut handle = spawn(worker(None, Arc::new(AtomicBool::new(false)))).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let sent = handle.send(WorkerTask::Events {
            slice: EventPartition::Contiguous.slice(0, 4, 1, 0),
            reply: tx,
        });
        assert!(sent.is_ok());
        assert_eq!(rx.recv().unwrap().completed, 4);
        let exit = handle.finish().unwrap();
        assert_eq!(exit.rows.total_rows(), 4);
        assert_eq!(exit.metrics.events_completed, 4);
        assert!(handle.finish().is_none());
    }
}
