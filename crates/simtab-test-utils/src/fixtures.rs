//! Producers for the `events` table with controlled behaviour.
//!
//! - [`HitProducer`]: random hit count and energies from the worker's stream.
//! - [`OverflowProducer`]: overflows `hits` on selected events.
//! - [`AbortingProducer`]: requests a run abort at a given event.
//! - [`PanickingProducer`]: panics at a given event, killing its worker.

use rand::Rng;

use simtab_engine::{EventContext, EventError, EventProducer};

use crate::{EventsTable, HITS_CAPACITY};

/// Writes `id = event`, then `0..=capacity` uniformly drawn hits. The
/// fold is left to derivation.
pub struct HitProducer {
    pub cols: EventsTable,
}

impl HitProducer {
    pub fn new(cols: EventsTable) -> Self {
        Self { cols }
    }
}

impl EventProducer for HitProducer {
    fn produce(&mut self, ctx: &mut EventContext<'_>) -> Result<(), EventError> {
        let c = self.cols;
        let id = ctx.event().0 as i64;
        ctx.set_scalar(c.table, c.id, id)?;
        let n = ctx.rng().random_range(0..=HITS_CAPACITY);
        for _ in 0..n {
            let energy: f64 = ctx.rng().random_range(0.0..20.0);
            ctx.append_to_sequence(c.table, c.hits, energy)?;
        }
        Ok(())
    }
}

/// Like [`HitProducer`] with one hit, but appends `capacity + 1` hits on
/// every event where `event % every == every - 1`.
///
/// The overflowing append fails with `SequenceOverflow`; the producer
/// propagates it and the event is discarded.
pub struct OverflowProducer {
    pub cols: EventsTable,
    pub every: u64,
}

impl EventProducer for OverflowProducer {
    fn produce(&mut self, ctx: &mut EventContext<'_>) -> Result<(), EventError> {
        let c = self.cols;
        let event = ctx.event().0;
        ctx.set_scalar(c.table, c.id, event as i64)?;
        let hits = if self.every > 0 && event % self.every == self.every - 1 {
            HITS_CAPACITY + 1
        } else {
            1
        };
        for h in 0..hits {
            ctx.append_to_sequence(c.table, c.hits, f64::from(h))?;
        }
        Ok(())
    }
}

/// Writes `id = event` and calls `abort_run` while processing event
/// `at`. Event `at` itself still completes.
pub struct AbortingProducer {
    pub cols: EventsTable,
    pub at: u64,
}

impl EventProducer for AbortingProducer {
    fn produce(&mut self, ctx: &mut EventContext<'_>) -> Result<(), EventError> {
        let c = self.cols;
        let event = ctx.event().0;
        ctx.set_scalar(c.table, c.id, event as i64)?;
        if event == self.at {
            ctx.abort_run();
        }
        Ok(())
    }
}

/// Writes `id = event`; panics on event `at`.
pub struct PanickingProducer {
    pub cols: EventsTable,
    pub at: u64,
}

impl EventProducer for PanickingProducer {
    fn produce(&mut self, ctx: &mut EventContext<'_>) -> Result<(), EventError> {
        let c = self.cols;
        let event = ctx.event().0;
        if event == self.at {
            panic!("producer panicked on event {event}");
        }
        ctx.set_scalar(c.table, c.id, event as i64)?;
        Ok(())
    }
}
