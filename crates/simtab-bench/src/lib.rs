//! Benchmark profiles for the simtab pipeline.
//!
//! Provides a K600-shaped workload shared by the benchmarks:
//!
//! - [`K600Event`]: one sampled event, drawn from a worker stream
//! - [`K600Producer`] / [`k600_factory`]: the same workload as an `EventProducer`
//! - [`worker_rows`]: a worker's committed rows, built without the controller

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::f64::consts::PI;
use std::sync::Arc;

use rand::Rng;
use simtab_core::{EventId, RecordError, Schema, WorkerId};
use simtab_engine::{
    assign_seeds, EventContext, EventError, EventProducer, ProducerFactory, WorkerRng,
};
use simtab_record::{EventRecorder, RecordBuffer, WorkerRows};
use simtab_schema::presets::{k600, K600Tables};
use simtab_schema::SchemaRegistry;

/// Number of LaBr3:Ce detectors hits are spread over.
pub const DETECTORS: i64 = 8;

/// Events below this ID also write a geometry row.
pub const GEOMETRY_EVENTS: u64 = 6;

/// A registry holding the K600 tables, unsealed.
pub fn k600_registry() -> (SchemaRegistry, K600Tables) {
    let mut registry = SchemaRegistry::new();
    let tables = k600(&mut registry).expect("fresh registry accepts the K600 preset");
    (registry, tables)
}

/// The sealed K600 schema.
pub fn k600_schema() -> (Arc<Schema>, K600Tables) {
    let (mut registry, tables) = k600_registry();
    let schema = registry.seal().expect("K600 preset seals");
    (schema, tables)
}

/// Values for one K600 event.
///
/// Sampling and writing are separate so the same event can be written
/// through a bare [`RecordBuffer`] or through an [`EventContext`].
#[derive(Clone, Debug, PartialEq)]
pub struct K600Event {
    /// Event ID.
    pub event: EventId,
    /// Emission polar angle, radians.
    pub theta: f64,
    /// Emission azimuth, radians.
    pub phi: f64,
    /// `(detector, energy)` per LaBr3:Ce hit.
    pub hits: Vec<(i64, f64)>,
}

impl K600Event {
    /// Draw an event from `rng`: up to four hits, mostly none.
    pub fn sample(event: EventId, rng: &mut impl Rng) -> Self {
        let theta = rng.random_range(-1.0f64..1.0).acos();
        let phi = rng.random_range(0.0..2.0 * PI);
        let fold = match rng.random_range(0..8) {
            0..=4 => 0,
            5 | 6 => 1,
            _ => rng.random_range(2..=4),
        };
        let hits = (0..fold)
            .map(|_| (rng.random_range(0..DETECTORS), rng.random_range(0.5..8.0)))
            .collect();
        Self {
            event,
            theta,
            phi,
            hits,
        }
    }

    /// Write the event's rows through `rec`.
    pub fn write(&self, rec: &mut EventRecorder<'_>, t: &K600Tables) -> Result<(), RecordError> {
        let input = t.input;
        rec.set_scalar(input.table, input.theta_dist, self.theta.to_degrees())?;
        rec.set_scalar(input.table, input.phi_dist, self.phi.to_degrees())?;
        let proj_x = (self.theta * self.phi.cos()).to_degrees();
        let proj_y = (self.theta * self.phi.sin()).to_degrees();
        rec.set_scalar(input.table, input.theta_proj_x, proj_x)?;
        rec.set_scalar(input.table, input.theta_proj_y, proj_y)?;

        let data = t.data;
        for &(detector, energy) in &self.hits {
            let angle = 2.0 * PI * detector as f64 / DETECTORS as f64;
            rec.append_to_sequence(data.table, data.number, detector)?;
            rec.append_to_sequence(data.table, data.energy, energy)?;
            rec.append_to_sequence(data.table, data.theta, 90.0)?;
            rec.append_to_sequence(data.table, data.phi, angle.to_degrees())?;
            rec.append_to_sequence(data.table, data.x_pos, 150.0 * angle.cos())?;
            rec.append_to_sequence(data.table, data.y_pos, 150.0 * angle.sin())?;
            rec.append_to_sequence(data.table, data.z_pos, 0.0)?;
        }

        if self.event.0 < GEOMETRY_EVENTS {
            let g = t.geometry;
            let n = self.event.0 as i64;
            rec.set_scalar(g.table, g.cake_no, n)?;
            rec.set_scalar(g.table, g.cake_row, n % 2)?;
            rec.set_scalar(g.table, g.cake_sector, n / 2)?;
            rec.set_scalar(g.table, g.theta, 135.0)?;
            rec.set_scalar(g.table, g.phi, 60.0 * n as f64)?;
        }
        Ok(())
    }
}

/// Rows committed by `worker` for `events`, using the worker's stream
/// under `master_seed` with `workers` workers.
///
/// # Panics
///
/// Panics if `worker` is not below `workers` or a write fails.
pub fn worker_rows(
    schema: Arc<Schema>,
    tables: &K600Tables,
    master_seed: u64,
    workers: usize,
    worker: WorkerId,
    events: impl IntoIterator<Item = u64>,
) -> WorkerRows {
    let seeds = assign_seeds(master_seed, workers).expect("worker count in range");
    let mut rng = seeds.seeds()[worker.0 as usize].rng();
    let mut buffer = RecordBuffer::new(schema, worker);
    for id in events {
        let event = K600Event::sample(EventId(id), &mut rng);
        buffer.begin_event(event.event).expect("no event open");
        event.write(&mut buffer.recorder(), tables).expect("K600 row fits");
        buffer.end_event().expect("K600 row completes");
    }
    buffer.into_rows()
}

/// The K600 workload as an [`EventProducer`].
pub struct K600Producer {
    tables: K600Tables,
}

impl K600Producer {
    /// A producer writing to `tables`.
    pub fn new(tables: K600Tables) -> Self {
        Self { tables }
    }
}

impl EventProducer for K600Producer {
    fn produce(&mut self, ctx: &mut EventContext<'_>) -> Result<(), EventError> {
        let id = ctx.event();
        let rng: &mut WorkerRng = ctx.rng();
        let event = K600Event::sample(id, rng);
        event.write(ctx.recorder(), &self.tables)?;
        Ok(())
    }
}

/// A factory handing every worker a [`K600Producer`].
pub fn k600_factory(tables: K600Tables) -> Arc<dyn ProducerFactory> {
    Arc::new(move |_w: WorkerId| -> Box<dyn EventProducer> { Box::new(K600Producer::new(tables)) })
}
