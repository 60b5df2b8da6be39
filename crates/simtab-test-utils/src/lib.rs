//! Test fixtures for simtab development.
//!
//! Provides the `events` scenario schema ([`events_registry`]), a
//! [`ScriptedProducer`] that replays fixed per-event values, and
//! helpers for building controllers over a temporary output directory.
//! Misbehaving producers live in [`fixtures`].

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::path::Path;
use std::sync::Arc;

use simtab_core::{ColumnId, ColumnKind, TableId, WorkerId};
use simtab_engine::{
    EventContext, EventError, EventPartition, EventProducer, ProducerFactory, RunConfig,
    RunController,
};
use simtab_output::OutputAggregator;
use simtab_schema::SchemaRegistry;

pub use fixtures::{AbortingProducer, HitProducer, OverflowProducer, PanickingProducer};

/// Handles for the `events` table: `id` (int), `hits` (real array,
/// capacity 3) and `hitFold` (int, fold of `hits`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventsTable {
    pub table: TableId,
    pub id: ColumnId,
    pub hits: ColumnId,
    pub hit_fold: ColumnId,
}

/// Capacity of the `hits` column.
pub const HITS_CAPACITY: u32 = 3;

/// A registry holding only the `events` table.
pub fn events_registry() -> (SchemaRegistry, EventsTable) {
    let mut reg = SchemaRegistry::new();
    let cols = define_events(&mut reg);
    (reg, cols)
}

/// Define the `events` table on `reg`.
///
/// # Panics
///
/// Panics if `reg` is sealed or already holds an `events` table.
pub fn define_events(reg: &mut SchemaRegistry) -> EventsTable {
    let table = reg.define_table("events", "scenario events").unwrap();
    let id = reg.add_column(table, "id", ColumnKind::Int).unwrap();
    let hits = reg
        .add_column(
            table,
            "hits",
            ColumnKind::RealArray {
                capacity: HITS_CAPACITY,
            },
        )
        .unwrap();
    let hit_fold = reg.add_column(table, "hitFold", ColumnKind::Int).unwrap();
    reg.bind_fold(table, hits, hit_fold).unwrap();
    EventsTable {
        table,
        id,
        hits,
        hit_fold,
    }
}

/// One scripted event: `id`, the hits to append, and an explicit fold
/// (left to derivation when `None`).
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptedEvent {
    pub id: i64,
    pub hits: Vec<f64>,
    pub fold: Option<i64>,
}

impl ScriptedEvent {
    pub fn new(id: i64, hits: &[f64]) -> Self {
        Self {
            id,
            hits: hits.to_vec(),
            fold: Some(hits.len() as i64),
        }
    }
}

/// Writes `script[event % script.len()]` into the `events` table.
pub struct ScriptedProducer {
    pub cols: EventsTable,
    pub script: Arc<[ScriptedEvent]>,
}

impl EventProducer for ScriptedProducer {
    fn produce(&mut self, ctx: &mut EventContext<'_>) -> Result<(), EventError> {
        if self.script.is_empty() {
            return Ok(());
        }
        let entry = &self.script[(ctx.event().0 % self.script.len() as u64) as usize];
        let c = self.cols;
        ctx.set_scalar(c.table, c.id, entry.id)?;
        for &hit in &entry.hits {
            ctx.append_to_sequence(c.table, c.hits, hit)?;
        }
        if let Some(fold) = entry.fold {
            ctx.set_scalar(c.table, c.hit_fold, fold)?;
        }
        Ok(())
    }
}

/// Box `make` as a shared producer factory.
pub fn factory<F>(make: F) -> Arc<dyn ProducerFactory>
where
    F: Fn(WorkerId) -> Box<dyn EventProducer> + Send + Sync + 'static,
{
    Arc::new(make)
}

/// A factory of [`ScriptedProducer`]s over `script`.
pub fn scripted(cols: EventsTable, script: Vec<ScriptedEvent>) -> Arc<dyn ProducerFactory> {
    let script: Arc<[ScriptedEvent]> = script.into();
    factory(move |_| {
        Box::new(ScriptedProducer {
            cols,
            script: Arc::clone(&script),
        })
    })
}

/// A controller over `registry` and `factory` with a fresh aggregator.
pub fn controller(registry: SchemaRegistry, factory: Arc<dyn ProducerFactory>) -> RunController {
    RunController::new(registry, OutputAggregator::new(), factory)
}

/// A fixed-seed config writing `test_run<id>.simtab` into `dir`.
pub fn test_config(dir: &Path, workers: usize, seed: u64) -> RunConfig {
    RunConfig {
        worker_count: Some(workers),
        master_seed: Some(seed),
        output_dir: dir.to_path_buf(),
        output_base_name: "test".to_string(),
        partition: EventPartition::Contiguous,
        print_progress: 0,
    }
}
