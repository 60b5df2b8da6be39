//! End-of-run merge of worker buffers into the run file.
//!
//! The aggregator writes to `<path>.partial` while a run is in progress
//! and renames it to `<path>` only after every table block and the footer
//! are on disk. A run that fails to merge leaves no file behind.

use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use simtab_core::{RunId, Schema, WorkerId};
use simtab_record::WorkerRows;

use crate::error::OutputError;
use crate::hash::schema_hash;
use crate::types::{BuildMetadata, Footer, RunHeader, RunStatus};
use crate::writer::TableFileWriter;

/// Event accounting written to the footer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RunSummary {
    /// Status recorded in the file.
    pub status: RunStatus,
    /// Events that committed their rows.
    pub events_completed: u64,
    /// Events whose rows were discarded.
    pub events_failed: u64,
}

/// A published run file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergedOutput {
    /// Final path of the file.
    pub path: PathBuf,
    /// Footer as written.
    pub footer: Footer,
    /// File size in bytes.
    pub bytes: u64,
}

struct ActiveRun {
    run: RunId,
    path: PathBuf,
    partial: PathBuf,
    schema: Arc<Schema>,
    worker_count: u32,
    writer: TableFileWriter<BufWriter<File>>,
}

/// Owner of the run output file.
///
/// Constructed once per process and handed to the run controller. Only
/// one run file is open at a time; nothing else reads or writes it until
/// [`merge_and_close`](Self::merge_and_close) publishes it.
pub struct OutputAggregator {
    metadata: BuildMetadata,
    active: Option<ActiveRun>,
}

impl OutputAggregator {
    /// An aggregator stamping files with the running build's metadata.
    pub fn new() -> Self {
        Self::with_metadata(BuildMetadata::current())
    }

    /// An aggregator stamping files with `metadata`.
    pub fn with_metadata(metadata: BuildMetadata) -> Self {
        Self {
            metadata,
            active: None,
        }
    }

    /// Build metadata written into every header.
    pub fn metadata(&self) -> &BuildMetadata {
        &self.metadata
    }

    /// Start the output for a run: create `<path>.partial` and write the
    /// header and schema block.
    pub fn open_run(
        &mut self,
        path: impl Into<PathBuf>,
        run: RunId,
        master_seed: u64,
        worker_count: u32,
        schema: Arc<Schema>,
    ) -> Result<(), OutputError> {
        if self.active.is_some() {
            return Err(OutputError::AlreadyOpen);
        }
        let path = path.into();
        let partial = partial_path(&path);
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let header = RunHeader {
            run_id: run,
            master_seed,
            worker_count,
            metadata: self.metadata.clone(),
            schema_hash: schema_hash(&schema),
        };
        let writer = File::create(&partial)
            .map_err(OutputError::from)
            .and_then(|f| TableFileWriter::new(BufWriter::new(f), &header, Arc::clone(&schema)));
        let writer = match writer {
            Ok(w) => w,
            Err(e) => {
                remove_partial(&partial);
                return Err(e);
            }
        };

        tracing::debug!(run = %run, path = %partial.display(), "run output opened");
        self.active = Some(ActiveRun {
            run,
            path,
            partial,
            schema,
            worker_count,
            writer,
        });
        Ok(())
    }

    /// Whether a run file is open.
    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// Final path of the open run file.
    pub fn output_path(&self) -> Option<&Path> {
        self.active.as_ref().map(|a| a.path.as_path())
    }

    /// Merge every worker's rows into the open file and publish it.
    ///
    /// Tables are written in ID order. Within a table, rows are
    /// concatenated by worker ID ascending, then in each worker's arrival
    /// order. Exactly the workers `0..worker_count` given to
    /// [`open_run`](Self::open_run) must hand over rows, and every worker's
    /// committed counters must match the rows it hands over. On any
    /// failure the partial file is removed and the error returned; no file
    /// appears at the final path.
    pub fn merge_and_close(
        &mut self,
        workers: Vec<WorkerRows>,
        summary: RunSummary,
    ) -> Result<MergedOutput, OutputError> {
        let active = self.active.take().ok_or(OutputError::NotOpen)?;
        let run = active.run;
        let partial = active.partial.clone();
        match merge(active, workers, summary) {
            Ok(out) => {
                tracing::info!(
                    run = %run,
                    path = %out.path.display(),
                    bytes = out.bytes,
                    rows = ?out.footer.row_counts,
                    "run output published"
                );
                Ok(out)
            }
            Err(e) => {
                remove_partial(&partial);
                tracing::error!(
                    run = %run,
                    path = %partial.display(),
                    error = %e,
                    "merge failed, partial output removed"
                );
                Err(e)
            }
        }
    }

    /// Abandon the open run file, removing it. Returns `false` if none
    /// was open.
    pub fn discard(&mut self) -> bool {
        match self.active.take() {
            Some(active) => {
                drop(active.writer);
                remove_partial(&active.partial);
                tracing::warn!(run = %active.run, "run output discarded");
                true
            }
            None => false,
        }
    }
}

impl Default for OutputAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OutputAggregator {
    fn drop(&mut self) {
        self.discard();
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".partial");
    PathBuf::from(s)
}

fn remove_partial(partial: &Path) {
    if let Err(e) = fs::remove_file(partial) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(
                path = %partial.display(),
                error = %e,
                "could not remove partial output"
            );
        }
    }
}

fn merge(
    active: ActiveRun,
    mut workers: Vec<WorkerRows>,
    summary: RunSummary,
) -> Result<MergedOutput, OutputError> {
    let schema = &active.schema;
    workers.sort_by_key(|w| w.worker);
    if let Some(pair) = workers.windows(2).find(|p| p[0].worker == p[1].worker) {
        return Err(OutputError::SchemaMismatch {
            detail: format!("rows for worker {} supplied twice", pair[0].worker),
        });
    }
    if let Some(w) = workers.iter().find(|w| w.worker.0 >= active.worker_count) {
        return Err(OutputError::UnknownWorker {
            worker: w.worker,
            worker_count: active.worker_count,
        });
    }
    // Sorted, distinct and in range: worker `i` sits at index `i` unless one is missing.
    if let Some(i) = (0..active.worker_count)
        .find(|&i| workers.get(i as usize).map(|w| w.worker.0) != Some(i))
    {
        return Err(OutputError::MissingWorker {
            worker: WorkerId(i),
        });
    }

    let n = schema.table_count();
    for w in &workers {
        if w.tables.len() != n || w.committed.len() != n {
            return Err(OutputError::SchemaMismatch {
                detail: format!(
                    "worker {} holds {} tables, schema has {n}",
                    w.worker,
                    w.tables.len()
                ),
            });
        }
        let counted = w.tables.iter().zip(&w.committed);
        for (table, (rows, &committed)) in schema.tables.iter().zip(counted) {
            if rows.len() as u64 != committed {
                return Err(OutputError::RowCountMismatch {
                    table: table.name.clone(),
                    expected: committed,
                    found: rows.len() as u64,
                });
            }
        }
    }

    let mut writer = active.writer;
    for table in &schema.tables {
        let t = table.id.index();
        let count: u64 = workers.iter().map(|w| w.tables[t].len() as u64).sum();
        writer.begin_table(table.id, count)?;
        for w in &workers {
            for row in &w.tables[t] {
                writer.write_row(row)?;
            }
        }
        writer.end_table()?;
    }

    let (sink, footer) = writer.finish(
        summary.status,
        summary.events_completed,
        summary.events_failed,
    )?;
    let file = sink.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    let bytes = file.metadata()?.len();
    drop(file);
    fs::rename(&active.partial, &active.path)?;

    Ok(MergedOutput {
        path: active.path,
        footer,
        bytes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::OutputFile;
    use simtab_core::{ColumnKind, EventId, TableId, Value};
    use simtab_record::{RecordBuffer, Row};
    use simtab_schema::SchemaRegistry;

    fn schema() -> Arc<Schema> {
        let mut reg = SchemaRegistry::new();
        let t = reg.define_table("events", "").unwrap();
        reg.add_column(t, "id", ColumnKind::Int).unwrap();
        let g = reg.define_table("geometry", "").unwrap();
        reg.add_column(g, "cake", ColumnKind::Int).unwrap();
        reg.seal().unwrap()
    }

    fn worker_rows(schema: &Arc<Schema>, worker: u32, ids: &[i64]) -> WorkerRows {
        let mut buf = RecordBuffer::new(Arc::clone(schema), WorkerId(worker));
        for &id in ids {
            buf.begin_event(EventId(id as u64)).unwrap();
            buf.set_scalar(TableId(0), simtab_core::ColumnId(0), id).unwrap();
            buf.end_event().unwrap();
        }
        buf.into_rows()
    }

    fn completed(n: u64) -> RunSummary {
        RunSummary {
            status: RunStatus::Completed,
            events_completed: n,
            events_failed: 0,
        }
    }

    #[test]
    fn merge_orders_by_worker_then_arrival() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.simtab");
        let schema = schema();
        let mut agg = OutputAggregator::new();
        agg.open_run(&path, RunId(0), 7, 2, Arc::clone(&schema)).unwrap();
        assert!(!path.exists());
        assert!(partial_path(&path).exists());

        // Worker 1 handed over first; worker 0's rows must still lead.
        let workers = vec![
            worker_rows(&schema, 1, &[10, 11]),
            worker_rows(&schema, 0, &[3, 1, 2]),
        ];
        let out = agg.merge_and_close(workers, completed(5)).unwrap();
        assert_eq!(out.path, path);
        assert_eq!(out.footer.row_counts, vec![5, 0]);
        assert!(!partial_path(&path).exists());
        assert!(!agg.is_open());

        let file = OutputFile::open(&path).unwrap();
        let ids: Vec<i64> = file
            .rows("events")
            .unwrap()
            .iter()
            .filter_map(|r| r.cells[0].as_int())
            .collect();
        assert_eq!(ids, vec![3, 1, 2, 10, 11]);
        assert_eq!(file.header().master_seed, 7);
        assert_eq!(file.row_count("geometry"), Some(0));
    }

    #[test]
    fn counter_mismatch_fails_and_removes_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.simtab");
        let schema = schema();
        let mut agg = OutputAggregator::new();
        agg.open_run(&path, RunId(0), 7, 1, Arc::clone(&schema)).unwrap();

        let mut rows = worker_rows(&schema, 0, &[1, 2]);
        rows.tables[0].pop();
        let err = agg.merge_and_close(vec![rows], completed(2)).unwrap_err();
        assert!(matches!(
            err,
            OutputError::RowCountMismatch {
                expected: 2,
                found: 1,
                ..
            }
        ));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn duplicated_worker_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.simtab");
        let schema = schema();
        let mut agg = OutputAggregator::new();
        agg.open_run(&path, RunId(0), 7, 2, Arc::clone(&schema)).unwrap();
        let rows = worker_rows(&schema, 0, &[1]);
        assert!(agg
            .merge_and_close(vec![rows.clone(), rows], completed(2))
            .is_err());
        assert!(!path.exists());
    }

    #[test]
    fn missing_worker_fails_the_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.simtab");
        let schema = schema();
        let mut agg = OutputAggregator::new();
        agg.open_run(&path, RunId(0), 7, 2, Arc::clone(&schema)).unwrap();

        // Worker 1 committed rows too, but they never arrive.
        let err = agg
            .merge_and_close(vec![worker_rows(&schema, 0, &[1, 2])], completed(4))
            .unwrap_err();
        assert!(
            matches!(err, OutputError::MissingWorker { worker } if worker == WorkerId(1)),
            "{err}"
        );
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
        assert!(!agg.is_open());
    }

    #[test]
    fn worker_outside_the_run_fails_the_merge() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.simtab");
        let schema = schema();
        let mut agg = OutputAggregator::new();
        agg.open_run(&path, RunId(0), 7, 2, Arc::clone(&schema)).unwrap();

        let workers = vec![
            worker_rows(&schema, 0, &[1]),
            worker_rows(&schema, 2, &[2]),
        ];
        let err = agg.merge_and_close(workers, completed(2)).unwrap_err();
        assert!(matches!(
            err,
            OutputError::UnknownWorker {
                worker: WorkerId(2),
                worker_count: 2,
            }
        ));
        assert!(!path.exists());
        assert!(!partial_path(&path).exists());
    }

    #[test]
    fn rename_failure_is_reported_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.simtab");
        // A non-empty directory at the final path makes the rename fail.
        fs::create_dir(&path).unwrap();
        fs::write(path.join("occupant"), b"x").unwrap();

        let schema = schema();
        let mut agg = OutputAggregator::new();
        agg.open_run(&path, RunId(0), 7, 1, Arc::clone(&schema)).unwrap();
        let err = agg
            .merge_and_close(vec![worker_rows(&schema, 0, &[1])], completed(1))
            .unwrap_err();
        assert!(matches!(err, OutputError::Io(_)));
        assert!(!partial_path(&path).exists());
        assert!(path.is_dir());
    }

    #[test]
    fn open_twice_and_merge_unopened_are_errors() {
        let dir = tempfile::tempdir().unwrap();
        let schema = schema();
        let mut agg = OutputAggregator::new();
        assert!(matches!(
            agg.merge_and_close(vec![], completed(0)),
            Err(OutputError::NotOpen)
        ));
        agg.open_run(dir.path().join("a.simtab"), RunId(0), 1, 1, Arc::clone(&schema))
            .unwrap();
        assert!(matches!(
            agg.open_run(dir.path().join("b.simtab"), RunId(1), 1, 1, schema),
            Err(OutputError::AlreadyOpen)
        ));
    }

    #[test]
    fn discard_and_drop_remove_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/run.simtab");
        let schema = schema();

        let mut agg = OutputAggregator::new();
        agg.open_run(&path, RunId(0), 1, 1, Arc::clone(&schema)).unwrap();
        assert!(agg.discard());
        assert!(!agg.discard());
        assert!(!partial_path(&path).exists());

        agg.open_run(&path, RunId(1), 1, 1, schema).unwrap();
        drop(agg);
        assert!(!partial_path(&path).exists());
        assert!(!path.exists());
    }

    #[test]
    fn aborted_status_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.simtab");
        let schema = schema();
        let mut agg = OutputAggregator::new();
        agg.open_run(&path, RunId(4), 1, 1, Arc::clone(&schema)).unwrap();
        let summary = RunSummary {
            status: RunStatus::Aborted,
            events_completed: 1,
            events_failed: 0,
        };
        agg.merge_and_close(vec![worker_rows(&schema, 0, &[1])], summary)
            .unwrap();
        let file = OutputFile::open(&path).unwrap();
        assert_eq!(file.status(), RunStatus::Aborted);
        assert_eq!(file.header().run_id, RunId(4));
        let _: &Row = file.row("events", 0).unwrap();
        assert_eq!(file.cell("events", 0, "id"), Some(&Value::Int(1)));
    }
}
