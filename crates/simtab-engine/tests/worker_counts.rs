//! Row conservation across worker counts and partitions.

use proptest::prelude::*;
use simtab_engine::{EventPartition, RunConfig};
use simtab_output::OutputFile;
use simtab_test_utils::{controller, events_registry, factory, test_config, HitProducer};

fn run(workers: usize, events: u64, partition: EventPartition) -> (u64, Vec<u64>) {
    let dir = tempfile::tempdir().unwrap();
    let (reg, cols) = events_registry();
    let mut c = controller(reg, factory(move |_| Box::new(HitProducer::new(cols))));
    let config = RunConfig {
        partition,
        ..test_config(dir.path(), workers, 2024)
    };
    c.begin_run(config).unwrap();
    c.run_events(events).unwrap();
    let report = c.end_run().unwrap();

    let file = OutputFile::open(report.output.as_ref().unwrap()).unwrap();
    let rows = file.row_count("events").unwrap() as u64;
    assert_eq!(Some(rows), report.rows("events"));
    let per_worker = report.workers.iter().map(|w| w.rows_committed).collect();
    (rows, per_worker)
}

#[test]
fn one_two_and_four_workers_write_the_same_row_count() {
    for partition in [EventPartition::Contiguous, EventPartition::Interleaved] {
        for workers in [1, 2, 4] {
            let (rows, per_worker) = run(workers, 100, partition);
            assert_eq!(rows, 100, "{workers} workers, {partition:?}");
            assert_eq!(per_worker.len(), workers);
            assert_eq!(per_worker.iter().sum::<u64>(), 100);
        }
    }
}

#[test]
fn contiguous_split_is_balanced() {
    let (_, per_worker) = run(4, 10, EventPartition::Contiguous);
    assert_eq!(per_worker, vec![3, 3, 2, 2]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn no_row_is_lost_or_duplicated(workers in 1usize..=6, events in 0u64..60) {
        let (rows, _) = run(workers, events, EventPartition::Contiguous);
        prop_assert_eq!(rows, events);
    }
}
