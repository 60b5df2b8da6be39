//! End-to-end runs against the `events` scenario table.

use simtab_core::{EventId, Value};
use simtab_engine::{EventPartition, RunState};
use simtab_output::{OutputFile, RunStatus};
use simtab_test_utils::{controller, events_registry, scripted, test_config, ScriptedEvent};

#[test]
fn two_event_scenario_merges_in_arrival_order() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, cols) = events_registry();
    let script = vec![
        ScriptedEvent::new(1, &[1.5, 2.5]),
        ScriptedEvent::new(2, &[]),
    ];
    let mut c = controller(reg, scripted(cols, script));

    c.begin_run(test_config(dir.path(), 1, 11)).unwrap();
    assert_eq!(c.state(), RunState::Running);
    let batch = c.run_events(2).unwrap();
    assert_eq!((batch.completed, batch.failed), (2, 0));
    let report = c.end_run().unwrap();
    assert_eq!(c.state(), RunState::Idle);

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.rows("events"), Some(2));
    let file = OutputFile::open(report.output.as_ref().unwrap()).unwrap();
    assert_eq!(file.status(), RunStatus::Completed);
    assert_eq!(file.header().master_seed, 11);
    assert_eq!(file.row_count("events"), Some(2));

    assert_eq!(file.cell("events", 0, "id"), Some(&Value::Int(1)));
    assert_eq!(
        file.cell("events", 0, "hits").and_then(Value::as_real_seq),
        Some(&[1.5, 2.5][..])
    );
    assert_eq!(file.cell("events", 0, "hitFold"), Some(&Value::Int(2)));

    assert_eq!(file.cell("events", 1, "id"), Some(&Value::Int(2)));
    assert_eq!(file.cell("events", 1, "hits").and_then(Value::fold), Some(0));
    assert_eq!(file.cell("events", 1, "hitFold"), Some(&Value::Int(0)));

    let events: Vec<EventId> = file.rows("events").unwrap().iter().map(|r| r.event).collect();
    assert_eq!(events, vec![EventId(0), EventId(1)]);
    assert_eq!(report.content_hash, Some(file.footer().content_hash));
}

#[test]
fn event_ids_continue_across_batches() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, cols) = events_registry();
    let mut c = controller(reg, scripted(cols, vec![ScriptedEvent::new(7, &[1.0])]));

    c.begin_run(test_config(dir.path(), 2, 1)).unwrap();
    assert_eq!(c.run_events(3).unwrap().first_event, 0);
    assert_eq!(c.run_events(5).unwrap().first_event, 3);
    let report = c.end_run().unwrap();
    assert_eq!(report.events_requested, 8);
    assert_eq!(report.events_completed, 8);

    let file = OutputFile::open(report.output.unwrap()).unwrap();
    let mut events: Vec<u64> = file.rows("events").unwrap().iter().map(|r| r.event.0).collect();
    events.sort_unstable();
    assert_eq!(events, (0..8).collect::<Vec<_>>());
}

#[test]
fn merged_rows_follow_worker_order_not_event_order() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, cols) = events_registry();
    let mut c = controller(reg, scripted(cols, vec![ScriptedEvent::new(0, &[])]));

    let config = simtab_engine::RunConfig {
        partition: EventPartition::Interleaved,
        ..test_config(dir.path(), 2, 1)
    };
    c.begin_run(config).unwrap();
    c.run_events(6).unwrap();
    let report = c.end_run().unwrap();

    let file = OutputFile::open(report.output.unwrap()).unwrap();
    let events: Vec<u64> = file.rows("events").unwrap().iter().map(|r| r.event.0).collect();
    assert_eq!(events, vec![0, 2, 4, 1, 3, 5]);
}

#[test]
fn empty_run_still_publishes_a_file() {
    let dir = tempfile::tempdir().unwrap();
    let (reg, cols) = events_registry();
    let mut c = controller(reg, scripted(cols, vec![]));
    c.begin_run(test_config(dir.path(), 3, 1)).unwrap();
    let report = c.end_run().unwrap();
    assert_eq!(report.total_rows(), 0);
    let file = OutputFile::open(report.output.unwrap()).unwrap();
    assert_eq!(file.row_count("events"), Some(0));
    assert_eq!(file.header().worker_count, 3);
}
