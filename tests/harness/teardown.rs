//! Setup/teardown guarantees under failure

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use fsmstress::{
    ClusterOptions, HarnessError, NamedWorkload, RawWorkload, RunnerOptions, WorkloadError,
};

use crate::common::standalone_runner;

fn always_failing(thread_count: usize) -> RawWorkload {
    RawWorkload::new()
        .thread_count(thread_count)
        .iterations(3)
        .state("init", |ctx| ctx.check_always(false, "deliberate"))
        .transition("init", "init", 1.0)
}

fn with_teardown_counter(raw: RawWorkload, counter: &Arc<AtomicUsize>) -> RawWorkload {
    let counter = Arc::clone(counter);
    raw.teardown(move |_store, _ns, _data| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
}

#[test]
fn test_teardown_runs_when_sibling_workload_fails() {
    let (_deployment, runner) = standalone_runner(RunnerOptions::default());
    let teardowns = Arc::new(AtomicUsize::new(0));

    let healthy = RawWorkload::new()
        .thread_count(2)
        .iterations(3)
        .state("init", |_ctx| Ok(()))
        .transition("init", "init", 1.0);

    let err = runner
        .run_parallel(
            vec![
                NamedWorkload::new("failing", always_failing(2)),
                NamedWorkload::new("healthy", with_teardown_counter(healthy, &teardowns)),
            ],
            ClusterOptions::default(),
        )
        .unwrap_err();

    // Every thread of the failing workload threw, but the healthy
    // workload's teardown still ran exactly once.
    assert!(matches!(err, HarnessError::ThreadsFailed(_)));
    assert_eq!(teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_teardown_failure_is_deferred_but_fatal() {
    let (_deployment, runner) = standalone_runner(RunnerOptions::default());
    let later_teardowns = Arc::new(AtomicUsize::new(0));

    let bad_teardown = RawWorkload::new()
        .thread_count(1)
        .iterations(1)
        .state("init", |_ctx| Ok(()))
        .transition("init", "init", 1.0)
        .teardown(|_store, _ns, _data| Err(WorkloadError::check("teardown broke")));

    let fine = RawWorkload::new()
        .thread_count(1)
        .iterations(1)
        .state("init", |_ctx| Ok(()))
        .transition("init", "init", 1.0);

    let err = runner
        .run_parallel(
            vec![
                NamedWorkload::new("bad", bad_teardown),
                NamedWorkload::new("fine", with_teardown_counter(fine, &later_teardowns)),
            ],
            ClusterOptions::default(),
        )
        .unwrap_err();

    // The run fails overall, but only after the other teardown ran too
    let failures = match err {
        HarnessError::TeardownFailed(failures) => failures,
        other => panic!("unexpected error: {other}"),
    };
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].workload, "bad");
    assert!(failures[0].message.contains("teardown broke"));
    assert_eq!(later_teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_setup_failure_skips_threads_but_tears_down_started_workloads() {
    let (_deployment, runner) = standalone_runner(RunnerOptions::default());
    let first_teardowns = Arc::new(AtomicUsize::new(0));
    let second_teardowns = Arc::new(AtomicUsize::new(0));
    let states_run = Arc::new(AtomicUsize::new(0));

    let ok_setup = RawWorkload::new()
        .thread_count(1)
        .iterations(1)
        .state("init", {
            let states_run = Arc::clone(&states_run);
            move |_ctx| {
                states_run.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .transition("init", "init", 1.0);

    let bad_setup = RawWorkload::new()
        .thread_count(1)
        .iterations(1)
        .setup(|_store, _ns, _data| Err(WorkloadError::check("setup broke")))
        .state("init", |_ctx| Ok(()))
        .transition("init", "init", 1.0);

    let err = runner
        .run_parallel(
            vec![
                NamedWorkload::new(
                    "first",
                    with_teardown_counter(ok_setup, &first_teardowns),
                ),
                NamedWorkload::new(
                    "second",
                    with_teardown_counter(bad_setup, &second_teardowns),
                ),
            ],
            ClusterOptions::default(),
        )
        .unwrap_err();

    match err {
        HarnessError::SetupFailed { workload, message } => {
            assert_eq!(workload, "second");
            assert!(message.contains("setup broke"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // No thread ever spawned, and both workloads that had begun (including
    // the one whose setup threw partway) were torn down.
    assert_eq!(states_run.load(Ordering::SeqCst), 0);
    assert_eq!(first_teardowns.load(Ordering::SeqCst), 1);
    assert_eq!(second_teardowns.load(Ordering::SeqCst), 1);
}

#[test]
fn test_setup_mutations_visible_to_threads() {
    let (_deployment, runner) = standalone_runner(RunnerOptions::default());

    let workload = RawWorkload::new()
        .thread_count(2)
        .iterations(2)
        .data_value("from_setup", serde_json::Value::from(0))
        .setup(|_store, _ns, data| {
            data.insert("from_setup".to_string(), serde_json::Value::from(41));
            Ok(())
        })
        .state("init", |ctx| {
            ctx.check_always(
                ctx.data.get_i64("from_setup")? == 41,
                "setup mutation lost",
            )
        })
        .transition("init", "init", 1.0);

    runner
        .run_serial(
            vec![NamedWorkload::new("visible", workload)],
            ClusterOptions::default(),
        )
        .unwrap();
}
