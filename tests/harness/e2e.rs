//! Full runs of plain (non-composed) workloads

use serde_json::Value;

use fsmstress::{
    ClusterOptions, Filter, NamedWorkload, RawWorkload, RunnerOptions, Store, UpdateSpec,
};

use crate::common::standalone_runner;

/// A workload whose single state increments a shared counter and asserts
/// the count it observes never goes backwards
fn shared_counter_workload(thread_count: usize, iterations: u64) -> RawWorkload {
    RawWorkload::new()
        .thread_count(thread_count)
        .iterations(iterations)
        .start_state("s")
        .data_value("last_seen", Value::from(0))
        .setup(|store, ns, _data| {
            store.insert_one(ns, [("n".to_string(), Value::from(0))].into_iter().collect())?;
            Ok(())
        })
        .state("s", |ctx| {
            let docs = ctx.store.find_all(ctx.ns)?;
            let n = docs
                .first()
                .and_then(|doc| doc.get("n"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let last_seen = ctx.data.get_i64("last_seen")?;
            // Other threads only ever increment, so the count this thread
            // observes is monotonic even under shared-collection mode.
            ctx.check_always(n >= last_seen, "shared counter went backwards")?;
            ctx.store
                .update_many(ctx.ns, &Filter::All, &UpdateSpec::inc("n", 1))?;
            ctx.data.set("last_seen", Value::from(n + 1));
            Ok(())
        })
        .transition("s", "s", 1.0)
}

#[test]
fn test_shared_collection_counter_reaches_exact_total() {
    let (deployment, runner) = standalone_runner(RunnerOptions::default());

    let options = ClusterOptions {
        same_db: true,
        same_collection: true,
        seed: 1234,
        ..ClusterOptions::default()
    };
    runner
        .run_serial(
            vec![NamedWorkload::new("counter", shared_counter_workload(3, 5))],
            options,
        )
        .unwrap();

    // 3 threads x 5 iterations, every $inc applied exactly once
    let store = deployment.store();
    let docs = store
        .find_all(&fsmstress::Namespace::new("fsmdb0", "fsmcoll0"))
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].get("n"), Some(&Value::from(15)));
}

#[test]
fn test_parallel_workloads_get_isolated_namespaces() {
    let (deployment, runner) = standalone_runner(RunnerOptions::default());

    runner
        .run_parallel(
            vec![
                NamedWorkload::new("fast", shared_counter_workload(2, 10)),
                NamedWorkload::new("slow", shared_counter_workload(3, 4)),
            ],
            ClusterOptions::default(),
        )
        .unwrap();

    // Each workload ran against its own database and collection
    let store = deployment.store();
    let first = store
        .find_all(&fsmstress::Namespace::new("fsmdb0", "fsmcoll0"))
        .unwrap();
    let second = store
        .find_all(&fsmstress::Namespace::new("fsmdb1", "fsmcoll1"))
        .unwrap();
    assert_eq!(first[0].get("n"), Some(&Value::from(20)));
    assert_eq!(second[0].get("n"), Some(&Value::from(12)));
}

#[test]
fn test_serial_entries_use_fresh_namespaces() {
    let (deployment, runner) = standalone_runner(RunnerOptions::default());

    runner
        .run_serial(
            vec![
                NamedWorkload::new("first", shared_counter_workload(1, 3)),
                NamedWorkload::new("second", shared_counter_workload(1, 7)),
            ],
            ClusterOptions::default(),
        )
        .unwrap();

    let store = deployment.store();
    let first = store
        .find_all(&fsmstress::Namespace::new("fsmdb0", "fsmcoll0"))
        .unwrap();
    let second = store
        .find_all(&fsmstress::Namespace::new("fsmdb1", "fsmcoll1"))
        .unwrap();
    assert_eq!(first[0].get("n"), Some(&Value::from(3)));
    assert_eq!(second[0].get("n"), Some(&Value::from(7)));
}

#[test]
fn test_thread_cap_scales_but_still_completes() {
    let (deployment, runner) = standalone_runner(RunnerOptions {
        max_allowed_threads: 4,
        ..RunnerOptions::default()
    });

    // 6 + 6 requested threads scale down to floor(6 * 4/12) = 2 each
    runner
        .run_parallel(
            vec![
                NamedWorkload::new("a", shared_counter_workload(6, 5)),
                NamedWorkload::new("b", shared_counter_workload(6, 5)),
            ],
            ClusterOptions::default(),
        )
        .unwrap();

    let store = deployment.store();
    for ns in [
        fsmstress::Namespace::new("fsmdb0", "fsmcoll0"),
        fsmstress::Namespace::new("fsmdb1", "fsmcoll1"),
    ] {
        let docs = store.find_all(&ns).unwrap();
        assert_eq!(docs[0].get("n"), Some(&Value::from(10)));
    }
}

#[test]
fn test_failing_threads_surface_one_grouped_report() {
    let (_deployment, runner) = standalone_runner(RunnerOptions::default());

    let broken = RawWorkload::new()
        .thread_count(4)
        .iterations(3)
        .state("init", |ctx| ctx.check_always(false, "always wrong"))
        .transition("init", "init", 1.0);

    let err = runner
        .run_serial(
            vec![NamedWorkload::new("broken", broken)],
            ClusterOptions::default(),
        )
        .unwrap_err();

    let report = match err {
        fsmstress::HarnessError::ThreadsFailed(report) => report,
        other => panic!("unexpected error: {other}"),
    };
    // All four threads fail identically: one signature, frequency 4
    assert!(report.starts_with("4 threads threw"));
    assert_eq!(report.matches("the following exception").count(), 1);
    assert!(report.contains("always wrong"));
}
