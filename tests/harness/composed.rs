//! Composed (interleaved) execution through the facade

use serde_json::Value;

use fsmstress::{
    ClusterOptions, Filter, NamedWorkload, Namespace, RawWorkload, RunnerOptions, Store,
    UpdateSpec,
};

use crate::common::standalone_runner;

/// A workload whose init state bumps a per-workload document once, and
/// whose work state bumps a separate field. Init has no transitions back
/// to it, so the composer may only ever run it as the one-time priming
/// step.
fn tracked_workload(id: &'static str, thread_count: usize, iterations: u64) -> RawWorkload {
    RawWorkload::new()
        .thread_count(thread_count)
        .iterations(iterations)
        .setup(move |store, ns, _data| {
            let doc = [
                ("_id".to_string(), Value::from(id)),
                ("init".to_string(), Value::from(0)),
                ("work".to_string(), Value::from(0)),
            ]
            .into_iter()
            .collect();
            store.insert_one(ns, doc)?;
            Ok(())
        })
        .state("init", move |ctx| {
            ctx.store.update_many(
                ctx.ns,
                &Filter::Id(Value::from(id)),
                &UpdateSpec::inc("init", 1),
            )?;
            Ok(())
        })
        .state("work", move |ctx| {
            ctx.store.update_many(
                ctx.ns,
                &Filter::Id(Value::from(id)),
                &UpdateSpec::inc("work", 1),
            )?;
            Ok(())
        })
        .transition("init", "work", 1.0)
        .transition("work", "work", 1.0)
}

fn field(store: &fsmstress::testing::MemStore, id: &str, field: &str) -> i64 {
    let ns = Namespace::new("fsmdb0", "fsmcoll0");
    store
        .find_all(&ns)
        .unwrap()
        .iter()
        .find(|doc| doc.get("_id") == Some(&Value::from(id)))
        .and_then(|doc| doc.get(field))
        .and_then(Value::as_i64)
        .unwrap()
}

#[test]
fn test_composed_run_starts_every_workload_once_per_thread() {
    let (deployment, runner) = standalone_runner(RunnerOptions {
        compose_prob: 0.3,
        ..RunnerOptions::default()
    });

    runner
        .run_composed(
            vec![
                NamedWorkload::new("alpha", tracked_workload("alpha", 2, 20)),
                NamedWorkload::new("beta", tracked_workload("beta", 2, 20)),
            ],
            ClusterOptions {
                seed: 77,
                ..ClusterOptions::default()
            },
        )
        .unwrap();

    // 4 threads total; each thread runs each workload's init exactly once
    // (as driver start or as priming), never via a jump.
    let store = deployment.store();
    assert_eq!(field(&store, "alpha", "init"), 4);
    assert_eq!(field(&store, "beta", "init"), 4);

    // Every thread did 20 interleaved steps; one of them per thread was
    // the driver's init.
    let total_work = field(&store, "alpha", "work") + field(&store, "beta", "work");
    assert_eq!(total_work, 4 * 20 - 4);
}

#[test]
fn test_composed_forces_shared_namespace() {
    let (deployment, runner) = standalone_runner(RunnerOptions::default());

    // Isolation flags left at their defaults: composed mode overrides them
    runner
        .run_composed(
            vec![
                NamedWorkload::new("alpha", tracked_workload("alpha", 1, 5)),
                NamedWorkload::new("beta", tracked_workload("beta", 1, 5)),
            ],
            ClusterOptions::default(),
        )
        .unwrap();

    let store = deployment.store();
    // Both workloads' setup docs landed in the one shared collection
    let docs = store
        .find_all(&Namespace::new("fsmdb0", "fsmcoll0"))
        .unwrap();
    assert_eq!(docs.len(), 2);
    assert!(store.list_collections("fsmdb1").unwrap().is_empty());
}

#[test]
fn test_compose_iterations_override() {
    let (deployment, runner) = standalone_runner(RunnerOptions {
        compose_prob: 0.0,
        compose_iterations: Some(3),
        ..RunnerOptions::default()
    });

    runner
        .run_composed(
            vec![
                NamedWorkload::new("alpha", tracked_workload("alpha", 1, 1000)),
                NamedWorkload::new("beta", tracked_workload("beta", 1, 1000)),
            ],
            ClusterOptions::default(),
        )
        .unwrap();

    // 2 threads x 3 interleaved steps, not 1000
    let store = deployment.store();
    let total = field(&store, "alpha", "init")
        + field(&store, "alpha", "work")
        + field(&store, "beta", "init")
        + field(&store, "beta", "work");
    // Each thread: 3 walk steps + 1 priming init for the non-driver
    assert_eq!(total, 2 * 4);
}
