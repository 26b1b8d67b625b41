//! Sharded-topology runs

use serde_json::Value;

use fsmstress::{
    ClusterOptions, Filter, NamedWorkload, Namespace, RawWorkload, RunnerOptions, Store,
    Topology, UpdateSpec,
};

use crate::common::sharded_runner;

fn counter_workload(thread_count: usize, iterations: u64) -> RawWorkload {
    RawWorkload::new()
        .thread_count(thread_count)
        .iterations(iterations)
        .setup(|store, ns, _data| {
            store.insert_one(ns, [("n".to_string(), Value::from(0))].into_iter().collect())?;
            Ok(())
        })
        .state("init", |ctx| {
            ctx.store
                .update_many(ctx.ns, &Filter::All, &UpdateSpec::inc("n", 1))?;
            Ok(())
        })
        .transition("init", "init", 1.0)
}

#[test]
fn test_sharded_run_shards_each_fresh_collection() {
    let (deployment, runner) = sharded_runner(RunnerOptions::default());

    runner
        .run_serial(
            vec![
                NamedWorkload::new("a", counter_workload(2, 5)),
                NamedWorkload::new("b", counter_workload(2, 5)),
            ],
            ClusterOptions {
                topology: Topology::Sharded {
                    shards: 2,
                    replicated: false,
                },
                ..ClusterOptions::default()
            },
        )
        .unwrap();

    // Every freshly created collection was sharded before threads ran
    assert_eq!(
        deployment.sharded_namespaces(),
        vec![
            Namespace::new("fsmdb0", "fsmcoll0"),
            Namespace::new("fsmdb1", "fsmcoll1"),
        ]
    );

    // The balancer was disabled for the run and re-enabled at teardown,
    // and the cluster was shut down exactly once.
    assert!(deployment.balancer_enabled());
    assert_eq!(deployment.shutdown_calls(), 1);

    let store = deployment.store();
    for ns in [
        Namespace::new("fsmdb0", "fsmcoll0"),
        Namespace::new("fsmdb1", "fsmcoll1"),
    ] {
        let docs = store.find_all(&ns).unwrap();
        assert_eq!(docs[0].get("n"), Some(&Value::from(10)));
    }
}

#[test]
fn test_composed_run_shards_shared_namespace_once() {
    let (deployment, runner) = sharded_runner(RunnerOptions::default());

    // Composed mode forces both workloads into one namespace; it must be
    // dropped, created, and sharded once, not once per workload.
    runner
        .run_composed(
            vec![
                NamedWorkload::new("a", counter_workload(1, 3)),
                NamedWorkload::new("b", counter_workload(1, 3)),
            ],
            ClusterOptions {
                topology: Topology::Sharded {
                    shards: 2,
                    replicated: false,
                },
                ..ClusterOptions::default()
            },
        )
        .unwrap();

    assert_eq!(
        deployment.sharded_namespaces(),
        vec![Namespace::new("fsmdb0", "fsmcoll0")]
    );

    // Both setup docs survived: the second workload's staging did not
    // re-drop the shared collection.
    let store = deployment.store();
    let docs = store
        .find_all(&Namespace::new("fsmdb0", "fsmcoll0"))
        .unwrap();
    assert_eq!(docs.len(), 2);
}

#[test]
fn test_standalone_topology_never_touches_sharding() {
    let (deployment, runner) = sharded_runner(RunnerOptions::default());

    // A sharding-capable deployment run with a standalone topology: the
    // cluster handle must not route any sharding calls.
    runner
        .run_serial(
            vec![NamedWorkload::new("a", counter_workload(1, 3))],
            ClusterOptions::default(),
        )
        .unwrap();

    assert!(deployment.sharded_namespaces().is_empty());
    assert!(deployment.balancer_enabled());
}
