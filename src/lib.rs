//! fsmstress - FSM-based concurrency stress harness for shared data stores
//!
//! Workloads are finite state machines: named states with weighted random
//! transitions, run by many threads at once against a shared store. The
//! harness owns everything around the walk - validating definitions,
//! isolating namespaces, spawning and synchronizing worker threads, and
//! folding per-thread failures into one combined report.
//!
//! # Quick Start
//!
//! ```
//! use fsmstress::{ClusterOptions, NamedWorkload, RawWorkload, Runner, RunnerOptions};
//! use fsmstress::{Filter, Store, UpdateSpec};
//! use fsmstress::testing::MemDeployment;
//! use std::sync::Arc;
//!
//! let counter = RawWorkload::new()
//!     .thread_count(4)
//!     .iterations(10)
//!     .setup(|store, ns, _data| {
//!         store.insert_one(ns, [("n".to_string(), 0.into())].into_iter().collect())?;
//!         Ok(())
//!     })
//!     .state("init", |ctx| {
//!         ctx.store.update_many(ctx.ns, &Filter::All, &UpdateSpec::inc("n", 1))?;
//!         Ok(())
//!     })
//!     .transition("init", "init", 1.0);
//!
//! let deployment = Arc::new(MemDeployment::new());
//! let runner = Runner::new(deployment, RunnerOptions::default());
//! runner.run_serial(
//!     vec![NamedWorkload::new("counter", counter)],
//!     ClusterOptions::default(),
//! )?;
//! # Ok::<(), fsmstress::HarnessError>(())
//! ```
//!
//! # Architecture
//!
//! [`fsmstress_core`] holds the workload model: definitions and the
//! normalizer, the store/deployment collaborator traits, the per-thread
//! execution context, and the error taxonomy. [`fsmstress_harness`] holds
//! the moving parts: the single-workload walk, the composer, the cluster
//! handle, the thread manager, and the runner. This facade re-exports the
//! surface a workload author needs.

pub use fsmstress_core::{
    extend, normalize, AssertionStrictness, ClusterError, CompositionError, ConfigError,
    Deployment, Document, Filter, HarnessError, Namespace, RawWorkload, Result, RunResult,
    StateContext, Store, StoreError, StoreResult, TeardownFailure, ThreadData, UpdateSpec, Workload,
    WorkloadError, WorkloadFailure, WriteOutcome,
};
pub use fsmstress_harness::{
    Cluster, ClusterOptions, ExecutionMode, NamedWorkload, Runner, RunnerOptions, Topology,
};

/// In-memory store and deployment collaborators for tests
pub mod testing {
    pub use fsmstress_core::testing::{MemDeployment, MemStore};
}
