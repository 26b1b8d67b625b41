//! FSM-based concurrency test orchestration
//!
//! This crate drives multiple state-machine workloads against a shared
//! deployment: sizing and spawning worker threads, synchronizing their
//! start, interleaving workloads when composing, and reporting every
//! per-thread failure as one combined result.
//!
//! The pieces, leaves first:
//! - [`sync`]: the countdown latch used as the start barrier
//! - [`fsm`]: a single workload's weighted random walk
//! - [`composer`]: interleaving several workloads on one thread
//! - [`cluster`]: deployment handle and connection pool
//! - [`thread_mgr`]: worker thread lifecycle for one schedule entry
//! - [`runner`]: scheduling, namespace isolation, setup/teardown, reporting

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod composer;
pub mod fsm;
pub mod runner;
pub mod sync;
pub mod thread_mgr;
mod worker;

pub use cluster::{Cluster, ClusterOptions, ConnectionPool, Topology};
pub use runner::{ExecutionMode, NamedWorkload, Runner, RunnerOptions};
pub use sync::CountDownLatch;
pub use thread_mgr::{RunMode, ThreadManager, WorkloadEntry};
