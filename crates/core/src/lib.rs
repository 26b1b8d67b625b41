//! Core types and traits for fsmstress
//!
//! This crate defines the foundations shared by the harness:
//! - Workload definitions and the config normalizer
//! - The store/deployment collaborator contracts
//! - Per-thread execution context (thread data, assertion strictness)
//! - The error taxonomy
//! - In-memory test collaborators

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod error;
pub mod store;
pub mod testing;

// Re-export commonly used types at the crate root
pub use config::{extend, normalize, HookFn, RawWorkload, StateFn, TransitionRow, Workload};
pub use context::{AssertionStrictness, StateContext, ThreadData};
pub use error::{
    ClusterError, CompositionError, ConfigError, HarnessError, Result, RunResult, StoreError,
    StoreResult, TeardownFailure, WorkloadError, WorkloadFailure,
};
pub use store::{Deployment, Document, Filter, Namespace, Store, UpdateSpec, WriteOutcome};
