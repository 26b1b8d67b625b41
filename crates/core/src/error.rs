//! Error types for the stress harness
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Per-thread runtime failures are deliberately NOT part of the error
//! hierarchy: a worker thread converts them into a [`WorkloadFailure`] value
//! and returns it, so sibling threads are unaffected and the parent can join
//! every thread unconditionally.

use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, HarnessError>;

/// Result type alias for store collaborator operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// The structured outcome a worker thread hands back to its parent
pub type RunResult = std::result::Result<(), WorkloadFailure>;

/// Top-level error type for the harness
///
/// Setup-time and validation errors propagate immediately and abort the run
/// before any thread is spawned. Per-thread failures are aggregated into a
/// single [`HarnessError::ThreadsFailed`] raised after all teardown ran.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// Malformed workload config or invalid orchestration options
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An operation was invoked on the thread manager out of sequence
    #[error("thread manager used out of sequence: {0}")]
    Lifecycle(&'static str),

    /// Insufficient connections/threads available for the requested load
    #[error("insufficient resources: {0}")]
    Resource(String),

    /// More than the allowed fraction of threads failed to reach the barrier
    #[error(
        "{failed} of {total} worker threads failed to start \
         (allowed fraction {allowed}) - aborting"
    )]
    TooManyFailures {
        /// Threads that failed before reaching the start barrier
        failed: usize,
        /// Total threads spawned for this schedule entry
        total: usize,
        /// The configured failure fraction that was exceeded
        allowed: f64,
    },

    /// Fewer than two workloads supplied to the composer
    #[error(transparent)]
    Composition(#[from] CompositionError),

    /// Cluster topology or routing error
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// Store collaborator error outside thread context (setup/namespace prep)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A workload's setup hook threw; aborts the entry before any thread
    /// is spawned (teardown of already-started workloads still runs)
    #[error("workload {workload:?} setup failed: {message}")]
    SetupFailed {
        /// Name of the workload whose setup threw
        workload: String,
        /// Failure message
        message: String,
    },

    /// Aggregated per-thread failure report
    ///
    /// The message already groups identical failure signatures with
    /// frequency counts.
    #[error("{0}")]
    ThreadsFailed(String),

    /// The aggregated report exceeded the log-line budget
    #[error("failure report would have been snipped, see logs")]
    ReportTruncated,

    /// One or more workload teardowns threw; logged and deferred
    #[error("{} workload teardown(s) threw an exception, see logs", .0.len())]
    TeardownFailed(Vec<TeardownFailure>),
}

/// Validation errors for workload definitions and orchestration options
///
/// All of these fail fast, before any thread is spawned.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// A key outside the workload definition allow-list was present
    #[error("unknown top-level key: {0:?}")]
    UnknownKey(String),

    /// A required field was absent
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A numeric field was zero or otherwise not a positive integer
    #[error("{field} must be a positive integer, got {value}")]
    NotPositive {
        /// Field name
        field: &'static str,
        /// Offending value
        value: u64,
    },

    /// The workload defined no states
    #[error("workload defines no states")]
    EmptyStates,

    /// The start state is not present in the state map
    #[error("start state {0:?} is not defined in states")]
    UnknownStartState(String),

    /// A transition source state is not present in the state map
    #[error("transition source state {0:?} is not defined in states")]
    UnknownSourceState(String),

    /// A transition destination state is not present in the state map
    #[error("transition {from:?} -> {to:?} references an undefined state")]
    UnknownDestinationState {
        /// Source state of the dangling edge
        from: String,
        /// Undefined destination state
        to: String,
    },

    /// A state's weight map was empty
    #[error("state {0:?} has an empty transition table")]
    EmptyTransition(String),

    /// A transition weight was negative or not a finite number
    #[error("transition {from:?} -> {to:?} has invalid weight {weight}")]
    InvalidWeight {
        /// Source state
        from: String,
        /// Destination state
        to: String,
        /// Offending weight
        weight: f64,
    },

    /// All outgoing weights from a state were zero
    #[error("total outgoing weight from state {0:?} is zero")]
    ZeroTotalWeight(String),

    /// A state reachable from the start state has no outgoing transitions
    #[error("state {0:?} is reachable from the start state but has no outgoing transitions")]
    ReachableDeadEnd(String),

    /// `composed` and `parallel` requested together
    #[error("'composed' and 'parallel' cannot both be requested")]
    ConflictingModes,

    /// No workloads left to run after filtering
    #[error("need at least one workload to run")]
    NoWorkloads,

    /// Two workloads in the same run share a name
    #[error("duplicate workload name: {0:?}")]
    DuplicateWorkload(String),

    /// The thread-manager cap was not a positive integer
    #[error("the maximum allowed threads must be a positive integer")]
    InvalidThreadCap,
}

/// Errors from composing multiple workloads into one interleaved walk
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CompositionError {
    /// Composition requires at least two workloads
    #[error("need at least two workloads to compose, got {0}")]
    NotEnoughWorkloads(usize),

    /// Composed workloads must agree on the target namespace
    #[error("composed workloads target different namespaces: {expected:?} vs {found:?}")]
    NamespaceMismatch {
        /// Namespace of the first workload
        expected: String,
        /// Conflicting namespace
        found: String,
    },

    /// A workload had no valid cross-workload jump targets
    #[error("workload {0:?} has no other-workload states to jump to")]
    NoJumpTargets(String),
}

/// Errors from the cluster handle
#[derive(Debug, Error)]
pub enum ClusterError {
    /// A sharding operation was requested on a non-sharded topology
    #[error("cluster is not sharded")]
    NotSharded,

    /// The cluster was used before `setup` ran (or after teardown)
    #[error("cluster is not initialized")]
    NotInitialized,

    /// The underlying deployment reported an error
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors reported by the store collaborator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    /// A connection to the deployment could not be established
    #[error("connection failed: {0}")]
    Connection(String),

    /// The backend rejected or failed an operation
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors raised inside a state, setup, or teardown function
///
/// These abort the walk for the current thread only; the worker entry point
/// converts them into a [`WorkloadFailure`] result.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// An invariant check failed
    #[error("check failed: {0}")]
    CheckFailed(String),

    /// A store operation failed mid-walk
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The walk landed on a state with no transition row
    #[error("state {0:?} has no outgoing transitions")]
    NoTransitions(String),

    /// Cross-workload composition failed mid-walk
    #[error(transparent)]
    Composition(#[from] CompositionError),

    /// Thread-local data was missing or of the wrong shape
    #[error("thread data error: {0}")]
    Data(String),
}

impl WorkloadError {
    /// Convenience constructor for failed invariant checks
    pub fn check(msg: impl Into<String>) -> Self {
        WorkloadError::CheckFailed(msg.into())
    }
}

/// Structured failure of a single worker thread
///
/// Carries enough context to group identical failures across threads:
/// the `trace` (or `message` when no trace is available) is the grouping
/// signature used by the runner's report.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadFailure {
    /// Globally unique thread id of the failed worker
    pub tid: usize,
    /// Name of the workload the thread was executing
    pub workload: String,
    /// Human-readable failure message
    pub message: String,
    /// Debug rendering of the failure, used as the grouping signature
    pub trace: String,
}

impl WorkloadFailure {
    /// Build a failure result from a workload error
    pub fn from_error(tid: usize, workload: impl Into<String>, err: &WorkloadError) -> Self {
        WorkloadFailure {
            tid,
            workload: workload.into(),
            message: err.to_string(),
            trace: format!("{err:?}"),
        }
    }

    /// The signature used to group identical failures in the report
    pub fn signature(&self) -> &str {
        if self.trace.is_empty() {
            &self.message
        } else {
            &self.trace
        }
    }
}

impl std::fmt::Display for WorkloadFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "thread {} ({}) failed: {}",
            self.tid, self.workload, self.message
        )
    }
}

/// A workload teardown that threw; recorded and deferred, never fatal
/// until every other teardown has been attempted
#[derive(Debug, Clone, PartialEq)]
pub struct TeardownFailure {
    /// Name of the workload whose teardown threw
    pub workload: String,
    /// Failure message
    pub message: String,
}
