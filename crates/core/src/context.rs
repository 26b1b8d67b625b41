//! Per-thread execution context for state functions
//!
//! The original design of this kind of harness tends to accumulate ambient
//! globals: a process-wide assertion level, an implicit RNG, a shared `data`
//! object. Here those are explicit values threaded through every state
//! invocation: [`AssertionStrictness`], [`ThreadData`], and [`StateContext`].

use rand::rngs::StdRng;
use serde_json::Value;

use crate::error::WorkloadError;
use crate::store::{Document, Namespace, Store};

/// How strict invariant checks may be, given the current namespace sharing
///
/// When every workload owns its collection, state functions may assert exact
/// invariants. Once workloads share a collection, only invariants that hold
/// under concurrent interference from other workloads may be asserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssertionStrictness {
    /// Each workload owns its own database and collection
    Isolated,
    /// Workloads share a database but own their collections
    SharedDb,
    /// Workloads share a collection; only interference-tolerant checks run
    SharedCollection,
}

impl AssertionStrictness {
    /// Derive the strictness level from the isolation flags
    pub fn for_isolation(same_db: bool, same_collection: bool) -> Self {
        if same_collection {
            AssertionStrictness::SharedCollection
        } else if same_db {
            AssertionStrictness::SharedDb
        } else {
            AssertionStrictness::Isolated
        }
    }

    /// Whether checks assuming collection ownership are enforced
    pub fn owns_collection(self) -> bool {
        !matches!(self, AssertionStrictness::SharedCollection)
    }

    /// Whether checks assuming database ownership are enforced
    pub fn owns_database(self) -> bool {
        matches!(self, AssertionStrictness::Isolated)
    }
}

/// Thread-local workload state: the `data` seed deep-copied per thread,
/// plus the thread id assigned at spawn time
#[derive(Debug, Clone)]
pub struct ThreadData {
    /// Globally unique zero-based thread id
    pub tid: usize,
    /// Mutable key/value state owned by this thread
    pub values: Document,
}

impl ThreadData {
    /// Create thread data from a merged `data` map
    pub fn new(tid: usize, values: Document) -> Self {
        ThreadData { tid, values }
    }

    /// Read an integer field, failing if absent or not a number
    pub fn get_i64(&self, key: &str) -> Result<i64, WorkloadError> {
        self.values
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| WorkloadError::Data(format!("missing integer field {key:?}")))
    }

    /// Overwrite a field
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Add to an integer field, treating a missing field as 0
    pub fn add_i64(&mut self, key: &str, by: i64) {
        let current = self.values.get(key).and_then(Value::as_i64).unwrap_or(0);
        self.values.insert(key.to_string(), Value::from(current + by));
    }
}

/// Everything a state function may touch during one invocation
///
/// State functions across workloads never share thread data, only the
/// namespace and store handle.
pub struct StateContext<'a> {
    /// Connection to the shared store
    pub store: &'a dyn Store,
    /// Target namespace for this thread
    pub ns: &'a Namespace,
    /// This thread's merged workload data
    pub data: &'a mut ThreadData,
    /// Current run-wide strictness level
    pub strictness: AssertionStrictness,
    /// Thread-local random stream, seeded by the manager
    pub rng: &'a mut StdRng,
}

impl StateContext<'_> {
    /// Check an invariant that must hold regardless of namespace sharing
    pub fn check_always(&self, cond: bool, msg: impl Into<String>) -> Result<(), WorkloadError> {
        if cond {
            Ok(())
        } else {
            Err(WorkloadError::check(msg))
        }
    }

    /// Check an invariant that only holds when this workload owns its
    /// collection; skipped under shared-collection interference
    pub fn check_when_own_coll(
        &self,
        cond: bool,
        msg: impl Into<String>,
    ) -> Result<(), WorkloadError> {
        if !self.strictness.owns_collection() || cond {
            Ok(())
        } else {
            Err(WorkloadError::check(msg))
        }
    }

    /// Check an invariant that only holds when this workload owns its
    /// database
    pub fn check_when_own_db(
        &self,
        cond: bool,
        msg: impl Into<String>,
    ) -> Result<(), WorkloadError> {
        if !self.strictness.owns_database() || cond {
            Ok(())
        } else {
            Err(WorkloadError::check(msg))
        }
    }
}
