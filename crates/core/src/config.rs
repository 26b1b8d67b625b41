//! Workload definitions and normalization
//!
//! A workload is a self-contained FSM-based test scenario: states,
//! weighted transitions, setup/teardown hooks, and a thread count.
//! [`RawWorkload`] is the author-facing definition with optional fields;
//! [`normalize`] validates it and produces a fully-defaulted, deep-copied
//! [`Workload`]. Normalization is pure and idempotent.
//!
//! Derived workloads are built with [`extend`]: explicit composition of a
//! deep-copied child with the normalized parent passed as a plain value,
//! never mutation of a shared base.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;

use crate::context::StateContext;
use crate::error::{ConfigError, WorkloadError};
use crate::store::{Document, Namespace, Store};

/// Default start state when a workload does not name one
pub const DEFAULT_START_STATE: &str = "init";

/// A state handler, invoked with the thread's execution context
///
/// The (store, namespace) parameter shape is enforced by this signature, so
/// normalization never has to inspect arity the way a dynamic host would.
pub type StateFn =
    Arc<dyn Fn(&mut StateContext<'_>) -> Result<(), WorkloadError> + Send + Sync>;

/// A setup/teardown hook, run once per schedule entry outside thread context
///
/// Hooks receive the workload's own `data` map; mutations made during setup
/// are visible to the threads that later run.
pub type HookFn =
    Arc<dyn Fn(&dyn Store, &Namespace, &mut Document) -> Result<(), WorkloadError> + Send + Sync>;

/// Weighted outgoing edges from one state
pub type TransitionRow = BTreeMap<String, f64>;

/// An author-facing workload definition
///
/// Every field the normalizer defaults is optional here. The `extras` map
/// exists so loaders can carry unrecognized top-level keys into
/// normalization, where they are rejected; the allow-list is exactly the
/// named fields of this struct.
#[derive(Clone, Default)]
pub struct RawWorkload {
    /// Number of worker threads to run this workload
    pub thread_count: Option<usize>,
    /// Number of state transitions per thread
    pub iterations: Option<u64>,
    /// Name of the state each thread starts in
    pub start_state: Option<String>,
    /// State name to handler
    pub states: BTreeMap<String, StateFn>,
    /// State name to weighted successor states
    pub transitions: BTreeMap<String, TransitionRow>,
    /// Run once before threads spawn
    pub setup: Option<HookFn>,
    /// Run once after threads join
    pub teardown: Option<HookFn>,
    /// Thread-local state seed, deep-copied per thread
    pub data: Document,
    /// Unrecognized top-level keys; rejected by the normalizer
    pub extras: BTreeMap<String, Value>,
}

impl RawWorkload {
    /// Start an empty definition
    pub fn new() -> Self {
        RawWorkload::default()
    }

    /// Set the thread count
    pub fn thread_count(mut self, n: usize) -> Self {
        self.thread_count = Some(n);
        self
    }

    /// Set the per-thread iteration count
    pub fn iterations(mut self, n: u64) -> Self {
        self.iterations = Some(n);
        self
    }

    /// Name the start state (defaults to `"init"`)
    pub fn start_state(mut self, name: impl Into<String>) -> Self {
        self.start_state = Some(name.into());
        self
    }

    /// Add a state handler
    pub fn state<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut StateContext<'_>) -> Result<(), WorkloadError> + Send + Sync + 'static,
    {
        self.states.insert(name.into(), Arc::new(f));
        self
    }

    /// Add a weighted transition edge
    pub fn transition(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        weight: f64,
    ) -> Self {
        self.transitions
            .entry(from.into())
            .or_default()
            .insert(to.into(), weight);
        self
    }

    /// Set the setup hook
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Store, &Namespace, &mut Document) -> Result<(), WorkloadError>
            + Send
            + Sync
            + 'static,
    {
        self.setup = Some(Arc::new(f));
        self
    }

    /// Set the teardown hook
    pub fn teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn Store, &Namespace, &mut Document) -> Result<(), WorkloadError>
            + Send
            + Sync
            + 'static,
    {
        self.teardown = Some(Arc::new(f));
        self
    }

    /// Seed a thread-local data field
    pub fn data_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Carry an unrecognized top-level key (rejected by the normalizer)
    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extras.insert(key.into(), value);
        self
    }
}

impl std::fmt::Debug for RawWorkload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawWorkload")
            .field("thread_count", &self.thread_count)
            .field("iterations", &self.iterations)
            .field("start_state", &self.start_state)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("transitions", &self.transitions)
            .field("data", &self.data)
            .field("extras", &self.extras)
            .finish()
    }
}

/// A fully-defaulted, validated workload
#[derive(Clone)]
pub struct Workload {
    /// Number of worker threads to run this workload
    pub thread_count: usize,
    /// Number of state transitions per thread
    pub iterations: u64,
    /// Name of the state each thread starts in
    pub start_state: String,
    /// State name to handler
    pub states: BTreeMap<String, StateFn>,
    /// State name to weighted successor states
    pub transitions: BTreeMap<String, TransitionRow>,
    /// Run once before threads spawn
    pub setup: HookFn,
    /// Run once after threads join
    pub teardown: HookFn,
    /// Thread-local state seed, deep-copied per thread
    pub data: Document,
}

impl Workload {
    /// Convert back into a raw definition
    ///
    /// `normalize(config.to_raw())` is equivalent to `config`; this is what
    /// makes normalization idempotent, and it is also the deep-copy step of
    /// [`extend`].
    pub fn to_raw(&self) -> RawWorkload {
        RawWorkload {
            thread_count: Some(self.thread_count),
            iterations: Some(self.iterations),
            start_state: Some(self.start_state.clone()),
            states: self.states.clone(),
            transitions: self.transitions.clone(),
            setup: Some(Arc::clone(&self.setup)),
            teardown: Some(Arc::clone(&self.teardown)),
            data: self.data.clone(),
            extras: BTreeMap::new(),
        }
    }
}

impl std::fmt::Debug for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workload")
            .field("thread_count", &self.thread_count)
            .field("iterations", &self.iterations)
            .field("start_state", &self.start_state)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("transitions", &self.transitions)
            .field("data", &self.data)
            .finish()
    }
}

fn no_op_hook() -> HookFn {
    Arc::new(|_store, _ns, _data| Ok(()))
}

/// Validate a raw definition and fill in defaults
///
/// Pure and side-effect-free: the input is never mutated, and every map is
/// deep-copied into the result so a base config and its derived configs
/// cannot cross-contaminate.
pub fn normalize(raw: &RawWorkload) -> Result<Workload, ConfigError> {
    if let Some(key) = raw.extras.keys().next() {
        return Err(ConfigError::UnknownKey(key.clone()));
    }

    let thread_count = raw
        .thread_count
        .ok_or(ConfigError::MissingField("thread_count"))?;
    if thread_count == 0 {
        return Err(ConfigError::NotPositive {
            field: "thread_count",
            value: 0,
        });
    }

    let iterations = raw
        .iterations
        .ok_or(ConfigError::MissingField("iterations"))?;
    if iterations == 0 {
        return Err(ConfigError::NotPositive {
            field: "iterations",
            value: 0,
        });
    }

    if raw.states.is_empty() {
        return Err(ConfigError::EmptyStates);
    }

    let start_state = raw
        .start_state
        .clone()
        .unwrap_or_else(|| DEFAULT_START_STATE.to_string());
    if !raw.states.contains_key(&start_state) {
        return Err(ConfigError::UnknownStartState(start_state));
    }

    for (from, row) in &raw.transitions {
        if !raw.states.contains_key(from) {
            return Err(ConfigError::UnknownSourceState(from.clone()));
        }
        if row.is_empty() {
            return Err(ConfigError::EmptyTransition(from.clone()));
        }

        let mut total = 0.0;
        for (to, &weight) in row {
            if !raw.states.contains_key(to) {
                return Err(ConfigError::UnknownDestinationState {
                    from: from.clone(),
                    to: to.clone(),
                });
            }
            if !weight.is_finite() || weight < 0.0 {
                return Err(ConfigError::InvalidWeight {
                    from: from.clone(),
                    to: to.clone(),
                    weight,
                });
            }
            total += weight;
        }
        if total <= 0.0 {
            return Err(ConfigError::ZeroTotalWeight(from.clone()));
        }
    }

    // Every state reachable from the start state must have an outgoing row,
    // otherwise the walk dead-ends mid-run instead of failing fast here.
    for state in reachable_states(&start_state, &raw.transitions) {
        if !raw.transitions.contains_key(&state) {
            return Err(ConfigError::ReachableDeadEnd(state));
        }
    }

    Ok(Workload {
        thread_count,
        iterations,
        start_state,
        states: raw.states.clone(),
        transitions: raw.transitions.clone(),
        setup: raw.setup.clone().unwrap_or_else(no_op_hook),
        teardown: raw.teardown.clone().unwrap_or_else(no_op_hook),
        data: raw.data.clone(),
    })
}

/// States reachable from `start` following edges with positive weight
fn reachable_states(
    start: &str,
    transitions: &BTreeMap<String, TransitionRow>,
) -> BTreeSet<String> {
    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    seen.insert(start.to_string());
    queue.push_back(start.to_string());

    while let Some(state) = queue.pop_front() {
        if let Some(row) = transitions.get(&state) {
            for (to, &weight) in row {
                if weight > 0.0 && seen.insert(to.clone()) {
                    queue.push_back(to.clone());
                }
            }
        }
    }

    seen
}

/// Derive a new workload from a base definition
///
/// The transform receives a deep copy of the normalized base (the child to
/// modify freely) and the normalized base itself as an explicit parent
/// value. Overriding closures capture the parent's originals from the
/// second argument; there is no hidden delegation chain.
///
/// ```
/// use fsmstress_core::config::{extend, RawWorkload};
/// use std::sync::Arc;
///
/// let base = RawWorkload::new()
///     .thread_count(4)
///     .iterations(10)
///     .state("init", |_ctx| Ok(()))
///     .transition("init", "init", 1.0);
///
/// let derived = extend(&base, |mut child, parent| {
///     let parent_setup = Arc::clone(&parent.setup);
///     child.setup = Some(Arc::new(move |store, ns, data| {
///         parent_setup(store, ns, data)?;
///         data.insert("extended".into(), true.into());
///         Ok(())
///     }));
///     child.thread_count = Some(8);
///     child
/// })
/// .unwrap();
/// assert_eq!(derived.thread_count, Some(8));
/// ```
pub fn extend<F>(base: &RawWorkload, transform: F) -> Result<RawWorkload, ConfigError>
where
    F: FnOnce(RawWorkload, &Workload) -> RawWorkload,
{
    let parent = normalize(base)?;
    let child = parent.to_raw();
    Ok(transform(child, &parent))
}
