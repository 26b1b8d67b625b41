//! Single-workload state machine execution
//!
//! A worker thread's walk is a Monte Carlo traversal: starting from the
//! workload's start state, each iteration invokes the current state's
//! handler and then draws the successor with probability proportional to
//! the transition weights.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::Rng;

use fsmstress_core::config::{StateFn, TransitionRow};
use fsmstress_core::context::{AssertionStrictness, StateContext, ThreadData};
use fsmstress_core::error::WorkloadError;
use fsmstress_core::store::{Namespace, Store};

/// One workload as seen by a single worker thread
///
/// Built by the worker entry point from the normalized config plus this
/// thread's merged data. State functions are only ever invoked with their
/// own workload's data as call context; across workloads they share the
/// namespace and store handle, nothing else.
pub struct ThreadWorkload {
    /// Workload name, for failure attribution
    pub name: String,
    /// Target namespace for this thread
    pub ns: Namespace,
    /// Name of the state the walk begins in
    pub start_state: String,
    /// State name to handler
    pub states: BTreeMap<String, StateFn>,
    /// State name to weighted successor states
    pub transitions: BTreeMap<String, TransitionRow>,
    /// State transitions per thread
    pub iterations: u64,
    /// This thread's merged workload data
    pub data: ThreadData,
}

/// Invoke one state handler with the workload's own data as context
pub fn invoke_state(
    workload: &mut ThreadWorkload,
    state: &str,
    store: &dyn Store,
    strictness: AssertionStrictness,
    rng: &mut StdRng,
) -> Result<(), WorkloadError> {
    let handler = workload
        .states
        .get(state)
        .cloned()
        .ok_or_else(|| WorkloadError::Data(format!("undefined state {state:?}")))?;
    let ns = workload.ns.clone();
    let mut ctx = StateContext {
        store,
        ns: &ns,
        data: &mut workload.data,
        strictness,
        rng,
    };
    handler(&mut ctx)
}

/// Draw the next state with probability proportional to weight
///
/// A single uniform draw is scanned against the cumulative weights, so
/// zero-weight edges are never chosen.
pub fn weighted_choice(row: &TransitionRow, rng: &mut StdRng) -> Result<String, WorkloadError> {
    let total: f64 = row.values().filter(|w| **w > 0.0).sum();
    if total <= 0.0 {
        return Err(WorkloadError::Data(
            "no positive transition weights".to_string(),
        ));
    }

    let mut draw = rng.gen::<f64>() * total;
    let mut last = None;
    for (state, &weight) in row {
        if weight <= 0.0 {
            continue;
        }
        last = Some(state);
        draw -= weight;
        if draw < 0.0 {
            return Ok(state.clone());
        }
    }

    // Floating point slop on the final accumulation lands on the last
    // positive-weight edge.
    last.cloned()
        .ok_or_else(|| WorkloadError::Data("no positive transition weights".to_string()))
}

/// Run one workload's walk to completion
pub fn run_walk(
    workload: &mut ThreadWorkload,
    store: &dyn Store,
    strictness: AssertionStrictness,
    rng: &mut StdRng,
) -> Result<(), WorkloadError> {
    let mut current = workload.start_state.clone();
    for _ in 0..workload.iterations {
        invoke_state(workload, &current, store, strictness, rng)?;

        let row = workload
            .transitions
            .get(&current)
            .ok_or_else(|| WorkloadError::NoTransitions(current.clone()))?;
        current = weighted_choice(row, rng)?;
    }
    Ok(())
}
