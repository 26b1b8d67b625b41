//! Interleaved execution of several workloads on one thread
//!
//! Composition stitches multiple state machines into a single walk: one
//! workload drives at a time, and on each transition the walk either stays
//! inside the driver (following its weighted transitions) or, with a small
//! probability, jumps into a non-start state of another workload. All
//! composed workloads must target the same namespace, since their states
//! interleave over shared documents.

use rand::rngs::StdRng;
use rand::Rng;

use fsmstress_core::context::AssertionStrictness;
use fsmstress_core::error::{CompositionError, WorkloadError};
use fsmstress_core::store::Store;

use crate::fsm::{invoke_state, weighted_choice, ThreadWorkload};

/// Run an interleaved walk over every workload
///
/// `compose_prob` is the per-transition probability of jumping to another
/// workload. `iterations` overrides the walk length; when `None`, the first
/// workload's iteration count is used. Each workload's state functions see
/// only that workload's own thread data.
pub fn run_interleaved(
    workloads: &mut [ThreadWorkload],
    store: &dyn Store,
    strictness: AssertionStrictness,
    rng: &mut StdRng,
    compose_prob: f64,
    iterations: Option<u64>,
) -> Result<(), WorkloadError> {
    if workloads.len() < 2 {
        return Err(CompositionError::NotEnoughWorkloads(workloads.len()).into());
    }

    let expected = workloads[0].ns.clone();
    for workload in workloads.iter().skip(1) {
        if workload.ns != expected {
            return Err(CompositionError::NamespaceMismatch {
                expected: expected.full_name(),
                found: workload.ns.full_name(),
            }
            .into());
        }
    }

    let iterations = iterations.unwrap_or(workloads[0].iterations);

    // A workload's start state may be re-entered by a jump only if some
    // transition leads back to it; otherwise it is an initialization step
    // that runs exactly once.
    let transitions_back: Vec<bool> = workloads
        .iter()
        .map(|workload| {
            workload
                .transitions
                .values()
                .any(|row| row.get(&workload.start_state).is_some_and(|w| *w > 0.0))
        })
        .collect();

    // Per-workload jump lists: every state of every other workload, minus
    // start states that may not be re-entered.
    let jump_targets: Vec<Vec<(usize, String)>> = (0..workloads.len())
        .map(|from| {
            workloads
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != from)
                .flat_map(|(idx, workload)| {
                    let back = transitions_back[idx];
                    let start = &workload.start_state;
                    workload
                        .states
                        .keys()
                        .filter(move |state| back || *state != start)
                        .map(move |state| (idx, state.clone()))
                })
                .collect()
        })
        .collect();

    // One workload drives from its start state; every other workload gets
    // its start state run exactly once so its thread data is primed before
    // the walk can jump into it.
    let driver = rng.gen_range(0..workloads.len());
    for idx in 0..workloads.len() {
        if idx != driver {
            let start = workloads[idx].start_state.clone();
            invoke_state(&mut workloads[idx], &start, store, strictness, rng)?;
        }
    }

    let mut current_workload = driver;
    let mut current_state = workloads[driver].start_state.clone();

    for _ in 0..iterations {
        invoke_state(
            &mut workloads[current_workload],
            &current_state,
            store,
            strictness,
            rng,
        )?;

        if rng.gen::<f64>() >= compose_prob {
            // Stay inside the current workload
            let workload = &workloads[current_workload];
            let row = workload
                .transitions
                .get(&current_state)
                .ok_or_else(|| WorkloadError::NoTransitions(current_state.clone()))?;
            current_state = weighted_choice(row, rng)?;
            continue;
        }

        // Jump to a uniformly chosen state of another workload
        let targets = &jump_targets[current_workload];
        if targets.is_empty() {
            return Err(CompositionError::NoJumpTargets(
                workloads[current_workload].name.clone(),
            )
            .into());
        }

        let (next_workload, next_state) = targets[rng.gen_range(0..targets.len())].clone();
        current_workload = next_workload;
        current_state = next_state;
    }

    Ok(())
}
