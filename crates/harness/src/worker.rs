//! Worker thread entry point
//!
//! Each spawned thread runs [`thread_main`]: build the per-thread workload
//! views, signal the start barrier, wait for every peer, then hand off to
//! the single-workload walk or the composer. Failures never unwind out of
//! here; they come back as a [`RunResult`] value so the parent can join
//! every thread unconditionally.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::debug;

use fsmstress_core::config::{normalize, RawWorkload};
use fsmstress_core::context::{AssertionStrictness, ThreadData};
use fsmstress_core::error::{RunResult, WorkloadError, WorkloadFailure};
use fsmstress_core::store::{Document, Namespace, Store};

use crate::composer::run_interleaved;
use crate::fsm::{run_walk, ThreadWorkload};
use crate::sync::CountDownLatch;
use crate::thread_mgr::RunMode;

/// One workload definition handed to a thread, with the setup-mutated
/// `data` copy from the parent
#[derive(Clone)]
pub struct WorkloadSeed {
    /// Workload name
    pub name: String,
    /// The raw definition; each thread normalizes its own deep copy
    pub raw: RawWorkload,
    /// Target namespace
    pub ns: Namespace,
    /// Thread-local data seed, including mutations made by `setup`
    pub data: Document,
}

/// Everything one worker thread needs
pub struct WorkerTask {
    /// Globally unique zero-based thread id
    pub tid: usize,
    /// Seed for this thread's random stream
    pub seed: u64,
    /// All workloads this thread may execute
    pub workloads: Vec<WorkloadSeed>,
    /// Index into `workloads` of the workload this thread belongs to
    pub primary: usize,
    /// Run-wide assertion strictness
    pub strictness: AssertionStrictness,
    /// Start barrier shared with every peer thread
    pub latch: Arc<CountDownLatch>,
    /// Set when this thread fails before reaching the barrier
    pub failed_early: Arc<AtomicBool>,
    /// This thread's checked-out connection
    pub conn: Arc<dyn Store>,
    /// Single walk or composed interleaving
    pub mode: RunMode,
}

/// Signals the latch on drop, so a failing pre-barrier path still releases
/// peer threads instead of deadlocking the whole batch
struct LatchGuard {
    latch: Arc<CountDownLatch>,
    armed: bool,
}

impl LatchGuard {
    fn new(latch: Arc<CountDownLatch>) -> Self {
        LatchGuard { latch, armed: true }
    }

    /// Signal arrival on the success path
    fn signal(mut self) {
        self.armed = false;
        self.latch.count_down();
    }
}

impl Drop for LatchGuard {
    fn drop(&mut self) {
        if self.armed {
            self.latch.count_down();
        }
    }
}

/// Normalize each seed and merge its data for this thread
///
/// Merge order: the normalized defaults first, then the parent-passed copy
/// on top, so mutations made by `setup` win over the static defaults.
fn build_views(task: &WorkerTask) -> Result<Vec<ThreadWorkload>, WorkloadError> {
    task.workloads
        .iter()
        .map(|seed| {
            let config = normalize(&seed.raw)
                .map_err(|err| WorkloadError::Data(format!("{}: {err}", seed.name)))?;

            let mut merged = config.data.clone();
            for (key, value) in &seed.data {
                merged.insert(key.clone(), value.clone());
            }

            Ok(ThreadWorkload {
                name: seed.name.clone(),
                ns: seed.ns.clone(),
                start_state: config.start_state,
                states: config.states,
                transitions: config.transitions,
                iterations: config.iterations,
                data: ThreadData::new(task.tid, merged),
            })
        })
        .collect()
}

/// The function every worker thread executes
pub fn thread_main(task: WorkerTask) -> RunResult {
    let guard = LatchGuard::new(Arc::clone(&task.latch));

    let mut views = match build_views(&task) {
        Ok(views) => views,
        Err(err) => {
            task.failed_early.store(true, Ordering::SeqCst);
            let name = task.workloads[task.primary].name.clone();
            // guard drops here and releases the peers
            return Err(WorkloadFailure::from_error(task.tid, name, &err));
        }
    };

    guard.signal();
    task.latch.wait();
    debug!(tid = task.tid, "worker released from start barrier");

    let mut rng = StdRng::seed_from_u64(task.seed);
    let outcome = match task.mode {
        RunMode::Single => run_walk(
            &mut views[task.primary],
            task.conn.as_ref(),
            task.strictness,
            &mut rng,
        ),
        RunMode::Composed {
            compose_prob,
            iterations,
        } => run_interleaved(
            &mut views,
            task.conn.as_ref(),
            task.strictness,
            &mut rng,
            compose_prob,
            iterations,
        ),
    };

    outcome.map_err(|err| {
        WorkloadFailure::from_error(task.tid, views[task.primary].name.clone(), &err)
    })
}
