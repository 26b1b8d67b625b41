//! Worker thread lifecycle for one schedule entry
//!
//! [`ThreadManager`] owns sizing, spawning, the start barrier, startup
//! failure detection, and joining. It is a strict two-state machine:
//! `init` moves it to initialized, `join_all` moves it back, and every
//! other operation demands the right state up front.

use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use fsmstress_core::config::RawWorkload;
use fsmstress_core::context::AssertionStrictness;
use fsmstress_core::error::{
    ConfigError, HarnessError, Result, RunResult, WorkloadFailure,
};
use fsmstress_core::store::{Document, Namespace, Store};

use crate::cluster::ConnectionPool;
use crate::sync::CountDownLatch;
use crate::worker::{thread_main, WorkerTask, WorkloadSeed};

/// Poll interval while waiting for workers to reach the start barrier
const CHECK_INTERVAL: Duration = Duration::from_millis(20);

/// Which run callback worker threads hand off to after the barrier
#[derive(Clone, Copy)]
pub enum RunMode {
    /// One workload per thread, plain weighted walk
    Single,
    /// Every thread interleaves all workloads
    Composed {
        /// Per-transition probability of jumping between workloads
        compose_prob: f64,
        /// Walk length override
        iterations: Option<u64>,
    },
}

/// One workload scheduled into a batch, with its requested thread count
/// and the setup-mutated data copy its threads receive
pub struct WorkloadEntry {
    /// Workload name
    pub name: String,
    /// The raw definition each thread normalizes for itself
    pub raw: RawWorkload,
    /// Target namespace
    pub ns: Namespace,
    /// Thread-local data seed, including mutations made by `setup`
    pub data: Document,
    /// Requested thread count, before any scale-down
    pub thread_count: usize,
}

struct Worker {
    tid: usize,
    workload: String,
    handle: JoinHandle<RunResult>,
    failed_early: Arc<AtomicBool>,
    conn: Arc<dyn Store>,
}

struct Batch {
    entries: Vec<WorkloadEntry>,
    thread_counts: Vec<usize>,
    total: usize,
    latch: Arc<CountDownLatch>,
    workers: Vec<Worker>,
    pool: Option<Arc<ConnectionPool>>,
}

enum State {
    Uninitialized,
    Initialized(Batch),
}

/// Owns the worker threads of one schedule entry
pub struct ThreadManager {
    mode: RunMode,
    strictness: AssertionStrictness,
    run_rng: StdRng,
    state: State,
}

impl ThreadManager {
    /// Create a manager for one schedule entry
    ///
    /// Per-thread RNG seeds are drawn from `run_seed` in spawn order, so a
    /// run is reproducible from its seed alone.
    pub fn new(mode: RunMode, strictness: AssertionStrictness, run_seed: u64) -> Self {
        ThreadManager {
            mode,
            strictness,
            run_rng: StdRng::seed_from_u64(run_seed),
            state: State::Uninitialized,
        }
    }

    /// Whether a batch is currently initialized
    pub fn is_initialized(&self) -> bool {
        matches!(self.state, State::Initialized(_))
    }

    /// Total threads in the current batch after scaling (0 when
    /// uninitialized)
    pub fn total_threads(&self) -> usize {
        match &self.state {
            State::Initialized(batch) => batch.total,
            State::Uninitialized => 0,
        }
    }

    /// Per-workload thread counts after scaling (empty when uninitialized)
    pub fn thread_counts(&self) -> Vec<usize> {
        match &self.state {
            State::Initialized(batch) => batch.thread_counts.clone(),
            State::Uninitialized => Vec::new(),
        }
    }

    /// Size the batch, scaling thread counts down to fit the cap
    ///
    /// When the summed request exceeds `max_allowed_threads`, every
    /// workload's count is scaled proportionally (floor, clamped to at
    /// least 1 so no workload is starved to zero threads). If the clamped
    /// sum still exceeds the cap there are simply too many workloads for
    /// the budget.
    pub fn init(
        &mut self,
        entries: Vec<WorkloadEntry>,
        max_allowed_threads: usize,
    ) -> Result<()> {
        if max_allowed_threads == 0 {
            return Err(ConfigError::InvalidThreadCap.into());
        }
        if self.is_initialized() {
            return Err(HarnessError::Lifecycle("init called on an initialized manager"));
        }

        let requested: usize = entries.iter().map(|entry| entry.thread_count).sum();
        let mut thread_counts: Vec<usize> =
            entries.iter().map(|entry| entry.thread_count).collect();

        if requested > max_allowed_threads {
            let factor = max_allowed_threads as f64 / requested as f64;
            for count in &mut thread_counts {
                *count = (((*count as f64) * factor).floor() as usize).max(1);
            }
            let scaled: usize = thread_counts.iter().sum();
            info!(requested, scaled, cap = max_allowed_threads, "scaled thread counts down");
            if scaled > max_allowed_threads {
                return Err(HarnessError::Resource(format!(
                    "{} workloads need at least {scaled} threads, cap is {max_allowed_threads}",
                    entries.len()
                )));
            }
        }

        let total = thread_counts.iter().sum();
        self.state = State::Initialized(Batch {
            entries,
            thread_counts,
            total,
            latch: Arc::new(CountDownLatch::new(total)),
            workers: Vec::with_capacity(total),
            pool: None,
        });
        Ok(())
    }

    /// Spawn every worker thread, one checked-out connection each
    ///
    /// Thread ids are assigned strictly increasing from 0 in spawn order.
    pub fn spawn_all(&mut self, pool: &Arc<ConnectionPool>) -> Result<()> {
        let mode = self.mode;
        let strictness = self.strictness;
        let batch = match &mut self.state {
            State::Initialized(batch) => batch,
            State::Uninitialized => {
                return Err(HarnessError::Lifecycle("spawn_all before init"));
            }
        };
        if !batch.workers.is_empty() {
            return Err(HarnessError::Lifecycle("spawn_all called twice"));
        }
        if pool.available() < batch.total {
            return Err(HarnessError::Resource(format!(
                "batch needs {} connections, pool has {}",
                batch.total,
                pool.available()
            )));
        }

        // Record the pool up front so join_all can release connections even
        // after a mid-spawn failure.
        batch.pool = Some(Arc::clone(pool));

        let all_seeds: Vec<WorkloadSeed> = batch
            .entries
            .iter()
            .map(|entry| WorkloadSeed {
                name: entry.name.clone(),
                raw: entry.raw.clone(),
                ns: entry.ns.clone(),
                data: entry.data.clone(),
            })
            .collect();

        let mut tid = 0;
        for (idx, &count) in batch.thread_counts.iter().enumerate() {
            for _ in 0..count {
                let conn = pool.acquire().ok_or_else(|| {
                    HarnessError::Resource("connection pool exhausted mid-spawn".to_string())
                })?;
                let failed_early = Arc::new(AtomicBool::new(false));

                // Composed batches hand every thread the full workload set;
                // single-workload batches hand each thread only its own.
                let (workloads, primary) = match mode {
                    RunMode::Single => (vec![all_seeds[idx].clone()], 0),
                    RunMode::Composed { .. } => (all_seeds.clone(), idx),
                };

                let task = WorkerTask {
                    tid,
                    seed: self.run_rng.gen(),
                    workloads,
                    primary,
                    strictness,
                    latch: Arc::clone(&batch.latch),
                    failed_early: Arc::clone(&failed_early),
                    conn: Arc::clone(&conn),
                    mode,
                };

                let handle = thread::Builder::new()
                    .name(format!("fsm-worker-{tid}"))
                    .spawn(move || thread_main(task));
                let handle = match handle {
                    Ok(handle) => handle,
                    Err(err) => {
                        // Unspawned slots will never signal; drain them so
                        // already-running workers are not deadlocked on the
                        // barrier before join_all cleans up.
                        pool.release(conn);
                        for _ in batch.workers.len()..batch.total {
                            batch.latch.count_down();
                        }
                        return Err(HarnessError::Resource(format!(
                            "failed to spawn worker thread {tid}: {err}"
                        )));
                    }
                };

                batch.workers.push(Worker {
                    tid,
                    workload: batch.entries[idx].name.clone(),
                    handle,
                    failed_early,
                    conn,
                });
                tid += 1;
            }
        }

        info!(threads = batch.total, "spawned worker batch");
        Ok(())
    }

    /// Wait for every thread to reach the start barrier, erroring when too
    /// many failed to start
    ///
    /// Failed threads still count the latch down (via their release guard),
    /// so this polls the latch rather than joining anything. The fraction
    /// bound keeps cascading startup failures (connection limits and the
    /// like) from silently degrading coverage.
    pub fn check_failed(&self, allowed_failure_fraction: f64) -> Result<()> {
        let batch = match &self.state {
            State::Initialized(batch) => batch,
            State::Uninitialized => {
                return Err(HarnessError::Lifecycle("check_failed before init"));
            }
        };
        if batch.workers.len() != batch.total {
            return Err(HarnessError::Lifecycle("check_failed before spawn_all"));
        }

        while batch.latch.count() > 0 {
            thread::sleep(CHECK_INTERVAL);
        }

        let failed = batch
            .workers
            .iter()
            .filter(|worker| worker.failed_early.load(Ordering::SeqCst))
            .count();
        if failed as f64 > allowed_failure_fraction * batch.total as f64 {
            warn!(failed, total = batch.total, "too many workers failed to start");
            return Err(HarnessError::TooManyFailures {
                failed,
                total: batch.total,
                allowed: allowed_failure_fraction,
            });
        }
        Ok(())
    }

    /// Join every thread, release its connection, and reset to
    /// uninitialized; returns the per-thread failures (empty on success)
    pub fn join_all(&mut self) -> Result<Vec<WorkloadFailure>> {
        let batch = match mem::replace(&mut self.state, State::Uninitialized) {
            State::Initialized(batch) => batch,
            State::Uninitialized => {
                return Err(HarnessError::Lifecycle("join_all before init"));
            }
        };

        let mut failures = Vec::new();
        for worker in batch.workers {
            match worker.handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => failures.push(failure),
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "worker thread panicked".to_string());
                    failures.push(WorkloadFailure {
                        tid: worker.tid,
                        workload: worker.workload,
                        trace: format!("panic: {message}"),
                        message,
                    });
                }
            }
            if let Some(pool) = &batch.pool {
                pool.release(worker.conn);
            }
        }
        Ok(failures)
    }
}
