//! Top-level run orchestration
//!
//! The runner turns a list of named workloads into a schedule, prepares
//! isolated namespaces, runs setup/teardown hooks outside thread context,
//! drives the thread manager per schedule entry, and folds every
//! per-thread failure into one combined report after all teardown ran.

use std::collections::BTreeSet;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, info};

use fsmstress_core::config::{normalize, RawWorkload, Workload};
use fsmstress_core::context::AssertionStrictness;
use fsmstress_core::error::{
    CompositionError, ConfigError, HarnessError, Result, TeardownFailure, WorkloadFailure,
};
use fsmstress_core::store::{Deployment, Document, Namespace};

use crate::cluster::{Cluster, ClusterOptions};
use crate::thread_mgr::{RunMode, ThreadManager, WorkloadEntry};

/// Size budget for the combined failure report
const MAX_REPORT_BYTES: usize = 10 * 1024;

/// How the scheduled workloads execute relative to each other
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// One workload at a time
    Serial,
    /// All workloads at once, each on its own threads
    Parallel,
    /// All workloads interleaved on every thread
    Composed,
}

impl ExecutionMode {
    /// Resolve the mutually-exclusive mode flags
    pub fn from_flags(composed: bool, parallel: bool) -> std::result::Result<Self, ConfigError> {
        match (composed, parallel) {
            (true, true) => Err(ConfigError::ConflictingModes),
            (true, false) => Ok(ExecutionMode::Composed),
            (false, true) => Ok(ExecutionMode::Parallel),
            (false, false) => Ok(ExecutionMode::Serial),
        }
    }
}

/// Orchestration knobs with the defaults a plain run uses
#[derive(Debug, Clone)]
pub struct RunnerOptions {
    /// Cap on total threads per schedule entry
    pub max_allowed_threads: usize,
    /// Fraction of threads allowed to fail during startup
    pub allowed_failure_fraction: f64,
    /// Per-transition probability of jumping between composed workloads
    pub compose_prob: f64,
    /// Composed walk length; `None` uses the first workload's iterations
    pub compose_iterations: Option<u64>,
    /// Workload names excluded from every run
    pub deny_list: Vec<String>,
}

impl Default for RunnerOptions {
    fn default() -> Self {
        RunnerOptions {
            max_allowed_threads: 100,
            allowed_failure_fraction: 0.2,
            compose_prob: 0.1,
            compose_iterations: None,
            deny_list: Vec::new(),
        }
    }
}

/// A workload definition with the name used in schedules and reports
pub struct NamedWorkload {
    /// Name used for scheduling, filtering, and failure attribution
    pub name: String,
    /// The definition itself
    pub raw: RawWorkload,
}

impl NamedWorkload {
    /// Pair a definition with its name
    pub fn new(name: impl Into<String>, raw: RawWorkload) -> Self {
        NamedWorkload {
            name: name.into(),
            raw,
        }
    }
}

struct Prepared {
    name: String,
    raw: RawWorkload,
    config: Workload,
}

struct Staged {
    name: String,
    raw: RawWorkload,
    config: Workload,
    ns: Namespace,
    data: Document,
    started: bool,
}

/// Hands out fresh namespaces per workload, honoring the sharing flags
struct NamespaceAllocator {
    share_db: bool,
    share_collection: bool,
    next: usize,
}

impl NamespaceAllocator {
    fn new(same_db: bool, same_collection: bool) -> Self {
        NamespaceAllocator {
            // Sharing a collection only makes sense within one database
            share_db: same_db || same_collection,
            share_collection: same_collection,
            next: 0,
        }
    }

    fn next(&mut self) -> Namespace {
        let n = self.next;
        self.next += 1;
        let db = if self.share_db {
            "fsmdb0".to_string()
        } else {
            format!("fsmdb{n}")
        };
        let coll = if self.share_collection {
            "fsmcoll0".to_string()
        } else {
            format!("fsmcoll{n}")
        };
        Namespace::new(db, coll)
    }
}

/// Runs workloads against one deployment
pub struct Runner {
    deployment: Arc<dyn Deployment>,
    options: RunnerOptions,
}

impl Runner {
    /// Create a runner over a deployment
    pub fn new(deployment: Arc<dyn Deployment>, options: RunnerOptions) -> Self {
        Runner {
            deployment,
            options,
        }
    }

    /// Run each workload on its own, one after another
    pub fn run_serial(
        &self,
        workloads: Vec<NamedWorkload>,
        cluster_options: ClusterOptions,
    ) -> Result<()> {
        self.run_workloads(workloads, cluster_options, ExecutionMode::Serial)
    }

    /// Run every workload at once, each on its own threads
    pub fn run_parallel(
        &self,
        workloads: Vec<NamedWorkload>,
        cluster_options: ClusterOptions,
    ) -> Result<()> {
        self.run_workloads(workloads, cluster_options, ExecutionMode::Parallel)
    }

    /// Interleave every workload on every thread
    pub fn run_composed(
        &self,
        workloads: Vec<NamedWorkload>,
        cluster_options: ClusterOptions,
    ) -> Result<()> {
        self.run_workloads(workloads, cluster_options, ExecutionMode::Composed)
    }

    /// Resolve the mutually-exclusive mode flags and run
    ///
    /// Entry point for callers holding the raw `composed`/`parallel`
    /// booleans rather than an [`ExecutionMode`].
    pub fn run_with_flags(
        &self,
        workloads: Vec<NamedWorkload>,
        cluster_options: ClusterOptions,
        composed: bool,
        parallel: bool,
    ) -> Result<()> {
        let mode = ExecutionMode::from_flags(composed, parallel)?;
        self.run_workloads(workloads, cluster_options, mode)
    }

    /// Shared entry point behind the three mode wrappers
    pub fn run_workloads(
        &self,
        workloads: Vec<NamedWorkload>,
        cluster_options: ClusterOptions,
        mode: ExecutionMode,
    ) -> Result<()> {
        let workloads: Vec<NamedWorkload> = workloads
            .into_iter()
            .filter(|workload| !self.options.deny_list.contains(&workload.name))
            .collect();
        if workloads.is_empty() {
            return Err(ConfigError::NoWorkloads.into());
        }

        let mut seen = BTreeSet::new();
        for workload in &workloads {
            if !seen.insert(workload.name.clone()) {
                return Err(ConfigError::DuplicateWorkload(workload.name.clone()).into());
            }
        }
        if mode == ExecutionMode::Composed && workloads.len() < 2 {
            return Err(CompositionError::NotEnoughWorkloads(workloads.len()).into());
        }

        // Normalize everything up front so a malformed definition fails the
        // run before any namespace is touched.
        let mut prepared = Vec::with_capacity(workloads.len());
        for workload in workloads {
            let config = normalize(&workload.raw)?;
            prepared.push(Prepared {
                name: workload.name,
                raw: workload.raw,
                config,
            });
        }

        // Interleaved workloads operate on shared documents, so composed
        // mode forces full namespace sharing.
        let mut cluster_options = cluster_options;
        if mode == ExecutionMode::Composed {
            cluster_options.same_db = true;
            cluster_options.same_collection = true;
        }
        let strictness = AssertionStrictness::for_isolation(
            cluster_options.same_db,
            cluster_options.same_collection,
        );

        let run_mode = match mode {
            ExecutionMode::Composed => RunMode::Composed {
                compose_prob: self.options.compose_prob,
                iterations: self.options.compose_iterations,
            },
            ExecutionMode::Serial | ExecutionMode::Parallel => RunMode::Single,
        };

        let schedule: Vec<Vec<Prepared>> = match mode {
            ExecutionMode::Serial => prepared.into_iter().map(|p| vec![p]).collect(),
            ExecutionMode::Parallel | ExecutionMode::Composed => vec![prepared],
        };

        let mut cluster = Cluster::new(Arc::clone(&self.deployment), cluster_options.topology);
        cluster.setup()?;
        let mut run_rng = StdRng::seed_from_u64(cluster_options.seed);
        let mut allocator =
            NamespaceAllocator::new(cluster_options.same_db, cluster_options.same_collection);

        let mut result = Ok(());
        for entry in schedule {
            let names: Vec<&str> = entry.iter().map(|p| p.name.as_str()).collect();
            info!(workloads = ?names, ?mode, "running schedule entry");
            result = self.run_entry(
                &cluster,
                entry,
                run_mode,
                strictness,
                &mut allocator,
                &mut run_rng,
            );
            if result.is_err() {
                break;
            }
        }

        // Cluster teardown runs no matter how the schedule ended
        cluster.teardown();
        result
    }

    fn run_entry(
        &self,
        cluster: &Cluster,
        entry: Vec<Prepared>,
        run_mode: RunMode,
        strictness: AssertionStrictness,
        allocator: &mut NamespaceAllocator,
        run_rng: &mut StdRng,
    ) -> Result<()> {
        let conn = cluster.get_connection()?;

        // Fresh namespaces: drop leftovers, create, shard when sharded. A
        // namespace shared by several workloads is prepared only for the
        // first one, so later workloads cannot discard its setup or re-shard
        // an already-sharded collection.
        let mut staged: Vec<Staged> = Vec::with_capacity(entry.len());
        for prepared in entry {
            let ns = allocator.next();
            if !staged.iter().any(|stage| stage.ns == ns) {
                conn.drop_collection(&ns)?;
                conn.create_collection(&ns)?;
                if cluster.is_sharded() {
                    cluster.shard_collection(&ns)?;
                }
            }
            staged.push(Staged {
                name: prepared.name,
                raw: prepared.raw,
                config: prepared.config,
                ns,
                data: Document::new(),
                started: false,
            });
        }

        // Setup phase, outside thread context. A workload is marked started
        // before its setup runs, so teardown covers partially-run setups.
        let mut body_result: Result<()> = Ok(());
        for stage in &mut staged {
            stage.data = stage.config.data.clone();
            stage.started = true;
            if let Err(err) = (stage.config.setup)(conn.as_ref(), &stage.ns, &mut stage.data) {
                body_result = Err(HarnessError::SetupFailed {
                    workload: stage.name.clone(),
                    message: err.to_string(),
                });
                break;
            }
        }

        let mut failures = Vec::new();
        if body_result.is_ok() {
            let entries: Vec<WorkloadEntry> = staged
                .iter()
                .map(|stage| WorkloadEntry {
                    name: stage.name.clone(),
                    raw: stage.raw.clone(),
                    ns: stage.ns.clone(),
                    data: stage.data.clone(),
                    thread_count: stage.config.thread_count,
                })
                .collect();

            let mut manager = ThreadManager::new(run_mode, strictness, run_rng.gen());
            body_result = (|| {
                manager.init(entries, self.options.max_allowed_threads)?;
                let pool = Arc::new(cluster.connection_pool(manager.total_threads())?);
                if let Err(err) = manager.spawn_all(&pool) {
                    failures = manager.join_all().unwrap_or_default();
                    return Err(err);
                }
                let startup = manager.check_failed(self.options.allowed_failure_fraction);
                failures = manager.join_all()?;
                startup
            })();
        }

        // Teardown phase: every started workload, no matter what failed
        let mut teardown_failures = Vec::new();
        for stage in &mut staged {
            if !stage.started {
                continue;
            }
            if let Err(err) = (stage.config.teardown)(conn.as_ref(), &stage.ns, &mut stage.data)
            {
                error!(workload = %stage.name, %err, "workload teardown failed");
                teardown_failures.push(TeardownFailure {
                    workload: stage.name.clone(),
                    message: err.to_string(),
                });
            }
        }

        body_result?;
        aggregate_failures(failures)?;
        if !teardown_failures.is_empty() {
            return Err(HarnessError::TeardownFailed(teardown_failures));
        }
        Ok(())
    }
}

/// Fold per-thread failures into one combined error
///
/// Identical failure signatures are grouped with frequency counts. A
/// report past the size budget is logged in full and replaced with a
/// truncation notice, so near-identical traces cannot grow logs without
/// bound.
fn aggregate_failures(failures: Vec<WorkloadFailure>) -> Result<()> {
    if failures.is_empty() {
        return Ok(());
    }

    // signature -> (count, first occurrence), preserving first-seen order
    let mut order: Vec<String> = Vec::new();
    let mut groups: std::collections::BTreeMap<String, (usize, &WorkloadFailure)> =
        std::collections::BTreeMap::new();
    for failure in &failures {
        let signature = failure.signature().to_string();
        match groups.get_mut(&signature) {
            Some((count, _)) => *count += 1,
            None => {
                order.push(signature.clone());
                groups.insert(signature, (1, failure));
            }
        }
    }

    let plural = if failures.len() == 1 { "" } else { "s" };
    let mut report = format!("{} thread{plural} threw\n", failures.len());
    for signature in &order {
        let (count, first) = groups[signature];
        let plural = if count == 1 { "" } else { "s" };
        report.push_str(&format!(
            "\n{count} thread{plural} threw the following exception \
             (workload {:?}, first seen on thread {}):\n",
            first.workload, first.tid
        ));
        for line in signature.lines() {
            report.push_str("        ");
            report.push_str(line);
            report.push('\n');
        }
    }

    if report.len() > MAX_REPORT_BYTES {
        error!(report = %report, "combined failure report exceeded size budget");
        return Err(HarnessError::ReportTruncated);
    }
    Err(HarnessError::ThreadsFailed(report))
}
