//! Cluster handle and connection pool
//!
//! [`Cluster`] wraps a [`Deployment`] behind a topology-aware interface.
//! The harness never constructs server processes itself; the deployment
//! collaborator owns that, and the cluster handle only sequences setup,
//! connection acquisition, sharding requests, and teardown.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use fsmstress_core::error::{ClusterError, StoreResult};
use fsmstress_core::store::{Deployment, Namespace, Store};

/// Deployment shape for one run
///
/// The variants are mutually exclusive by construction; a run is exactly
/// one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// A single server
    Standalone,
    /// A replica set with the given number of nodes
    ReplicaSet {
        /// Node count, including the primary
        nodes: usize,
    },
    /// Legacy master/slave pair
    MasterSlave,
    /// A sharded cluster
    Sharded {
        /// Number of shards
        shards: usize,
        /// Whether each shard is itself a replica set
        replicated: bool,
    },
}

impl Default for Topology {
    fn default() -> Self {
        Topology::Standalone
    }
}

/// Per-run cluster and isolation options
#[derive(Debug, Clone, Copy)]
pub struct ClusterOptions {
    /// Deployment shape
    pub topology: Topology,
    /// Workloads share one database instead of getting their own
    pub same_db: bool,
    /// Workloads share one collection (implies shared database)
    pub same_collection: bool,
    /// Seed for the run-level random stream
    pub seed: u64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        ClusterOptions {
            topology: Topology::Standalone,
            same_db: false,
            same_collection: false,
            seed: 0,
        }
    }
}

/// Handle to the deployment the workloads run against
pub struct Cluster {
    deployment: Arc<dyn Deployment>,
    topology: Topology,
    initialized: bool,
}

impl Cluster {
    /// Wrap a deployment with the given topology
    pub fn new(deployment: Arc<dyn Deployment>, topology: Topology) -> Self {
        Cluster {
            deployment,
            topology,
            initialized: false,
        }
    }

    /// Initialize the cluster for a run; repeated calls are no-ops
    ///
    /// On sharded topologies the balancer is disabled for the duration of
    /// the run, so namespace placement stays deterministic for assertions.
    pub fn setup(&mut self) -> Result<(), ClusterError> {
        if self.initialized {
            return Ok(());
        }

        if self.is_sharded() {
            self.deployment.set_balancer(false)?;
        }
        info!(host = %self.deployment.host(), topology = ?self.topology, "cluster ready");
        self.initialized = true;
        Ok(())
    }

    /// Shut the cluster down; safe to call before setup, after a partial
    /// setup failure, or more than once
    pub fn teardown(&mut self) {
        if !self.initialized {
            return;
        }
        if self.is_sharded() {
            if let Err(err) = self.deployment.set_balancer(true) {
                warn!(%err, "failed to re-enable balancer during teardown");
            }
        }
        self.deployment.shutdown();
        self.initialized = false;
    }

    /// Open a new connection to the deployment
    pub fn get_connection(&self) -> Result<Arc<dyn Store>, ClusterError> {
        if !self.initialized {
            return Err(ClusterError::NotInitialized);
        }
        Ok(self.deployment.connect()?)
    }

    /// Address of the deployment's entry point
    pub fn get_host(&self) -> Result<String, ClusterError> {
        if !self.initialized {
            return Err(ClusterError::NotInitialized);
        }
        Ok(self.deployment.host())
    }

    /// Whether this run targets a sharded topology
    pub fn is_sharded(&self) -> bool {
        matches!(self.topology, Topology::Sharded { .. })
    }

    /// Shard a collection on `{_id: hashed}`
    ///
    /// Fails without touching the deployment when the topology is not
    /// sharded.
    pub fn shard_collection(&self, ns: &Namespace) -> Result<(), ClusterError> {
        if !self.is_sharded() {
            return Err(ClusterError::NotSharded);
        }
        if !self.initialized {
            return Err(ClusterError::NotInitialized);
        }
        self.deployment.shard_collection(ns)?;
        Ok(())
    }

    /// Build a connection pool of the given size
    pub fn connection_pool(&self, size: usize) -> Result<ConnectionPool, ClusterError> {
        if !self.initialized {
            return Err(ClusterError::NotInitialized);
        }
        Ok(ConnectionPool::open(Arc::clone(&self.deployment), size)?)
    }
}

/// A fixed-size pool of pre-opened connections
///
/// Worker threads each check out one connection for the duration of their
/// walk and return it on join. The pool never grows; running out is the
/// caller's resource error.
pub struct ConnectionPool {
    available: Mutex<Vec<Arc<dyn Store>>>,
    size: usize,
}

impl ConnectionPool {
    /// Open `size` connections up front
    pub fn open(deployment: Arc<dyn Deployment>, size: usize) -> StoreResult<Self> {
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            connections.push(deployment.connect()?);
        }
        Ok(ConnectionPool {
            available: Mutex::new(connections),
            size,
        })
    }

    /// Total pool capacity
    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections currently available for checkout
    pub fn available(&self) -> usize {
        self.available.lock().len()
    }

    /// Check out a connection; `None` when the pool is exhausted
    pub fn acquire(&self) -> Option<Arc<dyn Store>> {
        self.available.lock().pop()
    }

    /// Return a connection to the pool
    pub fn release(&self, conn: Arc<dyn Store>) {
        let mut available = self.available.lock();
        if available.len() < self.size {
            available.push(conn);
        }
    }
}
