//! In-memory store and deployment for tests
//!
//! [`MemStore`] implements the [`Store`] contract over shared in-process
//! state, which is all the harness's own test suite needs: real OS threads
//! hammering one shared map surface the same interleavings the harness is
//! built to exercise. [`MemDeployment`] wraps it behind the [`Deployment`]
//! trait, optionally pretending to be sharded so routing paths can be
//! tested without a real cluster.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::StoreResult;
use crate::store::{Deployment, Document, Filter, Namespace, Store, UpdateSpec, WriteOutcome};

/// Shared in-memory document store
///
/// Cloning yields another connection to the same underlying state, so a
/// connection pool over `MemStore` behaves like a pool of sockets to one
/// server.
#[derive(Clone, Default)]
pub struct MemStore {
    collections: Arc<DashMap<(String, String), Vec<Document>>>,
}

impl MemStore {
    /// Create an empty store
    pub fn new() -> Self {
        MemStore::default()
    }

    fn key(ns: &Namespace) -> (String, String) {
        (ns.db.clone(), ns.coll.clone())
    }
}

fn matches(filter: &Filter, doc: &Document) -> bool {
    match filter {
        Filter::All => true,
        Filter::Id(id) => doc.get("_id") == Some(id),
    }
}

fn apply_update(update: &UpdateSpec, doc: &mut Document) -> bool {
    let mut modified = false;

    for (field, value) in &update.set {
        if doc.get(field) != Some(value) {
            doc.insert(field.clone(), value.clone());
            modified = true;
        }
    }

    for (field, by) in &update.inc {
        let current = doc.get(field).cloned().unwrap_or(Value::from(0));
        let next = match (current.as_i64(), by.as_i64()) {
            (Some(a), Some(b)) => Value::from(a + b),
            _ => Value::from(
                current.as_f64().unwrap_or(0.0) + by.as_f64().unwrap_or(0.0),
            ),
        };
        if doc.get(field) != Some(&next) {
            doc.insert(field.clone(), next);
            modified = true;
        }
    }

    modified
}

impl Store for MemStore {
    fn insert_one(&self, ns: &Namespace, doc: Document) -> StoreResult<WriteOutcome> {
        self.collections
            .entry(Self::key(ns))
            .or_default()
            .push(doc);
        Ok(WriteOutcome {
            inserted: 1,
            ..WriteOutcome::default()
        })
    }

    fn update_many(
        &self,
        ns: &Namespace,
        filter: &Filter,
        update: &UpdateSpec,
    ) -> StoreResult<WriteOutcome> {
        let mut outcome = WriteOutcome::default();
        if let Some(mut coll) = self.collections.get_mut(&Self::key(ns)) {
            for doc in coll.iter_mut() {
                if matches(filter, doc) {
                    outcome.matched += 1;
                    if apply_update(update, doc) {
                        outcome.modified += 1;
                    }
                }
            }
        }
        Ok(outcome)
    }

    fn find_all(&self, ns: &Namespace) -> StoreResult<Vec<Document>> {
        Ok(self
            .collections
            .get(&Self::key(ns))
            .map(|coll| coll.clone())
            .unwrap_or_default())
    }

    fn count(&self, ns: &Namespace) -> StoreResult<u64> {
        Ok(self
            .collections
            .get(&Self::key(ns))
            .map(|coll| coll.len() as u64)
            .unwrap_or(0))
    }

    fn create_collection(&self, ns: &Namespace) -> StoreResult<()> {
        self.collections.entry(Self::key(ns)).or_default();
        Ok(())
    }

    fn drop_collection(&self, ns: &Namespace) -> StoreResult<bool> {
        Ok(self.collections.remove(&Self::key(ns)).is_some())
    }

    fn drop_database(&self, db: &str) -> StoreResult<bool> {
        let before = self.collections.len();
        self.collections.retain(|(d, _), _| d != db);
        Ok(self.collections.len() != before)
    }

    fn list_collections(&self, db: &str) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self
            .collections
            .iter()
            .filter(|entry| entry.key().0 == db)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

/// In-memory deployment wrapping a [`MemStore`]
///
/// Records sharding and balancer calls so tests can assert on routing
/// behavior.
pub struct MemDeployment {
    store: MemStore,
    sharded: bool,
    balancer_enabled: AtomicBool,
    sharded_namespaces: Mutex<Vec<Namespace>>,
    shutdown_calls: AtomicUsize,
}

impl MemDeployment {
    /// A standalone (non-sharded) deployment
    pub fn new() -> Self {
        MemDeployment {
            store: MemStore::new(),
            sharded: false,
            balancer_enabled: AtomicBool::new(true),
            sharded_namespaces: Mutex::new(Vec::new()),
            shutdown_calls: AtomicUsize::new(0),
        }
    }

    /// A deployment that accepts sharding operations
    pub fn sharded() -> Self {
        MemDeployment {
            sharded: true,
            ..MemDeployment::new()
        }
    }

    /// Direct handle to the backing store, for test assertions
    pub fn store(&self) -> MemStore {
        self.store.clone()
    }

    /// Namespaces that were sharded, in call order
    pub fn sharded_namespaces(&self) -> Vec<Namespace> {
        self.sharded_namespaces.lock().clone()
    }

    /// Whether the balancer is currently enabled
    pub fn balancer_enabled(&self) -> bool {
        self.balancer_enabled.load(Ordering::SeqCst)
    }

    /// How many times `shutdown` ran
    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemDeployment {
    fn default() -> Self {
        MemDeployment::new()
    }
}

impl Deployment for MemDeployment {
    fn connect(&self) -> StoreResult<Arc<dyn Store>> {
        Ok(Arc::new(self.store.clone()))
    }

    fn host(&self) -> String {
        "mem://localhost".to_string()
    }

    fn supports_sharding(&self) -> bool {
        self.sharded
    }

    fn shard_collection(&self, ns: &Namespace) -> StoreResult<()> {
        self.sharded_namespaces.lock().push(ns.clone());
        Ok(())
    }

    fn set_balancer(&self, enabled: bool) -> StoreResult<()> {
        self.balancer_enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn shutdown(&self) {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
    }
}
