//! Store and deployment collaborator contracts
//!
//! The harness never interprets the data store's semantics. It only needs a
//! handle that can run document-level operations against a namespace and
//! report structured success/failure. These traits are the seam where a real
//! driver plugs in; [`crate::testing`] ships an in-memory implementation.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// A fully-qualified target namespace (database + collection)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Namespace {
    /// Database name
    pub db: String,
    /// Collection name
    pub coll: String,
}

impl Namespace {
    /// Create a namespace from database and collection names
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Namespace {
            db: db.into(),
            coll: coll.into(),
        }
    }

    /// The `db.coll` rendering used in logs and error messages
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.db, self.coll)
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.db, self.coll)
    }
}

/// A document: a JSON object
pub type Document = serde_json::Map<String, Value>;

/// Filter for update/delete style operations
///
/// The harness only needs whole-collection and by-id addressing; richer
/// query shapes belong to the driver behind the trait.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Match every document in the collection
    All,
    /// Match documents whose `_id` equals the given value
    Id(Value),
}

/// A declarative update: fields to overwrite and fields to increment
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateSpec {
    /// Fields set to a new value
    pub set: Document,
    /// Numeric fields incremented by the given amount
    pub inc: Document,
}

impl UpdateSpec {
    /// Update that increments `field` by `by`
    pub fn inc(field: impl Into<String>, by: i64) -> Self {
        let mut spec = UpdateSpec::default();
        spec.inc.insert(field.into(), Value::from(by));
        spec
    }

    /// Update that sets `field` to `value`
    pub fn set(field: impl Into<String>, value: Value) -> Self {
        let mut spec = UpdateSpec::default();
        spec.set.insert(field.into(), value);
        spec
    }

    /// Add another incremented field to this update
    pub fn and_inc(mut self, field: impl Into<String>, by: i64) -> Self {
        self.inc.insert(field.into(), Value::from(by));
        self
    }

    /// Add another set field to this update
    pub fn and_set(mut self, field: impl Into<String>, value: Value) -> Self {
        self.set.insert(field.into(), value);
        self
    }
}

/// Structured result of a write operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    /// Documents matched by the filter
    pub matched: u64,
    /// Documents actually modified
    pub modified: u64,
    /// Documents inserted
    pub inserted: u64,
    /// Documents upserted
    pub upserted: u64,
}

/// Handle to the shared data store, bound to no particular namespace
///
/// All methods must be safe to call concurrently from multiple threads;
/// worker threads share nothing else. Implementations decide whether a
/// "connection" is a socket, a session, or a cheap clone of shared state.
pub trait Store: Send + Sync {
    /// Insert a single document
    fn insert_one(&self, ns: &Namespace, doc: Document) -> StoreResult<WriteOutcome>;

    /// Apply an update to every document matched by the filter
    fn update_many(
        &self,
        ns: &Namespace,
        filter: &Filter,
        update: &UpdateSpec,
    ) -> StoreResult<WriteOutcome>;

    /// Fetch every document in the collection
    fn find_all(&self, ns: &Namespace) -> StoreResult<Vec<Document>>;

    /// Count documents in the collection
    fn count(&self, ns: &Namespace) -> StoreResult<u64>;

    /// Create an empty collection (no-op if it exists)
    fn create_collection(&self, ns: &Namespace) -> StoreResult<()>;

    /// Drop a collection; returns whether it existed
    fn drop_collection(&self, ns: &Namespace) -> StoreResult<bool>;

    /// Drop a database and every collection in it; returns whether it existed
    fn drop_database(&self, db: &str) -> StoreResult<bool>;

    /// List collection names in a database
    fn list_collections(&self, db: &str) -> StoreResult<Vec<String>>;
}

/// A running deployment of the store (the thread-primitive side of the
/// collaborator boundary)
///
/// The cluster handle drives this trait; the harness never constructs
/// processes itself.
pub trait Deployment: Send + Sync {
    /// Open a new connection to the deployment
    fn connect(&self) -> StoreResult<Arc<dyn Store>>;

    /// Address of the deployment's entry point
    fn host(&self) -> String;

    /// Whether the deployment can shard collections
    fn supports_sharding(&self) -> bool {
        false
    }

    /// Shard a collection on `{_id: hashed}`
    fn shard_collection(&self, ns: &Namespace) -> StoreResult<()> {
        Err(StoreError::Backend(format!(
            "deployment cannot shard {ns}"
        )))
    }

    /// Enable or disable automatic balancing (sharded deployments only)
    fn set_balancer(&self, _enabled: bool) -> StoreResult<()> {
        Ok(())
    }

    /// Stop the deployment; must be safe to call more than once
    fn shutdown(&self) {}
}
