//! End-to-end harness tests
//!
//! These drive full runs through the public facade against the in-memory
//! deployment: scheduling, namespace isolation, the thread barrier,
//! composed interleaving, teardown guarantees, and sharded routing.

mod common;

mod composed;
mod e2e;
mod sharded;
mod teardown;
