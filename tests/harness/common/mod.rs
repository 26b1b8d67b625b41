//! Shared test utilities for the harness integration suite

#![allow(dead_code)]

use std::sync::{Arc, Once};

use fsmstress::testing::MemDeployment;
use fsmstress::{Runner, RunnerOptions};

static INIT_TRACING: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process
pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    });
}

/// A runner over a fresh standalone in-memory deployment
pub fn standalone_runner(options: RunnerOptions) -> (Arc<MemDeployment>, Runner) {
    init_tracing();
    let deployment = Arc::new(MemDeployment::new());
    let runner = Runner::new(Arc::clone(&deployment) as _, options);
    (deployment, runner)
}

/// A runner over a fresh sharded in-memory deployment
pub fn sharded_runner(options: RunnerOptions) -> (Arc<MemDeployment>, Runner) {
    init_tracing();
    let deployment = Arc::new(MemDeployment::sharded());
    let runner = Runner::new(Arc::clone(&deployment) as _, options);
    (deployment, runner)
}
