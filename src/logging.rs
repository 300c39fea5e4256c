//! Test/doc-example logging helper.
//!
//! gatewatch is a library: the host gateway owns its own `tracing` subscriber and
//! gatewatch never installs one on its behalf. This module exists only so unit
//! tests, integration tests, and doc examples can opt into readable output without
//! each hand-rolling the same `tracing_subscriber::fmt()` boilerplate.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a process-global `tracing_subscriber::fmt` subscriber, honoring
/// `RUST_LOG`. Safe to call repeatedly (including across tests in the same
/// binary) — only the first call takes effect.
///
/// Not exported outside `test`/`mock` builds: production hosts configure their
/// own subscriber and gatewatch must not fight it for the global default.
#[cfg(any(test, feature = "mock"))]
pub fn install_default_subscriber() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}
