//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::time::{Duration, Instant};

pub use cxtree::test_utils::init_test_logging;

/// Initialize logging and announce the test phase.
pub fn init_test(name: &str) {
    init_test_logging();
    cxtree::test_phase!(name);
}

/// Spin until `predicate` holds, panicking after `bound`.
pub fn wait_until(bound: Duration, what: &str, mut predicate: impl FnMut() -> bool) {
    let start = Instant::now();
    while !predicate() {
        assert!(start.elapsed() < bound, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}
