//! Tracing/logging setup shared by binaries and tests that embed the stock core.

/// Initialize process-wide tracing (JSON, filtered by `RUST_LOG`, default `info`).
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    tracing::init();
}

/// Install a human-readable subscriber that writes through the test harness, so log
/// lines show up only for failing tests. Safe to call from every test.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Subscriber construction.
pub mod tracing;
