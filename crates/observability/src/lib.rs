//! Tracing/logging setup shared by every binary and test harness.

/// Initialize process-wide structured logging with the `RUST_LOG` filter
/// (default `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init("info");
}

/// Like [`init`], with a fallback directive used when `RUST_LOG` is unset
/// (typically `InventoryConfig::log_filter`).
pub fn init_with_filter(default_directive: &str) {
    tracing::init(default_directive);
}

/// Human-readable logs captured by the test harness.
pub fn init_for_tests() {
    tracing::init_test();
}

/// Subscriber construction (filters, formatting).
pub mod tracing;
