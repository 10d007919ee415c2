//! Tracing setup shared by binaries and tests.

/// Initialize process-wide tracing with the format named by
/// `LEDGERFLOW_LOG_FORMAT` (`json` by default, or `pretty`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::from_env());
}

/// Human-readable output captured by the test harness.
pub fn init_for_tests() {
    tracing::init_for_tests();
}

/// Tracing configuration (filters, layers).
pub mod tracing;

pub use tracing::LogFormat;
