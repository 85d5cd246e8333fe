//! Process-wide tracing setup shared by every payflow binary and test harness.

pub mod subscriber;

/// Initialize tracing with the `info` default filter.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    subscriber::init("info");
}

/// Initialize tracing, falling back to `default_filter` when `RUST_LOG` is unset.
pub fn init_with_filter(default_filter: &str) {
    subscriber::init(default_filter);
}
