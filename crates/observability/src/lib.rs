//! Tracing and logging (shared setup).

pub use crate::tracing::{LogFormat, LogSettings};

/// Initialize process-wide observability with JSON logs filtered by `RUST_LOG`.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Initialize process-wide observability from configuration.
pub fn init_with(settings: &LogSettings) {
    tracing::init_with(settings);
}

/// Tracing configuration (filters, layers).
pub mod tracing;
