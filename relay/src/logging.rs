//! Diagnostic tracing for relay.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: operator diagnostics via `RUST_LOG`, written to
//!   stderr. Not persisted by relay.
//!
//! - **Execution logs (`io/execution_log`)**: product artifacts in each
//!   project's `logs/`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "relay=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, falling back to `default_filter`.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=relay=debug relay watch
/// ```
pub fn init(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
