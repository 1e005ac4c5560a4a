//! Diagnostic tracing for ralph.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG` or `--verbose`, output
//!   to stderr. Not persisted.
//!
//! - **Iteration logging (`io/iteration_log`)**: per-iteration artifacts in
//!   `.ralph/iterations/`. Always written, unaffected by the log filter.
//!
//! - **Summaries**: iteration and run summaries go to stdout.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the filter is `warn`, or `ralph=debug`
/// with `verbose`. Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=ralph=trace ralph run --feature-id 001-demo
/// ```
pub fn init(verbose: bool) {
    let fallback = if verbose { "warn,ralph=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
