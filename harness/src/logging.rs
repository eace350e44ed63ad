//! Development-time tracing for debugging the harness.
//!
//! Tracing goes to stderr only, so the TAP report on stdout stays parseable
//! whatever `RUST_LOG` is set to. Child stderr forwarded by the reporter
//! shares that stream; tracing lines are distinguishable by their level
//! prefix.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset: timeouts, kills and bailouts only.
const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the stderr subscriber.
///
/// # Example
/// ```bash
/// # Trace spawn, exit and stream events for every test file:
/// RUST_LOG=tap_harness::io::process=debug tap-harness 'test/*.js'
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
