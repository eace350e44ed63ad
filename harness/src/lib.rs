//! TAP test-suite harness.
//!
//! Discovers test files from glob roots, runs each one as a child process
//! strictly one at a time under a timeout, consumes the TAP its stdout emits,
//! and renders a single aggregated TAP report. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (naming, command selection,
//!   lifecycle guards, the TAP line consumer, totals). No I/O.
//! - **[`io`]**: Side-effecting operations (discovery, process supervision,
//!   configuration, report rendering).
//!
//! [`session`] coordinates core logic with I/O to implement a run.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
