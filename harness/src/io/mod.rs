//! I/O for a harness session: discovery, child processes, config, reporting.

pub mod config;
pub mod discovery;
pub mod process;
pub mod report;
