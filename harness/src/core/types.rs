//! Shared deterministic types for the harness.
//!
//! These types define stable contracts between discovery, supervision and
//! reporting. They hold no I/O handles and serialize deterministically.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default per-file timeout when neither the CLI nor the config file sets one.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Session-wide options. Immutable once the session starts.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Emit YAML diagnostics for passing records too.
    pub diag: bool,
    /// Wall-clock budget for a single test file.
    pub timeout: Duration,
    /// Append the memory-exposure flag when invoking the script runtime.
    pub gc: bool,
    /// Forward child stderr live as it arrives.
    pub stderr: bool,
    /// Ordered path/pattern strings to expand.
    pub roots: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            diag: false,
            timeout: DEFAULT_TIMEOUT,
            gc: false,
            stderr: false,
            roots: Vec::new(),
        }
    }
}

/// A discovered file, resolved to the exact child invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestFile {
    pub absolute_path: PathBuf,
    /// Path relative to `base_dir`.
    pub display_name: String,
    /// Working directory for the child.
    pub base_dir: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    /// Full child environment. `BTreeMap` keeps keys unique and ordered.
    pub env: BTreeMap<OsString, OsString>,
}

impl TestFile {
    /// Render `command` and `args` as JSON-quoted, space separated words.
    pub fn command_line(&self) -> String {
        std::iter::once(&self.command)
            .chain(self.args.iter())
            .map(|word| serde_json::Value::String(word.clone()).to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Per-file result. Exactly one per executed or stat-failed file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord {
    pub name: String,
    pub ok: bool,
    #[serde(rename = "exit", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timed_out: Option<bool>,
    #[serde(rename = "stderr", skip_serializing_if = "Option::is_none")]
    pub stderr_text: Option<String>,
    #[serde(rename = "command", skip_serializing_if = "String::is_empty")]
    pub command_line: String,
    /// Underlying error for synthesized failures (stat, readdir, spawn).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl OutcomeRecord {
    /// A failing record that did not come from a child exit.
    pub fn failure(name: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self {
            name: name.into(),
            ok: false,
            error: Some(error.to_string()),
            ..Self::default()
        }
    }
}

/// TAP directive attached to an assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "reason", rename_all = "lowercase")]
pub enum Directive {
    Skip(String),
    Todo(String),
}

/// A single line-level assertion parsed from child stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Number as written by the child, if any.
    pub id: Option<u32>,
    pub ok: bool,
    pub name: String,
    pub directive: Option<Directive>,
}

impl Assertion {
    /// Whether this assertion counts against the verdict. Failing TODOs do not.
    pub fn passes(&self) -> bool {
        self.ok || matches!(self.directive, Some(Directive::Todo(_)))
    }
}
