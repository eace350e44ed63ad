//! Harness configuration: optional `tap-harness.toml` plus the environment
//! inspected once at session start.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::command::{Coverage, Interpreters};
use crate::core::types::{DEFAULT_TIMEOUT, RunOptions};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "tap-harness.toml";

/// Any of these, set to a truthy value, turns coverage mode on.
pub const COVERAGE_ENV_VARS: [&str; 3] = [
    "TAP_COV",
    "npm_package_config_coverage",
    "npm_config_coverage",
];

/// Harness configuration (TOML). Missing fields take defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    /// Per-file wall-clock budget in seconds.
    pub timeout_secs: f64,
    pub diag: bool,
    pub gc: bool,
    pub stderr: bool,
    /// Interpreter for `.js` files.
    pub node: String,
    /// Interpreter for `.coffee` files.
    pub coffee: String,
    /// Coverage tool used when coverage mode is on.
    pub coverage_tool: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        let interpreters = Interpreters::default();
        Self {
            timeout_secs: DEFAULT_TIMEOUT.as_secs_f64(),
            diag: false,
            gc: false,
            stderr: false,
            node: interpreters.node,
            coffee: interpreters.coffee,
            coverage_tool: "cover".to_string(),
        }
    }
}

impl HarnessConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.timeout_secs.is_finite() && self.timeout_secs > 0.0) {
            return Err(anyhow!("timeout_secs must be > 0"));
        }
        if self.node.trim().is_empty() {
            return Err(anyhow!("node must be non-empty"));
        }
        if self.coffee.trim().is_empty() {
            return Err(anyhow!("coffee must be non-empty"));
        }
        if self.coverage_tool.trim().is_empty() {
            return Err(anyhow!("coverage_tool must be non-empty"));
        }
        Ok(())
    }

    pub fn interpreters(&self) -> Interpreters {
        Interpreters {
            node: self.node.clone(),
            coffee: self.coffee.clone(),
        }
    }

    /// Base run options before CLI overrides.
    pub fn run_options(&self, roots: Vec<String>) -> RunOptions {
        RunOptions {
            diag: self.diag,
            timeout: Duration::from_secs_f64(self.timeout_secs),
            gc: self.gc,
            stderr: self.stderr,
            roots,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HarnessConfig::default()`.
pub fn load_config(path: &Path) -> Result<HarnessConfig> {
    if !path.exists() {
        let cfg = HarnessConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HarnessConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    debug!(path = %path.display(), "loaded harness config");
    Ok(cfg)
}

/// Ambient state resolved once per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessEnv {
    pub cwd: PathBuf,
    /// Parent environment copied into every child, byte for byte.
    pub vars: Vec<(OsString, OsString)>,
    pub interpreters: Interpreters,
    pub coverage: Option<Coverage>,
}

impl HarnessEnv {
    /// Snapshot the process environment.
    pub fn from_process(config: &HarnessConfig) -> Result<Self> {
        let cwd = std::env::current_dir().context("get current directory")?;
        let vars: Vec<(OsString, OsString)> = std::env::vars_os().collect();
        let coverage = if coverage_requested(|name: &str| std::env::var_os(name)) {
            let entry = std::env::current_exe().context("locate harness executable")?;
            Some(Coverage {
                tool: config.coverage_tool.clone(),
                entry,
            })
        } else {
            None
        };
        debug!(cwd = %cwd.display(), coverage = coverage.is_some(), "resolved harness environment");
        Ok(Self {
            cwd,
            vars,
            interpreters: config.interpreters(),
            coverage,
        })
    }
}

/// Whether any coverage variable holds a truthy value.
///
/// Empty, `0` and `false` are falsy.
pub fn coverage_requested(lookup: impl Fn(&str) -> Option<OsString>) -> bool {
    COVERAGE_ENV_VARS.into_iter().any(|name| {
        lookup(name).is_some_and(|value| {
            let value = value.to_string_lossy();
            let value = value.trim();
            !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, HarnessConfig::default());
    }

    #[test]
    fn load_applies_partial_overrides() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "timeout_secs = 2.5\ngc = true\nnode = \"/usr/bin/node\"\n")
            .expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.timeout_secs, 2.5);
        assert!(cfg.gc);
        assert_eq!(cfg.node, "/usr/bin/node");
        assert_eq!(cfg.coffee, "coffee");

        let options = cfg.run_options(vec!["t".to_string()]);
        assert_eq!(options.timeout, Duration::from_millis(2500));
        assert_eq!(options.roots, vec!["t"]);
    }

    #[test]
    fn load_rejects_non_positive_timeout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "timeout_secs = 0\n").expect("write");
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn load_rejects_unknown_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "timeout = 3\n").expect("write");
        assert!(load_config(&path).is_err());
    }

    #[test]
    fn process_environment_is_copied_verbatim() {
        let env = HarnessEnv::from_process(&HarnessConfig::default()).expect("env");
        let expected: Vec<(OsString, OsString)> = std::env::vars_os().collect();
        assert_eq!(env.vars, expected);
        assert_eq!(env.interpreters, Interpreters::default());
    }

    #[test]
    fn coverage_needs_a_truthy_variable() {
        let none = |_: &str| None;
        assert!(!coverage_requested(none));

        let falsy = |name: &str| (name == "TAP_COV").then(|| OsString::from("0"));
        assert!(!coverage_requested(falsy));

        let truthy =
            |name: &str| (name == "npm_config_coverage").then(|| OsString::from("true"));
        assert!(coverage_requested(truthy));
    }
}
