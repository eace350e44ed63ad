//! Pure rules for turning a discovered file into a child invocation.
//!
//! Covers naming, command selection by extension, the execute-permission
//! check, environment construction, and the coverage argv rewrite.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable exported to every child.
pub const HARNESS_MARKER: &str = "TAP";
/// Flag appended for the script runtime when `gc` is set.
pub const EXPOSE_GC_FLAG: &str = "--expose-gc";

const SCRIPT_EXTENSION: &str = "js";
const SUPERSET_EXTENSION: &str = "coffee";

/// Interpreters for the two script extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreters {
    pub node: String,
    pub coffee: String,
}

impl Default for Interpreters {
    fn default() -> Self {
        Self {
            node: "node".to_string(),
            coffee: "coffee".to_string(),
        }
    }
}

/// Coverage wrapper, present only when coverage mode is on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coverage {
    /// Coverage tool executable.
    pub tool: String,
    /// This harness's own entry point.
    pub entry: PathBuf,
}

/// Ownership and permission bits of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMode {
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
}

/// Identity of the invoking process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: u32,
    pub gid: u32,
}

/// Whether `identity` may execute a file with `file` permissions.
///
/// Exactly one class applies: owner if the uid matches, else group if the gid
/// matches, else world.
pub fn is_executable_by(file: FileMode, identity: Identity) -> bool {
    let bit = if file.uid == identity.uid {
        0o100
    } else if file.gid == identity.gid {
        0o010
    } else {
        0o001
    };
    file.mode & bit != 0
}

/// Base directory and display name for `path`.
///
/// Without an explicit base the file's parent directory is used.
pub fn display_name(path: &Path, base: Option<&Path>) -> (PathBuf, String) {
    let base_dir = match base {
        Some(base) => base.to_path_buf(),
        None => path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf),
    };
    let display = if base_dir == Path::new(".") {
        path.to_string_lossy().into_owned()
    } else {
        path.strip_prefix(&base_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    };
    (base_dir, display)
}

/// Record name: the path relative to `cwd` when it lives beneath it.
pub fn record_name(path: &Path, cwd: &Path) -> String {
    path.strip_prefix(cwd)
        .unwrap_or(path)
        .to_string_lossy()
        .into_owned()
}

/// Choose command and arguments for a file.
///
/// Returns `None` when the file is neither a known script nor executable by
/// the caller; such files are skipped silently. `exec_check` is consulted only
/// for files that are run directly.
pub fn select_command(
    path: &Path,
    display_name: &str,
    gc: bool,
    interpreters: &Interpreters,
    exec_check: impl FnOnce() -> bool,
) -> Option<(String, Vec<String>)> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(SCRIPT_EXTENSION) => {
            let mut args = Vec::new();
            if gc {
                args.push(EXPOSE_GC_FLAG.to_string());
            }
            args.push(display_name.to_string());
            Some((interpreters.node.clone(), args))
        }
        Some(SUPERSET_EXTENSION) => {
            Some((interpreters.coffee.clone(), vec![display_name.to_string()]))
        }
        _ => exec_check().then(|| (path.to_string_lossy().into_owned(), Vec::new())),
    }
}

/// Rewrite an invocation to run under the coverage tool:
/// `<tool> run <entry> <base_dir>/<display_name>`.
pub fn wrap_with_coverage(
    coverage: &Coverage,
    base_dir: &Path,
    display_name: &str,
) -> (String, Vec<String>) {
    let target = base_dir.join(display_name);
    (
        coverage.tool.clone(),
        vec![
            "run".to_string(),
            coverage.entry.to_string_lossy().into_owned(),
            target.to_string_lossy().into_owned(),
        ],
    )
}

/// Copy of `parent` with the harness marker set.
///
/// Keys and values are kept as raw OS strings, so non-UTF-8 variables pass
/// through unchanged.
pub fn child_environment<I>(parent: I) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: BTreeMap<OsString, OsString> = parent.into_iter().collect();
    env.insert(OsString::from(HARNESS_MARKER), OsString::from("1"));
    env
}
