//! Expands root inputs into an ordered list of candidate test paths.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use thiserror::Error;
use tracing::{debug, instrument};

/// Discovery failures. Every variant is fatal to the session.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid glob pattern {pattern:?}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("failed to expand {pattern:?}")]
    Glob {
        pattern: String,
        #[source]
        source: glob::GlobError,
    },
    #[error("failed to readdir {}", dir.display())]
    ReadDir {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: true,
};

/// Expand each root in order and concatenate the matches.
///
/// Relative roots are resolved against `cwd`. A root that matches nothing
/// contributes nothing.
#[instrument(skip_all, fields(roots = roots.len()))]
pub fn expand_roots(roots: &[String], cwd: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let mut files = Vec::new();
    for root in roots {
        let matched = expand_root(root, cwd)?;
        debug!(root = %root, matches = matched.len(), "expanded root");
        files.extend(matched);
    }
    Ok(files)
}

fn expand_root(root: &str, cwd: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let pattern = if Path::new(root).is_absolute() {
        root.to_string()
    } else {
        let base = Pattern::escape(&cwd.to_string_lossy());
        format!("{}/{}", base.trim_end_matches('/'), root)
    };

    let paths =
        glob::glob_with(&pattern, MATCH_OPTIONS).map_err(|source| DiscoveryError::Pattern {
            pattern: root.to_string(),
            source,
        })?;
    paths
        .map(|entry| {
            entry.map_err(|source| DiscoveryError::Glob {
                pattern: root.to_string(),
                source,
            })
        })
        .collect()
}

/// List a directory's visible entries, sorted ascending by byte order, as
/// absolute paths.
#[instrument(skip_all, fields(dir = %dir.display()))]
pub fn list_dir(dir: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    let read_err = |source: io::Error| DiscoveryError::ReadDir {
        dir: dir.to_path_buf(),
        source,
    };
    let mut names: Vec<OsString> = fs::read_dir(dir)
        .map_err(read_err)?
        .map(|entry| entry.map(|entry| entry.file_name()).map_err(read_err))
        .collect::<Result<_, _>>()?;
    names.retain(|name| !name.to_string_lossy().starts_with('.'));
    names.sort();
    debug!(entries = names.len(), "listed directory");
    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("mkdir");
        }
        fs::write(path, "").expect("touch");
    }

    #[test]
    fn roots_expand_in_caller_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path();
        touch(&root.join("t/b.js"));
        touch(&root.join("t/a.js"));
        touch(&root.join("z.sh"));

        let roots = vec!["z.sh".to_string(), "t/*.js".to_string()];
        let files = expand_roots(&roots, root).expect("expand");
        assert_eq!(
            files,
            vec![root.join("z.sh"), root.join("t/a.js"), root.join("t/b.js")]
        );
    }

    #[test]
    fn unmatched_root_is_empty_not_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let files = expand_roots(&["missing/*.js".to_string()], temp.path()).expect("expand");
        assert!(files.is_empty());
    }

    #[test]
    fn invalid_pattern_is_an_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = expand_roots(&["t/[".to_string()], temp.path()).unwrap_err();
        assert!(matches!(err, DiscoveryError::Pattern { .. }));
    }

    #[test]
    fn list_dir_sorts_and_drops_dotfiles() {
        let temp = tempfile::tempdir().expect("tempdir");
        let dir = temp.path();
        touch(&dir.join("b"));
        touch(&dir.join("B"));
        touch(&dir.join("a"));
        touch(&dir.join(".hidden"));
        fs::create_dir(dir.join("sub")).expect("mkdir");

        let entries = list_dir(dir).expect("list");
        assert_eq!(
            entries,
            vec![dir.join("B"), dir.join("a"), dir.join("b"), dir.join("sub")]
        );
    }

    #[test]
    fn list_missing_dir_is_read_dir_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = list_dir(&temp.path().join("gone")).unwrap_err();
        assert!(matches!(err, DiscoveryError::ReadDir { .. }));
        assert!(err.to_string().starts_with("failed to readdir"));
    }
}
