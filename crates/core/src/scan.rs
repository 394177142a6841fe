//! Directory enumeration via the `ignore` crate walker, with prefix rules

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use color_eyre::Result;
use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::error::SyncError;
use crate::rules::PathRules;

/// Walks a directory tree and yields relative paths admitted by [`PathRules`]
pub struct Scanner {
    root: PathBuf,
    rules: PathRules,
}

impl Scanner {
    /// Create a scanner for the given root directory with no rules
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            rules: PathRules::new(),
        }
    }

    /// Replace the include/exclude rules
    #[must_use]
    pub fn rules(mut self, rules: PathRules) -> Self {
        self.rules = rules;
        self
    }

    /// Root being scanned
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a configured walk builder
    fn walk_builder(&self) -> WalkBuilder {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .standard_filters(false) // Plain walk, no ignore files or hidden filtering
            .follow_links(true)
            .filter_entry(|e| e.file_name() != "__pycache__");
        builder
    }

    /// Enumerate every non-directory path under the root
    ///
    /// # Errors
    /// Returns [`SyncError::UnsafeCleanRequest`] for an exclude-everything rule,
    /// [`SyncError::NotFound`] if the root is not a directory, or the walk error
    pub fn scan_paths(&self) -> Result<BTreeSet<String>> {
        if self.rules.excludes_everything() {
            return Err(SyncError::UnsafeCleanRequest.into());
        }
        if !self.root.is_dir() {
            return Err(SyncError::NotFound {
                path: self.root.clone(),
            }
            .into());
        }

        let mut paths = BTreeSet::new();

        for result in self.walk_builder().build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    if let Some(path) = dangling_symlink(&err) {
                        self.admit(path, &mut paths)?;
                    } else if is_loop(&err) {
                        warn!("Skipping symlink loop: {err}");
                    } else {
                        return Err(err.into());
                    }
                    continue;
                }
            };

            if entry.file_type().is_none_or(|t| t.is_dir()) {
                continue;
            }

            self.admit(entry.path(), &mut paths)?;
        }

        debug!("Enumerated {} paths under {}", paths.len(), self.root.display());
        Ok(paths)
    }

    fn admit(&self, path: &Path, paths: &mut BTreeSet<String>) -> Result<()> {
        let relative = relative_name(path.strip_prefix(&self.root)?);
        if self.rules.allows(&relative) {
            paths.insert(relative);
        }
        Ok(())
    }
}

/// Enumerate `root` under `rules`
///
/// # Errors
/// See [`Scanner::scan_paths`]
pub fn enumerate(root: &Path, rules: &PathRules) -> Result<BTreeSet<String>> {
    Scanner::new(root).rules(rules.clone()).scan_paths()
}

/// Join path components with `/` regardless of platform
fn relative_name(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Path of a symlink whose target does not exist, if that is what the error is about
fn dangling_symlink(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => {
            let is_link = std::fs::symlink_metadata(path).is_ok_and(|m| m.file_type().is_symlink());
            (is_link && std::fs::metadata(path).is_err()).then_some(path.as_path())
        }
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            dangling_symlink(err)
        }
        _ => None,
    }
}

fn is_loop(err: &ignore::Error) -> bool {
    match err {
        ignore::Error::Loop { .. } => true,
        ignore::Error::WithPath { err, .. }
        | ignore::Error::WithDepth { err, .. }
        | ignore::Error::WithLineNumber { err, .. } => is_loop(err),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn names(set: &BTreeSet<String>) -> Vec<&str> {
        set.iter().map(String::as_str).collect()
    }

    #[test]
    fn test_scan_nested_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("sub/dir")).unwrap();
        fs::write(dir.path().join("root.txt"), "root").unwrap();
        fs::write(dir.path().join("sub/nested.txt"), "nested").unwrap();
        fs::write(dir.path().join("sub/dir/deep.txt"), "deep").unwrap();
        fs::write(dir.path().join(".hidden"), "hidden").unwrap();

        let paths = Scanner::new(dir.path()).scan_paths().unwrap();
        assert_eq!(
            names(&paths),
            vec![".hidden", "root.txt", "sub/dir/deep.txt", "sub/nested.txt"]
        );
    }

    #[test]
    fn test_gitignore_has_no_effect() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".gitignore"), "*.log\n").unwrap();
        fs::write(dir.path().join("keep.log"), "keep").unwrap();

        let paths = Scanner::new(dir.path()).scan_paths().unwrap();
        assert!(paths.contains("keep.log"), "{paths:?}");
    }

    #[test]
    fn test_include_overrides_exclude() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::create_dir_all(dir.path().join("a/c")).unwrap();
        fs::write(dir.path().join("a/b/file.txt"), "b").unwrap();
        fs::write(dir.path().join("a/c/file.txt"), "c").unwrap();

        let rules = PathRules::new().exclude("a/").include("a/b/");
        let paths = enumerate(dir.path(), &rules).unwrap();
        assert_eq!(names(&paths), vec!["a/b/file.txt"]);
    }

    #[test]
    fn test_pycache_is_skipped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("pkg/__pycache__")).unwrap();
        fs::write(dir.path().join("pkg/mod.py"), "x = 1").unwrap();
        fs::write(dir.path().join("pkg/__pycache__/mod.pyc"), "bytes").unwrap();

        let paths = Scanner::new(dir.path()).scan_paths().unwrap();
        assert_eq!(names(&paths), vec!["pkg/mod.py"]);
    }

    #[test]
    fn test_exclude_all_refuses() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        let rules = PathRules::new().exclude(".");
        let err = enumerate(dir.path(), &rules).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::UnsafeCleanRequest)
        ));
    }

    #[test]
    fn test_missing_root_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = Scanner::new(dir.path().join("absent")).scan_paths().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::NotFound { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_followed_and_listed() {
        use std::os::unix::fs::symlink;

        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("shared.dat"), "shared").unwrap();
        fs::write(dir.path().join("real.txt"), "real").unwrap();
        symlink("real.txt", dir.path().join("alias.txt")).unwrap();
        symlink(outside.path(), dir.path().join("linked")).unwrap();
        symlink("missing-target", dir.path().join("dangling")).unwrap();

        let paths = Scanner::new(dir.path()).scan_paths().unwrap();
        assert_eq!(
            names(&paths),
            vec!["alias.txt", "dangling", "linked/shared.dat", "real.txt"]
        );
    }
}
