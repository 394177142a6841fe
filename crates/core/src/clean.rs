//! Remove local files that the manifest does not declare

use std::io;
use std::path::Path;

use color_eyre::Result;
use tracing::{debug, info};

use crate::error::SyncError;
use crate::manifest::{MANIFEST_BASENAME, Manifest};
use crate::rules::PathRules;
use crate::scan::Scanner;

/// Delete every enumerated path under `directory` that is absent from `manifest`
///
/// Returns the removed paths (or, with `dry_run`, the paths that would be
/// removed). An exclude-everything rule refuses before touching anything.
///
/// # Errors
/// Returns [`SyncError::UnsafeCleanRequest`] for a `"."` exclude rule, or the
/// first enumeration or deletion failure
pub fn clean(
    directory: &Path,
    manifest: &Manifest,
    rules: &PathRules,
    dry_run: bool,
) -> Result<Vec<String>> {
    if rules.excludes_everything() {
        return Err(SyncError::UnsafeCleanRequest.into());
    }

    let candidates = Scanner::new(directory).rules(rules.clone()).scan_paths()?;

    let mut removed = Vec::new();
    for path in candidates {
        if path == MANIFEST_BASENAME || manifest.files.contains_key(&path) {
            continue;
        }

        if dry_run {
            debug!("Would clean {path}");
        } else {
            match std::fs::remove_file(directory.join(&path)) {
                Ok(()) => debug!("Cleaned {path}"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{path} vanished before it could be cleaned");
                }
                Err(e) => return Err(e.into()),
            }
        }
        removed.push(path);
    }

    info!(
        "{} {} undeclared files in {}",
        if dry_run { "Would clean" } else { "Cleaned" },
        removed.len(),
        directory.display()
    );
    Ok(removed)
}

/// Clean a bundle directory against its own `manifest.json`
///
/// # Errors
/// Returns [`SyncError::UnsafeCleanRequest`] before checking for the manifest,
/// [`SyncError::NotFound`] if the directory has no manifest, or see [`clean`]
pub fn clean_dir(directory: &Path, rules: &PathRules, dry_run: bool) -> Result<Vec<String>> {
    if rules.excludes_everything() {
        return Err(SyncError::UnsafeCleanRequest.into());
    }
    let manifest = Manifest::load_from_dir(directory)?;
    clean(directory, &manifest, rules, dry_run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{GenerateOptions, generate};
    use std::fs;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Manifest) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("data/keep")).unwrap();
        fs::write(dir.path().join("declared.txt"), "d").unwrap();
        fs::write(dir.path().join("data/keep/declared.bin"), "d").unwrap();
        let manifest = generate(dir.path(), None, &GenerateOptions::new("v1")).unwrap();
        manifest.save(&dir.path().join(MANIFEST_BASENAME)).unwrap();

        fs::write(dir.path().join("stray.txt"), "s").unwrap();
        fs::write(dir.path().join("data/keep/stray.bin"), "s").unwrap();
        fs::write(dir.path().join("data/other.bin"), "s").unwrap();
        (dir, manifest)
    }

    #[test]
    fn test_clean_removes_undeclared() {
        let (dir, manifest) = setup();

        let removed = clean(dir.path(), &manifest, &PathRules::new(), false).unwrap();
        assert_eq!(
            removed,
            vec!["data/keep/stray.bin", "data/other.bin", "stray.txt"]
        );
        assert!(!dir.path().join("stray.txt").exists());
        assert!(dir.path().join("declared.txt").exists());
        assert!(dir.path().join(MANIFEST_BASENAME).exists());
    }

    #[test]
    fn test_dry_run_deletes_nothing() {
        let (dir, manifest) = setup();

        let removed = clean(dir.path(), &manifest, &PathRules::new(), true).unwrap();
        assert_eq!(removed.len(), 3);
        assert!(dir.path().join("stray.txt").exists());
        assert!(dir.path().join("data/other.bin").exists());
    }

    #[test]
    fn test_rules_protect_paths() {
        let (dir, manifest) = setup();

        let rules = PathRules::new().exclude("data/").include("data/keep/");
        let removed = clean(dir.path(), &manifest, &rules, false).unwrap();
        assert_eq!(removed, vec!["data/keep/stray.bin", "stray.txt"]);
        assert!(dir.path().join("data/other.bin").exists());
    }

    #[test]
    fn test_exclude_all_removes_nothing() {
        let (dir, manifest) = setup();

        let rules = PathRules::new().exclude(".");
        let err = clean(dir.path(), &manifest, &rules, false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::UnsafeCleanRequest)
        ));
        assert!(dir.path().join("stray.txt").exists());
        assert!(dir.path().join("data/other.bin").exists());
    }

    #[test]
    fn test_clean_dir_requires_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        let err = clean_dir(dir.path(), &PathRules::new(), false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::NotFound { .. })
        ));
        assert!(dir.path().join("a.txt").exists());
    }

    #[test]
    fn test_clean_dir_uses_own_manifest() {
        let (dir, _) = setup();
        let removed = clean_dir(dir.path(), &PathRules::new(), false).unwrap();
        assert_eq!(removed.len(), 3);
    }
}
