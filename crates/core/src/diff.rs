//! Compare a local directory against a manifest
//!
//! Produces the entries whose declared state does not match what is on disk.
//! Only manifest paths are inspected; extra local files are the cleaner's job.

use std::collections::BTreeMap;
use std::path::Path;

use color_eyre::Result;
use tracing::{debug, info};

use crate::checksum::Checksum;
use crate::manifest::{FileEntry, Manifest};
use crate::stat::{LocalState, local_state};

/// Entries requiring a download or symlink, keyed by path
pub type Changes = BTreeMap<String, FileEntry>;

/// Compute the entries of `manifest` that are out of date under `local_dir`
///
/// # Errors
/// Returns an error if a local file exists but cannot be inspected or read
pub fn diff(local_dir: &Path, manifest: &Manifest) -> Result<Changes> {
    let mut changes = Changes::new();

    for (path, entry) in &manifest.files {
        if needs_action(&local_dir.join(path), entry, manifest.checksum_bytes)? {
            debug!("{path} differs from manifest");
            changes.insert(path.clone(), entry.clone());
        }
    }

    info!(
        "{} of {} manifest entries need updating in {}",
        changes.len(),
        manifest.len(),
        local_dir.display()
    );
    Ok(changes)
}

/// Whether the file at `full_path` differs from `entry`
///
/// # Errors
/// Returns an error if the path cannot be inspected or read
pub fn needs_action(full_path: &Path, entry: &FileEntry, checksum_bytes: u64) -> Result<bool> {
    let state = local_state(full_path)?;

    Ok(match (entry, state) {
        (FileEntry::Symlink { symlink, .. }, LocalState::Symlink { target }) => *symlink != target,
        (
            FileEntry::Regular {
                checksum,
                mode,
                size,
                ..
            },
            LocalState::File {
                size: local_size,
                mode: local_mode,
            },
        ) => {
            *size != local_size
                || *mode != local_mode
                || *checksum != Checksum::from_file(full_path, checksum_bytes)?
        }
        _ => true,
    })
}

/// Keep only the requested paths; unknown or up-to-date names are dropped
#[must_use]
pub fn restrict<S: AsRef<str>>(changes: Changes, wanted: &[S]) -> Changes {
    if wanted.is_empty() {
        return changes;
    }
    changes
        .into_iter()
        .filter(|(path, _)| wanted.iter().any(|w| w.as_ref() == path))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::{GenerateOptions, generate};
    use std::fs;
    use tempfile::TempDir;

    fn entry_for(content: &[u8], mode: u32) -> FileEntry {
        FileEntry::Regular {
            checksum: Checksum::from_bytes(content),
            mode,
            size: content.len() as u64,
            tag: "v1".to_string(),
        }
    }

    #[test]
    fn test_missing_file_needs_action() {
        let dir = TempDir::new().unwrap();
        let mut manifest = Manifest::new(1000);
        manifest
            .files
            .insert("a.txt".to_string(), entry_for(b"hello", 0o100_644));

        let changes = diff(dir.path(), &manifest).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.get("a.txt"), manifest.get("a.txt"));
    }

    #[test]
    fn test_generated_manifest_has_no_changes() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("a.txt"), "alpha").unwrap();
        fs::write(dir.path().join("sub/b.bin"), [0u8, 1, 2, 3]).unwrap();

        let manifest = generate(dir.path(), None, &GenerateOptions::new("v1")).unwrap();
        assert!(diff(dir.path(), &manifest).unwrap().is_empty());
    }

    #[test]
    fn test_changes_within_and_beyond_prefix() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "0123456789tail").unwrap();
        fs::write(dir.path().join("b.txt"), "0123456789tail").unwrap();

        let mut options = GenerateOptions::new("v1");
        options.checksum_bytes = 10;
        let manifest = generate(dir.path(), None, &options).unwrap();

        // Same size, change past the checksummed prefix: not detected
        fs::write(dir.path().join("a.txt"), "0123456789TAIL").unwrap();
        // Same size, change inside the prefix: detected
        fs::write(dir.path().join("b.txt"), "X123456789tail").unwrap();

        let changes = diff(dir.path(), &manifest).unwrap();
        assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["b.txt"]);
    }

    #[test]
    fn test_size_change_detected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), "short").unwrap();
        let manifest = generate(dir.path(), None, &GenerateOptions::new("v1")).unwrap();

        fs::write(dir.path().join("a.txt"), "longer content").unwrap();
        assert_eq!(diff(dir.path(), &manifest).unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_mode_change_detected() {
        use std::os::unix::fs::PermissionsExt as _;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tool");
        fs::write(&path, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        let manifest = generate(dir.path(), None, &GenerateOptions::new("v1")).unwrap();

        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(diff(dir.path(), &manifest).unwrap().len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_fidelity() {
        use std::os::unix::fs::symlink;

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("one"), "1").unwrap();
        fs::write(dir.path().join("plain"), "p").unwrap();
        symlink("one", dir.path().join("link")).unwrap();
        let manifest = generate(dir.path(), None, &GenerateOptions::new("v1")).unwrap();
        assert!(diff(dir.path(), &manifest).unwrap().is_empty());

        // Retargeted link
        fs::remove_file(dir.path().join("link")).unwrap();
        symlink("two", dir.path().join("link")).unwrap();
        // Regular file replaced by a symlink
        fs::remove_file(dir.path().join("plain")).unwrap();
        symlink("one", dir.path().join("plain")).unwrap();

        let changes = diff(dir.path(), &manifest).unwrap();
        assert_eq!(changes.keys().collect::<Vec<_>>(), vec!["link", "plain"]);

        // Symlink replaced by a regular file
        fs::remove_file(dir.path().join("link")).unwrap();
        fs::write(dir.path().join("link"), "one").unwrap();
        assert!(diff(dir.path(), &manifest).unwrap().contains_key("link"));
    }

    #[test]
    fn test_directory_in_place_of_file() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("a.txt")).unwrap();
        let mut manifest = Manifest::new(1000);
        manifest
            .files
            .insert("a.txt".to_string(), entry_for(b"x", 0o100_644));
        assert_eq!(diff(dir.path(), &manifest).unwrap().len(), 1);
    }

    #[test]
    fn test_restrict() {
        let mut changes = Changes::new();
        changes.insert("a".to_string(), entry_for(b"a", 0o100_644));
        changes.insert("b".to_string(), entry_for(b"b", 0o100_644));

        let only_b = restrict(changes.clone(), &["b", "zzz"]);
        assert_eq!(only_b.keys().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(restrict(changes, &[] as &[&str]).len(), 2);
    }
}
