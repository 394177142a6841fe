//! Manifest generation: reconcile a live directory against a base manifest
//!
//! Unchanged files keep their existing entry, including the tag of the
//! version in which they last changed. New or changed files are recorded
//! under the tag being authored.

use std::path::{Path, PathBuf};

use color_eyre::Result;
use tracing::{debug, info, warn};

use crate::checksum::Checksum;
use crate::manifest::{DEFAULT_CHECKSUM_BYTES, FileEntry, MANIFEST_BASENAME, Manifest};
use crate::rules::PathRules;
use crate::scan::Scanner;
use crate::stat::{LocalState, local_state};

/// Parameters of one generation run
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Tag being authored; becomes the manifest's only tag
    pub tag: String,
    pub rules: PathRules,
    /// Prefix length for new manifests; a base manifest keeps its own value
    pub checksum_bytes: u64,
    /// Bundle name to record, if any
    pub name: Option<String>,
}

impl GenerateOptions {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            rules: PathRules::new(),
            checksum_bytes: DEFAULT_CHECKSUM_BYTES,
            name: None,
        }
    }
}

/// What a single-path refresh did to the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    Added,
    Updated,
    Unchanged,
    /// The path no longer exists; its entry was dropped
    Removed,
}

/// Load the base manifest to generate from
///
/// An explicit `base` path is used if given, otherwise `directory/manifest.json`.
/// A missing or empty file yields `None`.
///
/// # Errors
/// Returns an error if the file exists but cannot be parsed
pub fn load_base(directory: &Path, base: Option<&Path>) -> Result<Option<Manifest>> {
    let path: PathBuf = base.map_or_else(|| directory.join(MANIFEST_BASENAME), Path::to_path_buf);

    match std::fs::metadata(&path) {
        Ok(meta) if meta.is_file() && meta.len() > 0 => {
            debug!("Using base manifest {}", path.display());
            Manifest::load(&path).map(Some)
        }
        _ => Ok(None),
    }
}

/// Generate a manifest for `directory`
///
/// # Errors
/// Returns an error if enumeration fails or a file cannot be read
pub fn generate(
    directory: &Path,
    base: Option<Manifest>,
    options: &GenerateOptions,
) -> Result<Manifest> {
    let mut manifest = match base {
        Some(base) if !base.is_empty() || !base.tags.is_empty() => {
            if base.checksum_bytes != options.checksum_bytes {
                warn!(
                    "Base manifest checksums cover {} bytes; keeping that instead of {}",
                    base.checksum_bytes, options.checksum_bytes
                );
            }
            base
        }
        _ => Manifest::new(options.checksum_bytes),
    };

    manifest.tags = vec![options.tag.clone()];
    if let Some(name) = &options.name {
        manifest.name = Some(name.clone());
    }

    let paths = Scanner::new(directory)
        .rules(options.rules.clone())
        .scan_paths()?;

    let before = manifest.len();
    manifest.files.retain(|path, _| paths.contains(path));
    let removed = before - manifest.len();

    let mut changed = 0usize;
    for path in &paths {
        if is_manifest_file(path) {
            continue;
        }
        match refresh_entry(&mut manifest, directory, path, &options.tag)? {
            Refresh::Added | Refresh::Updated => changed += 1,
            Refresh::Unchanged | Refresh::Removed => {}
        }
    }

    info!(
        "Generated manifest for {} with {} files ({changed} new or changed, {removed} removed)",
        directory.display(),
        manifest.len()
    );
    Ok(manifest)
}

/// Bring one path's entry in line with the file on disk
///
/// Symlinks are recorded when their target differs; regular files when their
/// size or checksum differs. New entries carry `tag`.
///
/// # Errors
/// Returns an error if the file cannot be read
pub fn refresh_entry(
    manifest: &mut Manifest,
    directory: &Path,
    path: &str,
    tag: &str,
) -> Result<Refresh> {
    let full_path = directory.join(path);
    let current = manifest.files.get(path);

    let entry = match local_state(&full_path)? {
        LocalState::Missing => {
            return Ok(if manifest.files.remove(path).is_some() {
                Refresh::Removed
            } else {
                Refresh::Unchanged
            });
        }
        LocalState::Symlink { target } => {
            if current.and_then(FileEntry::symlink_target) == Some(target.as_str()) {
                return Ok(Refresh::Unchanged);
            }
            FileEntry::Symlink {
                symlink: target,
                tag: tag.to_string(),
            }
        }
        LocalState::Other => {
            warn!("Skipping {path}: not a regular file or symlink");
            return Ok(Refresh::Unchanged);
        }
        LocalState::File { size, mode } => {
            let checksum = Checksum::from_file(&full_path, manifest.checksum_bytes)?;
            if let Some(FileEntry::Regular {
                checksum: old_checksum,
                size: old_size,
                ..
            }) = current
                && *old_size == size
                && *old_checksum == checksum
            {
                return Ok(Refresh::Unchanged);
            }
            FileEntry::Regular {
                checksum,
                mode,
                size,
                tag: tag.to_string(),
            }
        }
    };

    debug!("Recording {path} under {tag}");
    let previous = manifest.files.insert(path.to_string(), entry);
    Ok(if previous.is_some() {
        Refresh::Updated
    } else {
        Refresh::Added
    })
}

fn is_manifest_file(path: &str) -> bool {
    path.rsplit('/').next() == Some(MANIFEST_BASENAME)
}
