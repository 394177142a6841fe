//! Manifest: a tagged, versioned declaration of a directory tree
//!
//! Serialized as `manifest.json` with sorted keys and four-space indentation:
//!
//! ```json
//! {
//!     "checksum_bytes": 1000000,
//!     "files": {
//!         "bin/tool": {
//!             "checksum": "9f86d0...",
//!             "mode": 33261,
//!             "size": 5120,
//!             "tag": "v1"
//!         },
//!         "lib/current": {
//!             "symlink": "libtool.so.2",
//!             "tag": "v2"
//!         }
//!     },
//!     "name": "bundle",
//!     "tags": ["v2"]
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::error::SyncError;

/// Well-known manifest file name inside a bundle directory
pub const MANIFEST_BASENAME: &str = "manifest.json";

/// Checksum prefix length used for new manifests
pub const DEFAULT_CHECKSUM_BYTES: u64 = 1_000_000;

/// Declared state of one path
///
/// Field order matches the sorted key order of the on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileEntry {
    /// A regular file, fingerprinted by a prefix checksum
    Regular {
        checksum: Checksum,
        mode: u32,
        size: u64,
        tag: String,
    },
    /// A symbolic link and its target
    Symlink { symlink: String, tag: String },
}

impl FileEntry {
    /// Tag of the version in which this entry last changed
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            Self::Regular { tag, .. } | Self::Symlink { tag, .. } => tag,
        }
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink { .. })
    }

    /// Symlink target, if this is a symlink entry
    #[must_use]
    pub fn symlink_target(&self) -> Option<&str> {
        match self {
            Self::Symlink { symlink, .. } => Some(symlink),
            Self::Regular { .. } => None,
        }
    }

    /// One-line description used by `list --info`
    #[must_use]
    pub fn describe(&self, path: &str) -> String {
        match self {
            Self::Regular {
                checksum,
                size,
                tag,
                ..
            } => format!("{path} {tag}, {size} bytes, {checksum}"),
            Self::Symlink { symlink, tag } => format!("{path} {tag}, -> {symlink}"),
        }
    }
}

/// Root record of one bundle's version history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Leading bytes hashed per file
    pub checksum_bytes: u64,
    /// Declared files keyed by relative `/`-separated path
    #[serde(default)]
    pub files: BTreeMap<String, FileEntry>,
    /// Bundle name used to namespace remote paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Append-only version labels, last is current
    pub tags: Vec<String>,
}

impl Manifest {
    /// Create an empty manifest
    #[must_use]
    pub fn new(checksum_bytes: u64) -> Self {
        Self {
            checksum_bytes,
            files: BTreeMap::new(),
            name: None,
            tags: Vec::new(),
        }
    }

    /// Parse manifest JSON; `origin` is only used in error messages
    ///
    /// # Errors
    /// Returns [`SyncError::InvalidManifest`] on malformed JSON or missing keys
    pub fn from_json_str(text: &str, origin: &Path) -> color_eyre::Result<Self> {
        let invalid = |reason: String| SyncError::InvalidManifest {
            path: origin.to_path_buf(),
            reason,
        };
        let manifest: Self = serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?;
        for path in manifest.files.keys() {
            check_entry_path(path).map_err(|reason| invalid(format!("{path:?}: {reason}")))?;
        }
        Ok(manifest)
    }

    /// Load a manifest file
    ///
    /// # Errors
    /// Returns [`SyncError::NotFound`] if the file is missing and
    /// [`SyncError::InvalidManifest`] if it cannot be parsed
    pub fn load(path: &Path) -> color_eyre::Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::NotFound {
                    path: path.to_path_buf(),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };
        Self::from_json_str(&text, path)
    }

    /// Load `manifest.json` from a bundle directory
    ///
    /// # Errors
    /// See [`Manifest::load`]
    pub fn load_from_dir(dir: &Path) -> color_eyre::Result<Self> {
        Self::load(&dir.join(MANIFEST_BASENAME))
    }

    /// Resolve a manifest argument that may name either a file or its directory
    #[must_use]
    pub fn resolve_path(path: &Path) -> PathBuf {
        if path.is_dir() {
            path.join(MANIFEST_BASENAME)
        } else {
            path.to_path_buf()
        }
    }

    /// Serialize with sorted keys and four-space indentation
    ///
    /// # Errors
    /// Returns an error if serialization fails
    pub fn to_json_pretty(&self) -> color_eyre::Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        Ok(String::from_utf8(buf)?)
    }

    /// Write the manifest to `path`
    ///
    /// # Errors
    /// Returns an error if serialization or the write fails
    pub fn save(&self, path: &Path) -> color_eyre::Result<()> {
        let mut text = self.to_json_pretty()?;
        text.push('\n');
        std::fs::write(path, text)?;
        Ok(())
    }

    /// The current (last) tag
    #[must_use]
    pub fn current_tag(&self) -> Option<&str> {
        self.tags.last().map(String::as_str)
    }

    /// The oldest (first) tag
    #[must_use]
    pub fn first_tag(&self) -> Option<&str> {
        self.tags.first().map(String::as_str)
    }

    /// Append a tag; returns `false` if it was already present
    pub fn add_tag(&mut self, tag: impl Into<String>) -> bool {
        let tag = tag.into();
        if self.tags.contains(&tag) {
            return false;
        }
        self.tags.push(tag);
        true
    }

    /// Append every tag of `other` that is not already present, keeping order
    pub fn merge_tags(&mut self, other: &Self) {
        for tag in &other.tags {
            self.add_tag(tag.clone());
        }
    }

    /// Entries last changed in `tag`
    pub fn entries_for_tag<'a>(
        &'a self,
        tag: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a FileEntry)> + 'a {
        self.files.iter().filter(move |(_, entry)| entry.tag() == tag)
    }

    /// Get an entry by path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        self.files.get(path)
    }

    /// Number of declared files
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Look up a value by colon-separated key path, e.g. `files:a.txt:size`
    ///
    /// Strings are returned bare, containers as compact JSON.
    ///
    /// # Errors
    /// Returns [`SyncError::PathNotFound`] naming the first unknown part
    pub fn get_value(&self, xpath: &str) -> color_eyre::Result<String> {
        let root = serde_json::to_value(self)?;
        let mut current = &root;
        for part in xpath.split(':') {
            current = current.get(part).ok_or_else(|| SyncError::PathNotFound {
                part: part.to_string(),
            })?;
        }

        Ok(match current {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }
}

impl Default for Manifest {
    fn default() -> Self {
        Self::new(DEFAULT_CHECKSUM_BYTES)
    }
}

/// A declared path must stay inside the bundle directory and never name a manifest
fn check_entry_path(path: &str) -> Result<(), &'static str> {
    if path.is_empty() {
        return Err("empty path");
    }
    if path.starts_with('/') || Path::new(path).is_absolute() {
        return Err("absolute path");
    }
    if path.contains('\\') {
        return Err("backslash in path");
    }
    for part in path.split('/') {
        match part {
            "" => return Err("empty path component"),
            "." | ".." => return Err("relative path component"),
            _ => {}
        }
    }
    if path.rsplit('/').next() == Some(MANIFEST_BASENAME) {
        return Err("manifest file cannot be a bundle entry");
    }
    Ok(())
}
