//! msync-transport: transfer engine
//!
//! Fetches manifest entries from a remote bundle tree (`base/tag/name/path`)
//! over HTTP, or from a local mirror with the same layout, and applies them
//! to a destination directory.

pub mod batch;
pub mod decompress;
pub mod download;
pub mod http;
pub mod local;

use std::path::Path;

use async_trait::async_trait;
use color_eyre::Result;

pub use batch::{BatchOptions, BatchReport, Downloader};
pub use decompress::{CommandDecompressor, Decompressor};
pub use download::{DownloadOptions, DownloadPlan, DownloadReport, download, list_tags, prepare, select_source};
pub use http::{ClientConfig, HttpClient, HttpSource};
pub use local::LocalSource;

/// Per-transfer switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Transfer even if the local copy looks current
    pub force: bool,
    /// Decompress `.Z`, `.gz` and `.bz2` files after transfer
    pub uncompress: bool,
}

impl FetchOptions {
    /// Unconditional transfer without decompression
    #[must_use]
    pub fn forced() -> Self {
        Self {
            force: true,
            uncompress: false,
        }
    }
}

/// What happened to one destination path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Content was written
    Downloaded { bytes: u64 },
    /// The remote reported the content unchanged
    NotModified,
    /// The local copy is newer than the remote; nothing was written
    Skipped,
    /// A symbolic link was (re)created
    Linked,
    /// Abandoned before starting because an earlier transfer failed
    Cancelled,
}

impl FetchOutcome {
    /// Whether anything was written to disk
    #[must_use]
    pub fn wrote(&self) -> bool {
        matches!(self, Self::Downloaded { .. } | Self::Linked)
    }
}

/// Where bundle files come from
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Fetch `remote_path` (`tag/name/path`) into `dest`
    async fn fetch(&self, remote_path: &str, dest: &Path, options: &FetchOptions)
    -> Result<FetchOutcome>;

    /// Human-readable location of `remote_path`, for logs and errors
    fn locate(&self, remote_path: &str) -> String;
}

/// Relative location of a bundle file within the tag tree
#[must_use]
pub fn remote_path(tag: &str, name: &str, path: &str) -> String {
    format!("{tag}/{name}/{path}")
}

/// Temporary sibling a transfer writes into before renaming over `dest`
///
/// Each call yields a fresh name, so concurrent transfers never share one.
#[must_use]
pub fn part_path(dest: &Path) -> std::path::PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{}.part", uuid::Uuid::new_v4().simple()));
    dest.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_path_layout() {
        assert_eq!(remote_path("V1", "bundle", "bin/tool"), "V1/bundle/bin/tool");
    }

    #[test]
    fn test_part_path_is_unique_sibling() {
        let dest = Path::new("/data/a.txt");
        let first = part_path(dest);
        let second = part_path(dest);

        assert_ne!(first, second);
        assert_eq!(first.parent(), dest.parent());
        let name = first.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("a.txt.") && name.ends_with(".part"), "{name}");

        // A sibling literally named `a.txt.part` never collides with a temporary of `a.txt`
        assert_ne!(first, Path::new("/data/a.txt.part"));
        assert_ne!(part_path(Path::new("/data/a.txt.part")), first);
    }
}
