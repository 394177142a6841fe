//! Decompression of downloaded files via external tools

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use color_eyre::Result;
use tokio::process::Command;
use tracing::debug;

use msync_core::SyncError;

/// Suffixes recognized as compressed, and the tool that expands each
const COMPRESSION_TOOLS: &[(&str, &str)] = &[(".gz", "gunzip"), (".Z", "gunzip"), (".bz2", "bunzip2")];

/// Compression suffix of `path`, if any
#[must_use]
pub fn compression_suffix(path: &Path) -> Option<&'static str> {
    let name = path.file_name()?.to_str()?;
    COMPRESSION_TOOLS
        .iter()
        .map(|(suffix, _)| *suffix)
        .find(|suffix| name.len() > suffix.len() && name.ends_with(suffix))
}

/// `path` without its compression suffix
#[must_use]
pub fn strip_compression_suffix(path: &Path) -> Option<PathBuf> {
    let suffix = compression_suffix(path)?;
    let name = path.file_name()?.to_str()?;
    Some(path.with_file_name(&name[..name.len() - suffix.len()]))
}

/// Expands a compressed file in place
#[async_trait]
pub trait Decompressor: Send + Sync {
    /// Decompress `path`, returning the path of the expanded file
    async fn decompress(&self, path: &Path) -> Result<PathBuf>;
}

/// Runs `gunzip -f` or `bunzip2 -f`
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandDecompressor;

#[async_trait]
impl Decompressor for CommandDecompressor {
    async fn decompress(&self, path: &Path) -> Result<PathBuf> {
        let (Some(suffix), Some(expanded)) = (compression_suffix(path), strip_compression_suffix(path))
        else {
            return Ok(path.to_path_buf());
        };
        let tool = COMPRESSION_TOOLS
            .iter()
            .find(|(s, _)| *s == suffix)
            .map_or("gunzip", |(_, tool)| *tool);

        debug!("Decompressing {} with {tool}", path.display());
        let status = Command::new(tool)
            .arg("-f")
            .arg(path)
            .status()
            .await
            .map_err(|e| SyncError::DecompressionFailure {
                path: path.to_path_buf(),
                status: format!("could not run {tool}: {e}"),
            })?;

        if !status.success() {
            return Err(SyncError::DecompressionFailure {
                path: path.to_path_buf(),
                status: status.to_string(),
            }
            .into());
        }
        Ok(expanded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suffixes() {
        assert_eq!(compression_suffix(Path::new("a/b.nc.gz")), Some(".gz"));
        assert_eq!(compression_suffix(Path::new("b.Z")), Some(".Z"));
        assert_eq!(compression_suffix(Path::new("b.bz2")), Some(".bz2"));
        assert_eq!(compression_suffix(Path::new("b.zip")), None);
        assert_eq!(compression_suffix(Path::new(".gz")), None);
        assert_eq!(
            strip_compression_suffix(Path::new("/d/file.hdf.bz2")),
            Some(PathBuf::from("/d/file.hdf"))
        );
        assert_eq!(strip_compression_suffix(Path::new("/d/file.hdf")), None);
    }

    #[tokio::test]
    async fn test_uncompressed_file_passes_through() {
        let path = Path::new("/nonexistent/plain.txt");
        assert_eq!(CommandDecompressor.decompress(path).await.unwrap(), path);
    }

    #[tokio::test]
    async fn test_corrupt_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.gz");
        std::fs::write(&path, b"definitely not gzip").unwrap();

        let err = CommandDecompressor.decompress(&path).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::DecompressionFailure { .. })
        ));
    }
}
