//! Local mirror source
//!
//! Serves bundle files from a directory laid out like the remote tree
//! (`root/tag/name/path`), such as one populated by `download --save-dir`.
//! Also the transport used by the batch tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use color_eyre::Result;
use tracing::debug;

use msync_core::SyncError;

use crate::{FetchOptions, FetchOutcome, FileSource, part_path};

/// Copies files out of a local mirror
#[derive(Debug, Clone)]
pub struct LocalSource {
    root: PathBuf,
}

impl LocalSource {
    /// Create a source over the given mirror root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl FileSource for LocalSource {
    async fn fetch(&self, remote_path: &str, dest: &Path, options: &FetchOptions) -> Result<FetchOutcome> {
        let src = self.root.join(remote_path);
        let src_meta = match tokio::fs::metadata(&src).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::NotFound { path: src }.into());
            }
            Err(e) => return Err(e.into()),
        };

        if !options.force
            && let Ok(dest_meta) = tokio::fs::metadata(dest).await
            && dest_meta.modified()? > src_meta.modified()?
        {
            debug!("Skipping {}: local copy is newer", dest.display());
            return Ok(FetchOutcome::Skipped);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("Copying {} from {}", dest.display(), src.display());
        let part = part_path(dest);
        let bytes = tokio::fs::copy(&src, &part).await?;
        tokio::fs::rename(&part, dest).await?;
        Ok(FetchOutcome::Downloaded { bytes })
    }

    fn locate(&self, remote_path: &str) -> String {
        self.root.join(remote_path).display().to_string()
    }
}
