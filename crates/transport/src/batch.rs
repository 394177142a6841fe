//! Applying manifest entries to a destination directory
//!
//! Regular entries are fetched from a [`FileSource`] and given their declared
//! mode; symlink entries are recreated locally without any transfer. Batches
//! run on a bounded number of concurrent transfers, and one file's failure
//! never stops its siblings.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use color_eyre::Result;
use color_eyre::eyre::eyre;
use futures::StreamExt as _;
use futures::stream;
use tracing::{debug, warn};

use msync_core::{Changes, FileEntry};

use crate::decompress::{CommandDecompressor, Decompressor, compression_suffix};
use crate::{FetchOptions, FetchOutcome, FileSource, remote_path};

/// Batch scheduling switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum transfers in flight
    pub concurrency: usize,
    /// Abandon transfers not yet started once one fails
    pub fail_fast: bool,
    /// Decompress `.Z`, `.gz` and `.bz2` files after transfer
    pub uncompress: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fail_fast: false,
            uncompress: false,
        }
    }
}

/// Per-path results of a batch, ordered by path
#[derive(Debug, Default)]
pub struct BatchReport {
    pub results: Vec<(String, Result<FetchOutcome>)>,
}

impl BatchReport {
    /// Paths that failed, with their cause
    pub fn failures(&self) -> impl Iterator<Item = (&str, &color_eyre::Report)> {
        self.results
            .iter()
            .filter_map(|(path, result)| result.as_ref().err().map(|e| (path.as_str(), e)))
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    /// Paths written (downloaded or linked)
    #[must_use]
    pub fn written(&self) -> usize {
        self.count(FetchOutcome::wrote)
    }

    #[must_use]
    pub fn cancelled(&self) -> usize {
        self.count(|o| *o == FetchOutcome::Cancelled)
    }

    fn count(&self, pred: impl Fn(&FetchOutcome) -> bool) -> usize {
        self.results
            .iter()
            .filter(|(_, r)| r.as_ref().is_ok_and(&pred))
            .count()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed() == 0 && self.cancelled() == 0
    }

    /// Single error summarizing the failures, if there were any
    #[must_use]
    pub fn summary_error(&self) -> Option<color_eyre::Report> {
        if self.is_success() {
            return None;
        }
        let first = self
            .failures()
            .next()
            .map(|(path, e)| format!("; first failure {path}: {e}"))
            .unwrap_or_default();
        Some(eyre!(
            "{} of {} files failed ({} not attempted){first}",
            self.failed(),
            self.results.len(),
            self.cancelled()
        ))
    }
}

/// Applies manifest entries using a source and a decompressor
#[derive(Clone)]
pub struct Downloader {
    source: Arc<dyn FileSource>,
    decompressor: Arc<dyn Decompressor>,
}

impl Downloader {
    /// Downloader over `source`, decompressing with external tools
    pub fn new(source: Arc<dyn FileSource>) -> Self {
        Self {
            source,
            decompressor: Arc::new(CommandDecompressor),
        }
    }

    /// Replace the decompressor
    #[must_use]
    pub fn with_decompressor(mut self, decompressor: Arc<dyn Decompressor>) -> Self {
        self.decompressor = decompressor;
        self
    }

    #[must_use]
    pub fn source(&self) -> &dyn FileSource {
        self.source.as_ref()
    }

    /// Fetch `tag/name/path` into `dest`, decompressing afterwards if asked
    ///
    /// # Errors
    /// Returns the source's failure, or [`msync_core::SyncError::DecompressionFailure`]
    pub async fn fetch(
        &self,
        tag: &str,
        name: &str,
        path: &str,
        dest: &Path,
        options: &FetchOptions,
    ) -> Result<FetchOutcome> {
        self.fetch_to_final(tag, name, path, dest, options)
            .await
            .map(|(outcome, _)| outcome)
    }

    /// [`Downloader::fetch`], also returning where the content ended up
    async fn fetch_to_final(
        &self,
        tag: &str,
        name: &str,
        path: &str,
        dest: &Path,
        options: &FetchOptions,
    ) -> Result<(FetchOutcome, PathBuf)> {
        let remote = remote_path(tag, name, path);
        debug!("Fetching {}", self.source.locate(&remote));
        let outcome = self.source.fetch(&remote, dest, options).await?;

        if options.uncompress
            && matches!(outcome, FetchOutcome::Downloaded { .. })
            && compression_suffix(dest).is_some()
        {
            let expanded = self.decompressor.decompress(dest).await?;
            return Ok((outcome, expanded));
        }
        Ok((outcome, dest.to_path_buf()))
    }

    /// Bring `dest_dir/path` in line with `entry`
    ///
    /// Regular files are fetched unconditionally from the entry's own tag,
    /// decompressed if `uncompress` is set, and the resulting file gets the
    /// entry's mode; symlinks are recreated.
    ///
    /// # Errors
    /// Returns the transfer, decompression, link or permission failure for this path
    pub async fn apply_entry(
        &self,
        name: &str,
        dest_dir: &Path,
        path: &str,
        entry: &FileEntry,
        uncompress: bool,
    ) -> Result<FetchOutcome> {
        let dest = dest_dir.join(path);
        match entry {
            FileEntry::Symlink { symlink, .. } => {
                debug!("Linking {} -> {symlink}", dest.display());
                make_symlink(&dest, symlink).await?;
                Ok(FetchOutcome::Linked)
            }
            FileEntry::Regular { mode, tag, .. } => {
                let options = FetchOptions {
                    force: true,
                    uncompress,
                };
                let (outcome, written) = self.fetch_to_final(tag, name, path, &dest, &options).await?;
                if outcome.wrote() {
                    set_mode(&written, *mode).await?;
                }
                Ok(outcome)
            }
        }
    }

    /// Apply every entry of `changes`, reporting each path independently
    ///
    /// `progress` is called once per finished path with whether it succeeded.
    pub async fn fetch_batch(
        &self,
        name: &str,
        dest_dir: &Path,
        changes: &Changes,
        options: &BatchOptions,
        progress: &(dyn Fn(&str, bool) + Sync),
    ) -> BatchReport {
        let abort = AtomicBool::new(false);
        let abort = &abort;

        let mut results: Vec<(String, Result<FetchOutcome>)> = stream::iter(changes.iter())
            .map(|(path, entry)| async move {
                if abort.load(Ordering::SeqCst) {
                    return (path.clone(), Ok(FetchOutcome::Cancelled));
                }

                let result = self
                    .apply_entry(name, dest_dir, path, entry, options.uncompress)
                    .await;
                match &result {
                    Ok(outcome) => debug!("{path}: {outcome:?}"),
                    Err(e) => {
                        warn!("Failed to update {path}: {e}");
                        if options.fail_fast {
                            abort.store(true, Ordering::SeqCst);
                        }
                    }
                }
                progress(path, result.is_ok());
                (path.clone(), result)
            })
            .buffer_unordered(options.concurrency.max(1))
            .collect()
            .await;

        results.sort_by(|a, b| a.0.cmp(&b.0));
        BatchReport { results }
    }
}

/// Replace whatever is at `dest` with a symlink to `target`
async fn make_symlink(dest: &Path, target: &str) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match tokio::fs::symlink_metadata(dest).await {
        Ok(meta) if meta.is_dir() => {
            return Err(eyre!("{} is a directory, not replacing it", dest.display()));
        }
        Ok(_) => match tokio::fs::remove_file(dest).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    #[cfg(unix)]
    {
        tokio::fs::symlink(target, dest).await?;
        Ok(())
    }
    #[cfg(not(unix))]
    {
        Err(eyre!(
            "cannot create symlink {} -> {target} on this platform",
            dest.display()
        ))
    }
}

/// Apply the permission bits of a manifest mode
async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        let perms = std::fs::Permissions::from_mode(mode & 0o7777);
        tokio::fs::set_permissions(path, perms).await?;
    }
    let _ = (path, mode); // Suppress unused warning on non-Unix

    Ok(())
}
