//! Download orchestration
//!
//! Fetch a bundle's manifest, work out which local paths disagree with it,
//! transfer those, and optionally mirror the result into a local tree that
//! can later serve as a [`LocalSource`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, eyre};
use tracing::{debug, info, warn};

use msync_core::diff::restrict;
use msync_core::{Changes, FileEntry, MANIFEST_BASENAME, Manifest, SyncError, diff, parse_tag_index};

use crate::batch::{BatchOptions, BatchReport, Downloader};
use crate::http::{HttpClient, HttpSource};
use crate::local::LocalSource;
use crate::{FetchOptions, FileSource, remote_path};

/// What to download and where
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Directory brought in line with the manifest
    pub dest_dir: PathBuf,
    /// Tag to fetch; taken from the local manifest when absent
    pub tag: Option<String>,
    /// Bundle name; taken from the local manifest when absent
    pub name: Option<String>,
    /// Only consider these paths (all when empty)
    pub files: Vec<String>,
    /// Mirror the downloaded bundle under `save_dir/tag/name/`
    pub save_dir: Option<PathBuf>,
    pub batch: BatchOptions,
}

/// Manifest and changes resolved for one download run
#[derive(Debug)]
pub struct DownloadPlan {
    pub manifest: Manifest,
    pub tag: String,
    pub name: String,
    /// Entries whose local paths need action
    pub changes: Changes,
}

/// Outcome of a download run
#[derive(Debug)]
pub struct DownloadReport {
    pub manifest: Manifest,
    pub tag: String,
    pub name: String,
    pub batch: BatchReport,
}

/// Choose between the HTTP tree at `base_url` and a local mirror
///
/// # Errors
/// Returns [`SyncError::Config`] when a mirror is both the source and the save target
pub fn select_source(
    client: HttpClient,
    base_url: &str,
    local_dir: Option<&Path>,
    save_dir: Option<&Path>,
) -> Result<Arc<dyn FileSource>> {
    match (local_dir, save_dir) {
        (Some(_), Some(_)) => Err(SyncError::Config {
            reason: "a local mirror cannot also be the save directory".to_string(),
        }
        .into()),
        (Some(local), None) => Ok(Arc::new(LocalSource::new(local))),
        (None, _) => Ok(Arc::new(HttpSource::new(client, base_url))),
    }
}

/// Resolve tag and name, fetch the manifest and diff the destination
///
/// # Errors
/// Fails if the tag or name cannot be determined, or the manifest cannot be
/// fetched or parsed
pub async fn prepare(downloader: &Downloader, options: &DownloadOptions) -> Result<DownloadPlan> {
    let dest_dir = &options.dest_dir;
    tokio::fs::create_dir_all(dest_dir)
        .await
        .wrap_err_with(|| format!("creating {}", dest_dir.display()))?;

    let manifest_path = dest_dir.join(MANIFEST_BASENAME);
    let (tag, name) = match (&options.tag, &options.name) {
        (Some(tag), Some(name)) => (tag.clone(), name.clone()),
        (tag, name) => {
            let local = Manifest::load(&manifest_path)
                .wrap_err("tag and name are required when no local manifest exists")?;
            let tag = match tag {
                Some(tag) => tag.clone(),
                None => local
                    .current_tag()
                    .ok_or_else(|| eyre!("{} lists no tags", manifest_path.display()))?
                    .to_string(),
            };
            let name = match name {
                Some(name) => name.clone(),
                None => local
                    .name
                    .clone()
                    .ok_or_else(|| eyre!("{} has no bundle name", manifest_path.display()))?,
            };
            (tag, name)
        }
    };

    debug!("Fetching manifest for {name} at {tag}");
    downloader
        .fetch(&tag, &name, MANIFEST_BASENAME, &manifest_path, &FetchOptions::forced())
        .await
        .wrap_err_with(|| format!("fetching manifest for {name} at {tag}"))?;
    let manifest = Manifest::load(&manifest_path)?;

    let changes = restrict(diff(dest_dir, &manifest)?, &options.files);
    info!("{} of {} files need updating", changes.len(), manifest.len());

    Ok(DownloadPlan {
        manifest,
        tag,
        name,
        changes,
    })
}

impl DownloadPlan {
    /// Transfer the planned changes, then mirror if requested
    ///
    /// # Errors
    /// Fails only if mirroring fails; per-file transfer failures are in the report
    pub async fn run(
        self,
        downloader: &Downloader,
        options: &DownloadOptions,
        progress: &(dyn Fn(&str, bool) + Sync),
    ) -> Result<DownloadReport> {
        let batch = if self.changes.is_empty() {
            info!("No files require downloading");
            BatchReport::default()
        } else {
            downloader
                .fetch_batch(&self.name, &options.dest_dir, &self.changes, &options.batch, progress)
                .await
        };

        if let Some(save_dir) = &options.save_dir {
            save_mirror(&options.dest_dir, save_dir, &self.manifest, &self.tag, &self.name).await?;
        }

        Ok(DownloadReport {
            manifest: self.manifest,
            tag: self.tag,
            name: self.name,
            batch,
        })
    }
}

/// Bring `options.dest_dir` in line with the remote manifest
///
/// # Errors
/// See [`prepare`] and [`DownloadPlan::run`]
pub async fn download(downloader: &Downloader, options: &DownloadOptions) -> Result<DownloadReport> {
    prepare(downloader, options)
        .await?
        .run(downloader, options, &|_, _| {})
        .await
}

/// Copy the manifest and every regular file into `save_dir` using the remote layout
async fn save_mirror(dest_dir: &Path, save_dir: &Path, manifest: &Manifest, tag: &str, name: &str) -> Result<()> {
    copy_into(
        &dest_dir.join(MANIFEST_BASENAME),
        &save_dir.join(remote_path(tag, name, MANIFEST_BASENAME)),
    )
    .await?;

    let mut saved = 0usize;
    for (path, entry) in &manifest.files {
        let FileEntry::Regular { mode, tag, .. } = entry else {
            continue;
        };
        let src = dest_dir.join(path);
        if !src.is_file() {
            warn!("Not saving {path}: missing from {}", dest_dir.display());
            continue;
        }
        let dst = save_dir.join(remote_path(tag, name, path));
        copy_into(&src, &dst).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            tokio::fs::set_permissions(&dst, std::fs::Permissions::from_mode(mode & 0o7777)).await?;
        }
        let _ = mode; // Suppress unused warning on non-Unix
        saved += 1;
    }

    info!("Saved {saved} files to {}", save_dir.display());
    Ok(())
}

async fn copy_into(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(src, dst)
        .await
        .wrap_err_with(|| format!("copying {} to {}", src.display(), dst.display()))?;
    Ok(())
}

/// Tags published under `base_url`, in index order
///
/// # Errors
/// Returns the transfer failure for the index page
pub async fn list_tags(client: &HttpClient, base_url: &str) -> Result<Vec<String>> {
    let url = format!("{}/", base_url.trim_end_matches('/'));
    let page = client.fetch_text(&url).await?;
    Ok(parse_tag_index(&page))
}
