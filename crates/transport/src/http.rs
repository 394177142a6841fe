//! HTTP transport using a shared `reqwest` connection pool
//!
//! One [`HttpClient`] is built per run and shared by every transfer. Requests
//! are retried on connection failures, conditional on the local copy's mtime
//! unless forced, and streamed to disk.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use color_eyre::Result;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED};
use tokio::io::{AsyncWriteExt as _, BufWriter};
use tracing::{debug, warn};

use msync_core::SyncError;
use msync_core::config::{DEFAULT_CHUNK_SIZE, MsyncConfig};

use crate::decompress::strip_compression_suffix;
use crate::{FetchOptions, FetchOutcome, FileSource, part_path};

/// Title of the login page an authenticating gateway serves with status 200
const LOGIN_PAGE_MARKER: &str = "<title>Earthdata Login</title>";

/// How much of an HTML body is searched for the login page marker
const LOGIN_SNIFF_BYTES: usize = 8192;

/// RFC 7231 IMF-fixdate
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Retry and streaming policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Further attempts per request after a connection failure
    pub retries: u32,
    /// Limit for connecting, for response headers, and for each body read
    pub timeout: Duration,
    /// Write buffer size while streaming bodies
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            timeout: Duration::from_secs(30),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl From<&MsyncConfig> for ClientConfig {
    fn from(config: &MsyncConfig) -> Self {
        Self {
            retries: config.retries,
            timeout: Duration::from_secs(config.timeout_secs),
            chunk_size: config.chunk_size,
        }
    }
}

/// Reusable HTTP session
///
/// Cloning is cheap and shares the underlying connection pool.
#[derive(Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpClient {
    /// Build a client with the given policy
    ///
    /// # Errors
    /// Returns an error if the TLS backend cannot be initialized
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeout)
            .user_agent(concat!("msync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, config })
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send a GET, retrying connection failures up to the configured count
    async fn get(&self, url: &str, modified_since: Option<DateTime<Utc>>) -> Result<reqwest::Response> {
        let attempts = self.config.retries.saturating_add(1);
        let mut attempt = 1;

        loop {
            let mut request = self.client.get(url);
            if let Some(since) = modified_since {
                request = request.header(IF_MODIFIED_SINCE, since.format(HTTP_DATE_FORMAT).to_string());
            }

            let cause = match tokio::time::timeout(self.config.timeout, request.send()).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(e)) if e.is_connect() || e.is_timeout() => e.to_string(),
                Ok(Err(e)) => return Err(transfer_failure(url, &e)),
                Err(_) => format!("no response within {:?}", self.config.timeout),
            };

            if attempt >= attempts {
                return Err(SyncError::TransferFailure {
                    url: url.to_string(),
                    cause,
                }
                .into());
            }
            warn!("Attempt {attempt}/{attempts} for {url} failed: {cause}; retrying");
            tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
            attempt += 1;
        }
    }

    /// Fetch `url` into `dest`
    ///
    /// Unless forced, the local mtime is sent as `If-Modified-Since` and a
    /// response older than the local copy is not written.
    ///
    /// # Errors
    /// Returns [`SyncError::TransferStatus`], [`SyncError::TransferFailure`] or
    /// [`SyncError::AuthenticationFailure`], or an I/O error writing `dest`
    pub async fn fetch_to(&self, url: &str, dest: &Path, options: &FetchOptions) -> Result<FetchOutcome> {
        let modified_since = if options.force { None } else { local_mtime(dest) };
        let mut response = self.get(url, modified_since).await?;

        let status = response.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!("{url} not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(SyncError::TransferStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let remote_modified = last_modified(&response);
        let prefix = if is_html(&response) {
            let prefix = self.read_prefix(url, &mut response, LOGIN_SNIFF_BYTES).await?;
            if contains_bytes(&prefix, LOGIN_PAGE_MARKER.as_bytes()) {
                return Err(SyncError::AuthenticationFailure {
                    url: url.to_string(),
                }
                .into());
            }
            prefix
        } else {
            Vec::new()
        };

        // Servers that ignore If-Modified-Since still report Last-Modified
        if let (Some(since), Some(remote)) = (modified_since, remote_modified)
            && remote < since
        {
            debug!("Skipping {}: local copy is newer", dest.display());
            return Ok(FetchOutcome::Skipped);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let part = part_path(dest);
        let bytes = match self.stream_to(url, &prefix, response, &part).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        tokio::fs::rename(&part, dest).await?;
        debug!("Downloaded {url} ({bytes} bytes)");
        Ok(FetchOutcome::Downloaded { bytes })
    }

    /// Read body chunks until at least `limit` bytes or the end of the body
    async fn read_prefix(&self, url: &str, response: &mut reqwest::Response, limit: usize) -> Result<Vec<u8>> {
        let mut prefix = Vec::new();
        while prefix.len() < limit {
            match self.next_chunk(url, response).await? {
                Some(chunk) => prefix.extend_from_slice(&chunk),
                None => break,
            }
        }
        Ok(prefix)
    }

    /// Next body chunk, bounded by the timeout
    async fn next_chunk(&self, url: &str, response: &mut reqwest::Response) -> Result<Option<Bytes>> {
        let chunk = tokio::time::timeout(self.config.timeout, response.chunk())
            .await
            .map_err(|_| SyncError::TransferFailure {
                url: url.to_string(),
                cause: format!("stalled for {:?}", self.config.timeout),
            })?
            .map_err(|e| transfer_failure(url, &e))?;
        Ok(chunk)
    }

    /// Write `prefix` and then the rest of the body to `path`
    async fn stream_to(&self, url: &str, prefix: &[u8], mut response: reqwest::Response, path: &Path) -> Result<u64> {
        let file = tokio::fs::File::create(path).await?;
        let mut writer = BufWriter::with_capacity(self.config.chunk_size, file);
        writer.write_all(prefix).await?;
        let mut written = prefix.len() as u64;

        while let Some(chunk) = self.next_chunk(url, &mut response).await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        writer.flush().await?;
        Ok(written)
    }

    /// Fetch `url` as text, e.g. a directory index
    ///
    /// # Errors
    /// Same failure kinds as [`HttpClient::fetch_to`]
    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self.get(url, None).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::TransferStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let text = response.text().await.map_err(|e| transfer_failure(url, &e))?;
        if text.contains(LOGIN_PAGE_MARKER) {
            return Err(SyncError::AuthenticationFailure {
                url: url.to_string(),
            }
            .into());
        }
        Ok(text)
    }
}

/// A [`FileSource`] rooted at a base URL
#[derive(Clone)]
pub struct HttpSource {
    client: HttpClient,
    base_url: String,
}

impl HttpSource {
    #[must_use]
    pub fn new(client: HttpClient, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    #[must_use]
    pub fn client(&self) -> &HttpClient {
        &self.client
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl FileSource for HttpSource {
    async fn fetch(&self, remote_path: &str, dest: &Path, options: &FetchOptions) -> Result<FetchOutcome> {
        self.client.fetch_to(&self.locate(remote_path), dest, options).await
    }

    fn locate(&self, remote_path: &str) -> String {
        format!("{}/{remote_path}", self.base_url)
    }
}

/// Modification time of `dest`, or of its decompressed sibling when only that exists
#[must_use]
pub fn local_mtime(dest: &Path) -> Option<DateTime<Utc>> {
    let candidate = if dest.is_file() {
        dest.to_path_buf()
    } else {
        strip_compression_suffix(dest).filter(|p| p.is_file())?
    };
    let modified = std::fs::metadata(candidate).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

fn last_modified(response: &reqwest::Response) -> Option<DateTime<Utc>> {
    let value = response.headers().get(LAST_MODIFIED)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

fn is_html(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"))
}

fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn transfer_failure(url: &str, err: &reqwest::Error) -> color_eyre::Report {
    SyncError::TransferFailure {
        url: url.to_string(),
        cause: err.to_string(),
    }
    .into()
}
