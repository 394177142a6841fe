//! msync configuration file parsing (.msync.toml)

use std::path::Path;

/// Base URL of the public tag tree
pub const DEFAULT_BASE_URL: &str = "https://oceandata.sci.gsfc.nasa.gov/manifest/tags";

/// Bytes written per streamed chunk
pub const DEFAULT_CHUNK_SIZE: usize = 131_072;

/// Config file name
pub const CONFIG_FILE: &str = ".msync.toml";

/// Defaults for commands, overridable on the command line
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default)]
pub struct MsyncConfig {
    /// Remote tag tree
    pub base_url: String,

    /// Download chunk size in bytes
    pub chunk_size: usize,

    /// Retries per request after a connection failure
    pub retries: u32,

    /// Connect and read-stall timeout in seconds
    pub timeout_secs: u64,

    /// Parallel file transfers
    pub concurrency: usize,

    /// Paths to ignore during generate and clean
    pub exclude: Vec<String>,

    /// Paths to keep even when excluded
    pub include: Vec<String>,
}

impl Default for MsyncConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            retries: 5,
            timeout_secs: 30,
            concurrency: 4,
            exclude: Vec::new(),
            include: Vec::new(),
        }
    }
}

impl MsyncConfig {
    /// Load config from a directory.
    ///
    /// Returns default config if .msync.toml doesn't exist.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(root: &Path) -> color_eyre::Result<Self> {
        let config_path = root.join(CONFIG_FILE);
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }
}
