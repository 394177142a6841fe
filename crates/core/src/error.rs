//! Error kinds surfaced by sync operations
//!
//! Functions in this workspace return `color_eyre::Result`. The variants here
//! are raised where a caller may need to branch on the failure kind, and can be
//! recovered from a report with `downcast_ref::<SyncError>()`.

use std::path::PathBuf;

/// Typed failures of manifest, transfer and clean operations
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// A manifest or file required by the operation does not exist
    #[error("not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The server answered with a login page instead of the requested content
    #[error("authentication failure fetching {url} (login page returned)")]
    AuthenticationFailure { url: String },

    /// The server answered with an error status
    #[error("transfer of {url} failed with HTTP status {status}")]
    TransferStatus { url: String, status: u16 },

    /// The connection failed after all retries were used up
    #[error("transfer of {url} failed: {cause}")]
    TransferFailure { url: String, cause: String },

    /// The external decompression tool exited unsuccessfully
    #[error("unable to decompress {}: {status}", path.display())]
    DecompressionFailure { path: PathBuf, status: String },

    /// Manifest JSON is malformed or lacks required keys
    #[error("invalid manifest {}: {reason}", path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    /// An exclude rule of "." was given; nothing is enumerated or deleted
    #[error("refusing to operate with an exclude-everything (\".\") rule")]
    UnsafeCleanRequest,

    /// A colon-separated value path named a key that does not exist
    #[error("path not found, invalid part: {part}")]
    PathNotFound { part: String },

    /// Conflicting or incomplete options
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl SyncError {
    /// Whether the failure came from the remote side of a transfer
    #[must_use]
    pub fn is_transfer(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailure { .. }
                | Self::TransferStatus { .. }
                | Self::TransferFailure { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_path_and_cause() {
        let err = SyncError::TransferStatus {
            url: "https://host/v1/bundle/a.txt".to_string(),
            status: 404,
        };
        let msg = err.to_string();
        assert!(msg.contains("a.txt"), "{msg}");
        assert!(msg.contains("404"), "{msg}");
        assert!(err.is_transfer());

        let err = SyncError::NotFound {
            path: PathBuf::from("/data/manifest.json"),
        };
        assert!(err.to_string().contains("/data/manifest.json"));
        assert!(!err.is_transfer());
    }

    #[test]
    fn test_downcast_from_report() {
        let report: color_eyre::Report = SyncError::UnsafeCleanRequest.into();
        assert!(matches!(
            report.downcast_ref::<SyncError>(),
            Some(SyncError::UnsafeCleanRequest)
        ));
    }
}
