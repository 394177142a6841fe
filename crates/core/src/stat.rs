//! On-disk state of a single path, without following a final symlink

use std::fs::Metadata;
use std::io;
use std::path::Path;

use color_eyre::Result;

/// What currently lives at a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalState {
    Missing,
    Symlink { target: String },
    File { size: u64, mode: u32 },
    /// Directory, device, socket or fifo
    Other,
}

/// Inspect `path` with `lstat` semantics
///
/// # Errors
/// Returns an error for any failure other than the path not existing
pub fn local_state(path: &Path) -> Result<LocalState> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LocalState::Missing),
        Err(e) => return Err(e.into()),
    };

    let file_type = meta.file_type();
    if file_type.is_symlink() {
        let target = std::fs::read_link(path)?;
        Ok(LocalState::Symlink {
            target: target.to_string_lossy().into_owned(),
        })
    } else if file_type.is_file() {
        Ok(LocalState::File {
            size: meta.len(),
            mode: file_mode(&meta),
        })
    } else {
        Ok(LocalState::Other)
    }
}

/// Full `st_mode` bits, file type included
#[cfg(unix)]
#[must_use]
pub fn file_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt as _;
    meta.mode()
}

/// Synthesized `st_mode` for platforms without one
#[cfg(not(unix))]
#[must_use]
pub fn file_mode(meta: &Metadata) -> u32 {
    const S_IFREG: u32 = 0o100_000;
    if meta.permissions().readonly() {
        S_IFREG | 0o444
    } else {
        S_IFREG | 0o666
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_states() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"abc").unwrap();

        assert_eq!(local_state(&dir.path().join("nope")).unwrap(), LocalState::Missing);
        assert_eq!(local_state(dir.path()).unwrap(), LocalState::Other);
        match local_state(&file).unwrap() {
            LocalState::File { size, mode } => {
                assert_eq!(size, 3);
                assert_eq!(mode & 0o170_000, 0o100_000);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_not_followed() {
        let dir = TempDir::new().unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("does/not/exist", &link).unwrap();

        assert_eq!(
            local_state(&link).unwrap(),
            LocalState::Symlink {
                target: "does/not/exist".to_string()
            }
        );
    }
}
