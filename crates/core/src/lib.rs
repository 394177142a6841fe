//! msync-core: manifest model and local sync engine
//!
//! Provides prefix checksums, the manifest format, rule-based enumeration,
//! manifest generation, directory diffing and cleaning.

pub mod checksum;
pub mod clean;
pub mod config;
pub mod diff;
pub mod error;
pub mod generate;
pub mod manifest;
pub mod rules;
pub mod scan;
pub mod stat;
pub mod tags;

pub use checksum::Checksum;
pub use clean::{clean, clean_dir};
pub use config::MsyncConfig;
pub use diff::{Changes, diff};
pub use error::SyncError;
pub use generate::{GenerateOptions, Refresh, generate, refresh_entry};
pub use manifest::{FileEntry, MANIFEST_BASENAME, Manifest};
pub use rules::PathRules;
pub use scan::{Scanner, enumerate};
pub use tags::parse_tag_index;
