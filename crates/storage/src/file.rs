//! File metadata produced while walking a site tree.

use std::path::PathBuf;
use time::OffsetDateTime;

/// A regular file discovered under a site root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// Forward-slash path relative to the site root (see [`path_key`](crate::path_key))
    pub key: String,
    /// Relative path from the site root
    pub path: PathBuf,
    /// Absolute path on disk
    pub absolute: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: OffsetDateTime,
}
