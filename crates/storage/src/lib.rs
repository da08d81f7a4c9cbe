//! Read-only access to rendered site directories.
//!
//! The cache fingerprints and the upload engine enumerates the same tree, so
//! both go through [`SiteTree`] to agree on which files exist and what their
//! relative keys are.

pub mod error;
mod file;
mod path;
mod tree;

pub use crate::file::FileInfo;
pub use crate::path::{path_key, validate_path};
pub use crate::tree::{FileInfoStream, SiteTree};

/// Directory under a site root reserved for sitedrop's own state.
///
/// Neither fingerprinted nor uploaded.
pub const CACHE_DIR: &str = ".sitedrop";
