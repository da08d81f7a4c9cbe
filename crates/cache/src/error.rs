//! Cache Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Every operation that touches the database reports one
//! of these; callers propagate them as publish failures.

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A cache error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The cache directory could not be created.
    #[display("cannot create cache directory: {}", _0.display())]
    Directory(#[error(not(source))] PathBuf),
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// No record exists for the path.
    #[display("file not found in cache: {_0}")]
    FileNotFound(#[error(not(source))] String),
    /// Serialization/deserialization error, or a value out of range.
    #[display("invalid cache data: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    /// The site tree could not be walked or read.
    #[display("cannot fingerprint site tree")]
    Fingerprint,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
