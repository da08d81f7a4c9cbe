//! Storage Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A storage error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// File or directory does not exist
    #[display("not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// Access denied
    #[display("permission denied: {}", _0.display())]
    PermissionDenied(#[error(not(source))] PathBuf),
    /// The site root exists but is not a directory
    #[display("not a directory: {}", _0.display())]
    NotADirectory(#[error(not(source))] PathBuf),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Path contains invalid characters, is not UTF-8, or escapes root
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
