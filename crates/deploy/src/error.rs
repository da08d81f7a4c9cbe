//! Deploy Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction. Per-file upload failures are collected while a deploy
//! runs and surface together as [`ErrorKind::UploadFailed`] once every file
//! has had its chance.

use derive_more::{Display, Error};
use std::fmt;
use std::path::PathBuf;

/// A deploy error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for deploy operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Unusable deployer settings, detected before any network call.
    #[display("invalid deploy configuration: {_0}")]
    Configuration(#[error(not(source))] String),
    /// The site directory could not be walked.
    #[display("cannot enumerate site files: {}", _0.display())]
    Enumeration(#[error(not(source))] PathBuf),
    /// The site directory has nothing to upload.
    #[display("no files found in {}", _0.display())]
    NoFiles(#[error(not(source))] PathBuf),
    /// Two paths would be sent under the same quilt identifier.
    #[display("{first} and {second} both map to quilt identifier {identifier}")]
    DuplicateIdentifier { identifier: String, first: String, second: String },
    /// A file listed for upload could not be read.
    #[display("cannot read {_0}")]
    ReadFile(#[error(not(source))] String),
    /// The request never produced a response.
    #[display("request failed")]
    Transport,
    /// No response within the request's timeout.
    #[display("request timed out")]
    Timeout,
    /// The batch upload exceeded its timeout.
    #[display("quilt upload timed out; the site is too large for one request, use per-file (blobs) mode instead")]
    QuiltTimeout,
    /// The remote API answered with a non-success status.
    #[display("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// A success response that does not carry what the contract promises.
    #[display("invalid response: {_0}")]
    InvalidResponse(#[error(not(source))] &'static str),
    /// Some files could not be uploaded after every attempt.
    #[display("{_0}")]
    UploadFailed(#[error(not(source))] FailedUploads),
    /// The caller cancelled the operation.
    #[display("deploy cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Transport failures, server errors and rate limiting are transient.
    /// Every other status is a permanent answer.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport | Self::Timeout => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// The last error seen for one file that never uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub path: String,
    pub reason: String,
}

/// Every per-file failure of one deploy, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailedUploads(pub Vec<FileFailure>);
impl FailedUploads {
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|failure| failure.path.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
impl fmt::Display for FailedUploads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} file(s) failed to upload", self.0.len())?;
        for failure in &self.0 {
            write!(f, "\n  {}: {}", failure.path, failure.reason)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::Transport, true)]
    #[case(ErrorKind::Timeout, true)]
    #[case(ErrorKind::Http { status: 500, body: String::new() }, true)]
    #[case(ErrorKind::Http { status: 503, body: String::new() }, true)]
    #[case(ErrorKind::Http { status: 429, body: String::new() }, true)]
    #[case(ErrorKind::Http { status: 400, body: String::new() }, false)]
    #[case(ErrorKind::Http { status: 404, body: String::new() }, false)]
    #[case(ErrorKind::InvalidResponse("missing blob id"), false)]
    #[case(ErrorKind::Cancelled, false)]
    #[case(ErrorKind::QuiltTimeout, false)]
    fn test_retryable(#[case] kind: ErrorKind, #[case] expected: bool) {
        assert_eq!(kind.is_retryable(), expected);
    }

    #[test]
    fn test_failed_uploads_display() {
        let failures = FailedUploads(vec![
            FileFailure { path: "a.html".to_string(), reason: "HTTP 400: bad".to_string() },
            FileFailure { path: "b/c.css".to_string(), reason: "request failed".to_string() },
        ]);
        assert_eq!(
            ErrorKind::UploadFailed(failures).to_string(),
            "2 file(s) failed to upload\n  a.html: HTTP 400: bad\n  b/c.css: request failed"
        );
    }

    #[test]
    fn test_quilt_timeout_suggests_blobs_mode() {
        assert!(ErrorKind::QuiltTimeout.to_string().contains("per-file (blobs) mode"));
    }
}
