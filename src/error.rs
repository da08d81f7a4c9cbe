//! Publish Error Types
//!
//! A publish touches the cache and a deployer; the error says which of the
//! two failed, with the underlying error attached as its cause.

use derive_more::{Display, Error};

/// A publish error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for publish operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Fingerprinting or a cache read/write failed.
    #[display("build cache error")]
    Cache,
    /// The upload did not complete. Nothing was recorded in the cache.
    #[display("deploy failed")]
    Deploy,
    /// The deployer reported success but returned no identifier for these
    /// uploaded paths. Nothing was recorded in the cache.
    #[display("deploy returned no identifier for {}", _0.join(", "))]
    MissingIdentifiers(#[error(not(source))] Vec<String>),
    #[display("publish cancelled")]
    Cancelled,
    /// The logging filter or subscriber could not be set up.
    #[display("cannot initialise logging: {_0}")]
    Logging(#[error(not(source))] String),
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Deploy | Self::MissingIdentifiers(_))
    }
}
