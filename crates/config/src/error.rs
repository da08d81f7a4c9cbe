use derive_more::{Display, Error};
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration problems. All of them are fixed by editing the
/// configuration, so none are retryable.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("configuration file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// The file extension does not name a supported format.
    #[display("unsupported configuration format: {}", _0.display())]
    UnsupportedFormat(#[error(not(source))] PathBuf),
    /// A provider could not be read or a value has the wrong type.
    #[display("cannot parse configuration")]
    Parse,
    /// A value parsed but is not usable.
    #[display("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: &'static str },
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        false
    }
}
