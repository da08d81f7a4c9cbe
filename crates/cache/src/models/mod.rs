mod file;
mod manifest;

pub(crate) use self::file::FileRow;
pub(crate) use self::manifest::ManifestRow;

use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use time::OffsetDateTime;

/// Timestamps are stored as unix nanoseconds, which fit an `i64` until 2262.
pub(crate) fn to_nanos(timestamp: OffsetDateTime, field: &'static str) -> Result<i64, Error> {
    i64::try_from(timestamp.unix_timestamp_nanos()).or_raise(|| ErrorKind::InvalidData(field))
}

pub(crate) fn from_nanos(nanos: i64, field: &'static str) -> Result<OffsetDateTime, Error> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos)).or_raise(|| ErrorKind::InvalidData(field))
}
