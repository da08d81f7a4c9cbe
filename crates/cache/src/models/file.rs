use super::{from_nanos, to_nanos};
use crate::error::{Error, ErrorKind};
use crate::record::FileRecord;
use exn::ResultExt;

#[derive(sqlx::FromRow)]
pub(crate) struct FileRow {
    pub(crate) path: String,
    pub(crate) hash: String,
    pub(crate) size: i64,
    pub(crate) mod_time: i64,
    pub(crate) blob_id: Option<String>,
    pub(crate) last_deployed: Option<i64>,
}
impl TryFrom<&FileRecord> for FileRow {
    type Error = Error;
    fn try_from(record: &FileRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            path: record.path.clone(),
            hash: record.hash.clone(),
            size: i64::try_from(record.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            mod_time: to_nanos(record.modified, "modification time")?,
            blob_id: record.blob_id.clone(),
            last_deployed: record.last_deployed.map(|at| to_nanos(at, "deploy time")).transpose()?,
        })
    }
}
impl TryFrom<FileRow> for FileRecord {
    type Error = Error;
    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            path: row.path,
            hash: row.hash,
            size: u64::try_from(row.size).or_raise(|| ErrorKind::InvalidData("file size"))?,
            modified: from_nanos(row.mod_time, "modification time")?,
            blob_id: row.blob_id,
            last_deployed: row.last_deployed.map(|at| from_nanos(at, "deploy time")).transpose()?,
        })
    }
}
