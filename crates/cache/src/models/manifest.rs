use super::{from_nanos, to_nanos};
use crate::error::{Error, ErrorKind};
use crate::record::{BuildManifest, FileRecord};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One entry of the manifest's JSON file map; the path is the map key.
#[derive(Serialize, Deserialize)]
#[cfg_attr(test, derive(Debug, PartialEq))]
pub(crate) struct FileEntryProxy {
    #[serde(rename = "h")]
    hash: String,
    #[serde(rename = "s")]
    size: u64,
    #[serde(rename = "m")]
    modified: i64,
    #[serde(rename = "b", default, skip_serializing_if = "Option::is_none")]
    blob_id: Option<String>,
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    last_deployed: Option<i64>,
}
impl TryFrom<&FileRecord> for FileEntryProxy {
    type Error = Error;
    fn try_from(record: &FileRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            hash: record.hash.clone(),
            size: record.size,
            modified: to_nanos(record.modified, "manifest modification time")?,
            blob_id: record.blob_id.clone(),
            last_deployed: record.last_deployed.map(|at| to_nanos(at, "manifest deploy time")).transpose()?,
        })
    }
}
impl FileEntryProxy {
    fn into_record(self, path: String) -> Result<FileRecord, Error> {
        Ok(FileRecord {
            path,
            hash: self.hash,
            size: self.size,
            modified: from_nanos(self.modified, "manifest modification time")?,
            blob_id: self.blob_id,
            last_deployed: self.last_deployed.map(|at| from_nanos(at, "manifest deploy time")).transpose()?,
        })
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct ManifestRow {
    pub(crate) site_root: String,
    pub(crate) build_time: i64,
    pub(crate) project_id: String,
    pub(crate) deploy_id: Option<String>,
    pub(crate) files: String,
}
impl TryFrom<&BuildManifest> for ManifestRow {
    type Error = Error;
    fn try_from(manifest: &BuildManifest) -> Result<Self, Self::Error> {
        let files = manifest
            .files
            .iter()
            .map(|(path, record)| Ok((path.as_str(), FileEntryProxy::try_from(record)?)))
            .collect::<Result<BTreeMap<&str, FileEntryProxy>, Error>>()?;
        Ok(Self {
            site_root: manifest.site_root.clone(),
            build_time: to_nanos(manifest.build_time, "build time")?,
            project_id: manifest.project_id.clone(),
            deploy_id: manifest.deploy_id.clone(),
            files: serde_json::to_string(&files).or_raise(|| ErrorKind::InvalidData("manifest files"))?,
        })
    }
}
impl TryFrom<ManifestRow> for BuildManifest {
    type Error = Error;
    fn try_from(row: ManifestRow) -> Result<Self, Self::Error> {
        let entries: BTreeMap<String, FileEntryProxy> =
            serde_json::from_str(&row.files).or_raise(|| ErrorKind::InvalidData("manifest files"))?;
        let files = entries
            .into_iter()
            .map(|(path, entry)| Ok((path.clone(), entry.into_record(path)?)))
            .collect::<Result<BTreeMap<_, _>, Error>>()?;
        Ok(Self {
            site_root: row.site_root,
            build_time: from_nanos(row.build_time, "build time")?,
            project_id: row.project_id,
            deploy_id: row.deploy_id,
            files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use time::OffsetDateTime;

    #[rstest]
    #[case(
        FileEntryProxy { hash: "abc".to_string(), size: 3, modified: 10, blob_id: None, last_deployed: None },
        r#"{"h":"abc","s":3,"m":10}"#
    )]
    #[case(
        FileEntryProxy {
            hash: "abc".to_string(),
            size: 3,
            modified: 10,
            blob_id: Some("blob".to_string()),
            last_deployed: Some(20),
        },
        r#"{"h":"abc","s":3,"m":10,"b":"blob","d":20}"#
    )]
    fn test_entry_serialize(#[case] input: FileEntryProxy, #[case] expected: &str) {
        assert_eq!(serde_json::to_string(&input).unwrap(), expected);
        assert_eq!(serde_json::from_str::<FileEntryProxy>(expected).unwrap(), input);
    }

    #[test]
    fn test_row_to_model() {
        let row = ManifestRow {
            site_root: "/srv/site".to_string(),
            build_time: 1_700_000_000_000_000_000,
            project_id: "blog".to_string(),
            deploy_id: None,
            files: r#"{"index.html":{"h":"abc","s":3,"m":10,"b":"blob"}}"#.to_string(),
        };
        let manifest = BuildManifest::try_from(row).unwrap();
        let record = &manifest.files["index.html"];
        assert_eq!(record.path, "index.html");
        assert_eq!(record.blob_id.as_deref(), Some("blob"));
        assert!(record.last_deployed.is_none());
        assert_eq!(manifest.build_time.unix_timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_sub_second_times_survive_the_payload() {
        let built = OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_987_654_321).unwrap();
        let record = FileRecord {
            path: "index.html".to_string(),
            hash: "abc".to_string(),
            size: 3,
            modified: OffsetDateTime::from_unix_timestamp_nanos(1_700_000_000_123_456_789).unwrap(),
            blob_id: Some("blob".to_string()),
            last_deployed: Some(built),
        };
        let manifest = BuildManifest::new("/srv/site", "blog", built).with_files([record]);
        let row = ManifestRow::try_from(&manifest).unwrap();
        assert_eq!(BuildManifest::try_from(row).unwrap(), manifest);
    }

    #[test]
    fn test_corrupt_payload_is_an_error() {
        let row = ManifestRow {
            site_root: "/srv/site".to_string(),
            build_time: 0,
            project_id: "blog".to_string(),
            deploy_id: None,
            files: "{not json".to_string(),
        };
        let err = BuildManifest::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData(_)));
    }
}
