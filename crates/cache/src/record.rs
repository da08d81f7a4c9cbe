//! Cached file state and build manifests.

use crate::fingerprint::Fingerprint;
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Last known state of one file, keyed by its forward-slash relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    /// Hex-encoded BLAKE3 digest of the file contents.
    pub hash: String,
    pub size: u64,
    pub modified: OffsetDateTime,
    /// Remote identifier, once the file has been uploaded.
    pub blob_id: Option<String>,
    pub last_deployed: Option<OffsetDateTime>,
}
impl FileRecord {
    /// A record for a freshly fingerprinted file that has never been uploaded.
    pub fn new(path: impl Into<String>, fingerprint: &Fingerprint) -> Self {
        Self {
            path: path.into(),
            hash: fingerprint.hash.clone(),
            size: fingerprint.size,
            modified: fingerprint.modified,
            blob_id: None,
            last_deployed: None,
        }
    }

    pub fn with_blob_id(mut self, blob_id: impl Into<String>, deployed: OffsetDateTime) -> Self {
        self.blob_id = Some(blob_id.into());
        self.last_deployed = Some(deployed);
        self
    }

    /// Whether the remote store holds a copy of this file.
    pub fn is_uploaded(&self) -> bool {
        self.blob_id.as_deref().is_some_and(|id| !id.is_empty())
    }
}

/// Snapshot of the whole file set at the end of one build.
///
/// Manifests are never modified once saved; a new build appends a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildManifest {
    pub site_root: String,
    pub build_time: OffsetDateTime,
    pub project_id: String,
    /// Set once a successful deployment is associated with the build.
    pub deploy_id: Option<String>,
    pub files: BTreeMap<String, FileRecord>,
}
impl BuildManifest {
    pub fn new(site_root: impl Into<String>, project_id: impl Into<String>, build_time: OffsetDateTime) -> Self {
        Self {
            site_root: site_root.into(),
            build_time,
            project_id: project_id.into(),
            deploy_id: None,
            files: BTreeMap::new(),
        }
    }

    pub fn with_deploy_id(mut self, deploy_id: impl Into<String>) -> Self {
        self.deploy_id = Some(deploy_id.into());
        self
    }

    pub fn with_files(mut self, files: impl IntoIterator<Item = FileRecord>) -> Self {
        self.files.extend(files.into_iter().map(|record| (record.path.clone(), record)));
        self
    }
}
