//! JSON bodies returned by the publisher.

use serde::Deserialize;

/// Result of storing one blob.
///
/// Exactly one variant is expected; the blob id lives in a different place
/// depending on whether the content was new to the store.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobStoreResult {
    #[serde(default)]
    pub newly_created: Option<NewlyCreated>,
    #[serde(default)]
    pub already_certified: Option<AlreadyCertified>,
}
impl BlobStoreResult {
    /// The remote identifier, if the response carries a non-empty one.
    pub fn blob_id(&self) -> Option<&str> {
        let id = match (&self.newly_created, &self.already_certified) {
            (Some(created), _) => created.blob_object.blob_id.as_str(),
            (None, Some(certified)) => certified.blob_id.as_str(),
            (None, None) => return None,
        };
        (!id.is_empty()).then_some(id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewlyCreated {
    pub blob_object: BlobObject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobObject {
    #[serde(default)]
    pub blob_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlreadyCertified {
    #[serde(default)]
    pub blob_id: String,
}

/// Result of storing a quilt: the containing blob plus one patch per file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuiltStoreResponse {
    pub blob_store_result: BlobStoreResult,
    #[serde(default)]
    pub stored_quilt_blobs: Vec<StoredQuiltBlob>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredQuiltBlob {
    /// Multipart field name the file was sent under.
    pub identifier: String,
    pub quilt_patch_id: String,
}
