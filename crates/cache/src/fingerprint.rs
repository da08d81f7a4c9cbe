//! Content fingerprinting of site trees.

use crate::CACHE_DIR;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::{StreamExt, TryStreamExt};
use sitedrop_storage::SiteTree;
use std::collections::BTreeMap;
use std::path::Path;
use time::OffsetDateTime;
use tracing::instrument;

/// Files hashed concurrently while fingerprinting.
const CONCURRENT_READS: usize = 8;

/// Content hash and metadata of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Hex-encoded BLAKE3 digest of the file contents.
    pub hash: String,
    pub size: u64,
    pub modified: OffsetDateTime,
}

/// Fingerprints keyed by forward-slash relative path.
pub type Fingerprints = BTreeMap<String, Fingerprint>;

/// Fingerprint every regular file under `dir`.
///
/// The cache directory is never included. Identical content always yields an
/// identical hash regardless of modification time.
pub async fn fingerprint(dir: impl AsRef<Path>) -> Result<Fingerprints> {
    let tree = SiteTree::open(dir.as_ref()).or_raise(|| ErrorKind::Fingerprint)?.exclude(CACHE_DIR);
    fingerprint_tree(&tree).await
}

/// Fingerprint every file listed by an already opened [`SiteTree`].
#[instrument(skip(tree), fields(root = %tree.root().display()))]
pub async fn fingerprint_tree(tree: &SiteTree) -> Result<Fingerprints> {
    let fingerprints: Fingerprints = tree
        .list_stream()
        .map(|file| async move {
            let file = file.or_raise(|| ErrorKind::Fingerprint)?;
            let bytes = tree.read(&file.path).await.or_raise(|| ErrorKind::Fingerprint)?;
            let fingerprint = Fingerprint {
                hash: blake3::hash(&bytes).to_string(),
                size: file.size,
                modified: file.modified,
            };
            Ok::<_, crate::error::Error>((file.key, fingerprint))
        })
        .buffer_unordered(CONCURRENT_READS)
        .try_collect()
        .await?;
    tracing::debug!(files = fingerprints.len(), "Fingerprinted site tree");
    Ok(fingerprints)
}
