//! Classification of a site tree against the last build manifest.

use crate::fingerprint::Fingerprints;
use crate::record::BuildManifest;
use std::collections::BTreeSet;

/// Difference between the current tree and the latest manifest.
///
/// The four sets are disjoint. Files are compared by content hash only, so a
/// file whose modification time changed but whose bytes did not is
/// `unchanged`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: BTreeSet<String>,
    pub modified: BTreeSet<String>,
    pub deleted: BTreeSet<String>,
    pub unchanged: BTreeSet<String>,
}
impl ChangeSet {
    /// Diff fingerprints against the previous manifest, if there is one.
    ///
    /// Without a previous manifest every current path is `added`.
    pub fn compute(current: &Fingerprints, previous: Option<&BuildManifest>) -> Self {
        let mut changes = Self::default();
        let Some(previous) = previous else {
            changes.added = current.keys().cloned().collect();
            return changes;
        };
        for (path, fingerprint) in current {
            match previous.files.get(path) {
                None => changes.added.insert(path.clone()),
                Some(record) if record.hash == fingerprint.hash => changes.unchanged.insert(path.clone()),
                Some(_) => changes.modified.insert(path.clone()),
            };
        }
        changes.deleted = previous.files.keys().filter(|path| !current.contains_key(*path)).cloned().collect();
        changes
    }

    /// Whether anything needs uploading or removing.
    pub fn has_changes(&self) -> bool {
        !(self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty())
    }

    /// Paths whose current content is not yet published: added and modified.
    pub fn to_upload(&self) -> impl Iterator<Item = &String> {
        self.added.iter().chain(self.modified.iter())
    }

    /// Number of paths present in the current tree.
    pub fn current_len(&self) -> usize {
        self.added.len() + self.modified.len() + self.unchanged.len()
    }
}
