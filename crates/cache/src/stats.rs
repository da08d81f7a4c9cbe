use crate::record::BuildManifest;
use time::OffsetDateTime;

/// Summary of the latest build snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub total_files: u64,
    /// Files that carry a non-empty remote identifier.
    pub cached_files: u64,
    /// `cached_files / total_files`, or `0.0` for an empty snapshot.
    pub hit_ratio: f64,
    pub last_build: Option<OffsetDateTime>,
}
impl CacheStats {
    pub(crate) fn from_manifest(manifest: Option<&BuildManifest>) -> Self {
        let Some(manifest) = manifest else {
            return Self {
                total_files: 0,
                cached_files: 0,
                hit_ratio: 0.0,
                last_build: None,
            };
        };
        let total_files = manifest.files.len() as u64;
        let cached_files = manifest.files.values().filter(|record| record.is_uploaded()).count() as u64;
        let hit_ratio = match total_files {
            0 => 0.0,
            total => cached_files as f64 / total as f64,
        };
        Self {
            total_files,
            cached_files,
            hit_ratio,
            last_build: Some(manifest.build_time),
        }
    }
}
