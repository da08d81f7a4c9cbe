//! SQLite build cache for incremental publishing.
//!
//! The cache remembers what a site looked like the last time it was built
//! and which remote identifier each file was uploaded under. It is not the
//! source of truth: the site tree is. Deleting the cache only means the next
//! publish uploads everything again.
//!
//! # Architecture
//! The cache stores two entity types:
//! - **FileRecords**: the latest known state of every path (content hash,
//!   size, modification time and, once uploaded, the remote identifier).
//! - **BuildManifests**: append-only snapshots of the whole file set at the
//!   end of a build. Change detection always compares against the most
//!   recent snapshot for the site root.

mod changeset;
mod db;
pub mod error;
mod fingerprint;
mod models;
mod record;
mod stats;
mod store;

pub use crate::changeset::ChangeSet;
pub use crate::db::Database;
pub use crate::fingerprint::{Fingerprint, Fingerprints, fingerprint, fingerprint_tree};
pub use crate::record::{BuildManifest, FileRecord};
pub use crate::stats::CacheStats;
pub use crate::store::CacheStore;
pub use sitedrop_storage::CACHE_DIR;

/// Database file name inside [`CACHE_DIR`].
pub const CACHE_FILE: &str = "cache.db";
