//! Persistent store for file records and build manifests.
//!
//! One store per site root. The database lives at
//! `{site_root}/.sitedrop/cache.db` and is opened lazily on first use.

use crate::changeset::ChangeSet;
use crate::db::Database;
use crate::error::{ErrorKind, Result};
use crate::fingerprint::{Fingerprints, fingerprint};
use crate::models::{FileRow, ManifestRow, to_nanos};
use crate::record::{BuildManifest, FileRecord};
use crate::stats::CacheStats;
use crate::{CACHE_DIR, CACHE_FILE};
use exn::{OptionExt, ResultExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::sync::OnceCell;
use tracing::instrument;

/// Cache of the last known published state of a site.
///
/// The store is bound to one site root: manifests are tagged with it and
/// [`latest_manifest`](Self::latest_manifest) lookups default to it. It is
/// meant for sequential use by a single orchestrating caller; sharing one
/// database file between processes is not supported.
///
/// # Examples
///
/// ```no_run
/// use sitedrop_cache::CacheStore;
///
/// # async fn example() -> sitedrop_cache::error::Result<()> {
/// let cache = CacheStore::new("/srv/blog");
/// let changes = cache.compute_change_set("/srv/blog/public").await?;
/// println!("{} files to upload", changes.to_upload().count());
/// cache.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CacheStore {
    site_root: PathBuf,
    db: OnceCell<Database>,
}
impl CacheStore {
    /// Bind a store to a site root without touching the disk.
    pub fn new(site_root: impl Into<PathBuf>) -> Self {
        Self { site_root: site_root.into(), db: OnceCell::new() }
    }

    /// Bind a store to a site root and open (or create) its database now.
    pub async fn open(site_root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self::new(site_root);
        store.database().await?;
        Ok(store)
    }

    /// Use an already connected database, such as an in-memory one.
    pub fn with_database(site_root: impl Into<PathBuf>, db: Database) -> Self {
        Self {
            site_root: site_root.into(),
            db: OnceCell::new_with(Some(db)),
        }
    }

    pub fn site_root(&self) -> &Path {
        &self.site_root
    }

    /// Site root as recorded in manifests.
    pub fn site_key(&self) -> String {
        self.site_root.to_string_lossy().into_owned()
    }

    /// Location of the database file for this site root.
    pub fn database_path(&self) -> PathBuf {
        self.site_root.join(CACHE_DIR).join(CACHE_FILE)
    }

    async fn database(&self) -> Result<&Database> {
        self.db
            .get_or_try_init(|| async {
                let dir = self.site_root.join(CACHE_DIR);
                tokio::fs::create_dir_all(&dir).await.or_raise(|| ErrorKind::Directory(dir.clone()))?;
                tracing::debug!(path = %self.database_path().display(), "Opening cache database");
                Database::connect(self.database_path()).await
            })
            .await
    }

    /// Release the database handle. Does nothing if it was never opened.
    pub async fn close(&self) {
        if let Some(db) = self.db.get() {
            db.close().await;
        }
    }

    // =========================================================================
    // Files
    // =========================================================================

    /// Insert or replace the record for `record.path`.
    pub async fn save_file(&self, record: &FileRecord) -> Result<()> {
        let db = self.database().await?;
        let row = FileRow::try_from(record)?;
        Self::upsert_row(db.pool(), row).await
    }

    async fn upsert_row<'e, E>(executor: E, row: FileRow) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(include_str!("../queries/upsert_file.sql"))
            .bind(row.path)
            .bind(row.hash)
            .bind(row.size)
            .bind(row.mod_time)
            .bind(row.blob_id)
            .bind(row.last_deployed)
            .execute(executor)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Get the record for a path, or `None` if the path was never saved.
    pub async fn get_file(&self, path: impl AsRef<str>) -> Result<Option<FileRecord>> {
        let db = self.database().await?;
        let row: Option<FileRow> = sqlx::query_as(include_str!("../queries/get_file.sql"))
            .bind(path.as_ref())
            .fetch_optional(db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(FileRecord::try_from).transpose()
    }

    /// Every record currently in the cache, keyed by path.
    pub async fn get_all_files(&self) -> Result<HashMap<String, FileRecord>> {
        let db = self.database().await?;
        let rows: Vec<FileRow> = sqlx::query_as(include_str!("../queries/list_files.sql"))
            .fetch_all(db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter()
            .map(|row| FileRecord::try_from(row).map(|record| (record.path.clone(), record)))
            .collect()
    }

    /// Record a successful upload of an existing path.
    ///
    /// Sets the remote identifier and stamps the deploy time. Returns
    /// [`FileNotFound`](ErrorKind::FileNotFound) if the path has no record.
    pub async fn update_blob_id(&self, path: impl AsRef<str>, blob_id: impl AsRef<str>) -> Result<()> {
        let path = path.as_ref();
        let deployed = to_nanos(OffsetDateTime::now_utc(), "deploy time")?;
        let db = self.database().await?;
        let result = sqlx::query(include_str!("../queries/update_blob_id.sql"))
            .bind(blob_id.as_ref())
            .bind(deployed)
            .bind(path)
            .execute(db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::FileNotFound(path.to_string()));
        }
        Ok(())
    }

    // =========================================================================
    // Manifests
    // =========================================================================

    /// Append a manifest and upsert every file it contains.
    ///
    /// Both writes happen in one transaction: either the manifest and all of
    /// its files are stored, or nothing is.
    #[instrument(skip_all, fields(site_root = %manifest.site_root, files = manifest.files.len()))]
    pub async fn save_manifest(&self, manifest: &BuildManifest) -> Result<()> {
        let db = self.database().await?;
        let manifest_row = ManifestRow::try_from(manifest)?;
        let file_rows = manifest.files.values().map(FileRow::try_from).collect::<Result<Vec<_>>>()?;
        let mut tx = db.pool().begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/insert_manifest.sql"))
            .bind(manifest_row.site_root)
            .bind(manifest_row.build_time)
            .bind(manifest_row.project_id)
            .bind(manifest_row.deploy_id)
            .bind(manifest_row.files)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for row in file_rows {
            Self::upsert_row(&mut *tx, row).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// The manifest with the greatest build time for a site root.
    ///
    /// Returns `None` if no build has been recorded for that root yet.
    pub async fn get_latest_manifest(&self, site_root: impl AsRef<str>) -> Result<Option<BuildManifest>> {
        let db = self.database().await?;
        let row: Option<ManifestRow> = sqlx::query_as(include_str!("../queries/get_latest_manifest.sql"))
            .bind(site_root.as_ref())
            .fetch_optional(db.pool())
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(BuildManifest::try_from).transpose()
    }

    /// The latest manifest for the site root this store is bound to.
    pub async fn latest_manifest(&self) -> Result<Option<BuildManifest>> {
        self.get_latest_manifest(self.site_key()).await
    }

    // =========================================================================
    // Change detection
    // =========================================================================

    /// Fingerprint `dir` and classify it against the latest manifest.
    #[instrument(skip(self, dir), fields(dir = %dir.as_ref().display()))]
    pub async fn compute_change_set(&self, dir: impl AsRef<Path>) -> Result<ChangeSet> {
        let current = fingerprint(dir.as_ref()).await?;
        self.diff(&current).await
    }

    /// Classify already computed fingerprints against the latest manifest.
    pub async fn diff(&self, current: &Fingerprints) -> Result<ChangeSet> {
        let previous = self.latest_manifest().await?;
        let changes = ChangeSet::compute(current, previous.as_ref());
        tracing::info!(
            added = changes.added.len(),
            modified = changes.modified.len(),
            deleted = changes.deleted.len(),
            unchanged = changes.unchanged.len(),
            "Computed change set"
        );
        Ok(changes)
    }

    /// Statistics of the latest build snapshot.
    pub async fn get_stats(&self) -> Result<CacheStats> {
        let latest = self.latest_manifest().await?;
        Ok(CacheStats::from_manifest(latest.as_ref()))
    }

    // =========================================================================
    // Reset
    // =========================================================================

    /// Delete every file record and every manifest.
    #[instrument(skip(self), fields(site_root = %self.site_root.display()))]
    pub async fn clear(&self) -> Result<()> {
        let db = self.database().await?;
        let mut tx = db.pool().begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query("DELETE FROM manifests").execute(&mut *tx).await.or_raise(|| ErrorKind::Database)?;
        sqlx::query("DELETE FROM files").execute(&mut *tx).await.or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        tracing::warn!("Cache cleared");
        Ok(())
    }

    /// Look up the record of a path that must exist.
    pub async fn require_file(&self, path: impl AsRef<str>) -> Result<FileRecord> {
        let path = path.as_ref();
        self.get_file(path).await?.ok_or_raise(|| ErrorKind::FileNotFound(path.to_string()))
    }
}
