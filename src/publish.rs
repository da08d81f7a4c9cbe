//! Incremental publishing: upload only what changed since the last build.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sitedrop_cache::{BuildManifest, CacheStore, ChangeSet, FileRecord, fingerprint};
use sitedrop_config::Config;
use sitedrop_deploy::{DeployOptions, DeployResult, Deployer};
use std::collections::BTreeSet;
use std::path::Path;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Recorded with every manifest.
    pub project_id: String,
    /// Upload every file regardless of the cache.
    pub force: bool,
    pub epochs: Option<u32>,
}
impl PublishOptions {
    /// Options for a project as configured. A disabled cache forces every
    /// publish to upload the whole site.
    pub fn from_config(config: &Config, project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            force: !config.cache.enabled,
            epochs: Some(config.publish.epochs),
        }
    }
}

/// What a publish did.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishReport {
    pub changes: ChangeSet,
    /// Files handed to the deployer.
    pub uploaded: BTreeSet<String>,
    /// Present when the deployer was called.
    pub result: Option<DeployResult>,
    /// Present when a new build was recorded.
    pub manifest: Option<BuildManifest>,
}
impl PublishReport {
    /// Nothing changed, so nothing was uploaded or recorded.
    pub fn is_up_to_date(&self) -> bool {
        self.result.is_none() && self.manifest.is_none()
    }

    pub fn summary(&self) -> String {
        if self.is_up_to_date() {
            return "site is up to date".to_string();
        }
        format!(
            "{} added, {} modified, {} deleted, {} unchanged; uploaded {} file(s)",
            self.changes.added.len(),
            self.changes.modified.len(),
            self.changes.deleted.len(),
            self.changes.unchanged.len(),
            self.uploaded.len()
        )
    }
}

/// Publish `dir`, uploading added and modified files and recording the
/// build in `cache`.
///
/// Unchanged files keep the remote identifiers recorded for them last time.
/// When the deployer fails nothing is written to the cache, so the next
/// publish retries the same files.
#[instrument(skip_all, fields(dir = %dir.display(), deployer = deployer.name(), force = options.force))]
pub async fn publish(
    cache: &CacheStore,
    deployer: &dyn Deployer,
    cancel: &CancellationToken,
    dir: &Path,
    options: &PublishOptions,
) -> Result<PublishReport> {
    let current = fingerprint(dir).await.or_raise(|| ErrorKind::Cache)?;
    let previous = cache.latest_manifest().await.or_raise(|| ErrorKind::Cache)?;
    let changes = ChangeSet::compute(&current, previous.as_ref());
    let uploaded: BTreeSet<String> = if options.force {
        current.keys().cloned().collect()
    } else {
        // An unchanged file that never got a remote identifier is still unpublished.
        let unpublished = changes.unchanged.iter().filter(|path| {
            !previous.as_ref().and_then(|manifest| manifest.files.get(*path)).is_some_and(FileRecord::is_uploaded)
        });
        changes.to_upload().chain(unpublished).cloned().collect()
    };
    if uploaded.is_empty() && !changes.has_changes() && !options.force {
        tracing::info!(files = current.len(), "Site is up to date");
        return Ok(PublishReport { changes, uploaded, result: None, manifest: None });
    }

    let result = if uploaded.is_empty() {
        // Only deletions: there is nothing to send, but the build is recorded.
        None
    } else {
        let deploy_options = DeployOptions {
            epochs: options.epochs,
            only: (!options.force).then(|| uploaded.clone()),
        };
        let result = deployer
            .deploy(cancel, dir, &deploy_options)
            .await
            .or_raise(|| if cancel.is_cancelled() { ErrorKind::Cancelled } else { ErrorKind::Deploy })?;
        let missing: Vec<String> = uploaded.iter().filter(|path| !result.files.contains_key(*path)).cloned().collect();
        if !missing.is_empty() {
            exn::bail!(ErrorKind::MissingIdentifiers(missing));
        }
        Some(result)
    };

    let now = OffsetDateTime::now_utc();
    let records = current.iter().map(|(path, print)| {
        let record = FileRecord::new(path.clone(), print);
        if let Some(blob_id) = result.as_ref().and_then(|result| result.files.get(path)) {
            return record.with_blob_id(blob_id.clone(), now);
        }
        match previous.as_ref().and_then(|manifest| manifest.files.get(path)) {
            Some(known) if known.hash == record.hash => {
                FileRecord { blob_id: known.blob_id.clone(), last_deployed: known.last_deployed, ..record }
            }
            _ => record,
        }
    });
    let mut manifest = BuildManifest::new(cache.site_key(), options.project_id.clone(), now).with_files(records);
    if let Some(deploy_id) = result.as_ref().and_then(|result| result.object_id.clone()) {
        manifest = manifest.with_deploy_id(deploy_id);
    }
    cache.save_manifest(&manifest).await.or_raise(|| ErrorKind::Cache)?;

    let report = PublishReport { changes, uploaded, result, manifest: Some(manifest) };
    tracing::info!(summary = %report.summary(), "Published site");
    Ok(report)
}
