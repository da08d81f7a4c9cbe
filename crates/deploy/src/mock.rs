//! In-memory deployer for testing.

use crate::deployer::{DeployOptions, DeployResult, Deployer};
use crate::error::{ErrorKind, FailedUploads, FileFailure, Result};
use async_trait::async_trait;
use exn::ResultExt;
use sitedrop_storage::{CACHE_DIR, SiteTree};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// One recorded call to [`Deployer::deploy`] or [`Deployer::update`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployCall {
    pub dir: PathBuf,
    pub options: DeployOptions,
    /// Paths that were part of the deploy.
    pub paths: Vec<String>,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<DeployCall>,
    objects: HashSet<String>,
}

/// Deployer that reads the site from disk but never touches the network.
///
/// Every deploy gets a fresh object id (`mock-deploy-N`) and every file a
/// blob id derived from it (`mock-deploy-N/path`). Paths registered with
/// [`failing`](Self::failing) fail like a permanent per-file error; paths
/// registered with [`dropping`](Self::dropping) are accepted but left out
/// of the result, like a backend that loses track of them.
///
/// # Examples
///
/// ```
/// use sitedrop_deploy::{Deployer, DeployOptions, MockDeployer};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let site = tempfile::tempdir()?;
/// std::fs::write(site.path().join("index.html"), "home")?;
/// let deployer = MockDeployer::default();
/// let result = deployer.deploy(&CancellationToken::new(), site.path(), &DeployOptions::default()).await?;
/// assert_eq!(result.files["index.html"], "mock-deploy-1/index.html");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MockDeployer {
    failing: BTreeSet<String>,
    dropping: BTreeSet<String>,
    state: Mutex<State>,
}

impl MockDeployer {
    /// Make uploads of these paths fail.
    pub fn failing(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.failing.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Report success for these paths without returning an identifier.
    pub fn dropping(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dropping.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Every deploy and update made so far, oldest first.
    pub async fn calls(&self) -> Vec<DeployCall> {
        self.state.lock().await.calls.clone()
    }
}

#[async_trait]
impl Deployer for MockDeployer {
    fn name(&self) -> &str {
        "mock"
    }

    async fn deploy(&self, cancel: &CancellationToken, dir: &Path, options: &DeployOptions) -> Result<DeployResult> {
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let tree = SiteTree::open(dir).or_raise(|| ErrorKind::Enumeration(dir.to_path_buf()))?.exclude(CACHE_DIR);
        let mut paths: Vec<String> = tree
            .list()
            .await
            .or_raise(|| ErrorKind::Enumeration(dir.to_path_buf()))?
            .into_iter()
            .map(|file| file.key)
            .collect();
        if let Some(only) = &options.only {
            paths.retain(|path| only.contains(path));
        }
        if paths.is_empty() {
            exn::bail!(ErrorKind::NoFiles(dir.to_path_buf()));
        }

        let mut state = self.state.lock().await;
        state.calls.push(DeployCall { dir: dir.to_path_buf(), options: options.clone(), paths: paths.clone() });
        let object_id = format!("mock-deploy-{}", state.calls.len());
        let failures: Vec<FileFailure> = paths
            .iter()
            .filter(|path| self.failing.contains(*path))
            .map(|path| FileFailure { path: path.clone(), reason: "HTTP 400: rejected by mock".to_string() })
            .collect();
        if !failures.is_empty() {
            exn::bail!(ErrorKind::UploadFailed(FailedUploads(failures)));
        }
        state.objects.insert(object_id.clone());
        let files: BTreeMap<String, String> = paths
            .into_iter()
            .filter(|path| !self.dropping.contains(path))
            .map(|path| (path.clone(), format!("{object_id}/{path}")))
            .collect();
        Ok(DeployResult {
            success: true,
            links: files.values().map(|id| format!("mock://{id}")).collect(),
            resource_count: files.len(),
            message: format!("uploaded {} file(s)", files.len()),
            object_id: Some(object_id),
            files,
            patches: Vec::new(),
        })
    }

    async fn update(
        &self,
        cancel: &CancellationToken,
        _object_id: &str,
        dir: &Path,
        options: &DeployOptions,
    ) -> Result<DeployResult> {
        self.deploy(cancel, dir, options).await
    }

    async fn status(&self, cancel: &CancellationToken, object_id: &str) -> Result<DeployResult> {
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let exists = self.state.lock().await.objects.contains(object_id);
        Ok(DeployResult {
            success: exists,
            object_id: Some(object_id.to_string()),
            resource_count: 1,
            message: if exists {
                format!("object {object_id} is available")
            } else {
                format!("object {object_id} not found")
            },
            ..DeployResult::default()
        })
    }
}
