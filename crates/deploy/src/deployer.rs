//! Backend-independent deploy contract.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Per-call overrides of the deployer's configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Storage duration; falls back to the configured value.
    pub epochs: Option<u32>,
    /// Upload only these relative paths (per-file mode). `None` uploads the
    /// whole directory.
    pub only: Option<BTreeSet<String>>,
}
impl DeployOptions {
    pub fn with_epochs(mut self, epochs: u32) -> Self {
        self.epochs = Some(epochs);
        self
    }

    pub fn with_only(mut self, paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.only = Some(paths.into_iter().map(Into::into).collect());
        self
    }
}

/// One file stored inside a quilt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuiltPatch {
    /// Relative path of the file.
    pub path: String,
    /// Multipart field name it was sent under.
    pub identifier: String,
    pub patch_id: String,
}

/// Uniform outcome of every deployer operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployResult {
    pub success: bool,
    /// Identifier of the deployed object as a whole, when the backend has one.
    pub object_id: Option<String>,
    /// Browsable URLs of what was deployed.
    pub links: Vec<String>,
    /// Relative path to the remote identifier now holding its content.
    pub files: BTreeMap<String, String>,
    pub patches: Vec<QuiltPatch>,
    /// Number of remote resources involved.
    pub resource_count: usize,
    pub message: String,
}

/// A place a rendered site can be published to.
///
/// Every operation takes a cancellation token and stops promptly with
/// [`Cancelled`](crate::error::ErrorKind::Cancelled) once it fires.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Backend name, for logging.
    fn name(&self) -> &str;

    /// Publish the files under `dir`.
    async fn deploy(&self, cancel: &CancellationToken, dir: &Path, options: &DeployOptions) -> Result<DeployResult>;

    /// Replace a previously deployed object with the current contents of `dir`.
    async fn update(
        &self,
        cancel: &CancellationToken,
        object_id: &str,
        dir: &Path,
        options: &DeployOptions,
    ) -> Result<DeployResult>;

    /// Check whether a deployed object is still retrievable.
    ///
    /// An unreachable backend is reported in the result, not as an error.
    async fn status(&self, cancel: &CancellationToken, object_id: &str) -> Result<DeployResult>;
}
