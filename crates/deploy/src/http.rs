//! Deployer backed by the publisher's HTTP API.

use crate::deployer::{DeployOptions, DeployResult, Deployer};
use crate::error::{ErrorKind, Result};
use crate::retry::{RetryPolicy, request_timeout};
use async_trait::async_trait;
use exn::ResultExt;
use reqwest::header::{ACCEPT, RANGE};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use sitedrop_config::{PublishConfig, UploadMode};
use sitedrop_storage::{CACHE_DIR, FileInfo, SiteTree};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Uploads sites to a publisher and checks them through an aggregator.
///
/// Constructed explicitly from a [`PublishConfig`]; cloning is cheap and
/// clones share one connection pool.
///
/// # Examples
///
/// ```no_run
/// use sitedrop_config::PublishConfig;
/// use sitedrop_deploy::{DeployOptions, Deployer, HttpDeployer};
/// use std::path::Path;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> sitedrop_deploy::error::Result<()> {
/// let deployer = HttpDeployer::new(&PublishConfig::default())?;
/// let cancel = CancellationToken::new();
/// let result = deployer.deploy(&cancel, Path::new("public"), &DeployOptions::default()).await?;
/// for (path, blob_id) in &result.files {
///     println!("{path} -> {blob_id}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpDeployer {
    pub(crate) client: Client,
    pub(crate) publisher: Url,
    pub(crate) aggregator: Url,
    pub(crate) mode: UploadMode,
    pub(crate) workers: usize,
    pub(crate) epochs: u32,
    pub(crate) retry: RetryPolicy,
}

impl HttpDeployer {
    pub fn new(config: &PublishConfig) -> Result<Self> {
        if config.workers == 0 {
            exn::bail!(ErrorKind::Configuration("workers must be at least 1".to_string()));
        }
        if config.epochs == 0 {
            exn::bail!(ErrorKind::Configuration("epochs must be at least 1".to_string()));
        }
        let client = Client::builder()
            .build()
            .or_raise(|| ErrorKind::Configuration("cannot build HTTP client".to_string()))?;
        Ok(Self {
            client,
            publisher: parse_base_url(&config.publisher_url)?,
            aggregator: parse_base_url(&config.aggregator_url)?,
            mode: config.mode,
            workers: config.workers,
            epochs: config.epochs,
            retry: RetryPolicy::default().with_max_attempts(config.max_attempts),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn endpoint(base: &Url, path: &str) -> String {
        format!("{}/{path}", base.as_str().trim_end_matches('/'))
    }

    /// Browsable URL of a stored blob.
    pub fn blob_link(&self, blob_id: &str) -> String {
        Self::endpoint(&self.aggregator, &format!("v1/blobs/{blob_id}"))
    }

    /// Browsable URL of one file inside a quilt.
    pub fn patch_link(&self, patch_id: &str) -> String {
        Self::endpoint(&self.aggregator, &format!("v1/blobs/by-quilt-patch-id/{patch_id}"))
    }

    pub(crate) fn epochs(&self, options: &DeployOptions) -> u32 {
        options.epochs.unwrap_or(self.epochs)
    }

    /// Every file under `dir` except the cache directory, sorted by key.
    pub(crate) async fn enumerate(&self, dir: &Path) -> Result<(SiteTree, Vec<FileInfo>)> {
        let tree = SiteTree::open(dir).or_raise(|| ErrorKind::Enumeration(dir.to_path_buf()))?.exclude(CACHE_DIR);
        let files = tree.list().await.or_raise(|| ErrorKind::Enumeration(dir.to_path_buf()))?;
        Ok((tree, files))
    }

    /// PUT a body and return the response text of a success status.
    ///
    /// The request races with `cancel` and is bounded by the timeout for
    /// `len` bytes.
    pub(crate) async fn put(&self, cancel: &CancellationToken, request: RequestBuilder, len: u64) -> Result<String> {
        let request = request.header(ACCEPT, "application/json").timeout(request_timeout(len));
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            response = request.send() => raise_transport(response)?,
        };
        let status = response.status();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            body = response.text() => raise_transport(body)?,
        };
        if !status.is_success() {
            exn::bail!(ErrorKind::Http { status: status.as_u16(), body });
        }
        Ok(body)
    }
}

/// Tag a reqwest failure as a timeout or a plain transport error.
fn raise_transport<T>(result: reqwest::Result<T>) -> Result<T> {
    let timed_out = result.as_ref().is_err_and(reqwest::Error::is_timeout);
    result.or_raise(|| if timed_out { ErrorKind::Timeout } else { ErrorKind::Transport })
}

fn parse_base_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).or_raise(|| ErrorKind::Configuration(format!("invalid URL: {url}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        exn::bail!(ErrorKind::Configuration(format!("unsupported URL scheme: {url}")));
    }
    Ok(parsed)
}

#[async_trait]
impl Deployer for HttpDeployer {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip(self, cancel, options), fields(dir = %dir.display(), mode = ?self.mode))]
    async fn deploy(&self, cancel: &CancellationToken, dir: &Path, options: &DeployOptions) -> Result<DeployResult> {
        match self.mode {
            UploadMode::Quilt => self.deploy_quilt(cancel, dir, options).await,
            UploadMode::Blobs => self.deploy_blobs(cancel, dir, options).await,
        }
    }

    async fn update(
        &self,
        cancel: &CancellationToken,
        object_id: &str,
        dir: &Path,
        options: &DeployOptions,
    ) -> Result<DeployResult> {
        // Stored blobs are immutable; an update is a fresh deploy.
        tracing::info!(previous = object_id, "Replacing deployed object");
        self.deploy(cancel, dir, options).await
    }

    #[instrument(skip(self, cancel))]
    async fn status(&self, cancel: &CancellationToken, object_id: &str) -> Result<DeployResult> {
        let link = self.blob_link(object_id);
        let request = self.client.head(&link).header(RANGE, "bytes=0-0").timeout(request_timeout(0));
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
            response = request.send() => response,
        };
        let mut result = DeployResult {
            object_id: Some(object_id.to_string()),
            links: vec![link],
            resource_count: 1,
            ..DeployResult::default()
        };
        match response.map(|response| response.status()) {
            Ok(StatusCode::OK | StatusCode::PARTIAL_CONTENT) => {
                result.success = true;
                result.message = format!("object {object_id} is available");
            }
            Ok(StatusCode::NOT_FOUND) => {
                result.message = format!("object {object_id} not found");
            }
            Ok(status) => {
                result.message = format!("aggregator unreachable or status unknown (HTTP {})", status.as_u16());
            }
            Err(err) => {
                tracing::warn!(error = %err, "Status request failed");
                result.message = format!("aggregator unreachable: {err}");
            }
        }
        Ok(result)
    }
}
