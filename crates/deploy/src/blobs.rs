//! Per-file upload through a fixed pool of workers.
//!
//! Files are dispatched in enumeration order into a bounded queue shared by
//! `workers` tasks, so no more than `workers` requests are ever in flight.
//! Each file is retried on its own; one file failing never stops the others.

use crate::deployer::{DeployOptions, DeployResult};
use crate::error::{ErrorKind, FailedUploads, FileFailure, Result};
use crate::http::HttpDeployer;
use crate::response::BlobStoreResult;
use exn::{OptionExt, ResultExt};
use sitedrop_storage::{FileInfo, SiteTree};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Results shared between workers. Only ever inserted into.
#[derive(Debug, Default)]
struct Outcome {
    uploaded: BTreeMap<String, String>,
    failures: Vec<FileFailure>,
}

fn lock(outcome: &Mutex<Outcome>) -> MutexGuard<'_, Outcome> {
    // Inserts cannot leave the maps half-written.
    outcome.lock().unwrap_or_else(PoisonError::into_inner)
}

type Queue = Arc<tokio::sync::Mutex<mpsc::Receiver<FileInfo>>>;

/// Everything one worker needs, shared by all of them.
struct Uploader {
    deployer: HttpDeployer,
    tree: SiteTree,
    url: String,
    epochs: u32,
}

impl Uploader {
    async fn work(self: Arc<Self>, queue: Queue, outcome: Arc<Mutex<Outcome>>, cancel: CancellationToken) {
        loop {
            let next = {
                let mut queue = queue.lock().await;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    file = queue.recv() => file,
                }
            };
            let Some(file) = next else { break };
            match self.upload(&cancel, &file).await {
                Ok(blob_id) => {
                    tracing::debug!(path = %file.key, blob_id = %blob_id, "Uploaded file");
                    lock(&outcome).uploaded.insert(file.key, blob_id);
                }
                Err(err) if matches!(&*err, ErrorKind::Cancelled) => break,
                Err(err) => {
                    tracing::warn!(path = %file.key, error = %*err, "Giving up on file");
                    lock(&outcome).failures.push(FileFailure { path: file.key, reason: (*err).to_string() });
                }
            }
        }
    }

    /// Upload one file, retrying transient failures with backoff.
    async fn upload(&self, cancel: &CancellationToken, file: &FileInfo) -> Result<String> {
        let bytes = self.tree.read(&file.path).await.or_raise(|| ErrorKind::ReadFile(file.key.clone()))?;
        let retry = self.deployer.retry;
        let mut attempt = 1;
        loop {
            match self.attempt(cancel, &bytes).await {
                Ok(blob_id) => return Ok(blob_id),
                Err(err) if err.is_retryable() && retry.allows_retry(attempt) => {
                    let delay = retry.delay(attempt);
                    tracing::info!(path = %file.key, attempt, ?delay, error = %*err, "Upload failed, retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => exn::bail!(ErrorKind::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn attempt(&self, cancel: &CancellationToken, bytes: &[u8]) -> Result<String> {
        let request = self.deployer.client.put(&self.url).query(&[("epochs", self.epochs)]).body(bytes.to_vec());
        let body = self.deployer.put(cancel, request, bytes.len() as u64).await?;
        let result: BlobStoreResult =
            serde_json::from_str(&body).or_raise(|| ErrorKind::InvalidResponse("malformed blob store result"))?;
        result.blob_id().map(str::to_string).ok_or_raise(|| ErrorKind::InvalidResponse("missing blob id"))
    }
}

impl HttpDeployer {
    pub(crate) async fn deploy_blobs(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
        options: &DeployOptions,
    ) -> Result<DeployResult> {
        let (tree, mut files) = self.enumerate(dir).await?;
        if let Some(only) = &options.only {
            files.retain(|file| only.contains(&file.key));
            if files.len() < only.len() {
                tracing::warn!(requested = only.len(), found = files.len(), "Some requested files do not exist");
            }
        }
        if files.is_empty() {
            exn::bail!(ErrorKind::NoFiles(dir.to_path_buf()));
        }
        let keys: Vec<String> = files.iter().map(|file| file.key.clone()).collect();
        let workers = self.workers.min(files.len());
        tracing::info!(files = files.len(), workers, "Uploading files");

        let uploader = Arc::new(Uploader {
            deployer: self.clone(),
            tree,
            url: Self::endpoint(&self.publisher, "v1/blobs"),
            epochs: self.epochs(options),
        });
        let outcome = Arc::new(Mutex::new(Outcome::default()));
        let (sender, receiver) = mpsc::channel(workers);
        let queue: Queue = Arc::new(tokio::sync::Mutex::new(receiver));
        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let task = Arc::clone(&uploader).work(Arc::clone(&queue), Arc::clone(&outcome), cancel.clone());
            pool.spawn(task.instrument(tracing::debug_span!("upload worker", worker)));
        }

        for file in files {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = sender.send(file) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
        drop(sender);
        while let Some(joined) = pool.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "Upload worker stopped unexpectedly");
            }
        }
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }

        let Outcome { uploaded, mut failures } = std::mem::take(&mut *lock(&outcome));
        for key in &keys {
            if !uploaded.contains_key(key) && !failures.iter().any(|failure| &failure.path == key) {
                failures.push(FileFailure { path: key.clone(), reason: "upload was not attempted".to_string() });
            }
        }
        if !failures.is_empty() {
            failures.sort_by(|a, b| a.path.cmp(&b.path));
            exn::bail!(ErrorKind::UploadFailed(FailedUploads(failures)));
        }
        Ok(DeployResult {
            success: true,
            object_id: None,
            links: uploaded.values().map(|blob_id| self.blob_link(blob_id)).collect(),
            resource_count: uploaded.len(),
            message: format!("uploaded {} file(s)", uploaded.len()),
            files: uploaded,
            patches: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployer::Deployer;
    use crate::retry::RetryPolicy;
    use sitedrop_config::{PublishConfig, UploadMode};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use wiremock::matchers::{body_string, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CREATED: &str = r#"{"newlyCreated":{"blobObject":{"blobId":"blob-new","size":4}}}"#;

    fn deployer(base: &str, workers: usize) -> HttpDeployer {
        let config = PublishConfig {
            publisher_url: base.to_string(),
            aggregator_url: base.to_string(),
            mode: UploadMode::Blobs,
            workers,
            ..PublishConfig::default()
        };
        let retry = RetryPolicy::default().with_initial_delay(Duration::from_millis(10));
        HttpDeployer::new(&config).unwrap().with_retry(RetryPolicy { jitter: Duration::ZERO, ..retry })
    }

    fn site(files: &[(&str, &[u8])]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, contents) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        }
        dir
    }

    fn many_files(count: usize) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..count {
            std::fs::write(dir.path().join(format!("page-{i:02}.html")), format!("page {i}")).unwrap();
        }
        dir
    }

    fn created() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(CREATED, "application/json")
    }

    #[tokio::test]
    async fn test_single_empty_file() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/blobs"))
            .and(query_param("epochs", "1"))
            .respond_with(created())
            .expect(1)
            .mount(&server)
            .await;
        let dir = site(&[("empty.txt", b"")]);
        let result = deployer(&server.uri(), 10)
            .deploy(&CancellationToken::new(), dir.path(), &DeployOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.files.len(), 1);
        assert_eq!(result.files["empty.txt"], "blob-new");
        assert_eq!(result.links, vec![format!("{}/v1/blobs/blob-new", server.uri())]);
    }

    #[tokio::test]
    async fn test_already_certified_blob_id() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"alreadyCertified":{"blobId":"blob-old","endEpoch":7}}"#, "application/json"),
            )
            .mount(&server)
            .await;
        let dir = site(&[("index.html", b"home"), ("css/site.css", b"body{}")]);
        let result = deployer(&server.uri(), 2)
            .deploy(&CancellationToken::new(), dir.path(), &DeployOptions::default())
            .await
            .unwrap();
        assert_eq!(result.files.keys().collect::<Vec<_>>(), vec!["css/site.css", "index.html"]);
        assert!(result.files.values().all(|id| id == "blob-old"));
    }

    #[tokio::test]
    async fn test_rate_limited_then_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT")).respond_with(created()).expect(1).mount(&server).await;
        let dir = site(&[("index.html", b"home")]);
        let result = deployer(&server.uri(), 1)
            .deploy(&CancellationToken::new(), dir.path(), &DeployOptions::default())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad blob"))
            .expect(1)
            .mount(&server)
            .await;
        let dir = site(&[("index.html", b"home")]);
        let err = deployer(&server.uri(), 1)
            .deploy(&CancellationToken::new(), dir.path(), &DeployOptions::default())
            .await
            .unwrap_err();
        let ErrorKind::UploadFailed(failures) = &*err else { panic!("unexpected error: {err:?}") };
        assert_eq!(failures.paths().collect::<Vec<_>>(), vec!["index.html"]);
        assert_eq!(failures.0[0].reason, "HTTP 400: bad blob");
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("PUT")).respond_with(ResponseTemplate::new(503)).expect(3).mount(&server).await;
        let dir = site(&[("index.html", b"home")]);
        let err = deployer(&server.uri(), 1)
            .with_retry(RetryPolicy {
                initial_delay: Duration::from_millis(1),
                jitter: Duration::ZERO,
                ..RetryPolicy::default().with_max_attempts(3)
            })
            .deploy(&CancellationToken::new(), dir.path(), &DeployOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::UploadFailed(failures) if failures.len() == 1));
    }

    #[tokio::test]
    async fn test_missing_blob_id_is_a_permanent_failure() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(r#"{"newlyCreated":{"blobObject":{"blobId":""}}}"#, "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;
        let dir = site(&[("index.html", b"home")]);
        let err = deployer(&server.uri(), 1)
            .deploy(&CancellationToken::new(), dir.path(), &DeployOptions::default())
            .await
            .unwrap_err();
        let ErrorKind::UploadFailed(failures) = &*err else { panic!("unexpected error: {err:?}") };
        assert!(failures.0[0].reason.contains("missing blob id"));
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_other_files() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(body_string("broken"))
            .respond_with(ResponseTemplate::new(413).set_body_string("too large"))
            .mount(&server)
            .await;
        Mock::given(method("PUT")).respond_with(created()).expect(3).mount(&server).await;
        let dir = site(&[("a.html", b"a"), ("b.html", b"broken"), ("c.html", b"c"), ("d.html", b"d")]);
        let err = deployer(&server.uri(), 2)
            .deploy(&CancellationToken::new(), dir.path(), &DeployOptions::default())
            .await
            .unwrap_err();
        let ErrorKind::UploadFailed(failures) = &*err else { panic!("unexpected error: {err:?}") };
        assert_eq!(failures.paths().collect::<Vec<_>>(), vec!["b.html"]);
    }

    #[tokio::test]
    async fn test_only_uploads_requested_files() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(query_param("epochs", "3"))
            .respond_with(created())
            .expect(1)
            .mount(&server)
            .await;
        let dir = site(&[("index.html", b"home"), ("about.html", b"about")]);
        let options = DeployOptions::default().with_epochs(3).with_only(["about.html"]);
        let result = deployer(&server.uri(), 4).deploy(&CancellationToken::new(), dir.path(), &options).await.unwrap();
        assert_eq!(result.files.keys().collect::<Vec<_>>(), vec!["about.html"]);
    }

    #[tokio::test]
    async fn test_cache_directory_is_not_uploaded() {
        let server = MockServer::start().await;
        Mock::given(method("PUT")).respond_with(created()).expect(1).mount(&server).await;
        let dir = site(&[("index.html", b"home"), (".sitedrop/cache.db", b"sqlite")]);
        let result = deployer(&server.uri(), 4)
            .deploy(&CancellationToken::new(), dir.path(), &DeployOptions::default())
            .await
            .unwrap();
        assert_eq!(result.files.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = deployer("http://127.0.0.1:9", 4)
            .deploy(&CancellationToken::new(), dir.path(), &DeployOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::NoFiles(_)));
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let err = deployer("http://127.0.0.1:9", 4)
            .deploy(&CancellationToken::new(), &dir.path().join("public"), &DeployOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::Enumeration(_)));
    }

    #[tokio::test]
    async fn test_cancellation_is_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(created().set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;
        let dir = many_files(50);
        let deployer = deployer(&server.uri(), 4);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let err = deployer.deploy(&cancel, dir.path(), &DeployOptions::default()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5), "took {:?}", started.elapsed());
        // Only the first batch of workers ever reached the server.
        assert!(server.received_requests().await.unwrap().len() <= 4);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("PUT")).respond_with(ResponseTemplate::new(503)).mount(&server).await;
        let dir = site(&[("index.html", b"home")]);
        let deployer = deployer(&server.uri(), 1).with_retry(RetryPolicy {
            initial_delay: Duration::from_secs(60),
            ..RetryPolicy::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });
        let started = Instant::now();
        let err = deployer.deploy(&cancel, dir.path(), &DeployOptions::default()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    /// Minimal HTTP server that records the peak number of requests being
    /// handled at once.
    async fn counting_server(delay: Duration) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let reported = Arc::clone(&peak);
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = listener.accept().await.unwrap();
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    let mut chunk = [0u8; 4096];
                    let header_end = loop {
                        let read = socket.read(&mut chunk).await.unwrap();
                        if read == 0 {
                            return;
                        }
                        buffer.extend_from_slice(&chunk[..read]);
                        if let Some(pos) = buffer.windows(4).position(|window| window == b"\r\n\r\n") {
                            break pos + 4;
                        }
                    };
                    let headers = String::from_utf8_lossy(&buffer[..header_end]).to_lowercase();
                    let length: usize = headers
                        .lines()
                        .find_map(|line| line.strip_prefix("content-length:"))
                        .map(|value| value.trim().parse().unwrap())
                        .unwrap_or(0);
                    while buffer.len() < header_end + length {
                        let read = socket.read(&mut chunk).await.unwrap();
                        if read == 0 {
                            return;
                        }
                        buffer.extend_from_slice(&chunk[..read]);
                    }
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(delay).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    let response = format!(
                        "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
                         content-length: {}\r\nconnection: close\r\n\r\n{}",
                        CREATED.len(),
                        CREATED
                    );
                    socket.write_all(response.as_bytes()).await.unwrap();
                });
            }
        });
        (base, reported)
    }

    #[tokio::test]
    async fn test_in_flight_requests_never_exceed_workers() {
        let (base, peak) = counting_server(Duration::from_millis(50)).await;
        let dir = many_files(12);
        let result = deployer(&base, 3)
            .deploy(&CancellationToken::new(), dir.path(), &DeployOptions::default())
            .await
            .unwrap();
        assert_eq!(result.files.len(), 12);
        let peak = peak.load(Ordering::SeqCst);
        assert!((1..=3).contains(&peak), "peak of {peak} concurrent requests");
    }
}
