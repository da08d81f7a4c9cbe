//! Batch upload of a whole site as one multipart request.

use crate::deployer::{DeployOptions, DeployResult, QuiltPatch};
use crate::error::{ErrorKind, FailedUploads, FileFailure, Result};
use crate::http::HttpDeployer;
use crate::response::QuiltStoreResponse;
use exn::{OptionExt, ResultExt};
use reqwest::multipart::{Form, Part};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Multipart field name for a relative path.
///
/// Path separators become `__` and spaces become `_`.
pub fn quilt_identifier(key: &str) -> String {
    key.replace(['/', '\\'], "__").replace(' ', "_")
}

impl HttpDeployer {
    pub(crate) async fn deploy_quilt(
        &self,
        cancel: &CancellationToken,
        dir: &Path,
        options: &DeployOptions,
    ) -> Result<DeployResult> {
        let (tree, files) = self.enumerate(dir).await?;
        if options.only.is_some() {
            tracing::debug!("Quilts always contain the whole site, ignoring file subset");
        }
        if files.is_empty() {
            exn::bail!(ErrorKind::NoFiles(dir.to_path_buf()));
        }

        let mut form = Form::new();
        let mut paths: HashMap<String, String> = HashMap::with_capacity(files.len());
        let mut total: u64 = 0;
        for file in &files {
            if cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            let identifier = quilt_identifier(&file.key);
            if let Some(existing) = paths.insert(identifier.clone(), file.key.clone()) {
                exn::bail!(ErrorKind::DuplicateIdentifier { identifier, first: existing, second: file.key.clone() });
            }
            let bytes = tree.read(&file.path).await.or_raise(|| ErrorKind::ReadFile(file.key.clone()))?;
            total += bytes.len() as u64;
            form = form.part(identifier.clone(), Part::bytes(bytes).file_name(identifier));
        }
        tracing::info!(files = files.len(), bytes = total, "Uploading quilt");

        let request = self
            .client
            .put(Self::endpoint(&self.publisher, "v1/quilts"))
            .query(&[("epochs", self.epochs(options))])
            .multipart(form);
        let body = match self.put(cancel, request, total).await {
            Ok(body) => body,
            Err(err) if matches!(&*err, ErrorKind::Timeout) => return Err(err).or_raise(|| ErrorKind::QuiltTimeout),
            Err(err) => return Err(err),
        };
        let response: QuiltStoreResponse =
            serde_json::from_str(&body).or_raise(|| ErrorKind::InvalidResponse("malformed quilt store result"))?;
        let quilt_id = response
            .blob_store_result
            .blob_id()
            .ok_or_raise(|| ErrorKind::InvalidResponse("missing quilt blob id"))?
            .to_string();

        let mut links = vec![self.blob_link(&quilt_id)];
        let mut uploaded = BTreeMap::new();
        let mut patches = Vec::with_capacity(response.stored_quilt_blobs.len());
        for stored in response.stored_quilt_blobs {
            if stored.quilt_patch_id.is_empty() {
                tracing::warn!(identifier = %stored.identifier, "Publisher returned an empty quilt patch id");
                continue;
            }
            let path = match paths.get(&stored.identifier) {
                Some(path) => path.clone(),
                None => {
                    tracing::warn!(identifier = %stored.identifier, "Publisher returned an unknown quilt identifier");
                    stored.identifier.clone()
                }
            };
            links.push(self.patch_link(&stored.quilt_patch_id));
            uploaded.insert(path.clone(), stored.quilt_patch_id.clone());
            patches.push(QuiltPatch { path, identifier: stored.identifier, patch_id: stored.quilt_patch_id });
        }
        let mut missing: Vec<FileFailure> = paths
            .into_values()
            .filter(|path| !uploaded.contains_key(path))
            .map(|path| FileFailure { path, reason: "no quilt patch id in publisher response".to_string() })
            .collect();
        if !missing.is_empty() {
            missing.sort_by(|a, b| a.path.cmp(&b.path));
            exn::bail!(ErrorKind::UploadFailed(FailedUploads(missing)));
        }
        tracing::info!(quilt_id = %quilt_id, patches = patches.len(), "Stored quilt");
        Ok(DeployResult {
            success: true,
            message: format!("stored {} file(s) in quilt {quilt_id}", patches.len()),
            object_id: Some(quilt_id),
            links,
            files: uploaded,
            resource_count: patches.len(),
            patches,
        })
    }
}
