//! Concurrent upload engine for publishing rendered sites.
//!
//! The [`Deployer`] trait is the contract every backend implements. The
//! [`HttpDeployer`] talks to a publisher's HTTP API in one of two modes:
//! - **Quilt**: every file in a single multipart request. Fast for small
//!   sites, but the whole upload fails or succeeds as one.
//! - **Blobs**: one request per file through a bounded worker pool, with
//!   per-file retry, exponential backoff and dynamic timeouts. Failures are
//!   collected and reported together once every file has been tried.
//!
//! All operations accept a [`CancellationToken`](tokio_util::sync::CancellationToken)
//! and stop promptly when it fires.

mod blobs;
mod deployer;
pub mod error;
mod http;
#[cfg(any(test, feature = "mock"))]
mod mock;
mod quilt;
pub mod response;
mod retry;

pub use crate::deployer::{DeployOptions, DeployResult, Deployer, QuiltPatch};
pub use crate::http::HttpDeployer;
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::{DeployCall, MockDeployer};
pub use crate::quilt::quilt_identifier;
pub use crate::retry::{RetryPolicy, request_timeout};
