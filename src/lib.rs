//! Incremental publishing of rendered static sites.
//!
//! [`publish`] ties the pieces together: the build cache works out what
//! changed since the last publish, a [`Deployer`](sitedrop_deploy::Deployer)
//! uploads just those files, and the cache records the new build.
//!
//! The building blocks are re-exported for callers that need finer control:
//! - [`cache`]: fingerprinting, change detection and the SQLite cache store.
//! - [`deploy`]: the upload engine and the deployer contract.
//! - [`config`]: layered configuration.

pub mod error;
pub mod logging;
mod publish;

pub use crate::publish::{PublishOptions, PublishReport, publish};
pub use sitedrop_cache as cache;
pub use sitedrop_config as config;
pub use sitedrop_deploy as deploy;
pub use sitedrop_storage as storage;
