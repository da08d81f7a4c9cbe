//! Layered configuration for sitedrop.
//!
//! Values are resolved in order, later layers winning:
//! 1. Built-in defaults.
//! 2. A configuration file (TOML, YAML or JSON, chosen by extension).
//! 3. `SITEDROP_` environment variables, with `__` separating nested keys
//!    (`SITEDROP_PUBLISH__WORKERS=4`).

pub mod error;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "SITEDROP_";
const DEFAULT_FILE_NAME: &str = "config.toml";

/// How a directory is transmitted to the publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    /// Every file in one multipart request.
    Quilt,
    /// One request per file through a worker pool.
    #[default]
    Blobs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Base URL of the publisher that accepts uploads.
    pub publisher_url: String,
    /// Base URL of the aggregator that serves stored blobs.
    pub aggregator_url: String,
    pub mode: UploadMode,
    /// Concurrent uploads in per-file mode.
    pub workers: usize,
    /// Attempts per file, including the first.
    pub max_attempts: u32,
    /// Storage duration requested from the publisher.
    pub epochs: u32,
}
impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            publisher_url: "http://127.0.0.1:31415".to_string(),
            aggregator_url: "http://127.0.0.1:31415".to_string(),
            mode: UploadMode::default(),
            workers: 10,
            max_attempts: 5,
            epochs: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When disabled every publish uploads the whole site.
    pub enabled: bool,
}
impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Raise the default log level to `debug`.
    pub verbose: bool,
    /// Explicit `tracing` filter directive, overriding `verbose`.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub publish: PublishConfig,
    pub cache: CacheConfig,
    pub log: LogConfig,
}

impl Config {
    /// Per-user configuration file, if a home directory can be determined.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "sitedrop").map(|dirs| dirs.config_dir().join(DEFAULT_FILE_NAME))
    }

    /// Build the layered provider without extracting it.
    ///
    /// An explicit `path` must exist. Without one, the per-user file is used
    /// when present.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        let file = match path {
            Some(path) if !path.is_file() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.is_file()),
        };
        if let Some(file) = file {
            tracing::debug!(path = %file.display(), "Loading configuration file");
            figment = match file.extension().and_then(|ext| ext.to_str()) {
                Some("toml") => figment.merge(Toml::file(&file)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(&file)),
                Some("json") => figment.merge(Json::file(&file)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(file)),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Resolve and validate the configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(path)?.extract().or_raise(|| ErrorKind::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but cannot work.
    pub fn validate(&self) -> Result<()> {
        let publish = &self.publish;
        let urls = [
            ("publish.publisher_url", &publish.publisher_url),
            ("publish.aggregator_url", &publish.aggregator_url),
        ];
        for (field, url) in urls {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                exn::bail!(ErrorKind::Invalid { field, reason: "must be an http or https URL" });
            }
        }
        if publish.workers == 0 {
            exn::bail!(ErrorKind::Invalid { field: "publish.workers", reason: "must be at least 1" });
        }
        if publish.max_attempts == 0 {
            exn::bail!(ErrorKind::Invalid { field: "publish.max_attempts", reason: "must be at least 1" });
        }
        if publish.epochs == 0 {
            exn::bail!(ErrorKind::Invalid { field: "publish.epochs", reason: "must be at least 1" });
        }
        Ok(())
    }
}
