//! Tracing subscriber setup.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sitedrop_config::LogConfig;
use tracing_subscriber::EnvFilter;

/// Filter used when neither `RUST_LOG` nor an explicit filter is set.
fn default_directive(config: &LogConfig) -> &'static str {
    if config.verbose { "debug" } else { "info" }
}

/// Build the event filter: `RUST_LOG` first, then the configured filter,
/// then the verbosity flag.
pub fn filter(config: &LogConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    match &config.filter {
        Some(directives) => EnvFilter::try_new(directives).or_raise(|| ErrorKind::Logging(directives.clone())),
        None => Ok(EnvFilter::new(default_directive(config))),
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LogConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(filter(config)?)
        .with_target(true)
        .try_init()
        .map_err(|err| exn::Exn::from(ErrorKind::Logging(err.to_string())))
}

/// Route events to the test harness' captured output. Safe to call from
/// every test.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,sitedrop=debug")))
        .with_test_writer()
        .try_init();
}
