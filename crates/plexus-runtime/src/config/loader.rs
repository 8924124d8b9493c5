//! Configuration file loader.
//!
//! The config file location comes from an explicit path or, failing that,
//! the `CONFIGPATH` environment variable. Values can be overridden with
//! `PLEXUS_`-prefixed environment variables (e.g. `PLEXUS_LOG_LEVEL=warn`).

use std::path::{Path, PathBuf};

use figment::Figment;
use figment::providers::{Env, Format, Yaml};
use tracing::info;

use super::schema::ServiceConfig;
use crate::error::{HostError, HostResult};
use plexus_core::SERVICE_MAILBOX;

/// Environment variable naming the config file when no path is given.
pub const CONFIG_PATH_ENV: &str = "CONFIGPATH";

/// Loads the service configuration.
///
/// `path` wins over `$CONFIGPATH`; having neither is a configuration
/// error, as is a path that does not exist.
pub fn load_config(path: Option<&Path>) -> HostResult<ServiceConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .map_err(|_| {
                HostError::Config(format!(
                    "no config path given and ${CONFIG_PATH_ENV} is not set"
                ))
            })?,
    };
    if !path.is_file() {
        return Err(HostError::Config(format!(
            "config file {} does not exist",
            path.display()
        )));
    }
    info!(path = %path.display(), "loading configuration");

    let config: ServiceConfig = Figment::new()
        .merge(Yaml::file(&path))
        .merge(Env::prefixed("PLEXUS_"))
        .extract()
        .map_err(|e| HostError::Config(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

/// Parses a configuration from a YAML string. Used by embedders and tests.
pub fn load_config_from_str(yaml: &str) -> HostResult<ServiceConfig> {
    let config: ServiceConfig = Figment::new()
        .merge(Yaml::string(yaml))
        .extract()
        .map_err(|e| HostError::Config(e.to_string()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &ServiceConfig) -> HostResult<()> {
    let mut seen = std::collections::HashSet::new();
    for spec in &config.plugins {
        if spec.name.is_empty() {
            return Err(HostError::Config("plugin with empty type".into()));
        }
        if spec.name == SERVICE_MAILBOX {
            return Err(HostError::Config(format!(
                "plugin type '{SERVICE_MAILBOX}' is reserved for the supervisor"
            )));
        }
        if !seen.insert(spec.name.as_str()) {
            return Err(HostError::Config(format!(
                "duplicate plugin type '{}'",
                spec.name
            )));
        }
    }
    Ok(())
}
