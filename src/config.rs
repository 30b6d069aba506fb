//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. the path given with `--config`
//! 2. `$LAZYSMTP_CONFIG`
//! 3. `<config dir>/lazysmtp/config.toml`
//! 4. Built-in defaults, when none of the above exists

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::{self, DirectoryResolver};
use crate::smtp::ServiceConfig;

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "LAZYSMTP_CONFIG";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings.
    pub smtp: ServiceConfig,
    /// Message database settings.
    pub storage: StorageConfig,
    /// General behavior settings.
    pub general: GeneralConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file; the platform data directory is used when unset.
    pub db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Load configuration from `path`, or from the standard location when
/// `path` is `None`.
///
/// A missing file yields the default configuration. An unreadable or
/// malformed one is an error; callers usually log it and fall back to
/// [`Config::default`], once logging is set up.
pub fn load_config(
    path: Option<&Path>,
    resolver: &dyn DirectoryResolver,
) -> Result<Config, ConfigError> {
    let Some(path) = path
        .map(Path::to_path_buf)
        .or_else(|| config_file_path(resolver))
    else {
        return Ok(Config::default());
    };

    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
        path: path.clone(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path(resolver: &dyn DirectoryResolver) -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
        return Some(PathBuf::from(env_path));
    }

    paths::app_config_dir(resolver).map(|d| d.join("config.toml"))
}
