//! Host configuration loaded from TOML.
//!
//! ```toml
//! plugin_dirs = ["/opt/app/extensions", "/home/me/.app/extensions"]
//! data_root = "/home/me/.app/extension-data"
//! log_level = "info"
//! ```

use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{}`: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    /// Scan roots, in precedence order for duplicate ids.
    pub plugin_dirs: Vec<PathBuf>,
    /// Parent of per-extension data directories.
    pub data_root: PathBuf,
    #[serde(default = "default_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// SQLite file backing extension storage; in-memory when absent.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
}

fn default_level() -> String {
    default_log_level().to_string()
}

impl HostConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin_dirs.is_empty() {
            return Err(ConfigError::Invalid(
                "plugin_dirs must list at least one directory".to_string(),
            ));
        }
        if !self.data_root.is_absolute() {
            return Err(ConfigError::Invalid(format!(
                "data_root must be an absolute path, got `{}`",
                self.data_root.display()
            )));
        }
        if let Some(log_dir) = &self.log_dir {
            if !log_dir.is_absolute() {
                return Err(ConfigError::Invalid(format!(
                    "log_dir must be an absolute path, got `{}`",
                    log_dir.display()
                )));
            }
        }
        Ok(())
    }
}
