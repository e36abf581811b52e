use crate::error::SightlineError;
use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};

pub const DEFAULT_DB_PATH: &str = "sightline.db";
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Settings for a sightline process. Every field may be omitted from the TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Location of the SQLite graph database.
    pub db_path: PathBuf,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Read the config at `path`. No path, or a path that does not exist, yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<ServiceConfig, SightlineError> {
        let Some(path) = path else {
            return Ok(ServiceConfig::default());
        };
        tracing::debug!("Attempting to read config from: {:?}", path);
        if !path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(ServiceConfig::default());
        }
        let content = read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SightlineError> {
        tracing::debug!("Attempting to write config to: {:?}", path);
        let toml_string = toml::to_string(self)
            .map_err(|e| SightlineError::Config(format!("Toml serialization error: {e}")))?;
        write(path, toml_string)?;
        Ok(())
    }
}
