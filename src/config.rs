//! Configuration loading and validation
//!
//! Settings come from an optional JSON file in the user's config directory,
//! overridden by `OPENPLAN_*` environment variables.

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::error::{SyncError, SyncResult};

pub const ENV_DB_PATH: &str = "OPENPLAN_DB_PATH";
pub const ENV_REST_URL: &str = "OPENPLAN_REST_URL";
pub const ENV_API_KEY: &str = "OPENPLAN_API_KEY";
pub const ENV_ACCESS_TOKEN: &str = "OPENPLAN_ACCESS_TOKEN";
pub const ENV_OWNER_ID: &str = "OPENPLAN_OWNER_ID";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Local SQLite database, used when no REST URL is set.
    pub database_path: PathBuf,
    /// Base URL of the hosted data store.
    pub rest_url: Option<String>,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub owner_id: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let app_data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("openplan");

        Self {
            database_path: app_data_dir.join("openplan.db"),
            rest_url: None,
            api_key: None,
            access_token: None,
            owner_id: "local".to_string(),
        }
    }
}

impl SyncConfig {
    /// `<config dir>/openplan/config.json`
    pub fn default_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("openplan").join("config.json"))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Defaults overridden by the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Config file (if present) overridden by the environment.
    pub fn load() -> Result<Self> {
        let mut config = match Self::default_file_path() {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(&path)?
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let Some(path) = env_value(ENV_DB_PATH) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(url) = env_value(ENV_REST_URL) {
            self.rest_url = Some(url);
        }
        if let Some(key) = env_value(ENV_API_KEY) {
            self.api_key = Some(key);
        }
        if let Some(token) = env_value(ENV_ACCESS_TOKEN) {
            self.access_token = Some(token);
        }
        if let Some(owner) = env_value(ENV_OWNER_ID) {
            self.owner_id = owner;
        }
    }

    pub fn uses_rest(&self) -> bool {
        self.rest_url.is_some()
    }
}

fn env_value(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

/// Validates the sync configuration
///
/// # Returns
///
/// * `Ok(())` - the configuration can be used to start a session
/// * `Err(SyncError::Config)` - describing the first problem found
pub fn validate_config(config: &SyncConfig) -> SyncResult<()> {
    if config.owner_id.trim().is_empty() {
        return Err(SyncError::config("owner id must not be empty"));
    }

    match &config.rest_url {
        Some(rest_url) => {
            let parsed = url::Url::parse(rest_url)
                .map_err(|e| SyncError::config(format!("invalid REST URL '{}': {}", rest_url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(SyncError::config(format!(
                    "REST URL must use http or https, got '{}'",
                    parsed.scheme()
                )));
            }
            if config.api_key.as_deref().map_or(true, |key| key.trim().is_empty()) {
                return Err(SyncError::config(format!("{} is required with a REST URL", ENV_API_KEY)));
            }
            info!("Configuration validation (REST backend at {})", parsed.host_str().unwrap_or("?"));
        }
        None => {
            info!("Configuration validation (local database at {})", config.database_path.display());
        }
    }
    Ok(())
}
