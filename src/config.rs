//! Configuration Management
//!
//! Persistent configuration for cloudrecon, with environment overrides.

use crate::engine::Timeouts;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_ENDPOINT: &str = "CLOUDRECON_ENDPOINT";
pub const ENV_REGION: &str = "CLOUDRECON_REGION";
pub const ENV_TOKEN: &str = "CLOUDRECON_TOKEN";
pub const ENV_PROJECTS: &str = "CLOUDRECON_PROJECTS";

const DEFAULT_ENDPOINT: &str = "https://{service}.api.ksyun.com";
const DEFAULT_API_VERSION: &str = "2016-03-04";

/// Operation ceilings in seconds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    #[serde(default = "default_timeout_secs")]
    pub create: u64,
    #[serde(default = "default_timeout_secs")]
    pub update: u64,
    #[serde(default = "default_timeout_secs")]
    pub delete: u64,
}

fn default_timeout_secs() -> u64 {
    600
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            create: default_timeout_secs(),
            update: default_timeout_secs(),
            delete: default_timeout_secs(),
        }
    }
}

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Endpoint, optionally a `{service}` template
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    /// Projects added to every query
    #[serde(default)]
    pub project_ids: Vec<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Run the dry-run pass before mutating calls
    #[serde(default)]
    pub dry_run: Option<bool>,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Poll interval of retries and waits, in seconds
    #[serde(default)]
    pub retry_interval_secs: Option<u64>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudrecon").join("config.json"))
    }

    /// Load configuration from disk, falling back to defaults
    pub fn load() -> Self {
        let Some(path) = Self::config_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring unreadable config {}: {:#}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Endpoint (env > config > default)
    pub fn effective_endpoint(&self) -> String {
        env_var(ENV_ENDPOINT)
            .or_else(|| self.endpoint.clone())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
    }

    pub fn effective_region(&self) -> Option<String> {
        env_var(ENV_REGION).or_else(|| self.region.clone())
    }

    pub fn effective_token(&self) -> Option<String> {
        env_var(ENV_TOKEN).or_else(|| self.access_token.clone())
    }

    pub fn effective_api_version(&self) -> String {
        self.api_version
            .clone()
            .unwrap_or_else(|| DEFAULT_API_VERSION.to_string())
    }

    /// Projects (comma-separated env > config)
    pub fn effective_projects(&self) -> Vec<String> {
        match env_var(ENV_PROJECTS) {
            Some(list) => split_list(&list),
            None => self.project_ids.clone(),
        }
    }

    pub fn effective_dry_run(&self) -> bool {
        self.dry_run.unwrap_or(true)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            create: Duration::from_secs(self.timeouts.create),
            update: Duration::from_secs(self.timeouts.update),
            delete: Duration::from_secs(self.timeouts.delete),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.unwrap_or(5))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn split_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
