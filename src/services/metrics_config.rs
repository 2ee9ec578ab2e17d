use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::services::fetch_cache::FetchCache;
use crate::services::fetcher::FetchOptions;
use crate::services::github_api::GitHubSettings;
use crate::services::jira_api::JiraSettings;
use crate::services::semaphore_api::SemaphoreSettings;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("missing setting `{0}`")]
    MissingSetting(&'static str),
    #[error("invalid setting `{name}`: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
    #[error("missing credentials: set {0}")]
    MissingCredentials(&'static str),
    #[error("failed to build http client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// Settings for every source, read from a YAML file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub fetcher: FetcherSettings,
    pub github: GitHubSettings,
    pub jira: JiraSettings,
    pub semaphore: SemaphoreSettings,
}

impl MetricsConfig {
    /// Reads `path`, or falls back to defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_yaml_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, serde_yaml::Error> {
        // An empty document deserializes to unit, not to an empty map.
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(contents)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetcherSettings {
    pub page_size: u32,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_jitter_ms: u64,
    pub concurrency: usize,
    pub cache_path: PathBuf,
    /// Cached results older than this are fetched again; unset keeps them
    /// until invalidated by hand.
    pub max_age_secs: Option<u64>,
}

impl Default for FetcherSettings {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_attempts: 3,
            base_delay_ms: 1000,
            max_jitter_ms: 1000,
            concurrency: 1,
            cache_path: PathBuf::from(".eng-metrics-cache.json"),
            max_age_secs: None,
        }
    }
}

impl FetcherSettings {
    pub fn fetch_options(&self) -> Result<FetchOptions, ConfigError> {
        if self.page_size == 0 {
            return Err(invalid("fetcher.page_size", "must be greater than zero"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("fetcher.max_attempts", "must be greater than zero"));
        }
        if self.concurrency == 0 {
            return Err(invalid("fetcher.concurrency", "must be greater than zero"));
        }
        Ok(FetchOptions {
            page_size: self.page_size,
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
            concurrency: self.concurrency,
        })
    }

    pub fn cache(&self) -> FetchCache {
        let cache = FetchCache::new(&self.cache_path);
        match self.max_age_secs {
            Some(secs) => cache.with_max_age(chrono::Duration::seconds(secs as i64)),
            None => cache,
        }
    }
}

fn invalid(name: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting {
        name,
        reason: reason.to_string(),
    }
}
