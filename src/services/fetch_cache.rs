use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::fetch_request::FetchRequest;
use crate::domain::page::Record;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("failed to read cache file {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse cache file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("failed to write cache file {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("failed to serialize cache: {0}")]
    Serialize(#[source] serde_json::Error),
}

/// A complete result set for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub records: Vec<Record>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    entries: BTreeMap<String, CacheEntry>,
}

/// On-disk cache of fetched record sets, keyed by [`FetchRequest::cache_key`].
///
/// The whole file is rewritten through a temporary sibling and a rename, so an
/// interrupted run leaves either the previous or the new contents behind.
/// Unreadable or corrupt files behave like an empty cache.
pub struct FetchCache {
    path: PathBuf,
    max_age: Option<Duration>,
}

impl FetchCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_age: None,
        }
    }

    /// Entries older than `max_age` are treated as missing.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn lookup(&self, request: &FetchRequest, now: DateTime<Utc>) -> Option<CacheEntry> {
        let mut file = match self.load().await {
            Ok(file) => file,
            Err(err) => {
                warn!(error = %err, "ignoring unreadable cache");
                return None;
            }
        };
        let entry = file.entries.remove(&request.cache_key())?;
        if let Some(max_age) = self.max_age {
            if now - entry.fetched_at > max_age {
                debug!(endpoint = request.endpoint(), fetched_at = %entry.fetched_at, "cache entry expired");
                return None;
            }
        }
        Some(entry)
    }

    pub async fn store(&self, request: &FetchRequest, entry: &CacheEntry) -> Result<(), CacheError> {
        let mut file = self.load_or_empty().await;
        file.entries.insert(request.cache_key(), entry.clone());
        self.save(&file).await
    }

    /// Drops the entry for `request`. Returns whether one existed.
    pub async fn invalidate(&self, request: &FetchRequest) -> Result<bool, CacheError> {
        let mut file = self.load_or_empty().await;
        if file.entries.remove(&request.cache_key()).is_none() {
            return Ok(false);
        }
        self.save(&file).await?;
        Ok(true)
    }

    /// Removes the cache file. Returns the number of entries it held.
    pub async fn clear(&self) -> Result<usize, CacheError> {
        let count = self.load_or_empty().await.entries.len();
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(count),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(count),
            Err(source) => Err(CacheError::Write {
                path: self.path.clone(),
                source,
            }),
        }
    }

    async fn load(&self) -> Result<CacheFile, CacheError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(CacheFile::default()),
            Err(source) => {
                return Err(CacheError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        serde_json::from_str(&contents).map_err(|source| CacheError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    async fn load_or_empty(&self) -> CacheFile {
        match self.load().await {
            Ok(file) => file,
            Err(err) => {
                warn!(error = %err, "discarding unreadable cache");
                CacheFile::default()
            }
        }
    }

    async fn save(&self, file: &CacheFile) -> Result<(), CacheError> {
        let contents = serde_json::to_vec_pretty(file).map_err(CacheError::Serialize)?;
        let write_error = |source| CacheError::Write {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
        }
        let temp_path = self.temp_path();
        tokio::fs::write(&temp_path, contents)
            .await
            .map_err(write_error)?;
        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(write_error)
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone().into_os_string();
        temp.push(".tmp");
        PathBuf::from(temp)
    }
}
