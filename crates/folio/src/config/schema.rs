use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::RunnerConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    /// Root of the blob store (originals, page files, thumbnails).
    pub storage_directory: String,
    /// SQLite file. Defaults to `~/.folio/data/folio.db`.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default)]
    pub thumbnail: ThumbnailConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_worker_count() -> usize {
    num_cpus::get()
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThumbnailConfig {
    #[serde(default = "default_thumbnail_width")]
    pub width: u32,
    #[serde(default = "default_thumbnail_height")]
    pub height: u32,
}

fn default_thumbnail_width() -> u32 {
    200
}

fn default_thumbnail_height() -> u32 {
    280
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: default_thumbnail_width(),
            height: default_thumbnail_height(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    #[serde(default = "default_search_ttl_secs")]
    pub search_ttl_secs: u64,
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_search_ttl_secs() -> u64 {
    300
}

fn default_max_capacity() -> u64 {
    10_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            search_ttl_secs: default_search_ttl_secs(),
            max_capacity: default_max_capacity(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn search_ttl(&self) -> Duration {
        Duration::from_secs(self.search_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_snippet_length")]
    pub snippet_length: usize,
    #[serde(default = "default_per_page")]
    pub default_per_page: u32,
}

fn default_snippet_length() -> usize {
    200
}

fn default_per_page() -> u32 {
    20
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            snippet_length: default_snippet_length(),
            default_per_page: default_per_page(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Config {
    /// A configuration with every default, storing blobs and the database
    /// under `dir`.
    pub fn default_for(dir: &Path) -> Self {
        Self {
            version: "1.0".to_string(),
            storage_directory: dir.join("storage").to_string_lossy().into_owned(),
            database_path: Some(dir.join("folio.db").to_string_lossy().into_owned()),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            thumbnail: ThumbnailConfig::default(),
            cache: CacheConfig::default(),
            search: SearchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// `None` only when no path is configured and there is no home
    /// directory to default into.
    pub fn database_path(&self) -> Option<PathBuf> {
        match &self.database_path {
            Some(path) => Some(PathBuf::from(path)),
            None => crate::db::default_database_path(),
        }
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            max_attempts: self.max_attempts,
            retry_backoff: self.retry_backoff(),
            thumbnail_width: self.thumbnail.width,
            thumbnail_height: self.thumbnail.height,
        }
    }
}
