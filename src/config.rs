//! Configuration management for the contents index service.
//!
//! Archives, archive groups, and the tunables of the refresh and search
//! pipelines are read from a JSON file. Every section has defaults so a
//! configuration only needs to name the archives it indexes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::error::{IndexError, IndexResult};

/// A single archive whose Contents feed is indexed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedConfig {
    /// Location of the (optionally compressed) Contents file.
    pub url: Url,
}

impl FeedConfig {
    /// Create a feed configuration from a URL string.
    pub fn new(url: &str) -> IndexResult<Self> {
        let url = Url::parse(url)
            .map_err(|e| IndexError::Configuration(format!("Invalid feed URL {}: {}", url, e)))?;
        Ok(Self { url })
    }
}

/// Refresh scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// Seconds between refresh cycles.
    pub interval_seconds: u64,
}

/// Ingestion tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Number of entries written per store transaction.
    pub batch_size: usize,
    /// Fraction of malformed lines above which a feed is rejected.
    pub max_skip_ratio: f64,
    /// Timeout for retrieving one feed, in seconds.
    pub fetch_timeout_seconds: u64,
}

/// Search engine tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of concurrent matchers per search.
    pub workers: usize,
    /// Capacity of the queue feeding paths to the matchers.
    pub work_queue_size: usize,
    /// Capacity of the queue carrying matches to the collector.
    pub result_queue_size: usize,
    /// Time a single HTTP query may take before an empty result is returned.
    pub timeout_seconds: u64,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address.
    pub bind_address: String,
    /// Server port.
    pub port: u16,
}

/// Service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the index database.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Archives to index, keyed by the name they are queried with.
    pub archives: BTreeMap<String, FeedConfig>,
    /// Named groups of archives queried as one.
    #[serde(default)]
    pub groups: BTreeMap<String, Vec<String>>,
    /// Refresh scheduling.
    #[serde(default)]
    pub refresh: RefreshConfig,
    /// Ingestion tunables.
    #[serde(default)]
    pub ingest: IngestConfig,
    /// Search tunables.
    #[serde(default)]
    pub search: SearchConfig,
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("/var/lib/debfind/contents.redb")
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 3 * 60 * 60, // 3 hours
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 50_000,
            max_skip_ratio: apt_contents::DEFAULT_MAX_SKIP_RATIO,
            fetch_timeout_seconds: 60 * 30, // 30 minutes
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            work_queue_size: 1024,
            result_queue_size: 2048,
            timeout_seconds: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut archives = BTreeMap::new();
        archives.insert(
            "neon".to_string(),
            FeedConfig {
                url: Url::parse("http://archive.neon.kde.org/user/dists/xenial/main/Contents-amd64.gz")
                    .expect("valid default URL"),
            },
        );
        archives.insert(
            "ubuntu".to_string(),
            FeedConfig {
                url: Url::parse("http://archive.ubuntu.com/ubuntu/dists/xenial/Contents-amd64.gz")
                    .expect("valid default URL"),
            },
        );

        let mut groups = BTreeMap::new();
        groups.insert(
            "neon-all".to_string(),
            vec!["neon".to_string(), "ubuntu".to_string()],
        );

        Self {
            database_path: default_database_path(),
            archives,
            groups,
            refresh: RefreshConfig::default(),
            ingest: IngestConfig::default(),
            search: SearchConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl RefreshConfig {
    /// Interval between refresh cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl IngestConfig {
    /// Timeout for retrieving one feed.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_seconds)
    }
}

impl SearchConfig {
    /// Timeout applied to a single query at the API boundary.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> IndexResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            IndexError::Configuration(format!("Failed to read config file: {}", e))
        })?;

        let config: Config = serde_json::from_str(&content)
            .map_err(|e| IndexError::Configuration(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn to_file(&self, path: &Path) -> IndexResult<()> {
        let content = serde_json::to_string_pretty(self).map_err(|e| {
            IndexError::Configuration(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, content).map_err(|e| {
            IndexError::Configuration(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the entire configuration.
    pub fn validate(&self) -> IndexResult<()> {
        if self.archives.is_empty() {
            return Err(IndexError::Configuration(
                "At least one archive must be configured".to_string(),
            ));
        }

        for (name, feed) in &self.archives {
            if name.trim().is_empty() {
                return Err(IndexError::Configuration(
                    "Archive name cannot be empty".to_string(),
                ));
            }
            if !matches!(feed.url.scheme(), "http" | "https" | "file") {
                return Err(IndexError::Configuration(format!(
                    "Archive '{}': unsupported URL scheme '{}'",
                    name,
                    feed.url.scheme()
                )));
            }
        }

        for (group, members) in &self.groups {
            if self.archives.contains_key(group) {
                return Err(IndexError::Configuration(format!(
                    "Group '{}' shadows an archive of the same name",
                    group
                )));
            }
            if members.is_empty() {
                return Err(IndexError::Configuration(format!(
                    "Group '{}' has no members",
                    group
                )));
            }
            if let Some(unknown) = members.iter().find(|m| !self.archives.contains_key(*m)) {
                return Err(IndexError::Configuration(format!(
                    "Group '{}': unknown archive '{}'",
                    group, unknown
                )));
            }
        }

        if self.refresh.interval_seconds == 0 {
            return Err(IndexError::Configuration(
                "Refresh interval must be positive".to_string(),
            ));
        }

        if self.ingest.batch_size == 0 {
            return Err(IndexError::Configuration(
                "Ingest batch size must be positive".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.ingest.max_skip_ratio) {
            return Err(IndexError::Configuration(format!(
                "max_skip_ratio must be between 0 and 1, got {}",
                self.ingest.max_skip_ratio
            )));
        }

        if self.search.workers == 0
            || self.search.work_queue_size == 0
            || self.search.result_queue_size == 0
        {
            return Err(IndexError::Configuration(
                "Search workers and queue sizes must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the feed configuration of an archive by name.
    pub fn get_archive(&self, name: &str) -> Option<&FeedConfig> {
        self.archives.get(name)
    }

    /// Add an archive.
    pub fn add_archive(&mut self, name: String, feed: FeedConfig) {
        self.archives.insert(name, feed);
    }
}
