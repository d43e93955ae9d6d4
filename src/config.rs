//! Configuration for the store, the catalog and the replication engine.
//!
//! Configuration can be constructed programmatically or deserialized from
//! JSON (see [`ReplicatorConfig::from_json_file`]).
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicatorConfig
//! ├── public_base_url: String      # Where materialized files are served from
//! ├── storage: StorageConfig       # Snapshot files and media directories
//! ├── sync: SyncConfig             # Timeouts, download fan-out, remote pacing
//! └── fetcher: FetcherConfig       # HTTP client settings
//! ```
//!
//! # JSON Example
//!
//! ```json
//! {
//!   "public_base_url": "https://bot.example.com/",
//!   "storage": { "maps_dir": "/var/lib/bot/maps", "static_dir": "/var/lib/bot/static" },
//!   "sync": { "remote_call_timeout": "20s", "remote_calls_per_sec": 2 },
//!   "fetcher": { "max_download_bytes": 1048576 }
//! }
//! ```

use crate::error::{ReplicatorError, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicatorConfig {
    /// Public address that serves `storage.static_dir`.
    /// Materialized values are rewritten to URIs under this base.
    pub public_base_url: String,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub fetcher: FetcherConfig,
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            public_base_url: "http://localhost:8080/".to_string(),
            storage: StorageConfig::default(),
            sync: SyncConfig::default(),
            fetcher: FetcherConfig::default(),
        }
    }
}

impl ReplicatorConfig {
    /// Create a config rooted at `root` with short timeouts, for tests.
    pub fn for_testing(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            public_base_url: "https://media.test/".to_string(),
            storage: StorageConfig {
                maps_dir: root.join("maps").to_string_lossy().into_owned(),
                static_dir: root.join("static").to_string_lossy().into_owned(),
                ..Default::default()
            },
            sync: SyncConfig {
                remote_call_timeout: "2s".to_string(),
                download_timeout: "2s".to_string(),
                ..Default::default()
            },
            fetcher: FetcherConfig::default(),
        }
    }

    /// Load a config from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read(path).map_err(|e| ReplicatorError::persist(path, e))?;
        let config: Self =
            serde_json::from_slice(&raw).map_err(|e| ReplicatorError::Serialization {
                path: path.to_path_buf(),
                source: e,
            })?;
        config.public_base()?;
        Ok(config)
    }

    /// Parse `public_base_url`, forcing a trailing slash so relative joins
    /// stay under its path.
    pub fn public_base(&self) -> Result<Url> {
        let mut raw = self.public_base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let url = Url::parse(&raw)
            .map_err(|e| ReplicatorError::Config(format!("public_base_url {:?}: {}", raw, e)))?;
        if url.cannot_be_a_base() {
            return Err(ReplicatorError::Config(format!(
                "public_base_url {:?} cannot be a base",
                raw
            )));
        }
        Ok(url)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StorageConfig: snapshot files and media directories
// ═══════════════════════════════════════════════════════════════════════════════

/// Where snapshots and materialized files live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the snapshot files.
    #[serde(default = "default_maps_dir")]
    pub maps_dir: String,

    /// Directory served at `public_base_url`.
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    #[serde(default = "default_url_map_file")]
    pub url_map_file: String,

    #[serde(default = "default_emoji_map_file")]
    pub emoji_map_file: String,

    /// Subdirectory of `static_dir` for materialized URL values.
    #[serde(default = "default_url_media_dir")]
    pub url_media_dir: String,

    /// Subdirectory of `static_dir` for captured emoji.
    #[serde(default = "default_emoji_media_dir")]
    pub emoji_media_dir: String,
}

fn default_maps_dir() -> String {
    "maps".to_string()
}

fn default_static_dir() -> String {
    "static".to_string()
}

fn default_url_map_file() -> String {
    "url.json".to_string()
}

fn default_emoji_map_file() -> String {
    "emoji.json".to_string()
}

fn default_url_media_dir() -> String {
    "img".to_string()
}

fn default_emoji_media_dir() -> String {
    "emoji".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            maps_dir: default_maps_dir(),
            static_dir: default_static_dir(),
            url_map_file: default_url_map_file(),
            emoji_map_file: default_emoji_map_file(),
            url_media_dir: default_url_media_dir(),
            emoji_media_dir: default_emoji_media_dir(),
        }
    }
}

impl StorageConfig {
    pub fn url_map_path(&self) -> PathBuf {
        Path::new(&self.maps_dir).join(&self.url_map_file)
    }

    pub fn emoji_map_path(&self) -> PathBuf {
        Path::new(&self.maps_dir).join(&self.emoji_map_file)
    }

    pub fn url_media_path(&self) -> PathBuf {
        Path::new(&self.static_dir).join(&self.url_media_dir)
    }

    pub fn emoji_media_path(&self) -> PathBuf {
        Path::new(&self.static_dir).join(&self.emoji_media_dir)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SyncConfig: timeouts and fan-out limits
// ═══════════════════════════════════════════════════════════════════════════════

/// Capture and replication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Upper bound for each target platform call, as a duration string.
    #[serde(default = "default_remote_call_timeout")]
    pub remote_call_timeout: String,

    /// Upper bound for each resource download, as a duration string.
    #[serde(default = "default_download_timeout")]
    pub download_timeout: String,

    /// Maximum concurrent downloads during a capture.
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Sustained remote calls per second per target. `0` disables pacing.
    #[serde(default)]
    pub remote_calls_per_sec: u32,

    /// Burst allowance when pacing is enabled.
    #[serde(default = "default_remote_call_burst")]
    pub remote_call_burst: u32,
}

fn default_remote_call_timeout() -> String {
    "30s".to_string()
}

fn default_download_timeout() -> String {
    "30s".to_string()
}

fn default_max_concurrent_downloads() -> usize {
    8
}

fn default_remote_call_burst() -> u32 {
    5
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote_call_timeout: default_remote_call_timeout(),
            download_timeout: default_download_timeout(),
            max_concurrent_downloads: default_max_concurrent_downloads(),
            remote_calls_per_sec: 0,
            remote_call_burst: default_remote_call_burst(),
        }
    }
}

impl SyncConfig {
    /// Parse `remote_call_timeout`, falling back to 30 seconds.
    pub fn remote_call_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.remote_call_timeout).unwrap_or(Duration::from_secs(30))
    }

    /// Parse `download_timeout`, falling back to 30 seconds.
    pub fn download_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.download_timeout).unwrap_or(Duration::from_secs(30))
    }

    /// Rate limit for remote calls, or `None` when pacing is disabled.
    pub fn rate_limit_config(&self) -> Option<crate::resilience::RateLimitConfig> {
        if self.remote_calls_per_sec == 0 {
            return None;
        }
        Some(crate::resilience::RateLimitConfig {
            burst_size: self.remote_call_burst.max(1),
            refill_rate: self.remote_calls_per_sec,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FetcherConfig: HTTP client
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings for [`HttpFetcher`](crate::fetcher::HttpFetcher).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Downloads larger than this are rejected.
    #[serde(default = "default_max_download_bytes")]
    pub max_download_bytes: usize,
}

fn default_request_timeout() -> String {
    "30s".to_string()
}

fn default_user_agent() -> String {
    concat!("emoji-replicator/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_download_bytes() -> usize {
    8 * 1024 * 1024
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
            max_download_bytes: default_max_download_bytes(),
        }
    }
}

impl FetcherConfig {
    pub fn request_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(30))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
