//! TOML configuration for the store layout and the metadata API.
//!
//! Everything has a sensible default; a minimal config only needs the
//! store root:
//!
//! ```toml
//! [store]
//! root = "/srv/videoclub"
//!
//! [tmdb]
//! language = "fr-FR"
//! max_concurrent = 4
//! ```
//!
//! The API bearer token deliberately never lives in the file; it comes
//! from the `TMDB_API_TOKEN` environment variable.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::fetch::RetryPolicy;

/// Environment variable holding the metadata API bearer token.
pub const TOKEN_ENV: &str = "TMDB_API_TOKEN";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub tmdb: TmdbConfig,
}

/// Where raw annotations live and where derived artifacts go.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Local directory backing the blob store.
    pub root: PathBuf,
    /// Key prefix for raw per-video annotation records.
    #[serde(default = "default_raw_prefix")]
    pub raw_prefix: String,
    /// Key prefix for derived artifacts.
    #[serde(default = "default_data_prefix")]
    pub data_prefix: String,
}

/// Metadata API endpoint, locales, image dimensions, and client limits.
#[derive(Debug, Clone, Deserialize)]
pub struct TmdbConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Primary locale for titles, overviews, and localized images.
    #[serde(default = "default_language")]
    pub language: String,
    /// Locale used when the primary overview is empty.
    #[serde(default = "default_fallback_language")]
    pub fallback_language: String,
    /// Poster width in pixels; must exist verbatim in the API's size list.
    #[serde(default = "default_poster_width")]
    pub poster_width: u32,
    #[serde(default = "default_poster_height")]
    pub poster_height: u32,
    #[serde(default = "default_profile_width")]
    pub profile_width: u32,
    /// Profile height in pixels; must exist verbatim in the API's size list.
    #[serde(default = "default_profile_height")]
    pub profile_height: u32,
    /// Maximum in-flight API requests.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Total attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
    #[serde(default = "default_honor_retry_after")]
    pub honor_retry_after: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_raw_prefix() -> String {
    "videos".to_string()
}
fn default_data_prefix() -> String {
    "data".to_string()
}
fn default_base_url() -> String {
    "https://api.themoviedb.org/3".to_string()
}
fn default_language() -> String {
    "fr-FR".to_string()
}
fn default_fallback_language() -> String {
    "en-US".to_string()
}
fn default_poster_width() -> u32 {
    780
}
fn default_poster_height() -> u32 {
    1170
}
fn default_profile_width() -> u32 {
    400
}
fn default_profile_height() -> u32 {
    632
}
fn default_max_concurrent() -> usize {
    4
}
fn default_max_attempts() -> u32 {
    5
}
fn default_base_backoff_ms() -> u64 {
    500
}
fn default_max_backoff_ms() -> u64 {
    8000
}
fn default_jitter_ms() -> u64 {
    250
}
fn default_honor_retry_after() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}

impl Default for TmdbConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            language: default_language(),
            fallback_language: default_fallback_language(),
            poster_width: default_poster_width(),
            poster_height: default_poster_height(),
            profile_width: default_profile_width(),
            profile_height: default_profile_height(),
            max_concurrent: default_max_concurrent(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter_ms: default_jitter_ms(),
            honor_retry_after: default_honor_retry_after(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl TmdbConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter: Duration::from_millis(self.jitter_ms),
            honor_retry_after: self.honor_retry_after,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Load and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("Invalid config file: {}", path.display()))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.store.raw_prefix.trim_matches('/').is_empty() {
        bail!("store.raw_prefix must not be empty");
    }
    if config.store.data_prefix.trim_matches('/').is_empty() {
        bail!("store.data_prefix must not be empty");
    }
    let tmdb = &config.tmdb;
    if tmdb.language.is_empty() || tmdb.fallback_language.is_empty() {
        bail!("tmdb.language and tmdb.fallback_language must not be empty");
    }
    if tmdb.max_concurrent == 0 {
        bail!("tmdb.max_concurrent must be at least 1");
    }
    if tmdb.max_attempts == 0 {
        bail!("tmdb.max_attempts must be at least 1");
    }
    if tmdb.base_backoff_ms > tmdb.max_backoff_ms {
        bail!(
            "tmdb.base_backoff_ms ({}) exceeds tmdb.max_backoff_ms ({})",
            tmdb.base_backoff_ms,
            tmdb.max_backoff_ms
        );
    }
    Ok(())
}
