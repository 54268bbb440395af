//! Configuration module for anycast-atlas.
//!
//! Loads configuration from environment variables with sensible defaults.
//! A `.env` file in the working directory is honoured by `main` before
//! `Config::load` runs.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types. Always fatal at startup.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

/// Pacing knobs for the measurement engines.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Creation requests allowed before a cool-down (default: 90)
    pub rate_limit_count: u32,
    /// Cool-down after `rate_limit_count` requests (default: 800s)
    pub rate_limit_cooldown: Duration,
    /// Result fetches between pauses (default: 10)
    pub result_batch_size: u32,
    /// Pause between result batches (default: 10s)
    pub result_batch_pause: Duration,
    /// Sleep once every credential hit its quota (default: 24h)
    pub quota_reset: Duration,
    /// IP lookups per enrichment batch (default: 10)
    pub enrich_batch_size: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            rate_limit_count: 90,
            rate_limit_cooldown: Duration::from_secs(800),
            result_batch_size: 10,
            result_batch_pause: Duration::from_secs(10),
            quota_reset: Duration::from_secs(24 * 60 * 60),
            enrich_batch_size: 10,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Root directory of every persisted artifact (default: "data")
    pub data_dir: PathBuf,
    /// Measurement platform REST root
    pub atlas_base_url: String,
    /// Platform API keys; the first is used first, the rest are rotated in on quota errors
    pub atlas_api_keys: Vec<String>,
    pub ipinfo_base_url: String,
    pub ipinfo_token: Option<String>,
    pub geolite_base_url: String,
    /// GeoLite account id and license key; hop geolocation is skipped without both
    pub geolite_account_id: Option<String>,
    pub geolite_license_key: Option<String>,
    /// Timeout for every outbound HTTP request (default: 10s)
    pub http_timeout: Duration,
    pub run: RunSettings,
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Environment variables:
    /// - `ANYCAST_HTTP_PORT`: HTTP port (default: 8080)
    /// - `ANYCAST_DATA_DIR`: data directory (default: "data")
    /// - `ANYCAST_ATLAS_BASE_URL`: platform URL (default: "https://atlas.ripe.net/api/v2/")
    /// - `ANYCAST_ATLAS_API_KEYS`: comma-separated API keys (required)
    /// - `ANYCAST_IPINFO_BASE_URL`: IP intelligence URL (default: "https://api.ipinfo.io")
    /// - `ANYCAST_IPINFO_TOKEN`: IP intelligence token (optional)
    /// - `ANYCAST_GEOLITE_BASE_URL`: GeoLite URL (default: "https://geolite.info")
    /// - `ANYCAST_GEOLITE_ACCOUNT_ID`, `ANYCAST_GEOLITE_LICENSE_KEY`: GeoLite credentials (optional)
    /// - `ANYCAST_HTTP_TIMEOUT_SECS`: outbound timeout (default: 10)
    /// - `ANYCAST_RATE_LIMIT_COUNT`, `ANYCAST_RATE_LIMIT_COOLDOWN_SECS`,
    ///   `ANYCAST_RESULT_BATCH_SIZE`, `ANYCAST_RESULT_BATCH_PAUSE_SECS`,
    ///   `ANYCAST_QUOTA_RESET_SECS`, `ANYCAST_ENRICH_BATCH_SIZE`: see [`RunSettings`]
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let atlas_api_keys: Vec<String> = get("ANYCAST_ATLAS_API_KEYS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|k| !k.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if atlas_api_keys.is_empty() {
            return Err(ConfigError::Missing("ANYCAST_ATLAS_API_KEYS"));
        }

        let defaults = RunSettings::default();
        let run = RunSettings {
            rate_limit_count: parse_or(&get, "ANYCAST_RATE_LIMIT_COUNT", defaults.rate_limit_count)?
                .max(1),
            rate_limit_cooldown: secs_or(
                &get,
                "ANYCAST_RATE_LIMIT_COOLDOWN_SECS",
                defaults.rate_limit_cooldown,
            )?,
            result_batch_size: parse_or(&get, "ANYCAST_RESULT_BATCH_SIZE", defaults.result_batch_size)?
                .max(1),
            result_batch_pause: secs_or(
                &get,
                "ANYCAST_RESULT_BATCH_PAUSE_SECS",
                defaults.result_batch_pause,
            )?,
            quota_reset: secs_or(&get, "ANYCAST_QUOTA_RESET_SECS", defaults.quota_reset)?,
            enrich_batch_size: parse_or(&get, "ANYCAST_ENRICH_BATCH_SIZE", defaults.enrich_batch_size)?
                .max(1),
        };

        Ok(Self {
            http_port: parse_or(&get, "ANYCAST_HTTP_PORT", 8080)?,
            data_dir: get("ANYCAST_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            atlas_base_url: get("ANYCAST_ATLAS_BASE_URL")
                .unwrap_or_else(|| "https://atlas.ripe.net/api/v2/".to_string()),
            atlas_api_keys,
            ipinfo_base_url: get("ANYCAST_IPINFO_BASE_URL")
                .unwrap_or_else(|| "https://api.ipinfo.io".to_string()),
            ipinfo_token: get("ANYCAST_IPINFO_TOKEN"),
            geolite_base_url: get("ANYCAST_GEOLITE_BASE_URL")
                .unwrap_or_else(|| "https://geolite.info".to_string()),
            geolite_account_id: get("ANYCAST_GEOLITE_ACCOUNT_ID"),
            geolite_license_key: get("ANYCAST_GEOLITE_LICENSE_KEY"),
            http_timeout: secs_or(&get, "ANYCAST_HTTP_TIMEOUT_SECS", Duration::from_secs(10))?,
            run,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn secs_or<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_secs()).map(Duration::from_secs)
}
