//! Runtime configuration.
//!
//! Loaded with figment from `statsync.toml` (optional) and `STATSYNC_*`
//! environment variables, the latter taking precedence.

use anyhow::Context;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use fundu::{DurationParser, TimeUnit};
use serde::{Deserialize, Deserializer};
use std::num::{NonZeroU32, NonZeroUsize};
use std::path::PathBuf;
use std::time::Duration;

use crate::data::store::StorePaths;
use crate::stats::StatsApiOptions;

pub const CONFIG_FILE: &str = "statsync.toml";
pub const ENV_PREFIX: &str = "STATSYNC_";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Level for this crate's own logs; `RUST_LOG` overrides it entirely.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Directory holding the SQLite store files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Keep every table in `players.db` instead of one file per table.
    #[serde(default)]
    pub single_store: bool,
    /// Players refreshed more recently than this are left alone.
    #[serde(
        default = "default_staleness_threshold",
        deserialize_with = "deserialize_duration"
    )]
    pub staleness_threshold: Duration,
    /// Concurrent fetch tasks; defaults to the number of available cores.
    #[serde(default)]
    pub workers: Option<NonZeroUsize>,
    #[serde(
        default = "default_request_timeout",
        deserialize_with = "deserialize_duration"
    )]
    pub request_timeout: Duration,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(
        default = "default_retry_delay",
        deserialize_with = "deserialize_duration"
    )]
    pub retry_delay: Duration,
    /// Upper bound on API requests per second across all workers.
    #[serde(default)]
    pub requests_per_second: Option<NonZeroU32>,
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_api_base_url() -> String {
    "https://api.2b2t.dev/".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_staleness_threshold() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::figment()
            .extract()
            .context("Failed to load configuration")
    }

    pub fn figment() -> Figment {
        Figment::new()
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    pub fn store_paths(&self) -> StorePaths {
        StorePaths::new(&self.data_dir, self.single_store)
    }

    pub fn api_options(&self) -> StatsApiOptions {
        StatsApiOptions {
            timeout: self.request_timeout,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            requests_per_second: self.requests_per_second,
        }
    }
}

/// Parse durations such as `90s`, `15m`, `7d` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let parser = DurationParser::with_time_units(&[
        TimeUnit::MilliSecond,
        TimeUnit::Second,
        TimeUnit::Minute,
        TimeUnit::Hour,
        TimeUnit::Day,
        TimeUnit::Week,
    ]);
    let parsed = parser
        .parse(input.trim())
        .map_err(|e| format!("invalid duration '{input}': {e}"))?;
    Duration::try_from(parsed).map_err(|e| format!("invalid duration '{input}': {e}"))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Seconds(u64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        Raw::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}
