//! Client for the read-only player stats API.

pub mod errors;
pub mod json;
pub mod models;

pub use errors::StatsApiError;
pub use models::{EventKind, EventRecord, PlayerStats, SeenRecord};

use anyhow::Context;
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::time::Duration;
use tracing::{debug, trace};
use url::Url;

use crate::utils::fmt_duration;

const USER_AGENT: &str = concat!("statsync/", env!("CARGO_PKG_VERSION"));

/// Result of a single remote lookup.
///
/// `NotFound` means the API answered but had nothing for this player;
/// `Failed` covers everything that kept us from getting an answer at all.
#[derive(Debug)]
pub enum Outcome<T> {
    Found(T),
    NotFound,
    Failed(StatsApiError),
}

impl<T> Outcome<T> {
    /// Collapse to the payload, treating failures the same as missing data.
    pub fn found(self) -> Option<T> {
        match self {
            Outcome::Found(value) => Some(value),
            Outcome::NotFound | Outcome::Failed(_) => None,
        }
    }

    /// Take the first element of a zero-or-one list response.
    fn first_of(result: Result<Vec<T>, StatsApiError>) -> Self {
        match result {
            Ok(items) => items.into_iter().next().map_or(Outcome::NotFound, Outcome::Found),
            Err(e) => Outcome::Failed(e),
        }
    }
}

/// The remote lookups the refresh pipeline depends on.
///
/// Implemented by [`StatsApi`] for real runs and by in-memory fakes in tests.
#[async_trait]
pub trait StatsSource: Send + Sync {
    /// Fetch every known player with their profile counters.
    async fn all_players(&self) -> Result<Vec<PlayerStats>, StatsApiError>;

    /// Fetch the last-seen timestamp string for a player.
    async fn last_seen(&self, username: &str) -> Outcome<String>;

    /// Fetch one event category for a player.
    async fn event(&self, kind: EventKind, username: &str) -> Outcome<EventRecord>;
}

/// Tunables for [`StatsApi`].
#[derive(Debug, Clone)]
pub struct StatsApiOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub requests_per_second: Option<NonZeroU32>,
}

impl Default for StatsApiOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            requests_per_second: None,
        }
    }
}

/// HTTP implementation of [`StatsSource`].
pub struct StatsApi {
    http: reqwest::Client,
    stats_url: Url,
    seen_url: Url,
    limiter: Option<DefaultDirectRateLimiter>,
    max_retries: u32,
    retry_delay: Duration,
}

impl StatsApi {
    pub fn new(base_url: &str, options: StatsApiOptions) -> anyhow::Result<Self> {
        // `Url::join` drops the last path segment unless it ends with a slash.
        let mut base = base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base).with_context(|| format!("Invalid API base URL: {base}"))?;

        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to build HTTP client")?;

        debug!(
            base_url = %base,
            timeout = fmt_duration(options.timeout),
            max_retries = options.max_retries,
            requests_per_second = ?options.requests_per_second,
            "stats API client configured"
        );

        Ok(Self {
            http,
            stats_url: base.join("stats")?,
            seen_url: base.join("seen")?,
            limiter: options
                .requests_per_second
                .map(|rps| RateLimiter::direct(Quota::per_second(rps))),
            max_retries: options.max_retries,
            retry_delay: options.retry_delay,
        })
    }

    /// GET with bounded retries for transient failures.
    async fn get<T: DeserializeOwned>(
        &self,
        url: &Url,
        query: &[(&str, &str)],
    ) -> Result<T, StatsApiError> {
        let mut attempt = 0;
        loop {
            match self.get_once(url, query).await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    debug!(url = %url, attempt, error = %e, "Transient API failure, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                result => return result,
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(
        &self,
        url: &Url,
        query: &[(&str, &str)],
    ) -> Result<T, StatsApiError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }

        let response = self
            .http
            .get(url.clone())
            .query(query)
            .send()
            .await
            .map_err(|e| classify(e, url))?;

        let status = response.status();
        let final_url = response.url().to_string();
        trace!(url = final_url, status = status.as_u16(), "API response");

        if !status.is_success() {
            return Err(StatsApiError::Status {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = response.text().await.map_err(|e| classify(e, url))?;
        json::decode(&body).map_err(|source| StatsApiError::ParseFailed {
            status: status.as_u16(),
            url: final_url,
            source,
        })
    }
}

fn classify(error: reqwest::Error, url: &Url) -> StatsApiError {
    if error.is_timeout() {
        StatsApiError::Timeout {
            url: url.to_string(),
        }
    } else {
        StatsApiError::RequestFailed(error)
    }
}

#[async_trait]
impl StatsSource for StatsApi {
    async fn all_players(&self) -> Result<Vec<PlayerStats>, StatsApiError> {
        self.get(&self.stats_url, &[("username", "all")]).await
    }

    async fn last_seen(&self, username: &str) -> Outcome<String> {
        let result: Result<Vec<SeenRecord>, _> =
            self.get(&self.seen_url, &[("username", username)]).await;
        match Outcome::first_of(result) {
            Outcome::Found(SeenRecord { seen: Some(seen) }) if !seen.trim().is_empty() => {
                Outcome::Found(seen)
            }
            Outcome::Found(_) | Outcome::NotFound => Outcome::NotFound,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    async fn event(&self, kind: EventKind, username: &str) -> Outcome<EventRecord> {
        Outcome::first_of(self.get(&self.stats_url, &[(kind.as_str(), username)]).await)
    }
}
