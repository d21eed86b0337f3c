//! Shared fixtures: an in-memory stats source and store seeding helpers.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Connection;
use sqlx::sqlite::SqliteConnection;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use statsync::data::store::{self, StorePaths};
use statsync::data::{events, players};
use statsync::refresh::{RefreshConfig, RefreshPlan};
use statsync::stats::{EventKind, EventRecord, Outcome, PlayerStats, StatsApiError, StatsSource};

pub const SEEN: &str = "2024-05-01T10:00:00Z";

/// Scripted [`StatsSource`] that counts every call.
///
/// Unless overridden, every player has a last-seen value and no events.
#[derive(Default)]
pub struct FakeSource {
    pub roster: Vec<PlayerStats>,
    pub fail_roster: bool,
    /// Players the API has no last-seen value for.
    pub unseen: Vec<String>,
    /// Players whose lookups all fail.
    pub broken: Vec<String>,
    pub events: HashMap<(EventKind, String), EventRecord>,
    seen_calls: AtomicUsize,
    event_calls: AtomicUsize,
    looked_up: Mutex<Vec<(String, &'static str)>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_roster(mut self, names: &[&str]) -> Self {
        self.roster = names
            .iter()
            .enumerate()
            .map(|(i, name)| player(name, i as i64 + 1))
            .collect();
        self
    }

    pub fn failing_roster(mut self) -> Self {
        self.fail_roster = true;
        self
    }

    pub fn unseen(mut self, username: &str) -> Self {
        self.unseen.push(username.to_string());
        self
    }

    pub fn broken(mut self, username: &str) -> Self {
        self.broken.push(username.to_string());
        self
    }

    pub fn with_event(mut self, kind: EventKind, username: &str, record: EventRecord) -> Self {
        self.events.insert((kind, username.to_string()), record);
        self
    }

    pub fn seen_calls(&self) -> usize {
        self.seen_calls.load(Ordering::SeqCst)
    }

    pub fn event_calls(&self) -> usize {
        self.event_calls.load(Ordering::SeqCst)
    }

    /// Every lookup made for `username`, as endpoint names.
    pub fn lookups_for(&self, username: &str) -> Vec<&'static str> {
        self.looked_up
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| u == username)
            .map(|(_, endpoint)| *endpoint)
            .collect()
    }

    fn note(&self, username: &str, endpoint: &'static str) {
        self.looked_up
            .lock()
            .unwrap()
            .push((username.to_string(), endpoint));
    }

    fn is_broken(&self, username: &str) -> bool {
        self.broken.iter().any(|u| u == username)
    }
}

fn failure() -> StatsApiError {
    StatsApiError::Status {
        status: 503,
        url: "http://fake.test/".to_string(),
    }
}

#[async_trait]
impl StatsSource for FakeSource {
    async fn all_players(&self) -> Result<Vec<PlayerStats>, StatsApiError> {
        if self.fail_roster {
            return Err(failure());
        }
        Ok(self.roster.clone())
    }

    async fn last_seen(&self, username: &str) -> Outcome<String> {
        self.seen_calls.fetch_add(1, Ordering::SeqCst);
        self.note(username, "seen");
        if self.is_broken(username) {
            Outcome::Failed(failure())
        } else if self.unseen.iter().any(|u| u == username) {
            Outcome::NotFound
        } else {
            Outcome::Found(SEEN.to_string())
        }
    }

    async fn event(&self, kind: EventKind, username: &str) -> Outcome<EventRecord> {
        self.event_calls.fetch_add(1, Ordering::SeqCst);
        self.note(username, kind.as_str());
        if self.is_broken(username) {
            return Outcome::Failed(failure());
        }
        match self.events.get(&(kind, username.to_string())) {
            Some(record) => Outcome::Found(record.clone()),
            None => Outcome::NotFound,
        }
    }
}

pub fn player(username: &str, id: i64) -> PlayerStats {
    PlayerStats {
        username: username.to_string(),
        id,
        uuid: Some(format!("uuid-{id}")),
        kills: id * 10,
        deaths: id,
        joins: 5,
        leaves: 4,
        adminlevel: 0,
    }
}

pub fn event(date: &str, time: &str, message: &str) -> EventRecord {
    EventRecord {
        date: Some(date.to_string()),
        time: Some(time.to_string()),
        message: Some(message.to_string()),
    }
}

pub fn refresh_config(dir: &Path, plan: RefreshPlan) -> RefreshConfig {
    let mut config = RefreshConfig::new(plan, StorePaths::new(dir, false));
    config.concurrency = NonZeroUsize::new(4).unwrap();
    config
}

pub async fn players_conn(stores: &StorePaths) -> SqliteConnection {
    let mut conn = store::connect(&stores.players()).await.unwrap();
    players::ensure_table(&mut conn).await.unwrap();
    conn
}

/// Insert players with no refresh stamp.
pub async fn seed_players(stores: &StorePaths, names: &[&str]) {
    let roster: Vec<PlayerStats> = names
        .iter()
        .enumerate()
        .map(|(i, name)| player(name, i as i64 + 1))
        .collect();
    let mut conn = players_conn(stores).await;
    players::upsert_players(&mut conn, &roster).await.unwrap();
    conn.close().await.unwrap();
}

pub async fn set_last_updated(stores: &StorePaths, username: &str, at: DateTime<Utc>) {
    let mut conn = players_conn(stores).await;
    assert!(
        players::mark_refreshed(&mut conn, username, None, at)
            .await
            .unwrap()
    );
    conn.close().await.unwrap();
}

pub async fn get_player(stores: &StorePaths, username: &str) -> players::Player {
    let mut conn = players_conn(stores).await;
    let player = players::get_player(&mut conn, username)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("player {username} missing"));
    conn.close().await.unwrap();
    player
}

pub async fn seed_event(
    stores: &StorePaths,
    kind: EventKind,
    username: &str,
    record: Option<&EventRecord>,
) {
    let mut conn = store::connect(&stores.events(kind)).await.unwrap();
    events::ensure_table(&mut conn, kind).await.unwrap();
    events::upsert(&mut conn, kind, username, record).await.unwrap();
    conn.close().await.unwrap();
}

pub async fn get_event(
    stores: &StorePaths,
    kind: EventKind,
    username: &str,
) -> Option<EventRecord> {
    let mut conn = store::connect(&stores.events(kind)).await.unwrap();
    events::ensure_table(&mut conn, kind).await.unwrap();
    let record = events::get(&mut conn, kind, username).await.unwrap();
    conn.close().await.unwrap();
    record
}
