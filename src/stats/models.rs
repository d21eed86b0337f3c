//! Payload types returned by the stats API.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One row of `GET /stats?username=all`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub username: String,
    pub id: i64,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub kills: i64,
    #[serde(default)]
    pub deaths: i64,
    #[serde(default)]
    pub joins: i64,
    #[serde(default)]
    pub leaves: i64,
    #[serde(default)]
    pub adminlevel: i64,
}

/// A kill or death event. Every field may be missing for sparse records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Body element of `GET /seen?username=<user>`.
#[derive(Debug, Clone, Deserialize)]
pub struct SeenRecord {
    #[serde(default)]
    pub seen: Option<String>,
}

/// The four per-player event categories, each persisted in its own sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    LastKill,
    LastDeath,
    FirstKill,
    FirstDeath,
}

impl EventKind {
    pub const ALL: [EventKind; 4] = [
        EventKind::LastKill,
        EventKind::LastDeath,
        EventKind::FirstKill,
        EventKind::FirstDeath,
    ];

    /// Query parameter name on `/stats`, which doubles as the table name.
    pub const fn as_str(self) -> &'static str {
        match self {
            EventKind::LastKill => "lastkill",
            EventKind::LastDeath => "lastdeath",
            EventKind::FirstKill => "firstkill",
            EventKind::FirstDeath => "firstdeath",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_'))
            .collect::<String>()
            .to_ascii_lowercase();
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown event kind: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_parse() {
        assert_eq!("lastkill".parse(), Ok(EventKind::LastKill));
        assert_eq!("last-death".parse(), Ok(EventKind::LastDeath));
        assert_eq!("First_Kill".parse(), Ok(EventKind::FirstKill));
        assert!("kills".parse::<EventKind>().is_err());
    }

    #[test]
    fn test_player_stats_tolerates_missing_counters() {
        let player: PlayerStats =
            serde_json::from_str(r#"{"username":"popbob","id":7,"kills":3}"#).unwrap();
        assert_eq!(player.kills, 3);
        assert_eq!(player.deaths, 0);
        assert_eq!(player.uuid, None);
    }
}
