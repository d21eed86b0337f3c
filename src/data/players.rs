//! The main `players` table: bulk import, staleness selection and refresh stamps.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeDelta, Utc};
use sqlx::Connection;
use sqlx::sqlite::SqliteConnection;

use crate::stats::PlayerStats;

/// A stored player row.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Player {
    pub username: String,
    pub id: Option<i64>,
    pub uuid: Option<String>,
    pub kills: Option<i64>,
    pub deaths: Option<i64>,
    pub joins: Option<i64>,
    pub leaves: Option<i64>,
    pub adminlevel: Option<i64>,
    pub lastseen: Option<String>,
    pub lastupdated: Option<String>,
}

/// Counts from a bulk import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportCounts {
    pub inserted: u64,
    pub updated: u64,
}

/// Create the `players` table, upgrading older files that predate the
/// refresh-tracking columns.
pub async fn ensure_table(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS players (
            username TEXT PRIMARY KEY,
            id INTEGER,
            uuid TEXT,
            kills INTEGER,
            deaths INTEGER,
            joins INTEGER,
            leaves INTEGER,
            adminlevel INTEGER,
            lastseen TEXT,
            lastupdated TEXT
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .context("Failed to create players table")?;

    let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info('players')")
        .fetch_all(&mut *conn)
        .await?;

    for column in ["lastseen", "lastupdated"] {
        if !columns.iter().any(|c| c == column) {
            sqlx::query(&format!("ALTER TABLE players ADD COLUMN {column} TEXT"))
                .execute(&mut *conn)
                .await
                .with_context(|| format!("Failed to add players.{column}"))?;
        }
    }

    Ok(())
}

/// Upsert profile counters for every player in one transaction.
///
/// Refresh columns (`lastseen`, `lastupdated`) are never touched here.
pub async fn upsert_players(
    conn: &mut SqliteConnection,
    players: &[PlayerStats],
) -> Result<ImportCounts> {
    let mut counts = ImportCounts::default();
    let mut tx = conn.begin().await?;

    for player in players {
        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM players WHERE username = ?1")
            .bind(&player.username)
            .fetch_optional(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO players (username, id, uuid, kills, deaths, joins, leaves, adminlevel)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (username)
            DO UPDATE SET
                id = excluded.id,
                uuid = excluded.uuid,
                kills = excluded.kills,
                deaths = excluded.deaths,
                joins = excluded.joins,
                leaves = excluded.leaves,
                adminlevel = excluded.adminlevel
            "#,
        )
        .bind(&player.username)
        .bind(player.id)
        .bind(&player.uuid)
        .bind(player.kills)
        .bind(player.deaths)
        .bind(player.joins)
        .bind(player.leaves)
        .bind(player.adminlevel)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("Failed to upsert player {}", player.username))?;

        if exists.is_some() {
            counts.updated += 1;
        } else {
            counts.inserted += 1;
        }
    }

    tx.commit().await?;
    Ok(counts)
}

/// Format a refresh timestamp the way it is stored.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored refresh timestamp.
///
/// Accepts RFC 3339 as well as the offset-less ISO form older files were
/// written with, which is taken to be UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.to_utc())
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Whether a record with this `lastupdated` value is due for a refresh.
///
/// Missing and unreadable timestamps are always stale.
pub fn is_stale(last_updated: Option<&str>, now: DateTime<Utc>, threshold: TimeDelta) -> bool {
    match last_updated.and_then(parse_timestamp) {
        Some(ts) => now - ts > threshold,
        None => true,
    }
}

/// Usernames whose refresh stamp is missing or older than `threshold`.
pub async fn stale_usernames(
    conn: &mut SqliteConnection,
    threshold: TimeDelta,
    now: DateTime<Utc>,
) -> Result<Vec<String>> {
    let rows: Vec<(String, Option<String>)> =
        sqlx::query_as("SELECT username, lastupdated FROM players")
            .fetch_all(&mut *conn)
            .await
            .context("Failed to read players")?;

    Ok(rows
        .into_iter()
        .filter(|(_, last)| is_stale(last.as_deref(), now, threshold))
        .map(|(username, _)| username)
        .collect())
}

pub async fn all_usernames(conn: &mut SqliteConnection) -> Result<Vec<String>> {
    Ok(sqlx::query_scalar("SELECT username FROM players")
        .fetch_all(&mut *conn)
        .await?)
}

/// Stamp a player as freshly refreshed. Returns false when no such player exists.
pub async fn mark_refreshed(
    conn: &mut SqliteConnection,
    username: &str,
    last_seen: Option<&str>,
    refreshed_at: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE players SET lastseen = ?1, lastupdated = ?2 WHERE username = ?3",
    )
    .bind(last_seen)
    .bind(format_timestamp(refreshed_at))
    .bind(username)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Store a last-seen value (or NULL) without touching `lastupdated`.
/// Returns false when no such player exists.
pub async fn set_last_seen(
    conn: &mut SqliteConnection,
    username: &str,
    last_seen: Option<&str>,
) -> Result<bool> {
    let result = sqlx::query("UPDATE players SET lastseen = ?1 WHERE username = ?2")
        .bind(last_seen)
        .bind(username)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn get_player(conn: &mut SqliteConnection, username: &str) -> Result<Option<Player>> {
    Ok(sqlx::query_as::<_, Player>(
        r#"
        SELECT username, id, uuid, kills, deaths, joins, leaves, adminlevel, lastseen, lastupdated
        FROM players
        WHERE username = ?1
        "#,
    )
    .bind(username)
    .fetch_optional(&mut *conn)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days(n: i64) -> TimeDelta {
        TimeDelta::days(n)
    }

    #[test]
    fn test_is_stale_threshold() {
        let now = Utc::now();
        let six = format_timestamp(now - days(6));
        let eight = format_timestamp(now - days(8));

        assert!(is_stale(None, now, days(7)));
        assert!(!is_stale(Some(&six), now, days(7)));
        assert!(is_stale(Some(&eight), now, days(7)));
    }

    #[test]
    fn test_is_stale_unparseable() {
        assert!(is_stale(Some("yesterday"), Utc::now(), days(7)));
    }

    #[test]
    fn test_parse_naive_iso() {
        let ts = parse_timestamp("2024-03-01T10:15:30.123456").unwrap();
        assert_eq!(format_timestamp(ts), "2024-03-01T10:15:30.123456Z");
    }

    #[test]
    fn test_timestamp_format_roundtrip() {
        let now = Utc::now();
        let parsed = parse_timestamp(&format_timestamp(now)).unwrap();
        assert_eq!(parsed.timestamp_micros(), now.timestamp_micros());
    }
}
