//! Per-category event tables (`lastkill`, `lastdeath`, `firstkill`, `firstdeath`).
//!
//! Each table holds at most one row per username. A row whose columns are all
//! NULL records that the category was fetched and the API had nothing for it.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteConnection;
use std::collections::HashSet;

use crate::stats::{EventKind, EventRecord};

pub async fn ensure_table(conn: &mut SqliteConnection, kind: EventKind) -> Result<()> {
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            username TEXT PRIMARY KEY,
            date TEXT,
            time TEXT,
            message TEXT
        )
        "#,
        table = kind.as_str()
    ))
    .execute(&mut *conn)
    .await
    .with_context(|| format!("Failed to create {kind} table"))?;
    Ok(())
}

/// Write the row for `username`, or an all-NULL row when there is no event.
pub async fn upsert(
    conn: &mut SqliteConnection,
    kind: EventKind,
    username: &str,
    record: Option<&EventRecord>,
) -> Result<()> {
    let empty = EventRecord::default();
    let record = record.unwrap_or(&empty);

    sqlx::query(&format!(
        r#"
        INSERT INTO {table} (username, date, time, message)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT (username)
        DO UPDATE SET date = excluded.date, time = excluded.time, message = excluded.message
        "#,
        table = kind.as_str()
    ))
    .bind(username)
    .bind(&record.date)
    .bind(&record.time)
    .bind(&record.message)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("Failed to write {kind} row for {username}"))?;
    Ok(())
}

/// Fetch the stored row for `username`, if one was ever written.
pub async fn get(
    conn: &mut SqliteConnection,
    kind: EventKind,
    username: &str,
) -> Result<Option<EventRecord>> {
    let row: Option<(Option<String>, Option<String>, Option<String>)> = sqlx::query_as(&format!(
        "SELECT date, time, message FROM {} WHERE username = ?1",
        kind.as_str()
    ))
    .bind(username)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|(date, time, message)| EventRecord {
        date,
        time,
        message,
    }))
}

/// Usernames whose row in this category carries an event date.
pub async fn usernames_with_event(
    conn: &mut SqliteConnection,
    kind: EventKind,
) -> Result<HashSet<String>> {
    let names: Vec<String> = sqlx::query_scalar(&format!(
        "SELECT username FROM {} WHERE date IS NOT NULL",
        kind.as_str()
    ))
    .fetch_all(&mut *conn)
    .await?;
    Ok(names.into_iter().collect())
}
