//! Bulk import of the full player list into the `players` table.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteConnection;
use std::time::Instant;
use tracing::info;

use crate::data::players::{self, ImportCounts};
use crate::stats::StatsSource;
use crate::utils::fmt_duration;

/// Fetch every player and upsert their counters.
///
/// Refresh stamps are left alone so the import never makes a player look fresh.
pub async fn import_players(
    source: &dyn StatsSource,
    conn: &mut SqliteConnection,
) -> Result<ImportCounts> {
    let start = Instant::now();
    players::ensure_table(conn).await?;

    let roster = source
        .all_players()
        .await
        .context("Failed to fetch player list")?;
    let fetched = roster.len();

    let counts = players::upsert_players(conn, &roster).await?;
    info!(
        fetched,
        inserted = counts.inserted,
        updated = counts.updated,
        duration = fmt_duration(start.elapsed()),
        "player list imported"
    );
    Ok(counts)
}
