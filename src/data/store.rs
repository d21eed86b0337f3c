//! SQLite file layout and connection setup.

use anyhow::{Context, Result};
use sqlx::ConnectOptions;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::stats::EventKind;

const PLAYERS_FILE: &str = "players.db";

/// Where each table lives on disk.
///
/// By default every table gets its own file (`players.db`, `lastkill.db`, ...),
/// so each sink writer holds the only connection to its file. With
/// `single_file` all tables share `players.db`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    data_dir: PathBuf,
    single_file: bool,
}

impl StorePaths {
    pub fn new(data_dir: impl Into<PathBuf>, single_file: bool) -> Self {
        Self {
            data_dir: data_dir.into(),
            single_file,
        }
    }

    pub fn players(&self) -> PathBuf {
        self.data_dir.join(PLAYERS_FILE)
    }

    pub fn events(&self, kind: EventKind) -> PathBuf {
        if self.single_file {
            self.players()
        } else {
            self.data_dir.join(format!("{}.db", kind.as_str()))
        }
    }
}

/// Open a dedicated connection to a store file, creating it if missing.
pub async fn connect(path: &Path) -> Result<SqliteConnection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create data directory {}", parent.display()))?;
    }

    let conn = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        // Only matters in the single-file layout, where writers share one file.
        .busy_timeout(Duration::from_secs(30))
        .log_statements(tracing::log::LevelFilter::Debug)
        .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1))
        .connect()
        .await
        .with_context(|| format!("Failed to open store {}", path.display()))?;

    debug!(path = %path.display(), "store connection opened");
    Ok(conn)
}
