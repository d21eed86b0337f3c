//! Single-writer sinks.
//!
//! Each sink task owns the only connection it writes through and applies jobs
//! in the order they were queued, committing every row on its own.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Connection;
use sqlx::sqlite::SqliteConnection;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, trace, warn};

use crate::data::{events, players, store};
use crate::refresh::{FinalizeMode, SinkReport};
use crate::refresh::queue::{Message, QueueReceiver};
use crate::stats::{EventKind, EventRecord};
use crate::utils::log_if_slow;

/// How long a writer waits on an empty queue before logging that it is idle.
const IDLE_POLL: Duration = Duration::from_secs(1);

const SLOW_WRITE_THRESHOLD: Duration = Duration::from_millis(250);

/// A table that a sink writer can own.
#[async_trait]
pub trait SinkTable: Send + Sync + 'static {
    type Job: Send + 'static;

    fn name(&self) -> &'static str;

    /// Create whatever the table needs before the first write.
    async fn prepare(&self, conn: &mut SqliteConnection) -> Result<()>;

    async fn apply(&self, conn: &mut SqliteConnection, job: Self::Job) -> Result<()>;
}

/// One category result for one player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventJob {
    pub username: String,
    pub record: Option<EventRecord>,
}

/// Marks a player as refreshed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeJob {
    pub username: String,
    pub last_seen: Option<String>,
}

/// Sink for one event category.
#[derive(Debug, Clone, Copy)]
pub struct EventSink(pub EventKind);

#[async_trait]
impl SinkTable for EventSink {
    type Job = EventJob;

    fn name(&self) -> &'static str {
        self.0.as_str()
    }

    async fn prepare(&self, conn: &mut SqliteConnection) -> Result<()> {
        events::ensure_table(conn, self.0).await
    }

    async fn apply(&self, conn: &mut SqliteConnection, job: EventJob) -> Result<()> {
        events::upsert(conn, self.0, &job.username, job.record.as_ref()).await
    }
}

/// Sink that writes `lastseen`, and in [`FinalizeMode::Refresh`] also
/// stamps `lastupdated`, on the players table.
#[derive(Debug, Clone, Copy)]
pub struct Finalizer(pub FinalizeMode);

#[async_trait]
impl SinkTable for Finalizer {
    type Job = FinalizeJob;

    fn name(&self) -> &'static str {
        "finalize"
    }

    async fn prepare(&self, conn: &mut SqliteConnection) -> Result<()> {
        players::ensure_table(conn).await
    }

    async fn apply(&self, conn: &mut SqliteConnection, job: FinalizeJob) -> Result<()> {
        let last_seen = job.last_seen.as_deref();
        let updated = match self.0 {
            FinalizeMode::Refresh => {
                players::mark_refreshed(conn, &job.username, last_seen, Utc::now()).await?
            }
            FinalizeMode::LastSeenOnly => {
                players::set_last_seen(conn, &job.username, last_seen).await?
            }
        };
        if !updated {
            anyhow::bail!("player {} is not in the players table", job.username);
        }
        Ok(())
    }
}

/// A sink table bound to its open connection, ready to be spawned.
pub struct SinkWriter<S: SinkTable> {
    table: S,
    conn: SqliteConnection,
}

impl<S: SinkTable> SinkWriter<S> {
    /// Open the store and prepare the table. Failing here aborts the run.
    pub async fn open(table: S, path: &Path) -> Result<Self> {
        let mut conn = store::connect(path).await?;
        table.prepare(&mut conn).await?;
        Ok(Self { table, conn })
    }

    pub fn spawn(self, rx: QueueReceiver<S::Job>) -> JoinHandle<SinkReport> {
        tokio::spawn(self.run(rx))
    }

    /// Drain the queue until `Stop`, then close the connection.
    pub async fn run(mut self, mut rx: QueueReceiver<S::Job>) -> SinkReport {
        let sink = self.table.name();
        let mut report = SinkReport {
            sink,
            written: 0,
            errors: 0,
        };
        debug!(sink, "sink writer started");

        loop {
            let message = match time::timeout(IDLE_POLL, rx.recv()).await {
                Ok(message) => message,
                Err(_) => {
                    trace!(sink, written = report.written, "sink idle");
                    continue;
                }
            };

            let job = match message {
                Message::Item(job) => job,
                Message::Stop => break,
            };

            let start = Instant::now();
            match self.table.apply(&mut self.conn, job).await {
                Ok(()) => report.written += 1,
                Err(e) => {
                    report.errors += 1;
                    warn!(sink, error = ?e, "sink write failed");
                }
            }
            log_if_slow(start, SLOW_WRITE_THRESHOLD, sink);
        }

        if let Err(e) = self.conn.close().await {
            warn!(sink, error = ?e, "failed to close sink connection");
        }
        debug!(
            sink,
            written = report.written,
            errors = report.errors,
            "sink writer stopped"
        );
        report
    }
}
