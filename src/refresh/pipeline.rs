//! Orchestrates one refresh run from selection through shutdown.
//!
//! Startup order is sinks first, then progress, then the fetch pool. Shutdown
//! waits for the pool to finish every task before any stop marker is sent, so
//! no producer can race a closing queue.

use anyhow::Context;
use chrono::Utc;
use sqlx::Connection;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::data::players::ImportCounts;
use crate::data::{events, players, store};
use crate::refresh::import::import_players;
use crate::refresh::progress::{ProgressReporter, ProgressSnapshot};
use crate::refresh::queue::{self, QueueSender};
use crate::refresh::sink::{EventJob, EventSink, FinalizeJob, Finalizer, SinkWriter};
use crate::refresh::worker::{FetchWorker, Outputs, run_pool};
use crate::refresh::{PipelineError, RefreshConfig, RunReport, Selection, SinkReport};
use crate::stats::{EventKind, StatsSource};
use crate::utils::{fmt_count, fmt_duration};

/// Lifecycle of a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Selecting,
    /// Selection came back empty; nothing was started.
    EmptyDone,
    Dispatching,
    Draining,
    Stopped,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Selecting => "selecting",
            Self::EmptyDone => "empty",
            Self::Dispatching => "dispatching",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Consumers started for a run, kept so they can be stopped and joined.
struct Consumers {
    events: Vec<(QueueSender<EventJob>, JoinHandle<SinkReport>)>,
    finalize: Option<(QueueSender<FinalizeJob>, JoinHandle<SinkReport>)>,
    progress: (QueueSender<u64>, JoinHandle<ProgressSnapshot>),
}

pub struct Pipeline {
    config: RefreshConfig,
    source: Arc<dyn StatsSource>,
    cancel: CancellationToken,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(config: RefreshConfig, source: Arc<dyn StatsSource>) -> Self {
        Self {
            config,
            source,
            cancel: CancellationToken::new(),
            state: PipelineState::Idle,
        }
    }

    /// Use an externally owned token so the run can be cancelled between lookups.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) {
        debug!(job = self.config.plan.name, from = %self.state, to = %next, "pipeline state change");
        self.state = next;
    }

    /// Run the whole job once.
    ///
    /// Only startup problems are returned as errors; per-player and per-write
    /// failures are counted in the [`RunReport`].
    pub async fn run(&mut self) -> Result<RunReport, PipelineError> {
        let start = Instant::now();
        let mut report = RunReport::default();

        self.transition(PipelineState::Selecting);
        let (imported, usernames) = self.select().await.map_err(PipelineError::Startup)?;
        report.imported = imported;
        report.selected = usernames.len();

        if usernames.is_empty() {
            info!(job = self.config.plan.name, "no players need refreshing");
            self.transition(PipelineState::EmptyDone);
            return Ok(report);
        }

        info!(
            job = self.config.plan.name,
            players = fmt_count(usernames.len() as u64),
            workers = self.config.concurrency.get(),
            "refreshing players"
        );

        self.transition(PipelineState::Dispatching);
        let (outputs, consumers) = self.start_consumers(usernames.len()).await?;

        let worker = Arc::new(FetchWorker::new(
            self.source.clone(),
            self.config.plan.clone(),
            outputs,
            self.cancel.clone(),
        ));
        let pool = run_pool(
            worker.clone(),
            usernames,
            self.config.concurrency.get(),
            &consumers.progress.0,
        )
        .await;

        report.updated = pool.updated;
        report.skipped = pool.skipped;
        report.failed = pool.failed;
        report.cancelled = pool.cancelled;
        report.fetches = worker.fetch_counts();

        self.transition(PipelineState::Draining);
        let (sinks, progress) = Self::drain(consumers).await;
        report.sinks = sinks;
        report.progress = progress.map_or(0, |snapshot| snapshot.processed);

        self.transition(PipelineState::Stopped);
        info!(
            job = self.config.plan.name,
            selected = report.selected,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            cancelled = report.cancelled,
            duration = fmt_duration(start.elapsed()),
            "refresh finished"
        );
        Ok(report)
    }

    /// Import (when the plan asks for it) and pick the batch.
    async fn select(&self) -> anyhow::Result<(Option<ImportCounts>, Vec<String>)> {
        let plan = &self.config.plan;
        let mut conn = store::connect(&self.config.stores.players()).await?;
        players::ensure_table(&mut conn).await?;

        let imported = if plan.import_players {
            match import_players(self.source.as_ref(), &mut conn).await {
                Ok(counts) => Some(counts),
                Err(e) => {
                    warn!(error = ?e, "player import failed, refreshing stored players only");
                    None
                }
            }
        } else {
            None
        };

        let usernames = match plan.selection {
            Selection::Stale => {
                let threshold = self.config.staleness_threshold;
                players::stale_usernames(&mut conn, threshold, Utc::now()).await?
            }
            Selection::MissingEvent(kind) => {
                let known = players::all_usernames(&mut conn).await?;
                let done = Self::with_event(&self.config, kind).await?;
                known.into_iter().filter(|u| !done.contains(u)).collect()
            }
        };

        conn.close().await.context("Failed to close players store")?;
        Ok((imported, usernames))
    }

    async fn with_event(
        config: &RefreshConfig,
        kind: EventKind,
    ) -> anyhow::Result<HashSet<String>> {
        let mut conn = store::connect(&config.stores.events(kind)).await?;
        events::ensure_table(&mut conn, kind).await?;
        let done = events::usernames_with_event(&mut conn, kind).await?;
        conn.close().await?;
        Ok(done)
    }

    /// Open every sink before spawning anything, so a bad store aborts cleanly.
    async fn start_consumers(&self, total: usize) -> Result<(Outputs, Consumers), PipelineError> {
        let plan = &self.config.plan;
        let stores = &self.config.stores;

        let mut event_writers = Vec::with_capacity(plan.events.len());
        for &kind in &plan.events {
            let writer = SinkWriter::open(EventSink(kind), &stores.events(kind))
                .await
                .map_err(PipelineError::Startup)?;
            event_writers.push((kind, writer));
        }

        let finalizer = match plan.finalize_mode() {
            Some(mode) => Some(
                SinkWriter::open(Finalizer(mode), &stores.players())
                    .await
                    .map_err(PipelineError::Startup)?,
            ),
            None => None,
        };

        let mut outputs = Outputs {
            events: HashMap::new(),
            finalize: None,
        };
        let mut event_consumers = Vec::with_capacity(event_writers.len());
        for (kind, writer) in event_writers {
            let (tx, rx) = queue::queue(kind.as_str());
            outputs.events.insert(kind, tx.clone());
            event_consumers.push((tx, writer.spawn(rx)));
        }

        let finalize = finalizer.map(|writer| {
            let (tx, rx) = queue::queue("finalize");
            outputs.finalize = Some(tx.clone());
            (tx, writer.spawn(rx))
        });

        let (progress_tx, progress_rx) = queue::queue("progress");
        let progress =
            ProgressReporter::new(total as u64, self.config.show_progress).spawn(progress_rx);

        Ok((
            outputs,
            Consumers {
                events: event_consumers,
                finalize,
                progress: (progress_tx, progress),
            },
        ))
    }

    /// Send every stop marker, then wait for each consumer to exit.
    async fn drain(consumers: Consumers) -> (Vec<SinkReport>, Option<ProgressSnapshot>) {
        for (tx, _) in &consumers.events {
            send_stop(tx);
        }
        if let Some((tx, _)) = &consumers.finalize {
            send_stop(tx);
        }
        let (progress_tx, progress_handle) = consumers.progress;
        // The reporter exits by itself once every player is counted.
        if let Err(e) = progress_tx.stop() {
            debug!(error = %e, "progress reporter already finished");
        }

        let mut sinks = Vec::with_capacity(consumers.events.len() + 1);
        for (tx, handle) in consumers.events {
            sinks.push(join_writer(tx.name(), handle).await);
        }
        if let Some((tx, handle)) = consumers.finalize {
            sinks.push(join_writer(tx.name(), handle).await);
        }

        let progress = match progress_handle.await {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(error = %e, "progress reporter task failed");
                None
            }
        };
        (sinks, progress)
    }
}

fn send_stop<T>(tx: &QueueSender<T>) {
    if let Err(e) = tx.stop() {
        warn!(queue = tx.name(), error = %e, "failed to send stop marker");
    }
}

async fn join_writer(sink: &'static str, handle: JoinHandle<SinkReport>) -> SinkReport {
    handle.await.unwrap_or_else(|e| {
        error!(sink, error = %e, "sink writer task failed");
        SinkReport {
            sink,
            written: 0,
            errors: 1,
        }
    })
}
