//! Bounded pool of fetch tasks.
//!
//! Each task handles one player start to finish: look them up, push one job
//! per category onto that category's queue, and a finalize job carrying the
//! player's last-seen value.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, trace, warn};

use crate::refresh::queue::QueueSender;
use crate::refresh::sink::{EventJob, FinalizeJob};
use crate::refresh::{FetchCounts, PipelineError, RefreshPlan, SeenPolicy};
use crate::stats::{EventKind, Outcome, StatsSource};

/// How one player's processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserOutcome {
    Updated,
    /// The API had no last-seen value for the player.
    Skipped,
    Cancelled,
}

/// Producer handles for every queue the fetch tasks feed.
#[derive(Debug, Clone)]
pub struct Outputs {
    pub events: HashMap<EventKind, QueueSender<EventJob>>,
    pub finalize: Option<QueueSender<FinalizeJob>>,
}

/// Shared state of the fetch tasks.
pub struct FetchWorker {
    source: Arc<dyn StatsSource>,
    plan: RefreshPlan,
    outputs: Outputs,
    cancel: CancellationToken,
    fetches: Mutex<FetchCounts>,
}

impl FetchWorker {
    pub fn new(
        source: Arc<dyn StatsSource>,
        plan: RefreshPlan,
        outputs: Outputs,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            source,
            plan,
            outputs,
            cancel,
            fetches: Mutex::new(FetchCounts::default()),
        }
    }

    pub fn fetch_counts(&self) -> FetchCounts {
        *self.fetches.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record<T>(&self, outcome: &Outcome<T>) {
        self.fetches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(outcome);
    }

    /// Process one player. Errors mean a queue refused a job.
    pub async fn process(&self, username: &str) -> Result<UserOutcome, PipelineError> {
        if self.cancel.is_cancelled() {
            return Ok(UserOutcome::Cancelled);
        }

        let last_seen = match self.plan.seen {
            SeenPolicy::Skip => None,
            policy => {
                let outcome = self.source.last_seen(username).await;
                self.record(&outcome);
                if let Outcome::Failed(e) = &outcome {
                    debug!(error = %e, "last-seen lookup failed, treating as no data");
                }
                match outcome.found() {
                    Some(seen) => Some(seen),
                    None if policy == SeenPolicy::Gate => {
                        trace!("no last-seen value, skipping player");
                        return Ok(UserOutcome::Skipped);
                    }
                    None => None,
                }
            }
        };

        for &kind in &self.plan.events {
            if self.cancel.is_cancelled() {
                return Ok(UserOutcome::Cancelled);
            }

            let outcome = self.source.event(kind, username).await;
            self.record(&outcome);
            if let Outcome::Failed(e) = &outcome {
                debug!(category = %kind, error = %e, "event lookup failed, recording as empty");
            }

            if let Some(queue) = self.outputs.events.get(&kind) {
                queue.push(EventJob {
                    username: username.to_string(),
                    record: outcome.found(),
                })?;
            }
        }

        if self.plan.seen == SeenPolicy::Skip {
            return Ok(UserOutcome::Updated);
        }

        // Under the gate only players with a last-seen value get this far;
        // otherwise a missing value is written through as NULL.
        let outcome = if last_seen.is_some() {
            UserOutcome::Updated
        } else {
            UserOutcome::Skipped
        };
        if let Some(finalize) = &self.outputs.finalize {
            finalize.push(FinalizeJob {
                username: username.to_string(),
                last_seen,
            })?;
        }
        Ok(outcome)
    }
}

/// Per-player tallies from one pool run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolReport {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
}

type TaskResult = (String, Result<UserOutcome, PipelineError>);

/// Run every username through `worker` with at most `concurrency` in flight.
///
/// Returns once every spawned task has finished, including its queue pushes.
/// `progress` receives one increment per updated player.
pub async fn run_pool(
    worker: Arc<FetchWorker>,
    usernames: Vec<String>,
    concurrency: usize,
    progress: &QueueSender<u64>,
) -> PoolReport {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks: JoinSet<TaskResult> = JoinSet::new();
    let mut report = PoolReport::default();

    for username in usernames {
        // The semaphore is never closed, so acquiring only waits for a free slot.
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };

        let worker = worker.clone();
        let span = tracing::debug_span!("refresh_player", username = %username);
        tasks.spawn(
            async move {
                let _permit = permit;
                let result = worker.process(&username).await;
                (username, result)
            }
            .instrument(span),
        );

        while let Some(joined) = tasks.try_join_next() {
            tally(&mut report, joined, progress);
        }
    }

    while let Some(joined) = tasks.join_next().await {
        tally(&mut report, joined, progress);
    }

    report
}

fn tally(
    report: &mut PoolReport,
    joined: Result<TaskResult, JoinError>,
    progress: &QueueSender<u64>,
) {
    match joined {
        Ok((_, Ok(UserOutcome::Updated))) => {
            report.updated += 1;
            if let Err(e) = progress.push(1) {
                trace!(error = %e, "progress consumer unavailable");
            }
        }
        Ok((_, Ok(UserOutcome::Skipped))) => report.skipped += 1,
        Ok((_, Ok(UserOutcome::Cancelled))) => report.cancelled += 1,
        Ok((username, Err(e))) => {
            report.failed += 1;
            warn!(username = %username, error = %e, "failed to refresh player");
        }
        Err(e) => {
            report.failed += 1;
            error!(error = %e, "fetch task panicked");
        }
    }
}
