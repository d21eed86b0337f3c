use clap::{Parser, ValueEnum};
use std::num::NonZeroUsize;

use crate::refresh::RefreshPlan;
use crate::stats::EventKind;

/// Keep locally stored 2b2t player stats up to date.
#[derive(Parser, Debug)]
#[command(name = "statsync", version, about, long_about = None)]
pub struct Args {
    /// Which refresh job to run
    #[arg(value_enum, default_value_t = Job::All)]
    pub job: Job,

    /// Number of concurrent fetch tasks (overrides STATSYNC_WORKERS)
    #[arg(long, short)]
    pub workers: Option<NonZeroUsize>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = default_tracing_format())]
    pub tracing: TracingFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Job {
    /// Import the player list, then refresh every stale player
    All,
    /// Import the player list only
    Players,
    /// Refresh last-seen values of stale players
    Seen,
    /// Backfill players without a dated last kill
    LastKill,
    /// Backfill players without a dated last death
    LastDeath,
    /// Backfill players without a dated first kill
    FirstKill,
    /// Backfill players without a dated first death
    FirstDeath,
}

impl Job {
    /// The pipeline plan for this job, or `None` for the import-only job.
    pub fn plan(self) -> Option<RefreshPlan> {
        match self {
            Job::All => Some(RefreshPlan::combined()),
            Job::Players => None,
            Job::Seen => Some(RefreshPlan::last_seen()),
            Job::LastKill => Some(RefreshPlan::single(EventKind::LastKill)),
            Job::LastDeath => Some(RefreshPlan::single(EventKind::LastDeath)),
            Job::FirstKill => Some(RefreshPlan::single(EventKind::FirstKill)),
            Job::FirstDeath => Some(RefreshPlan::single(EventKind::FirstDeath)),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable output for terminals
    Pretty,
    /// One JSON object per line
    Json,
}

fn default_tracing_format() -> TracingFormat {
    if cfg!(debug_assertions) {
        TracingFormat::Pretty
    } else {
        TracingFormat::Json
    }
}
