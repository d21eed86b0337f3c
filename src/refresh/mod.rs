//! The refresh pipeline: pick stale players, fan lookups out over a bounded
//! set of fetch tasks, and fan the results back into single-writer sinks.

pub mod import;
pub mod pipeline;
pub mod plan;
pub mod progress;
pub mod queue;
pub mod sink;
pub mod worker;

pub use pipeline::{Pipeline, PipelineState};
pub use plan::{FinalizeMode, RefreshConfig, RefreshPlan, SeenPolicy, Selection};

use crate::data::players::ImportCounts;
use crate::stats::Outcome;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("push onto queue '{queue}' after it was stopped")]
    QueueStopped { queue: &'static str },
    #[error("consumer of queue '{queue}' has already exited")]
    ConsumerGone { queue: &'static str },
    #[error("pipeline failed to start")]
    Startup(#[source] anyhow::Error),
}

/// Remote lookup outcomes over a whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchCounts {
    pub found: u64,
    pub not_found: u64,
    pub failed: u64,
}

impl FetchCounts {
    pub fn total(&self) -> u64 {
        self.found + self.not_found + self.failed
    }

    pub fn record<T>(&mut self, outcome: &Outcome<T>) {
        match outcome {
            Outcome::Found(_) => self.found += 1,
            Outcome::NotFound => self.not_found += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }
}

/// What one sink writer did before it shut down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    pub sink: &'static str,
    pub written: u64,
    pub errors: u64,
}

/// Structured result of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub imported: Option<ImportCounts>,
    /// Batch size handed to the fetch pool.
    pub selected: usize,
    pub updated: usize,
    /// Players the API had no recent activity for.
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub fetches: FetchCounts,
    /// Completions the progress reporter counted.
    pub progress: u64,
    pub sinks: Vec<SinkReport>,
}

impl RunReport {
    /// True when any player failed or any sink write was lost.
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.sinks.iter().any(|s| s.errors > 0)
    }

    pub fn sink(&self, name: &str) -> Option<&SinkReport> {
        self.sinks.iter().find(|s| s.sink == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsApiError;

    #[test]
    fn test_fetch_counts_record() {
        let mut counts = FetchCounts::default();
        counts.record(&Outcome::Found(()));
        counts.record(&Outcome::<()>::NotFound);
        counts.record(&Outcome::<()>::Failed(StatsApiError::Timeout {
            url: "http://localhost/seen".into(),
        }));
        assert_eq!(
            counts,
            FetchCounts {
                found: 1,
                not_found: 1,
                failed: 1
            }
        );
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_has_failures_includes_sink_errors() {
        let mut report = RunReport::default();
        assert!(!report.has_failures());

        report.sinks.push(SinkReport {
            sink: "lastkill",
            written: 10,
            errors: 1,
        });
        assert!(report.has_failures());
    }
}
