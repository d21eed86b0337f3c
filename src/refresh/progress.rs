//! Live throughput and ETA for a running batch.

use indicatif::{HumanDuration, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::debug;

use crate::refresh::queue::{Message, QueueReceiver};

/// How often the rate is recomputed while no increments arrive.
const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} players ({msg})";

/// Derived progress numbers at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub processed: u64,
    pub total: u64,
    pub elapsed: Duration,
    /// Players per second.
    pub rate: f64,
    pub eta: Duration,
}

impl ProgressSnapshot {
    pub fn compute(processed: u64, total: u64, elapsed: Duration) -> Self {
        let secs = elapsed.as_secs_f64();
        let rate = if secs > 0.0 {
            processed as f64 / secs
        } else {
            0.0
        };
        let remaining = total.saturating_sub(processed) as f64;
        let eta = if rate > 0.0 {
            Duration::from_secs_f64(remaining / rate)
        } else {
            Duration::ZERO
        };

        Self {
            processed,
            total,
            elapsed,
            rate,
            eta,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }

    fn message(&self) -> String {
        format!("{:.2} players/s, ETA {}", self.rate, HumanDuration(self.eta))
    }
}

/// Consumes completion increments and renders them.
pub struct ProgressReporter {
    total: u64,
    bar: ProgressBar,
}

impl ProgressReporter {
    pub fn new(total: u64, visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total), target);
        if let Ok(style) = ProgressStyle::with_template(TEMPLATE) {
            bar.set_style(style.progress_chars("#>-"));
        }
        Self { total, bar }
    }

    pub fn spawn(self, rx: QueueReceiver<u64>) -> JoinHandle<ProgressSnapshot> {
        tokio::spawn(self.run(rx))
    }

    /// Runs until `Stop` arrives or every player has been counted.
    pub async fn run(self, mut rx: QueueReceiver<u64>) -> ProgressSnapshot {
        let start = Instant::now();
        let mut processed = 0u64;

        loop {
            if processed >= self.total {
                break;
            }
            match time::timeout(REFRESH_INTERVAL, rx.recv()).await {
                Ok(Message::Item(count)) => {
                    processed = processed.saturating_add(count);
                    self.bar.inc(count);
                }
                Ok(Message::Stop) => break,
                Err(_) => {}
            }
            let snapshot = ProgressSnapshot::compute(processed, self.total, start.elapsed());
            self.bar.set_message(snapshot.message());
        }

        let snapshot = ProgressSnapshot::compute(processed, self.total, start.elapsed());
        self.bar.finish_with_message(snapshot.message());
        debug!(
            processed = snapshot.processed,
            total = snapshot.total,
            rate = snapshot.rate,
            "progress reporter stopped"
        );
        snapshot
    }
}
