//! Keeps a local SQLite copy of 2b2t player stats fresh.
//!
//! The [`refresh`] pipeline selects stale players, looks them up through a
//! [`stats::StatsSource`] on a bounded pool of tasks, and hands every result to
//! a single writer per table.

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod logging;
pub mod refresh;
pub mod stats;
pub mod utils;
