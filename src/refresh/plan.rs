//! Job variants expressed as configuration of the one pipeline.

use chrono::TimeDelta;
use std::num::NonZeroUsize;

use crate::data::store::StorePaths;
use crate::stats::EventKind;

/// Which players a run picks up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Players whose `lastupdated` is missing or older than the threshold.
    Stale,
    /// Players without a dated row in this category.
    MissingEvent(EventKind),
}

/// How the last-seen lookup takes part in processing a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeenPolicy {
    /// Never fetched; nothing is finalized.
    Skip,
    /// Fetched and stored as-is, NULL included; the refresh stamp is left alone.
    Fetch,
    /// Fetched first; a player with no last-seen value is skipped entirely.
    Gate,
}

/// What the finalize sink writes for a player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeMode {
    /// Store `lastseen` and stamp `lastupdated`: every category was refreshed too.
    Refresh,
    /// Store `lastseen` only, so the player stays due for a full refresh.
    LastSeenOnly,
}

/// What a refresh job selects, fetches and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPlan {
    pub name: &'static str,
    pub import_players: bool,
    pub selection: Selection,
    pub seen: SeenPolicy,
    pub events: Vec<EventKind>,
}

impl RefreshPlan {
    /// Import the player list, then refresh last-seen and all four categories.
    pub fn combined() -> Self {
        Self {
            name: "all",
            import_players: true,
            selection: Selection::Stale,
            seen: SeenPolicy::Gate,
            events: EventKind::ALL.to_vec(),
        }
    }

    /// Refresh only last-seen stamps.
    pub fn last_seen() -> Self {
        Self {
            name: "seen",
            import_players: false,
            selection: Selection::Stale,
            seen: SeenPolicy::Fetch,
            events: Vec::new(),
        }
    }

    /// Fill in a single category for players that have no event recorded yet.
    pub fn single(kind: EventKind) -> Self {
        Self {
            name: kind.as_str(),
            import_players: false,
            selection: Selection::MissingEvent(kind),
            seen: SeenPolicy::Skip,
            events: vec![kind],
        }
    }

    pub fn finalize_mode(&self) -> Option<FinalizeMode> {
        match self.seen {
            SeenPolicy::Skip => None,
            SeenPolicy::Fetch => Some(FinalizeMode::LastSeenOnly),
            SeenPolicy::Gate => Some(FinalizeMode::Refresh),
        }
    }
}

/// Everything a [`crate::refresh::Pipeline`] needs to know up front.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    pub plan: RefreshPlan,
    pub stores: StorePaths,
    pub staleness_threshold: TimeDelta,
    pub concurrency: NonZeroUsize,
    pub show_progress: bool,
}

impl RefreshConfig {
    pub fn new(plan: RefreshPlan, stores: StorePaths) -> Self {
        Self {
            plan,
            stores,
            staleness_threshold: TimeDelta::days(7),
            concurrency: default_concurrency(),
            show_progress: false,
        }
    }
}

/// One fetch task per available core.
pub fn default_concurrency() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_modes() {
        assert_eq!(
            RefreshPlan::combined().finalize_mode(),
            Some(FinalizeMode::Refresh)
        );
        assert_eq!(
            RefreshPlan::last_seen().finalize_mode(),
            Some(FinalizeMode::LastSeenOnly)
        );
        assert_eq!(RefreshPlan::single(EventKind::FirstKill).finalize_mode(), None);
    }

    #[test]
    fn test_single_plan_targets_one_category() {
        let plan = RefreshPlan::single(EventKind::LastDeath);
        assert_eq!(plan.name, "lastdeath");
        assert_eq!(plan.events, vec![EventKind::LastDeath]);
        assert_eq!(plan.selection, Selection::MissingEvent(EventKind::LastDeath));
    }
}
