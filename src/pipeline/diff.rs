//! Change detection between a feed snapshot and a topic's seen state.
//!
//! A record is new iff its id is absent from the topic state. Output keeps
//! the extraction order of the snapshot, so the first listings on the page
//! are the first to be notified.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::models::config::StateConfig;
use crate::models::{ListingRecord, TopicState};

/// What a merge did to the stored state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateChange {
    /// Ids newly marked as seen
    pub added: usize,
    /// Ids dropped because the feed no longer lists them
    pub pruned: usize,
}

impl StateChange {
    /// Check if the state needs to be persisted.
    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.pruned > 0
    }
}

/// Detector for listings not seen before.
#[derive(Debug, Clone, Default)]
pub struct ChangeDetector {
    /// Whether ids missing from the current snapshot are forgotten
    prune_stale: bool,
}

impl ChangeDetector {
    /// Create a detector that never forgets ids.
    pub fn new() -> Self {
        Self { prune_stale: false }
    }

    /// Create a detector that forgets ids no longer in the feed.
    pub fn with_pruning() -> Self {
        Self { prune_stale: true }
    }

    pub fn from_config(config: &StateConfig) -> Self {
        Self {
            prune_stale: config.prune_stale,
        }
    }

    /// Records in `current` whose id is not in `state`, in input order.
    ///
    /// A duplicated id within `current` is reported once, at its first position.
    pub fn diff(&self, current: &[ListingRecord], state: &TopicState) -> Vec<ListingRecord> {
        let mut emitted: HashSet<&str> = HashSet::new();
        let mut new = Vec::new();
        for record in current {
            if !state.contains(&record.id) && emitted.insert(record.id.as_str()) {
                new.push(record.clone());
            }
        }
        new
    }

    /// Merge the notified subset into `state`, pruning first if enabled.
    ///
    /// Only `notified` is marked as seen; new records beyond the per-run cap
    /// stay candidates for the next run.
    pub fn apply(
        &self,
        current: &[ListingRecord],
        notified: &[ListingRecord],
        state: &mut TopicState,
        at: DateTime<Utc>,
    ) -> StateChange {
        let pruned = if self.prune_stale {
            state.prune_absent(current)
        } else {
            0
        };
        let added = state.remember(notified, at);
        StateChange { added, pruned }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_records(ids: &[&str]) -> Vec<ListingRecord> {
        ids.iter().map(|id| ListingRecord::new(*id)).collect()
    }

    fn ids(records: &[ListingRecord]) -> Vec<&str> {
        records.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_empty_state_everything_new() {
        let current = make_records(&["x1", "x2", "x3"]);
        let new = ChangeDetector::new().diff(&current, &TopicState::default());
        assert_eq!(ids(&new), vec!["x1", "x2", "x3"]);
    }

    #[test]
    fn test_preserves_input_order() {
        let mut state = TopicState::default();
        state.remember(&make_records(&["b"]), Utc::now());

        let current = make_records(&["d", "b", "a", "c"]);
        let new = ChangeDetector::new().diff(&current, &state);
        assert_eq!(ids(&new), vec!["d", "a", "c"]);
    }

    #[test]
    fn test_duplicates_reported_once() {
        let current = make_records(&["a", "b", "a"]);
        let new = ChangeDetector::new().diff(&current, &TopicState::default());
        assert_eq!(ids(&new), vec!["a", "b"]);
    }

    #[test]
    fn test_idempotent_after_full_merge() {
        let detector = ChangeDetector::new();
        let current = make_records(&["x1", "x2", "x3"]);
        let mut state = TopicState::default();

        let first = detector.diff(&current, &state);
        detector.apply(&current, &first, &mut state, Utc::now());

        assert!(detector.diff(&current, &state).is_empty());
    }

    #[test]
    fn test_unnotified_records_stay_new() {
        let detector = ChangeDetector::new();
        let current = make_records(&["x1", "x2", "x3"]);
        let mut state = TopicState::default();

        let new = detector.diff(&current, &state);
        let change = detector.apply(&current, &new[..2], &mut state, Utc::now());
        assert_eq!(change.added, 2);

        assert_eq!(ids(&detector.diff(&current, &state)), vec!["x3"]);
    }

    #[test]
    fn test_pruning_forgets_absent_ids() {
        let detector = ChangeDetector::with_pruning();
        let mut state = TopicState::default();
        state.remember(&make_records(&["old", "kept"]), Utc::now());

        let current = make_records(&["kept", "fresh"]);
        let new = detector.diff(&current, &state);
        let change = detector.apply(&current, &new, &mut state, Utc::now());

        assert_eq!(change, StateChange { added: 1, pruned: 1 });
        assert!(!state.contains("old"));

        // A pruned id that re-appears is new again.
        let current = make_records(&["old", "kept", "fresh"]);
        assert_eq!(ids(&detector.diff(&current, &state)), vec!["old"]);
    }

    #[test]
    fn test_no_pruning_by_default() {
        let detector = ChangeDetector::new();
        let mut state = TopicState::default();
        state.remember(&make_records(&["old"]), Utc::now());

        let change = detector.apply(&[], &[], &mut state, Utc::now());
        assert!(!change.has_changes());
        assert!(state.contains("old"));
    }
}
