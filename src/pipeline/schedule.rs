//! Fairness scheduling across topics.
//!
//! Never-run topics are picked first, in candidate order. Otherwise the
//! topic with the oldest `last_execution` is picked, ties resolved by
//! candidate order. Every attempt advances the ledger, so each enabled topic
//! is visited at least once every N invocations for N topics.

use chrono::Utc;

use crate::models::{ExecutionLedger, FeedTarget};

/// Select the topic that has waited longest, or `None` if there are no candidates.
pub fn select_topic<'a>(
    candidates: &'a [FeedTarget],
    ledger: &ExecutionLedger,
) -> Option<&'a FeedTarget> {
    let mut oldest: Option<(&FeedTarget, chrono::DateTime<Utc>)> = None;

    for candidate in candidates {
        let Some(entry) = ledger.entry(&candidate.topic) else {
            log::info!(
                "Topic \"{}\" has never been executed - selecting it",
                candidate.topic
            );
            return Some(candidate);
        };

        let is_older = oldest
            .as_ref()
            .is_none_or(|(_, time)| entry.last_execution < *time);
        if is_older {
            oldest = Some((candidate, entry.last_execution));
        }
    }

    oldest.map(|(candidate, time)| {
        let minutes = (Utc::now() - time).num_minutes();
        log::info!(
            "Topic \"{}\" was last executed {} minutes ago - selecting it",
            candidate.topic,
            minutes
        );
        candidate
    })
}
