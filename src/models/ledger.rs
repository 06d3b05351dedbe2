//! Execution ledger: last run time and outcome per topic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable record of each topic's most recent run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLedger {
    #[serde(default)]
    pub projects: BTreeMap<String, LedgerEntry>,
}

/// Outcome of one topic's latest run attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub last_execution: DateTime<Utc>,
    pub success: bool,
}

impl ExecutionLedger {
    /// Entry for a topic, `None` if it never ran.
    pub fn entry(&self, topic: &str) -> Option<&LedgerEntry> {
        self.projects.get(topic)
    }

    /// Overwrite a topic's entry.
    pub fn record(&mut self, topic: &str, at: DateTime<Utc>, success: bool) {
        self.projects.insert(
            topic.to_string(),
            LedgerEntry {
                last_execution: at,
                success,
            },
        );
    }
}
