//! Per-topic seen-listing state and its on-disk encodings.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ListingRecord, StoredListing};

/// Set of listing ids already observed for one topic, with metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TopicState {
    listings: BTreeMap<String, StoredListing>,
}

/// Which schema a state file was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEncoding {
    /// JSON object keyed by listing id
    Current,
    /// Bare JSON array; discarded on load
    Legacy,
}

/// Every schema the state file has ever used, newest first.
#[derive(Deserialize)]
#[serde(untagged)]
enum StateFile {
    Current(BTreeMap<String, StoredListing>),
    Legacy(Vec<serde_json::Value>),
}

impl TopicState {
    /// Decode a state file, falling back to the legacy schema.
    ///
    /// The legacy array carries no metadata, so it normalizes to an empty
    /// state rather than being re-derived into ids.
    pub fn decode(bytes: &[u8]) -> serde_json::Result<(Self, StateEncoding)> {
        match serde_json::from_slice::<StateFile>(bytes) {
            Ok(StateFile::Current(listings)) => Ok((Self { listings }, StateEncoding::Current)),
            Ok(StateFile::Legacy(_)) => Ok((Self::default(), StateEncoding::Legacy)),
            Err(_) => {
                // Re-run with the current schema so the error names the real problem.
                serde_json::from_slice::<BTreeMap<String, StoredListing>>(bytes)
                    .map(|listings| (Self { listings }, StateEncoding::Current))
            }
        }
    }

    /// Encode in the current schema.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.listings)
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.listings.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&StoredListing> {
        self.listings.get(id)
    }

    /// Iterate over the stored ids.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.listings.keys().map(String::as_str)
    }

    /// Mark records as seen. Already-known ids keep their original entry.
    pub fn remember(&mut self, records: &[ListingRecord], added_at: DateTime<Utc>) -> usize {
        let mut added = 0;
        for record in records {
            if !self.listings.contains_key(&record.id) {
                self.listings
                    .insert(record.id.clone(), record.to_stored(added_at));
                added += 1;
            }
        }
        added
    }

    /// Drop ids that are not present in `current`. Returns how many were removed.
    pub fn prune_absent(&mut self, current: &[ListingRecord]) -> usize {
        let present: HashSet<&str> = current.iter().map(|r| r.id.as_str()).collect();
        let before = self.listings.len();
        self.listings.retain(|id, _| present.contains(id.as_str()));
        before - self.listings.len()
    }
}
