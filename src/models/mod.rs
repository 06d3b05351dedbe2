// src/models/mod.rs

//! Domain models for the watcher.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

pub mod config;
mod ledger;
mod listing;
mod state;

// Re-export all public types
pub use config::{
    Config, ExtractorConfig, FeedTarget, FetcherConfig, MessagesConfig, NotifierConfig, RunMode,
};
pub use ledger::{ExecutionLedger, LedgerEntry};
pub use listing::{ListingRecord, StoredListing};
pub use state::{StateEncoding, TopicState};
