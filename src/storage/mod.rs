//! Storage abstractions for watcher persistence.
//!
//! ## Directory Structure
//!
//! ```text
//! {data_dir}/
//! ├── execution_meta.json   # Execution ledger (last run per topic)
//! ├── rentals.json          # Seen listings for topic "rentals"
//! └── sales.json
//! push_me                   # Work signal, touched on every write
//! ```

pub mod local;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{ExecutionLedger, TopicState};

// Re-export for convenience
pub use local::LocalStorage;

/// Per-topic seen-listing persistence.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load a topic's state.
    ///
    /// A missing file yields an empty state and initializes the file. An
    /// existing but unreadable file is a `StateIo` error.
    async fn load(&self, topic: &str) -> Result<TopicState>;

    /// Replace a topic's persisted state atomically.
    async fn save(&self, topic: &str, state: &TopicState) -> Result<()>;
}

/// Execution ledger persistence.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load the whole ledger. A missing file yields an empty ledger.
    async fn load_ledger(&self) -> Result<ExecutionLedger>;

    /// Overwrite one topic's entry.
    async fn record(&self, topic: &str, at: DateTime<Utc>, success: bool) -> Result<()>;
}
