//! Service layer for the watcher.
//!
//! This module contains the external collaborators:
//! - Page fetching (`HttpFetcher`)
//! - Listing extraction (`CardExtractor`)
//! - Notification delivery (`TelegramSink`, `DryRunSink`)

mod fetch;
mod listings;
mod notifier;
mod telegram;

pub use fetch::{HttpFetcher, PageFetcher};
pub use listings::{CardExtractor, ListingExtractor};
pub use notifier::{DryRunSink, NotifierSink};
pub use telegram::TelegramSink;
