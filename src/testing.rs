//! In-memory fakes of the capability traits, shared by unit tests.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::ListingRecord;
use crate::services::{ListingExtractor, NotifierSink, PageFetcher};

/// One message observed by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Photo { url: String, caption: String },
}

impl Sent {
    pub fn text(&self) -> &str {
        match self {
            Sent::Text(text) => text,
            Sent::Photo { caption, .. } => caption,
        }
    }
}

/// Sink that records successful sends and fails on demand.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Sent>>,
    failing_photos: HashSet<String>,
    fail_all_text: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject `send_photo` for this photo URL.
    pub fn failing_photo(mut self, url: &str) -> Self {
        self.failing_photos.insert(url.to_string());
        self
    }

    /// Reject every `send_text`.
    pub fn failing_text(mut self) -> Self {
        self.fail_all_text = true;
        self
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn photos(&self) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::Photo { .. }))
            .count()
    }
}

#[async_trait]
impl NotifierSink for RecordingSink {
    async fn send_text(&self, message: &str, _destination: &str) -> Result<()> {
        if self.fail_all_text {
            return Err(AppError::notification("text rejected"));
        }
        self.sent.lock().unwrap().push(Sent::Text(message.to_string()));
        Ok(())
    }

    async fn send_photo(&self, photo_url: &str, caption: &str, _destination: &str) -> Result<()> {
        if self.failing_photos.contains(photo_url) {
            return Err(AppError::notification("wrong file identifier"));
        }
        self.sent.lock().unwrap().push(Sent::Photo {
            url: photo_url.to_string(),
            caption: caption.to_string(),
        });
        Ok(())
    }
}

/// Fetcher returning fixed markup or a fixed failure.
pub enum StaticFetcher {
    Page(String),
    Fails(String),
    Hangs,
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        match self {
            StaticFetcher::Page(html) => Ok(html.clone()),
            StaticFetcher::Fails(message) => Err(AppError::fetch(url, message)),
            StaticFetcher::Hangs => std::future::pending().await,
        }
    }
}

/// Extractor returning a fixed record list regardless of markup.
pub struct StaticExtractor(pub Vec<ListingRecord>);

#[async_trait]
impl ListingExtractor for StaticExtractor {
    async fn extract(&self, _html: &str) -> Result<Vec<ListingRecord>> {
        Ok(self.0.clone())
    }
}

/// Record with an id and an image derived from it.
pub fn listing(id: &str) -> ListingRecord {
    let mut record = ListingRecord::new(id);
    record.image_url = format!("https://img.example.com/Pic/{id}.jpg");
    record.url = format!("https://www.example.com/item/{id}");
    record.price = "₪5,000".to_string();
    record.text = format!("Listing {id}");
    record
}
