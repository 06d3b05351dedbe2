// src/services/notifier.rs

//! Notifier sink capability and the dry-run implementation.

use async_trait::async_trait;

use crate::error::Result;

/// Delivers a text or photo message to a destination chat.
#[async_trait]
pub trait NotifierSink: Send + Sync {
    /// Send a plain (HTML formatted) text message.
    async fn send_text(&self, message: &str, destination: &str) -> Result<()>;

    /// Send a photo by URL with an HTML caption.
    async fn send_photo(&self, photo_url: &str, caption: &str, destination: &str) -> Result<()>;
}

/// Sink that only logs what would have been sent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunSink;

#[async_trait]
impl NotifierSink for DryRunSink {
    async fn send_text(&self, message: &str, destination: &str) -> Result<()> {
        log::info!("[dry-run text -> {destination}] {message}");
        Ok(())
    }

    async fn send_photo(&self, photo_url: &str, caption: &str, destination: &str) -> Result<()> {
        log::info!("[dry-run photo -> {destination}] {photo_url}");
        log::info!("[dry-run caption] {caption}");
        Ok(())
    }
}
