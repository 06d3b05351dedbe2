//! Notification dispatch for one run's new listings.
//!
//! Sends are strictly sequential with a minimum delay between any two of
//! them. A failed photo falls back to a text message; a failed fallback is
//! logged and the batch moves on. Nothing here aborts a run.

use std::time::Duration;

use tokio::time::Instant;

use crate::error::AppError;
use crate::models::{Config, ListingRecord, MessagesConfig};
use crate::services::NotifierSink;
use crate::utils::truncate_graphemes;

/// Maximum caption summary length in graphemes.
const CAPTION_TEXT_LEN: usize = 200;

/// New listings found in one run, in extraction order.
#[derive(Debug, Clone, Default)]
pub struct NotificationBatch {
    pub topic: String,
    records: Vec<ListingRecord>,
}

impl NotificationBatch {
    pub fn new(topic: impl Into<String>, records: Vec<ListingRecord>) -> Self {
        Self {
            topic: topic.into(),
            records,
        }
    }

    /// Number of new listings, including those beyond the cap.
    pub fn total(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The first `cap` listings, which are the ones sent individually.
    pub fn selected(&self, cap: usize) -> &[ListingRecord] {
        &self.records[..cap.min(self.records.len())]
    }
}

/// Counts for one dispatched batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// New listings in the batch
    pub total: usize,
    /// Listings attempted individually
    pub shown: usize,
    /// Listings that reached the sink, by photo or by fallback
    pub delivered: usize,
    /// Listings delivered through the text fallback
    pub fallbacks: usize,
    /// Listings for which every attempt failed
    pub failed: usize,
}

/// Enforces the minimum gap between consecutive sends.
struct Throttle {
    min_delay: Duration,
    last: Option<Instant>,
}

impl Throttle {
    fn new(min_delay: Duration) -> Self {
        Self {
            min_delay,
            last: None,
        }
    }

    async fn wait(&mut self) {
        if let Some(last) = self.last {
            let ready_at = last + self.min_delay;
            if Instant::now() < ready_at {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

/// Formats and sends messages for a topic's new listings.
pub struct NotificationDispatcher<'a> {
    messages: &'a MessagesConfig,
    destination: &'a str,
    min_delay: Duration,
    placeholder_text: &'a str,
}

impl<'a> NotificationDispatcher<'a> {
    pub fn new(messages: &'a MessagesConfig, destination: &'a str, min_delay: Duration) -> Self {
        Self {
            messages,
            destination,
            min_delay,
            placeholder_text: "",
        }
    }

    pub fn from_config(config: &'a Config) -> Self {
        Self {
            messages: &config.messages,
            destination: &config.notifier.chat_id,
            min_delay: config.notifier.send_delay(),
            placeholder_text: &config.extractor.default_text,
        }
    }

    /// Send a summary plus the first `cap` listings, or a "nothing new" message.
    pub async fn send(
        &self,
        batch: &NotificationBatch,
        cap: usize,
        sink: &dyn NotifierSink,
    ) -> DispatchReport {
        let mut throttle = Throttle::new(self.min_delay);
        let selected = batch.selected(cap);
        let mut report = DispatchReport {
            total: batch.total(),
            shown: selected.len(),
            ..DispatchReport::default()
        };

        if batch.is_empty() {
            log::info!("No new items found for \"{}\"", batch.topic);
            let message = self.messages.nothing_new.replace("{topic}", &batch.topic);
            throttle.wait().await;
            self.send_text_logged(sink, &message).await;
            return report;
        }

        log::info!(
            "Sending {} of {} new items for \"{}\"",
            report.shown,
            report.total,
            batch.topic
        );
        let summary = self
            .messages
            .summary
            .replace("{topic}", &batch.topic)
            .replace("{total}", &report.total.to_string())
            .replace("{shown}", &report.shown.to_string());
        throttle.wait().await;
        self.send_text_logged(sink, &summary).await;

        for record in selected {
            let caption = self.format_caption(record, &batch.topic);
            throttle.wait().await;

            if record.image_url.is_empty() {
                if self.send_text_logged(sink, &caption).await {
                    report.delivered += 1;
                } else {
                    report.failed += 1;
                }
                continue;
            }

            match sink
                .send_photo(&record.image_url, &caption, self.destination)
                .await
            {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    log::warn!("Failed to send photo for [{}]: {}", record.id, e);
                    let fallback = self
                        .messages
                        .photo_fallback
                        .replace("{caption}", &caption)
                        .replace("{photo}", &record.image_url);
                    throttle.wait().await;
                    if self.send_text_logged(sink, &fallback).await {
                        report.delivered += 1;
                        report.fallbacks += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        report
    }

    /// Best-effort failure report for a topic. Returns whether it was delivered.
    pub async fn send_failure(
        &self,
        topic: &str,
        error: &AppError,
        sink: &dyn NotifierSink,
    ) -> bool {
        let message = self
            .messages
            .failure
            .replace("{topic}", topic)
            .replace("{error}", &html_escape::encode_text(&error.to_string()));
        self.send_text_logged(sink, &message).await
    }

    /// HTML caption for one listing.
    pub fn format_caption(&self, record: &ListingRecord, topic: &str) -> String {
        let mut caption = self
            .messages
            .caption_title
            .replace("{topic}", &html_escape::encode_text(topic));
        caption.push_str("\n\n");

        let fields = [
            ("💰 Price", &record.price),
            ("🚪 Rooms", &record.rooms),
            ("🏢 Floor", &record.floor),
            ("📐 Size", &record.size),
        ];
        for (label, value) in fields {
            if !value.is_empty() {
                caption.push_str(&format!("{label}: {}\n", html_escape::encode_text(value)));
            }
        }

        if !record.text.is_empty() && record.text != self.placeholder_text {
            let summary = truncate_graphemes(&record.text, CAPTION_TEXT_LEN);
            caption.push_str(&format!("\n📝 {}", html_escape::encode_text(&summary)));
        }

        if !record.url.is_empty() {
            caption.push_str(&format!(
                "\n\n🔗 <a href=\"{}\">{}</a>",
                html_escape::encode_double_quoted_attribute(&record.url),
                self.messages.caption_link
            ));
        }

        caption
    }

    async fn send_text_logged(&self, sink: &dyn NotifierSink, message: &str) -> bool {
        match sink.send_text(message, self.destination).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to send message: {}", e);
                false
            }
        }
    }
}
