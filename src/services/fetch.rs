// src/services/fetch.rs

//! Feed page fetching.

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};

use crate::error::{AppError, Result};
use crate::models::FetcherConfig;
use crate::utils::http;

/// Turns a feed URL into raw markup.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Plain HTTP fetcher that rejects bot-block interstitials.
pub struct HttpFetcher {
    client: Client,
    blocked_titles: Vec<String>,
}

impl HttpFetcher {
    pub fn new(config: &FetcherConfig) -> Result<Self> {
        Ok(Self {
            client: http::create_async_client(config)?,
            blocked_titles: config.blocked_titles.clone(),
        })
    }

    /// Check the page title against the configured block pages.
    fn check_blocked(&self, url: &str, html: &str) -> Result<()> {
        let title = page_title(html)?;
        log::info!("Page title: \"{}\"", title);

        if self.blocked_titles.iter().any(|blocked| *blocked == title) {
            return Err(AppError::fetch(url, format!("Bot detection (\"{title}\")")));
        }
        Ok(())
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::fetch(url, e))?;

        let status = response.status();
        let html = response.text().await.map_err(|e| AppError::fetch(url, e))?;
        log::info!("HTTP Response: {} ({} chars)", status, html.len());

        if !status.is_success() {
            return Err(AppError::fetch(url, format!("HTTP {status}")));
        }
        self.check_blocked(url, &html)?;
        Ok(html)
    }
}

/// Text of the first `<title>` element, empty if there is none.
fn page_title(html: &str) -> Result<String> {
    let selector =
        Selector::parse("title").map_err(|e| AppError::selector("title", format!("{e:?}")))?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&selector)
        .next()
        .map(|title| title.text().collect::<String>().trim().to_string())
        .unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FetcherConfig;

    #[test]
    fn test_page_title() {
        let html = "<html><head><title> Rentals | Feed </title></head><body></body></html>";
        assert_eq!(page_title(html).unwrap(), "Rentals | Feed");
        assert_eq!(page_title("<p>no title</p>").unwrap(), "");
    }

    #[test]
    fn test_detects_block_page() {
        let fetcher = HttpFetcher::new(&FetcherConfig::default()).unwrap();

        let blocked = "<html><head><title>ShieldSquare Captcha</title></head></html>";
        let err = fetcher
            .check_blocked("https://example.com", blocked)
            .unwrap_err();
        assert!(matches!(err, AppError::Fetch { .. }));

        let fine = "<html><head><title>Results</title></head></html>";
        assert!(fetcher.check_blocked("https://example.com", fine).is_ok());
    }
}
