// src/services/listings.rs

//! Listing extraction from feed markup.
//!
//! A listing card is an `<a>` wrapping an image hosted on the feed's image
//! CDN. Structured fields are pulled out of the surrounding card text with
//! the configured patterns.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{ExtractorConfig, ListingRecord};
use crate::utils::{collapse_whitespace, resolve_url, truncate_graphemes};

/// Cards shorter than this are never checked for a doubled rendering.
const HALF_DUPLICATE_MIN_LEN: usize = 100;

// Display forms built around each pattern's first capture group.
const PRICE_FORMAT: &str = "₪{}";
const ROOMS_FORMAT: &str = "{} חדרים";
const FLOOR_FORMAT: &str = "קומה {}";
const SIZE_FORMAT: &str = "{} מ״ר";

/// Turns raw markup into listing candidates.
#[async_trait]
pub trait ListingExtractor: Send + Sync {
    async fn extract(&self, html: &str) -> Result<Vec<ListingRecord>>;
}

/// Extractor for image-card feeds.
pub struct CardExtractor {
    config: ExtractorConfig,
    base_url: Url,
    link_sel: Selector,
    img_sel: Selector,
    item_id: Regex,
    price: Regex,
    rooms: Regex,
    floor: Regex,
    size: Regex,
    doubled_price: Regex,
}

impl CardExtractor {
    /// Compile selectors and patterns from the configuration.
    pub fn new(config: &ExtractorConfig) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(&config.base_url)?,
            link_sel: Self::parse_selector("a")?,
            img_sel: Self::parse_selector("img")?,
            item_id: Regex::new(&config.item_id_pattern)?,
            price: Regex::new(&config.price_pattern)?,
            rooms: Regex::new(&config.rooms_pattern)?,
            floor: Regex::new(&config.floor_pattern)?,
            size: Regex::new(&config.size_pattern)?,
            doubled_price: Regex::new(&format!(
                "({p})({p})",
                p = config.price_pattern
            ))?,
            config: config.clone(),
        })
    }

    /// Parse all listing cards in document order.
    pub fn parse(&self, html: &str) -> Vec<ListingRecord> {
        let document = Html::parse_document(html);
        let observed_at = Utc::now();
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for link in document.select(&self.link_sel) {
            let Some(image_url) = link
                .select(&self.img_sel)
                .next()
                .and_then(|img| img.value().attr("src"))
            else {
                continue;
            };
            if !self.is_listing_image(image_url) {
                continue;
            }

            let url = link
                .value()
                .attr("href")
                .filter(|href| !href.is_empty())
                .map(|href| resolve_url(&self.base_url, href))
                .unwrap_or_default();
            let id = self
                .item_id(&url)
                .unwrap_or_else(|| ListingRecord::derive_id(image_url));
            if seen.contains(&id) {
                continue;
            }

            let raw_text = collapse_whitespace(&self.card_for(link).text().collect::<String>());
            let price = Self::find(&self.price, &raw_text, PRICE_FORMAT);
            // Cards without a price are ads or unrelated tiles.
            if price.is_empty() {
                continue;
            }
            seen.insert(id.clone());

            let text = self.clean_text(&raw_text);
            records.push(ListingRecord {
                id,
                image_url: image_url.to_string(),
                url,
                price,
                rooms: Self::find(&self.rooms, &raw_text, ROOMS_FORMAT),
                floor: Self::find(&self.floor, &raw_text, FLOOR_FORMAT),
                size: Self::find(&self.size, &raw_text, SIZE_FORMAT),
                text: if text.is_empty() {
                    self.config.default_text.clone()
                } else {
                    text
                },
                observed_at,
            });
        }

        log::info!("Extracted {} items with price", records.len());
        records
    }

    fn is_listing_image(&self, src: &str) -> bool {
        src.contains(&self.config.image_marker)
            && !self
                .config
                .excluded_image_markers
                .iter()
                .any(|marker| src.contains(marker.as_str()))
    }

    fn item_id(&self, url: &str) -> Option<String> {
        self.item_id
            .captures(url)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Closest element (the link itself included) whose class marks a card,
    /// falling back to the link's parent.
    fn card_for<'a>(&self, link: ElementRef<'a>) -> ElementRef<'a> {
        let is_card = |el: &ElementRef<'_>| {
            el.value().attr("class").is_some_and(|class| {
                self.config
                    .card_classes
                    .iter()
                    .any(|marker| class.contains(marker.as_str()))
            })
        };

        std::iter::once(link)
            .chain(link.ancestors().filter_map(ElementRef::wrap))
            .find(is_card)
            .or_else(|| link.parent().and_then(ElementRef::wrap))
            .unwrap_or(link)
    }

    /// Truncate, drop doubled prices and doubled renderings of the whole card.
    fn clean_text(&self, raw: &str) -> String {
        let text = truncate_graphemes(raw, self.config.max_text_len);
        let mut text = self.doubled_price.replace_all(&text, "$1").into_owned();

        let chars: Vec<char> = text.chars().collect();
        if chars.len() > HALF_DUPLICATE_MIN_LEN {
            let half = chars.len() / 2;
            if chars[..half] == chars[half..] {
                text = chars[..half].iter().collect();
            }
        }

        collapse_whitespace(&text)
    }

    /// First match of `pattern`, rendered as `format` around capture group 1.
    /// A pattern without groups keeps the whole match.
    fn find(pattern: &Regex, text: &str, format: &str) -> String {
        let Some(caps) = pattern.captures(text) else {
            return String::new();
        };
        match caps.get(1) {
            Some(value) => format.replace("{}", value.as_str().trim()),
            None => collapse_whitespace(&caps[0]),
        }
    }

    fn parse_selector(s: &str) -> Result<Selector> {
        Selector::parse(s).map_err(|e| AppError::selector(s, format!("{e:?}")))
    }
}

#[async_trait]
impl ListingExtractor for CardExtractor {
    async fn extract(&self, html: &str) -> Result<Vec<ListingRecord>> {
        Ok(self.parse(html))
    }
}
