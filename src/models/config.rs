//! Application configuration structures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// File name of the execution ledger inside the data directory.
pub const LEDGER_FILE_STEM: &str = "execution_meta";

/// Root application configuration.
///
/// Built once at the entry point and passed down by reference; nothing below
/// the binary reads process arguments or environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Whether one topic or all topics are processed per invocation
    #[serde(default)]
    pub mode: RunMode,

    /// Per-run cap on individually notified listings
    #[serde(default = "defaults::max_results_per_run")]
    pub max_results_per_run: usize,

    /// Where state, ledger and the work signal live
    #[serde(default)]
    pub paths: PathsConfig,

    /// Fan-out behavior
    #[serde(default)]
    pub runner: RunnerConfig,

    /// HTTP fetching of feed pages
    #[serde(default)]
    pub fetcher: FetcherConfig,

    /// Listing extraction heuristics
    #[serde(default)]
    pub extractor: ExtractorConfig,

    /// Chat channel settings
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Seen-state policy
    #[serde(default)]
    pub state: StateConfig,

    /// Outbound message templates
    #[serde(default)]
    pub messages: MessagesConfig,

    /// Monitored feeds, in priority order
    #[serde(default)]
    pub projects: Vec<FeedTarget>,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Enabled feeds, preserving configuration order.
    pub fn enabled_targets(&self) -> Vec<FeedTarget> {
        self.projects
            .iter()
            .filter(|project| {
                if project.disabled {
                    log::info!("Topic \"{}\" is disabled. Skipping.", project.topic);
                }
                project.enabled()
            })
            .cloned()
            .collect()
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.max_results_per_run == 0 {
            return Err(AppError::validation("max_results_per_run must be > 0"));
        }
        if self.runner.max_concurrent == 0 {
            return Err(AppError::validation("runner.max_concurrent must be > 0"));
        }
        if self.fetcher.timeout_secs == 0 {
            return Err(AppError::validation("fetcher.timeout_secs must be > 0"));
        }
        if self.fetcher.user_agent.trim().is_empty() {
            return Err(AppError::validation("fetcher.user_agent is empty"));
        }
        url::Url::parse(&self.extractor.base_url)?;
        if self.projects.is_empty() {
            return Err(AppError::validation("No projects defined"));
        }

        let mut seen = HashSet::new();
        for project in &self.projects {
            validate_topic(&project.topic)?;
            if !seen.insert(project.topic.as_str()) {
                return Err(AppError::validation(format!(
                    "Duplicate topic \"{}\"",
                    project.topic
                )));
            }
            url::Url::parse(&project.url).map_err(|e| {
                AppError::validation(format!("Invalid url for \"{}\": {e}", project.topic))
            })?;
        }
        Ok(())
    }
}

/// Topics double as file names inside the data directory.
fn validate_topic(topic: &str) -> Result<()> {
    if topic.trim().is_empty() {
        return Err(AppError::validation("Topic name is empty"));
    }
    if topic.contains(['/', '\\']) || topic == "." || topic == ".." {
        return Err(AppError::validation(format!(
            "Topic \"{topic}\" must not contain path separators"
        )));
    }
    if topic == LEDGER_FILE_STEM {
        return Err(AppError::validation(format!(
            "Topic name \"{topic}\" is reserved"
        )));
    }
    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            max_results_per_run: defaults::max_results_per_run(),
            paths: PathsConfig::default(),
            runner: RunnerConfig::default(),
            fetcher: FetcherConfig::default(),
            extractor: ExtractorConfig::default(),
            notifier: NotifierConfig::default(),
            state: StateConfig::default(),
            messages: MessagesConfig::default(),
            projects: Vec::new(),
        }
    }
}

/// Execution strategy per invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Process exactly the single least recently run topic
    #[default]
    Fairness,
    /// Process every enabled topic
    FanOut,
}

/// A monitored feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedTarget {
    /// Unique name, also the state file stem
    pub topic: String,

    /// Search results page to poll
    pub url: String,

    #[serde(default)]
    pub disabled: bool,
}

impl FeedTarget {
    pub fn new(topic: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            url: url.into(),
            disabled: false,
        }
    }

    pub fn enabled(&self) -> bool {
        !self.disabled
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding per-topic state and the execution ledger
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,

    /// Marker file touched whenever persisted state changes
    #[serde(default = "defaults::work_signal")]
    pub work_signal: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::data_dir(),
            work_signal: defaults::work_signal(),
        }
    }
}

/// Runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Maximum topics in flight in fan-out mode
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::max_concurrent(),
        }
    }
}

/// HTTP fetcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Accept-Language header for HTTP requests
    #[serde(default = "defaults::accept_language")]
    pub accept_language: String,

    /// Hard timeout for a single page fetch in seconds
    #[serde(default = "defaults::fetch_timeout")]
    pub timeout_secs: u64,

    /// Page titles that indicate a bot-block interstitial
    #[serde(default = "defaults::blocked_titles")]
    pub blocked_titles: Vec<String>,
}

impl FetcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            accept_language: defaults::accept_language(),
            timeout_secs: defaults::fetch_timeout(),
            blocked_titles: defaults::blocked_titles(),
        }
    }
}

/// Listing card extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Base URL for resolving relative listing links
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// Substring an image `src` must contain to mark a listing card
    #[serde(default = "defaults::image_marker")]
    pub image_marker: String,

    /// Image `src` substrings that disqualify a card
    #[serde(default = "defaults::excluded_image_markers")]
    pub excluded_image_markers: Vec<String>,

    /// Regex with one capture group extracting the item id from a listing URL
    #[serde(default = "defaults::item_id_pattern")]
    pub item_id_pattern: String,

    /// Class substrings identifying the enclosing card element
    #[serde(default = "defaults::card_classes")]
    pub card_classes: Vec<String>,

    #[serde(default = "defaults::price_pattern")]
    pub price_pattern: String,

    #[serde(default = "defaults::rooms_pattern")]
    pub rooms_pattern: String,

    #[serde(default = "defaults::floor_pattern")]
    pub floor_pattern: String,

    #[serde(default = "defaults::size_pattern")]
    pub size_pattern: String,

    /// Maximum card text length in graphemes
    #[serde(default = "defaults::max_text_len")]
    pub max_text_len: usize,

    /// Text used when a card has no readable text
    #[serde(default = "defaults::default_text")]
    pub default_text: String,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            image_marker: defaults::image_marker(),
            excluded_image_markers: defaults::excluded_image_markers(),
            item_id_pattern: defaults::item_id_pattern(),
            card_classes: defaults::card_classes(),
            price_pattern: defaults::price_pattern(),
            rooms_pattern: defaults::rooms_pattern(),
            floor_pattern: defaults::floor_pattern(),
            size_pattern: defaults::size_pattern(),
            max_text_len: defaults::max_text_len(),
            default_text: defaults::default_text(),
        }
    }
}

/// Chat channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Bot API token; when absent the run is a dry run
    #[serde(default)]
    pub api_token: Option<String>,

    /// Destination chat
    #[serde(default)]
    pub chat_id: String,

    /// Bot API base URL
    #[serde(default = "defaults::api_base")]
    pub api_base: String,

    /// Minimum delay between two consecutive sends in milliseconds
    #[serde(default = "defaults::send_delay")]
    pub send_delay_ms: u64,

    /// Log messages instead of sending them
    #[serde(default)]
    pub dry_run: bool,
}

impl NotifierConfig {
    pub fn send_delay(&self) -> Duration {
        Duration::from_millis(self.send_delay_ms)
    }

    /// True when no message should leave the process.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run || self.api_token.as_deref().is_none_or(|t| t.trim().is_empty())
    }
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            api_token: None,
            chat_id: String::new(),
            api_base: defaults::api_base(),
            send_delay_ms: defaults::send_delay(),
            dry_run: false,
        }
    }
}

/// Seen-state policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateConfig {
    /// Forget ids that no longer appear in the feed
    #[serde(default)]
    pub prune_stale: bool,
}

/// Message templates.
///
/// Placeholders: `{topic}`, `{total}`, `{shown}`, `{error}`, `{caption}`, `{photo}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesConfig {
    #[serde(default = "defaults::msg_summary")]
    pub summary: String,
    #[serde(default = "defaults::msg_nothing_new")]
    pub nothing_new: String,
    #[serde(default = "defaults::msg_failure")]
    pub failure: String,
    #[serde(default = "defaults::msg_photo_fallback")]
    pub photo_fallback: String,
    #[serde(default = "defaults::msg_caption_title")]
    pub caption_title: String,
    #[serde(default = "defaults::msg_caption_link")]
    pub caption_link: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            summary: defaults::msg_summary(),
            nothing_new: defaults::msg_nothing_new(),
            failure: defaults::msg_failure(),
            photo_fallback: defaults::msg_photo_fallback(),
            caption_title: defaults::msg_caption_title(),
            caption_link: defaults::msg_caption_link(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn max_results_per_run() -> usize {
        5
    }

    // Paths
    pub fn data_dir() -> PathBuf {
        PathBuf::from("data")
    }
    pub fn work_signal() -> PathBuf {
        PathBuf::from("push_me")
    }

    // Runner
    pub fn max_concurrent() -> usize {
        2
    }

    // Fetcher
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".into()
    }
    pub fn accept_language() -> String {
        "he-IL,he;q=0.9,en-US;q=0.8,en;q=0.7".into()
    }
    pub fn fetch_timeout() -> u64 {
        60
    }
    pub fn blocked_titles() -> Vec<String> {
        vec!["ShieldSquare Captcha".into()]
    }

    // Extractor
    pub fn base_url() -> String {
        "https://www.yad2.co.il".into()
    }
    pub fn image_marker() -> String {
        "img.yad2.co.il/Pic/".into()
    }
    pub fn excluded_image_markers() -> Vec<String> {
        vec!["placeholder".into(), "logo".into()]
    }
    pub fn item_id_pattern() -> String {
        r"/item/([a-zA-Z0-9]+)".into()
    }
    pub fn card_classes() -> Vec<String> {
        vec!["item".into(), "card".into(), "feed".into()]
    }
    pub fn price_pattern() -> String {
        r"₪\s*([\d,]+)".into()
    }
    pub fn rooms_pattern() -> String {
        r"([\d.]+)\s*חדרים".into()
    }
    pub fn floor_pattern() -> String {
        "קומה\\s*\u{200e}*([\\dקרקע]+)".into()
    }
    pub fn size_pattern() -> String {
        r#"([\d,]+)\s*מ[״"']?ר"#.into()
    }
    pub fn max_text_len() -> usize {
        300
    }
    pub fn default_text() -> String {
        "דירה להשכרה".into()
    }

    // Notifier
    pub fn api_base() -> String {
        "https://api.telegram.org".into()
    }
    pub fn send_delay() -> u64 {
        1500
    }

    // Messages
    pub fn msg_summary() -> String {
        "🎉 {topic}: {total} new, showing {shown}".into()
    }
    pub fn msg_nothing_new() -> String {
        "{topic}: nothing new".into()
    }
    pub fn msg_failure() -> String {
        "❌ {topic}: scan failed 😥\n{error}".into()
    }
    pub fn msg_photo_fallback() -> String {
        "{caption}\n\n📷 {photo}".into()
    }
    pub fn msg_caption_title() -> String {
        "🏠 <b>New listing - {topic}</b>".into()
    }
    pub fn msg_caption_link() -> String {
        "View listing".into()
    }
}
