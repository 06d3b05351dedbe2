// src/error.rs

//! Unified error handling for the watcher.

use std::fmt;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
///
/// The first four variants are the run taxonomy: they decide how a topic's
/// run terminates. The rest are infrastructure failures that get folded into
/// one of them at the runner boundary.
#[derive(Error, Debug)]
pub enum AppError {
    /// Feed markup could not be retrieved (network, timeout, HTTP status, bot block)
    #[error("Fetch error for {url}: {message}")]
    Fetch { url: String, message: String },

    /// Markup was retrieved but yielded no usable listing records
    #[error("Extract error: {message}")]
    Extract { message: String },

    /// Persisted state exists but could not be read, decoded or written
    #[error("State I/O error for {path}: {message}")]
    StateIo { path: String, message: String },

    /// A single notification send failed
    #[error("Notification error: {message}")]
    Notification { message: String },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Regex compilation failed
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a fetch error for a feed URL.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create an extraction error.
    pub fn extract(message: impl fmt::Display) -> Self {
        Self::Extract {
            message: message.to_string(),
        }
    }

    /// Create a state I/O error for a persisted file.
    pub fn state_io(path: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::StateIo {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Create a notification error.
    pub fn notification(message: impl fmt::Display) -> Self {
        Self::Notification {
            message: message.to_string(),
        }
    }

    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = AppError::fetch("https://example.com/feed", "timed out after 60s");
        assert_eq!(
            err.to_string(),
            "Fetch error for https://example.com/feed: timed out after 60s"
        );

        let err = AppError::state_io("data/rentals.json", "expected value at line 1");
        assert!(err.to_string().contains("data/rentals.json"));
    }
}
