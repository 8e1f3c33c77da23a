//! Error types for the HTTP-facing helpers
//!
//! These cover the proxy harvest and validation passes, which talk to the
//! network directly rather than through a session driver.

use thiserror::Error;

/// Errors that can occur while fetching a proxy source or probing a proxy
#[derive(Error, Debug)]
pub enum FetchError {
    /// HTTP request error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Rate limit exceeded (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimit,

    /// Non-success status code
    #[error("Unexpected status: {0}")]
    Status(u16),

    /// Request timeout
    #[error("Request timeout")]
    Timeout,

    /// Invalid proxy or source URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::RateLimit => true,
            Self::Status(code) => matches!(code, 500 | 502 | 503 | 504),
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidUrl(_) => false,
        }
    }
}

/// Errors raised while reading or writing the proxy list file
#[derive(Error, Debug)]
pub enum ProxyListError {
    /// The list file does not exist
    #[error("Proxy file not found: '{0}'. Run `stickyscrape proxies harvest` first")]
    NotFound(String),

    /// I/O failure
    #[error("I/O error on proxy file: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON
    #[error("Malformed proxy file: {0}")]
    Json(#[from] serde_json::Error),
}
