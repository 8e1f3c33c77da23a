//! Common utilities and helper functions
//!
//! This module provides shared utilities used across the application.

pub mod error;
pub mod headers;
pub mod retry;

use anyhow::{Context, Result};
use regex::Regex;
use std::sync::OnceLock;
use url::Url;

/// Extract domain from URL
pub fn extract_domain(url: &str) -> Result<String> {
    let parsed = Url::parse(url).context("Invalid URL")?;

    parsed
        .host_str()
        .map(|s| s.to_string())
        .context("No host in URL")
}

/// Reduce a free-form label to a file-name-safe slug of at most `max_len` chars
///
/// Anything outside `[A-Za-z0-9_-]` becomes `_`.
pub fn slugify(label: &str, max_len: usize) -> String {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();

    let re = NON_WORD.get_or_init(|| Regex::new(r"[^\w\-]").expect("Invalid regex pattern"));

    re.replace_all(label, "_").chars().take(max_len).collect()
}

/// Pick a uniformly random duration in `[min, max]` seconds
///
/// A reversed range collapses to `min`.
pub fn random_between(min_secs: f64, max_secs: f64) -> std::time::Duration {
    use rand::Rng;

    let secs = if max_secs > min_secs {
        rand::thread_rng().gen_range(min_secs..=max_secs)
    } else {
        min_secs
    };
    std::time::Duration::from_secs_f64(secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_extract_domain() {
        let domain = extract_domain("https://x.com/search?q=rust");
        assert_eq!(domain.unwrap(), "x.com");
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("#rust lang", 40), "_rust_lang");
        assert_eq!(slugify("from:someone", 40), "from_someone");
        assert_eq!(slugify("abcdef", 3), "abc");
    }

    #[test]
    fn test_random_between_bounds() {
        for _ in 0..50 {
            let d = random_between(0.5, 1.5);
            assert!(d >= Duration::from_millis(500) && d <= Duration::from_millis(1500));
        }
        assert_eq!(random_between(2.0, 1.0), Duration::from_secs(2));
        assert_eq!(random_between(0.0, 0.0), Duration::ZERO);
    }
}
