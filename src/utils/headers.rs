use rand::seq::SliceRandom;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, REFERER,
    USER_AGENT,
};

/// Built-in desktop browser user agents
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36 Edg/121.0.0.0",
];

/// Pick a user agent from `custom`, or from the built-in list when it is empty
pub fn random_user_agent(custom: &[String]) -> String {
    let mut rng = rand::thread_rng();
    if let Some(ua) = custom.choose(&mut rng) {
        return ua.clone();
    }
    USER_AGENTS
        .choose(&mut rng)
        .unwrap_or(&USER_AGENTS[0])
        .to_string()
}

/// Build browser-like headers
///
/// Values that are not valid header text (a bad custom user agent, say) are
/// left out rather than failing the request.
///
/// # Examples
///
/// ```
/// use stickyscrape::utils::headers::build_browser_headers;
///
/// let headers = build_browser_headers(
///     "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36",
///     Some("https://x.com/"),
/// );
/// assert!(headers.contains_key("referer"));
/// ```
pub fn build_browser_headers(user_agent: &str, referer: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();

    if let Ok(value) = HeaderValue::from_str(user_agent) {
        headers.insert(USER_AGENT, value);
    }
    if let Some(value) = referer.and_then(|r| HeaderValue::from_str(r).ok()) {
        headers.insert(REFERER, value);
    }
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json,text/html;q=0.9,*/*;q=0.8"),
    );
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip"));

    // Sec-Fetch headers for modern browser compatibility
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("empty"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("cors"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-origin"),
    );

    headers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_agent_rotation() {
        let mut agents = std::collections::HashSet::new();
        for _ in 0..100 {
            let agent = random_user_agent(&[]);
            assert!(USER_AGENTS.contains(&agent.as_str()));
            agents.insert(agent);
        }
        assert!(agents.len() > 1, "User agents should rotate");
    }

    #[test]
    fn test_custom_agents_take_precedence() {
        let custom = vec!["custom-agent/1.0".to_string()];
        assert_eq!(random_user_agent(&custom), "custom-agent/1.0");
    }

    #[test]
    fn test_invalid_values_skipped() {
        let headers = build_browser_headers("bad\nagent", None);
        assert!(!headers.contains_key(USER_AGENT));
        assert!(!headers.contains_key(REFERER));
        assert!(headers.contains_key(ACCEPT));
    }
}
