//! Proxy harvest from public lists
//!
//! Every configured source is fetched concurrently (bounded by
//! `harvest_workers`). A source that fails or answers non-200 contributes
//! nothing; it never fails the harvest.

use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::collections::HashSet;
use std::time::Duration;

use crate::config::{HarvestConfig, ProxySource};
use crate::models::ProxyEndpoint;
use crate::utils::error::FetchError;
use crate::utils::headers::{build_browser_headers, random_user_agent};
use crate::utils::retry::{with_retry_if, RetryConfig};

const KNOWN_SCHEMES: &[&str] = &["http://", "https://", "socks4://", "socks5://"];

/// Fetches proxy candidates from text lists and JSON APIs
pub struct Harvester {
    client: Client,
    config: HarvestConfig,
    retry: RetryConfig,
}

impl Harvester {
    /// Create a harvester for the configured sources
    ///
    /// # Errors
    ///
    /// Returns `FetchError::Http` if the HTTP client cannot be created
    pub fn new(config: HarvestConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            config,
            retry: RetryConfig::default(),
        })
    }

    /// Override the retry policy for source fetches
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Fetch all sources and return unique candidates
    pub async fn harvest(&self) -> Vec<ProxyEndpoint> {
        tracing::info!(
            text_sources = self.config.text_sources.len(),
            api_sources = self.config.api_sources.len(),
            "Harvesting proxy candidates"
        );

        let text = self
            .config
            .text_sources
            .iter()
            .map(|source| HarvestSource::Text(source.clone()));
        let api = self
            .config
            .api_sources
            .iter()
            .map(|url| HarvestSource::Api(url.clone()));

        let batches: Vec<Vec<ProxyEndpoint>> = stream::iter(text.chain(api))
            .map(|source| async move {
                let label = source.label();
                match self.fetch_source(&source).await {
                    Ok(found) => {
                        tracing::info!(source = %label, count = found.len(), "Harvested source");
                        found
                    }
                    Err(e) => {
                        tracing::debug!(source = %label, error = %e, "Source failed");
                        Vec::new()
                    }
                }
            })
            .buffer_unordered(self.config.harvest_workers.max(1))
            .collect()
            .await;

        let unique = dedupe(batches.into_iter().flatten());
        tracing::info!(unique = unique.len(), "Harvest complete");
        unique
    }

    async fn fetch_source(&self, source: &HarvestSource) -> Result<Vec<ProxyEndpoint>, FetchError> {
        let body = with_retry_if(
            &self.retry,
            || self.fetch_body(source.url()),
            FetchError::is_transient,
        )
        .await?;

        Ok(match source {
            HarvestSource::Text(s) => parse_text_list(&s.name, &body),
            HarvestSource::Api(url) => parse_api_body(url, &body),
        })
    }

    async fn fetch_body(&self, url: &str) -> Result<String, FetchError> {
        let headers = build_browser_headers(&random_user_agent(&[]), None);
        let response = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Http(e)
                }
            })?;

        let status = response.status().as_u16();
        match status {
            200 => Ok(response.text().await?),
            429 => Err(FetchError::RateLimit),
            other => Err(FetchError::Status(other)),
        }
    }
}

enum HarvestSource {
    Text(ProxySource),
    Api(String),
}

impl HarvestSource {
    fn url(&self) -> &str {
        match self {
            Self::Text(s) => &s.url,
            Self::Api(url) => url,
        }
    }

    fn label(&self) -> String {
        match self {
            Self::Text(s) => s.name.clone(),
            Self::Api(url) => api_domain(url),
        }
    }
}

fn api_domain(url: &str) -> String {
    crate::utils::extract_domain(url).unwrap_or_else(|_| url.to_string())
}

/// Scheme for a bare `ip:port` from a source name: socks5, socks4, https, else http
fn scheme_for_source(name: &str) -> &'static str {
    let name = name.to_lowercase();
    if name.contains("socks5") {
        "socks5"
    } else if name.contains("socks4") {
        "socks4"
    } else if name.contains("https") {
        "https"
    } else {
        "http"
    }
}

fn parse_line(line: &str, default_scheme: &str, source: &str) -> Option<ProxyEndpoint> {
    let raw = line.split_whitespace().next()?;
    if !raw.contains(':') {
        return None;
    }

    let raw = if KNOWN_SCHEMES.iter().any(|s| raw.starts_with(s)) {
        raw.to_string()
    } else {
        format!("{default_scheme}://{raw}")
    };

    ProxyEndpoint::parse(&raw)
        .ok()
        .map(|endpoint| endpoint.with_source(source))
}

/// Parse a plain-text list: first token of each line, `#` lines skipped
pub fn parse_text_list(source_name: &str, body: &str) -> Vec<ProxyEndpoint> {
    let scheme = scheme_for_source(source_name);
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| parse_line(line, scheme, source_name))
        .collect()
}

/// Parse an API response
///
/// JSON bodies of the form `{"data": [{"ip", "port", "protocols"}]}` yield one
/// endpoint per listed protocol; anything that is not JSON is read as a
/// plain-text list.
pub fn parse_api_body(url: &str, body: &str) -> Vec<ProxyEndpoint> {
    let domain = api_domain(url);

    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        let scheme = if url.contains("socks5") { "socks5" } else { "http" };
        return body
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .filter_map(|line| parse_line(line, scheme, &domain))
            .collect();
    };

    let Some(entries) = json.get("data").and_then(|d| d.as_array()) else {
        return Vec::new();
    };

    let mut found = Vec::new();
    for entry in entries {
        let ip = entry.get("ip").and_then(|v| v.as_str());
        let port = entry.get("port").and_then(|v| match v {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        let (Some(ip), Some(port)) = (ip, port) else {
            continue;
        };

        let protocols: Vec<&str> = entry
            .get("protocols")
            .and_then(|p| p.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_else(|| vec!["http"]);

        for proto in protocols {
            if let Ok(endpoint) = ProxyEndpoint::parse(&format!("{proto}://{ip}:{port}")) {
                found.push(endpoint.with_source(domain.clone()));
            }
        }
    }
    found
}

/// Keep the first occurrence of each URL
pub fn dedupe(endpoints: impl IntoIterator<Item = ProxyEndpoint>) -> Vec<ProxyEndpoint> {
    let mut seen = HashSet::new();
    endpoints
        .into_iter()
        .filter(|endpoint| seen.insert(endpoint.url.clone()))
        .collect()
}
