//! Two-step proxy validation
//!
//! 1. Basic: GET the connectivity probe URL through the proxy (proves the
//!    proxy routes traffic at all).
//! 2. Target: GET the target site through the proxy (proves the site does not
//!    block it). Redirects are not followed so a redirect counts on its own.
//!
//! Only endpoints whose target step ends in `success` or `redirect_ok` are
//! kept, fastest first.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{redirect, Client, Proxy};
use std::fmt;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};

use crate::config::HarvestConfig;
use crate::models::ProxyEndpoint;
use crate::proxy::store::ProxyRecord;
use crate::utils::headers::{build_browser_headers, random_user_agent};

/// Outcome of probing one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeStatus {
    Success,
    RedirectOk,
    /// 200 from the target without any expected marker in the body
    BlockedPage,
    Forbidden,
    RateLimited,
    Http(u16),
    Timeout,
    ProxyError,
    ConnectionError,
    SkippedSocks,
    /// Connectivity probe answered with a non-200 status
    BasicFailed(u16),
    Error(String),
}

impl ProbeStatus {
    pub fn is_working(&self) -> bool {
        matches!(self, Self::Success | Self::RedirectOk)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::RedirectOk => write!(f, "redirect_ok"),
            Self::BlockedPage => write!(f, "blocked_page"),
            Self::Forbidden => write!(f, "forbidden"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Http(code) => write!(f, "http_{code}"),
            Self::Timeout => write!(f, "timeout"),
            Self::ProxyError => write!(f, "proxy_error"),
            Self::ConnectionError => write!(f, "connection_error"),
            Self::SkippedSocks => write!(f, "skipped_socks"),
            Self::BasicFailed(code) => write!(f, "basic_failed_{code}"),
            Self::Error(kind) => write!(f, "error_{kind}"),
        }
    }
}

/// Result of probing one endpoint
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub endpoint: ProxyEndpoint,
    pub status: ProbeStatus,
    /// Connectivity probe latency, set once step 1 passed
    pub basic_secs: Option<f64>,
    /// Target latency, set only for working endpoints
    pub target_secs: Option<f64>,
    pub tested_at: DateTime<Utc>,
}

impl ProbeResult {
    fn new(endpoint: ProxyEndpoint) -> Self {
        Self {
            endpoint,
            status: ProbeStatus::Error(String::from("not_tested")),
            basic_secs: None,
            target_secs: None,
            tested_at: Utc::now(),
        }
    }

    pub fn is_working(&self) -> bool {
        self.status.is_working()
    }

    /// List-file record for this result
    pub fn to_record(&self) -> ProxyRecord {
        ProxyRecord {
            proxy: self.endpoint.url.clone(),
            source: self.endpoint.source.clone(),
            speed: self.target_secs,
            working: self.basic_secs.is_some(),
            status: Some(self.status.to_string()),
            tested_at: Some(self.tested_at),
        }
    }
}

/// Probes proxy candidates against a connectivity URL and the target site
pub struct Validator {
    config: HarvestConfig,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl Validator {
    pub fn new(config: HarvestConfig) -> Self {
        let rate = NonZeroU32::new(config.probes_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            rate_limiter: RateLimiter::direct(Quota::per_second(rate)),
            config,
        }
    }

    /// Probe one endpoint. Never fails: every problem maps to a status.
    pub async fn probe(&self, endpoint: ProxyEndpoint) -> ProbeResult {
        let mut result = ProbeResult::new(endpoint);

        if result.endpoint.protocol.is_socks() && !self.config.include_socks {
            result.status = ProbeStatus::SkippedSocks;
            return result;
        }

        self.rate_limiter.until_ready().await;

        let client = match self.client_for(&result.endpoint) {
            Ok(client) => client,
            Err(e) => {
                result.status = classify_error(&e);
                return result;
            }
        };

        let status = match self.run_steps(&client, &mut result).await {
            Ok(status) => status,
            Err(e) => classify_error(&e),
        };
        result.status = status;
        result
    }

    async fn run_steps(
        &self,
        client: &Client,
        result: &mut ProbeResult,
    ) -> Result<ProbeStatus, reqwest::Error> {
        let headers = build_browser_headers(&random_user_agent(&[]), None);

        // Step 1: basic connectivity
        let started = Instant::now();
        let basic = client
            .get(&self.config.probe_url)
            .headers(headers.clone())
            .timeout(Duration::from_secs(self.config.basic_timeout_secs))
            .send()
            .await?;
        if basic.status().as_u16() != 200 {
            return Ok(ProbeStatus::BasicFailed(basic.status().as_u16()));
        }
        result.basic_secs = Some(round_ms(started.elapsed()));

        // Step 2: target site
        let started = Instant::now();
        let target = client
            .get(&self.config.target_url)
            .headers(headers)
            .timeout(Duration::from_secs(self.config.target_timeout_secs))
            .send()
            .await?;
        let elapsed = round_ms(started.elapsed());

        let code = target.status().as_u16();
        let body = if code == 200 {
            target.text().await?
        } else {
            String::new()
        };
        let status = classify_target(code, &body, &self.config.target_markers);

        if status.is_working() {
            result.target_secs = Some(elapsed);
        }
        Ok(status)
    }

    fn client_for(&self, endpoint: &ProxyEndpoint) -> Result<Client, reqwest::Error> {
        Client::builder()
            .proxy(Proxy::all(&endpoint.url)?)
            .redirect(redirect::Policy::none())
            .build()
    }

    /// Probe every candidate with at most `validate_workers` in flight
    ///
    /// Returns all results in completion order.
    pub async fn validate_all(&self, candidates: Vec<ProxyEndpoint>) -> Vec<ProbeResult> {
        let total = candidates.len();
        tracing::info!(
            total,
            workers = self.config.validate_workers,
            "Validating proxy candidates"
        );

        let mut results = Vec::with_capacity(total);
        let mut working = 0usize;
        let mut probes = stream::iter(candidates)
            .map(|endpoint| self.probe(endpoint))
            .buffer_unordered(self.config.validate_workers.max(1));

        while let Some(result) = probes.next().await {
            if result.is_working() {
                working += 1;
                tracing::info!(
                    proxy = %result.endpoint,
                    secs = result.target_secs.unwrap_or_default(),
                    status = %result.status,
                    "Working proxy"
                );
            } else {
                tracing::debug!(proxy = %result.endpoint, status = %result.status, "Proxy rejected");
            }
            results.push(result);

            if results.len() % 250 == 0 {
                tracing::info!(tested = results.len(), total, working, "Validation progress");
            }
        }

        tracing::info!(
            working,
            total,
            rate = %format!("{:.1}%", working as f64 / total.max(1) as f64 * 100.0),
            "Validation complete"
        );
        results
    }
}

/// Working results as list-file records, fastest first
pub fn working_records(results: &[ProbeResult]) -> Vec<ProxyRecord> {
    let mut records: Vec<ProxyRecord> = results
        .iter()
        .filter(|r| r.is_working())
        .map(ProbeResult::to_record)
        .collect();

    records.sort_by(|a, b| {
        a.speed
            .unwrap_or(f64::MAX)
            .total_cmp(&b.speed.unwrap_or(f64::MAX))
    });
    records
}

/// Map the target step's response to a status
pub fn classify_target(code: u16, body: &str, markers: &[String]) -> ProbeStatus {
    match code {
        200 => {
            let body = body.to_lowercase();
            if markers
                .iter()
                .any(|marker| body.contains(&marker.to_lowercase()))
            {
                ProbeStatus::Success
            } else {
                ProbeStatus::BlockedPage
            }
        }
        301..=303 => ProbeStatus::RedirectOk,
        403 => ProbeStatus::Forbidden,
        429 => ProbeStatus::RateLimited,
        code => ProbeStatus::Http(code),
    }
}

fn round_ms(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0).round() / 1000.0
}

fn classify_error(e: &reqwest::Error) -> ProbeStatus {
    if e.is_timeout() {
        return ProbeStatus::Timeout;
    }

    let message = format!("{e:?}").to_lowercase();
    if message.contains("proxy") || message.contains("tunnel") {
        ProbeStatus::ProxyError
    } else if e.is_connect() {
        ProbeStatus::ConnectionError
    } else if e.is_builder() {
        ProbeStatus::Error(String::from("builder"))
    } else if e.is_body() || e.is_decode() {
        ProbeStatus::Error(String::from("body"))
    } else {
        ProbeStatus::Error(String::from("request"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(ProbeStatus::Success.to_string(), "success");
        assert_eq!(ProbeStatus::RedirectOk.to_string(), "redirect_ok");
        assert_eq!(ProbeStatus::Http(502).to_string(), "http_502");
        assert_eq!(ProbeStatus::BasicFailed(407).to_string(), "basic_failed_407");
        assert_eq!(ProbeStatus::SkippedSocks.to_string(), "skipped_socks");
        assert!(!ProbeStatus::BlockedPage.is_working());
    }

    #[test]
    fn test_classify_target() {
        let markers = HarvestConfig::default().target_markers;
        assert_eq!(
            classify_target(200, "<title>Log in to X</title>", &markers),
            ProbeStatus::Success
        );
        assert_eq!(
            classify_target(200, "Access denied", &markers),
            ProbeStatus::BlockedPage
        );
        assert_eq!(classify_target(302, "", &markers), ProbeStatus::RedirectOk);
        assert_eq!(classify_target(403, "", &markers), ProbeStatus::Forbidden);
        assert_eq!(classify_target(429, "", &markers), ProbeStatus::RateLimited);
        assert_eq!(classify_target(500, "", &markers), ProbeStatus::Http(500));
    }

    #[tokio::test]
    async fn test_socks_skipped_without_network() {
        let validator = Validator::new(HarvestConfig::default());
        let endpoint = ProxyEndpoint::parse("socks5://127.0.0.1:1").unwrap();
        let result = validator.probe(endpoint).await;
        assert_eq!(result.status, ProbeStatus::SkippedSocks);
        assert!(result.basic_secs.is_none());
    }

    #[test]
    fn test_working_records_sorted_by_speed() {
        let make = |url: &str, status: ProbeStatus, secs: Option<f64>| ProbeResult {
            endpoint: ProxyEndpoint::parse(url).unwrap(),
            status,
            basic_secs: Some(0.1),
            target_secs: secs,
            tested_at: Utc::now(),
        };

        let results = vec![
            make("1.1.1.1:80", ProbeStatus::Success, Some(2.5)),
            make("2.2.2.2:80", ProbeStatus::Forbidden, None),
            make("3.3.3.3:80", ProbeStatus::RedirectOk, Some(0.7)),
        ];

        let records = working_records(&results);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].proxy, "http://3.3.3.3:80");
        assert_eq!(records[0].status.as_deref(), Some("redirect_ok"));
        assert_eq!(records[1].speed, Some(2.5));
    }
}
