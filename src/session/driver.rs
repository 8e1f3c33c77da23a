//! Remote driver abstraction
//!
//! A [`RemoteDriver`] opens one [`RemoteSession`] per scrape session, bound
//! to that session's proxy and credentials for its whole life. Each
//! [`RemoteSession::step`] performs one unit of work (one page) and either
//! hands back the raw response or a classified [`DriverFailure`]; the runner
//! decides what the failure means for the session and the proxy.
//!
//! [`HttpDriver`] is the production implementation on `reqwest`. Tests plug
//! in scripted drivers.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE, SET_COOKIE};
use reqwest::{Client, Proxy, StatusCode};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::breaker::TripReason;
use crate::config::HttpConfig;
use crate::extractor::timeline::find_bottom_cursor;
use crate::models::{JobTarget, ProxyEndpoint};
use crate::storage::{Cookie, Credentials};
use crate::utils::headers::{build_browser_headers, random_user_agent};

/// In-band "rate limit exceeded" code carried in an `errors` array
pub const RATE_LIMIT_CODE: i64 = 88;

/// One raw page from the remote
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub url: String,
    pub body: String,
    /// `Set-Cookie` header values, unparsed
    pub set_cookies: Vec<String>,
}

/// Classified failure of one work unit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverFailure {
    /// Connect, timeout or tunnel failure; blamed on the proxy
    #[error("Network failure: {0}")]
    Network(String),

    /// The remote is throttling us
    #[error("Throttled: {0}")]
    Throttled(TripReason),

    /// The remote refused this client outright
    #[error("Blocked: {0}")]
    Blocked(String),

    /// Anything else; the session may carry on
    #[error("{0}")]
    Other(String),
}

impl DriverFailure {
    /// Failures that mean the proxy should not be handed out again
    pub fn is_proxy_fatal(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Blocked(_))
    }
}

/// Opens remote sessions
#[async_trait]
pub trait RemoteDriver: Send + Sync {
    /// Open a session through `proxy` (direct when `None`) presenting
    /// `credentials`
    async fn open(
        &self,
        proxy: Option<&ProxyEndpoint>,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn RemoteSession>, DriverFailure>;
}

/// One sticky remote session
#[async_trait]
pub trait RemoteSession: Send {
    /// Perform work unit number `unit` (0-based) for `target`
    async fn step(&mut self, target: &JobTarget, unit: u32) -> Result<RawResponse, DriverFailure>;

    /// `false` once the remote has signalled there is nothing further
    fn has_more(&self) -> bool {
        true
    }

    /// Cookies the remote set or changed during this session, latest
    /// value per cookie; empty when nothing needs writing back
    fn refreshed_cookies(&self) -> Vec<Cookie> {
        Vec::new()
    }

    /// Tear down; called once, on every path out of `Active`
    async fn close(&mut self) {}
}

/// Look for the in-band throttle code in a JSON body
pub fn in_band_throttle(body: &str) -> Option<i64> {
    let data: Value = serde_json::from_str(body).ok()?;
    data.get("errors")?
        .as_array()?
        .iter()
        .filter_map(|e| e.get("code").and_then(Value::as_i64))
        .find(|code| *code == RATE_LIMIT_CODE)
}

// ============================================================================
// HTTP implementation
// ============================================================================

/// `reqwest`-backed driver against the configured base URL
#[derive(Debug, Clone)]
pub struct HttpDriver {
    config: HttpConfig,
}

impl HttpDriver {
    pub fn new(config: HttpConfig) -> Self {
        Self { config }
    }

    fn build_client(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client, DriverFailure> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(self.config.request_timeout_secs))
            .gzip(true);

        if let Some(endpoint) = proxy {
            let proxy = Proxy::all(&endpoint.url)
                .map_err(|e| DriverFailure::Network(format!("bad proxy {endpoint}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        builder
            .build()
            .map_err(|e| DriverFailure::Other(format!("client build failed: {e}")))
    }
}

#[async_trait]
impl RemoteDriver for HttpDriver {
    async fn open(
        &self,
        proxy: Option<&ProxyEndpoint>,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn RemoteSession>, DriverFailure> {
        let client = self.build_client(proxy)?;
        let base_url = self.config.base_url.trim_end_matches('/').to_string();
        let user_agent = random_user_agent(&self.config.user_agents);
        let headers = build_browser_headers(&user_agent, Some(&format!("{base_url}/")));

        tracing::debug!(
            proxy = proxy.map(|p| p.redacted()).as_deref().unwrap_or("direct"),
            user_agent = %user_agent,
            "Opened HTTP session"
        );

        Ok(Box::new(HttpSession {
            client,
            base_url,
            headers,
            cookies: credentials.cloned().unwrap_or_default(),
            refreshed: Credentials::default(),
            cursor: None,
            exhausted: false,
        }))
    }
}

/// One sticky HTTP session: fixed client, fixed user agent, evolving cookies
struct HttpSession {
    client: Client,
    base_url: String,
    headers: HeaderMap,
    cookies: Credentials,
    /// Only the cookies the remote changed
    refreshed: Credentials,
    cursor: Option<String>,
    exhausted: bool,
}

impl HttpSession {
    fn page_url(&self, target: &JobTarget, unit: u32) -> Result<String, DriverFailure> {
        let base = target.url(&self.base_url);
        match (&self.cursor, unit) {
            (Some(cursor), u) if u > 0 => {
                let mut url = url::Url::parse(&base)
                    .map_err(|e| DriverFailure::Other(format!("invalid target url {base}: {e}")))?;
                url.query_pairs_mut().append_pair("cursor", cursor);
                Ok(url.to_string())
            }
            _ => Ok(base),
        }
    }

    fn request_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        if !self.cookies.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.cookies.header_value()) {
                headers.insert(COOKIE, value);
            }
        }
        if let Some(value) = self.cookies.get("ct0").and_then(|t| HeaderValue::from_str(t).ok()) {
            headers.insert(HeaderName::from_static("x-csrf-token"), value);
        }
        headers
    }

    fn absorb_cookies(&mut self, set_cookies: &[String]) {
        for raw in set_cookies {
            if let Some(cookie) = Cookie::parse_set_cookie(raw) {
                if self.cookies.upsert(cookie.clone()) {
                    self.refreshed.upsert(cookie);
                }
            }
        }
    }

    fn advance_cursor(&mut self, body: &str) {
        let next = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|data| find_bottom_cursor(&data));
        match next {
            Some(cursor) if self.cursor.as_deref() != Some(cursor.as_str()) => {
                self.cursor = Some(cursor);
            }
            _ => self.exhausted = true,
        }
    }
}

fn classify_send_error(e: &reqwest::Error) -> DriverFailure {
    let message = e.to_string();
    if e.is_timeout() {
        DriverFailure::Network(format!("timeout: {message}"))
    } else if e.is_connect() {
        DriverFailure::Network(format!("connect: {message}"))
    } else if message.to_lowercase().contains("proxy") || message.to_lowercase().contains("tunnel") {
        DriverFailure::Network(message)
    } else if e.is_request() {
        DriverFailure::Network(message)
    } else {
        DriverFailure::Other(message)
    }
}

#[async_trait]
impl RemoteSession for HttpSession {
    async fn step(&mut self, target: &JobTarget, unit: u32) -> Result<RawResponse, DriverFailure> {
        let url = self.page_url(target, unit)?;
        let response = self
            .client
            .get(&url)
            .headers(self.request_headers())
            .send()
            .await
            .map_err(|e| classify_send_error(&e))?;

        let status = response.status();
        let final_url = response.url().to_string();
        let set_cookies: Vec<String> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(String::from))
            .collect();
        self.absorb_cookies(&set_cookies);

        match status {
            StatusCode::TOO_MANY_REQUESTS => {
                return Err(DriverFailure::Throttled(TripReason::TooManyRequests));
            }
            StatusCode::FORBIDDEN => {
                return Err(DriverFailure::Blocked(format!("HTTP 403 at {final_url}")));
            }
            StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                return Err(DriverFailure::Network("HTTP 407 from proxy".to_string()));
            }
            s if !s.is_success() => {
                return Err(DriverFailure::Other(format!("HTTP {} at {final_url}", s.as_u16())));
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| DriverFailure::Network(format!("body read failed: {e}")))?;

        if let Some(code) = in_band_throttle(&body) {
            return Err(DriverFailure::Throttled(TripReason::InBand(code)));
        }

        self.advance_cursor(&body);

        Ok(RawResponse {
            status: status.as_u16(),
            url: final_url,
            body,
            set_cookies,
        })
    }

    fn has_more(&self) -> bool {
        !self.exhausted
    }

    fn refreshed_cookies(&self) -> Vec<Cookie> {
        self.refreshed.cookies.clone()
    }
}
