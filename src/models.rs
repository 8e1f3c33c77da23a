// Core data structures for the session engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Opaque scraped payload. The core never looks inside except for `id` and
/// `created_at` when merging.
pub type Item = serde_json::Value;

// ============================================================================
// Proxy Endpoint
// ============================================================================

/// Protocol class of a proxy endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    /// Map a URL scheme to a protocol class
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_lowercase().as_str() {
            "http" => Some(Self::Http),
            "https" => Some(Self::Https),
            "socks4" | "socks4a" => Some(Self::Socks4),
            "socks5" | "socks5h" => Some(Self::Socks5),
            _ => None,
        }
    }

    /// URL scheme
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(self, Self::Socks4 | Self::Socks5)
    }
}

/// A single proxy endpoint
///
/// Identity is the normalized URL: two endpoints with the same URL are the
/// same endpoint, whatever their measured latency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyEndpoint {
    /// Normalized `scheme://[user:pass@]host:port`
    pub url: String,
    pub protocol: ProxyProtocol,
    pub host: String,
    pub port: u16,
    /// Latency in seconds from the last validation pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_secs: Option<f64>,
    /// Name of the list the endpoint was harvested from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ProxyEndpoint {
    /// Parse a proxy URL. A bare `host:port` is treated as HTTP.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };

        let parsed = Url::parse(&with_scheme).map_err(|e| format!("{raw}: {e}"))?;
        let protocol = ProxyProtocol::from_scheme(parsed.scheme())
            .ok_or_else(|| format!("{raw}: unsupported scheme '{}'", parsed.scheme()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| format!("{raw}: missing host"))?
            .to_string();
        let port = parsed
            .port_or_known_default()
            .ok_or_else(|| format!("{raw}: missing port"))?;

        let auth = match (parsed.username(), parsed.password()) {
            ("", _) => String::new(),
            (user, Some(pass)) => format!("{user}:{pass}@"),
            (user, None) => format!("{user}@"),
        };

        Ok(Self {
            url: format!("{}://{auth}{host}:{port}", protocol.scheme()),
            protocol,
            host,
            port,
            latency_secs: None,
            source: None,
        })
    }

    /// Attach a latency measurement
    pub fn with_latency(mut self, secs: f64) -> Self {
        self.latency_secs = Some(secs);
        self
    }

    /// Attach the harvest source name
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// `scheme://host:port` with credentials stripped, safe for logs
    pub fn redacted(&self) -> String {
        format!("{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }
}

impl PartialEq for ProxyEndpoint {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for ProxyEndpoint {}

impl std::hash::Hash for ProxyEndpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.url.hash(state);
    }
}

impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// Sort order for search-like targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSort {
    #[default]
    Latest,
    Top,
}

impl SearchSort {
    fn filter_param(&self) -> &'static str {
        match self {
            Self::Latest => "live",
            Self::Top => "top",
        }
    }
}

/// What a job scrapes. Opaque to the scheduler; only the driver reads it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobTarget {
    Search {
        query: String,
        #[serde(default)]
        sort: SearchSort,
    },
    User {
        username: String,
        #[serde(default)]
        include_replies: bool,
    },
    Likes {
        username: String,
    },
    Thread {
        /// Numeric tweet id or full status URL
        tweet: String,
    },
    Hashtag {
        tag: String,
        #[serde(default)]
        sort: SearchSort,
    },
}

impl JobTarget {
    /// Navigation URL relative to `base` (e.g. `https://x.com`)
    pub fn url(&self, base: &str) -> String {
        let base = base.trim_end_matches('/');
        match self {
            Self::Search { query, sort } => search_url(base, query, *sort),
            Self::Hashtag { tag, sort } => {
                search_url(base, &format!("#{}", tag.trim_start_matches('#')), *sort)
            }
            Self::User {
                username,
                include_replies,
            } => {
                let tab = if *include_replies { "/with_replies" } else { "" };
                format!("{base}/{}{tab}", username.trim_start_matches('@'))
            }
            Self::Likes { username } => {
                format!("{base}/{}/likes", username.trim_start_matches('@'))
            }
            Self::Thread { tweet } => {
                if tweet.chars().all(|c| c.is_ascii_digit()) {
                    format!("{base}/i/web/status/{tweet}")
                } else {
                    tweet.clone()
                }
            }
        }
    }

    /// Prefix used for result file names
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Search { .. } => "search",
            Self::User {
                include_replies: false,
                ..
            } => "tweets",
            Self::User {
                include_replies: true,
                ..
            } => "replies",
            Self::Likes { .. } => "likes",
            Self::Thread { .. } => "thread",
            Self::Hashtag { .. } => "hashtag",
        }
    }

    /// Human-readable label, also the default job identity
    pub fn label(&self) -> String {
        match self {
            Self::Search { query, .. } => query.clone(),
            Self::User { username, .. } => format!("@{}", username.trim_start_matches('@')),
            Self::Likes { username } => format!("@{}/likes", username.trim_start_matches('@')),
            Self::Thread { tweet } => {
                let id = tweet.rsplit('/').next().unwrap_or(tweet);
                format!("thread:{}", id.split('?').next().unwrap_or(id))
            }
            Self::Hashtag { tag, .. } => format!("#{}", tag.trim_start_matches('#')),
        }
    }
}

fn search_url(base: &str, query: &str, sort: SearchSort) -> String {
    let params = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("q", query)
        .append_pair("src", "typed_query")
        .append_pair("f", sort.filter_param())
        .finish();
    format!("{base}/search?{params}")
}

/// Output identity of a job; results are keyed by it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A unit of requested work. Immutable once handed to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionJob {
    pub id: JobId,
    pub target: JobTarget,
}

impl SessionJob {
    pub fn new(id: impl Into<String>, target: JobTarget) -> Self {
        Self {
            id: JobId(id.into()),
            target,
        }
    }

    /// Job keyed by its target label
    pub fn for_target(target: JobTarget) -> Self {
        Self {
            id: JobId(target.label()),
            target,
        }
    }

    /// Split one target into `sessions` jobs sharing the target, each with a
    /// distinct `#n` suffix on the id
    pub fn fan_out(target: &JobTarget, sessions: usize) -> Vec<Self> {
        let label = target.label();
        (1..=sessions.max(1))
            .map(|n| Self::new(format!("{label}#{n}"), target.clone()))
            .collect()
    }
}

// ============================================================================
// Results
// ============================================================================

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed,
    StoppedRateLimited,
    StoppedError,
    ProxyFailed,
}

impl SessionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::StoppedRateLimited => "stopped_rate_limited",
            Self::StoppedError => "stopped_error",
            Self::ProxyFailed => "proxy_failed",
        }
    }

    /// Whether the proxy should go back into the pool
    pub fn proxy_reusable(&self) -> bool {
        !matches!(self, Self::ProxyFailed)
    }
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one session. Produced for every started session, partial or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResult {
    pub session_id: u64,
    pub job: SessionJob,
    /// Redacted proxy URL, `None` when run without a proxy
    pub proxy: Option<String>,
    pub outcome: SessionOutcome,
    pub items: Vec<Item>,
    /// Work units actually performed against the remote
    pub work_units: u32,
    /// Per-item extraction failures, counted and skipped
    pub extraction_failures: u32,
    /// User profile seen along the way, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<Item>,
    /// Last error observed, if any
    pub error: Option<String>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub finished_at: DateTime<Utc>,
    /// Where the items were written, when persistence succeeded
    pub persisted_to: Option<PathBuf>,
}

impl SessionResult {
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn is_success(&self) -> bool {
        self.outcome == SessionOutcome::Completed
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}
