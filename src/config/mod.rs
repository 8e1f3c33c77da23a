//! Configuration management for stickyscrape
//!
//! This module handles loading and validating configuration from environment variables,
//! TOML files, and command-line overrides.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::proxy::ExhaustionPolicy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Proxy pool configuration
    pub pool: PoolConfig,

    /// Per-session limits and pacing
    pub session: SessionConfig,

    /// Scheduler configuration
    pub scheduler: SchedulerConfig,

    /// File locations
    pub paths: PathsConfig,

    /// HTTP driver configuration
    pub http: HttpConfig,

    /// Proxy harvest and validation
    pub harvest: HarvestConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Proxy pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Proxy list written by `proxies validate`
    pub proxies_file: PathBuf,

    /// What to do when no proxy is available
    pub on_exhausted: ExhaustionPolicy,

    /// Fixed seed for the refill shuffle (reproducible runs)
    pub shuffle_seed: Option<u64>,
}

/// Per-session limits and pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Stop once this many items are collected
    pub items_per_session: usize,

    /// Upper bound on remote work units per session
    pub max_work_units_per_session: u32,

    /// Pause between work units, in seconds
    pub work_pause_min_secs: f64,
    pub work_pause_max_secs: f64,

    /// Delay before first remote contact, in seconds
    pub stagger_min_secs: f64,
    pub stagger_max_secs: f64,

    /// Consecutive non-fatal unit failures before the session gives up
    pub max_consecutive_failures: u32,
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum sessions running at once
    pub concurrency_limit: usize,
}

/// File locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory for per-job result files and the session log
    pub output_dir: PathBuf,

    /// Cookie file produced by a login step
    pub cookies_file: PathBuf,

    /// Append-only session log, relative to `output_dir`
    pub session_log: String,
}

/// HTTP driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Base URL targets are resolved against
    pub base_url: String,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// User agents rotated per session; empty means the built-in list
    pub user_agents: Vec<String>,
}

/// A named plain-text proxy source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxySource {
    pub name: String,
    pub url: String,
}

/// Proxy harvest and validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Plain-text lists, one `ip:port` per line
    pub text_sources: Vec<ProxySource>,

    /// JSON (or plain-text) proxy APIs
    pub api_sources: Vec<String>,

    /// Concurrent source fetches
    pub harvest_workers: usize,

    /// Timeout per source fetch, in seconds
    pub fetch_timeout_secs: u64,

    /// Connectivity probe (step 1)
    pub probe_url: String,

    /// Target-site probe (step 2)
    pub target_url: String,

    /// Concurrent proxy probes
    pub validate_workers: usize,

    /// Probes started per second across all workers
    pub probes_per_second: u32,

    pub basic_timeout_secs: u64,
    pub target_timeout_secs: u64,

    /// A 200 from the target counts only if the body mentions one of these
    pub target_markers: Vec<String>,

    /// Probe SOCKS candidates too instead of skipping them
    pub include_socks: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text or json)
    pub format: String,
}

// ============================================================================
// Defaults
// ============================================================================

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            proxies_file: PathBuf::from("working_proxies.json"),
            on_exhausted: ExhaustionPolicy::Abort,
            shuffle_seed: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            items_per_session: 50,
            max_work_units_per_session: 5,
            work_pause_min_secs: 2.0,
            work_pause_max_secs: 5.0,
            stagger_min_secs: 0.0,
            stagger_max_secs: 30.0,
            max_consecutive_failures: 3,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 5,
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("scrape_data"),
            cookies_file: PathBuf::from("cookies.json"),
            session_log: String::from("sessions.jsonl"),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: String::from("https://x.com"),
            request_timeout_secs: 30,
            user_agents: Vec::new(),
        }
    }
}

const GITHUB_RAW: &str = "https://raw.githubusercontent.com";

fn text_source(name: &str, url: String) -> ProxySource {
    ProxySource {
        name: name.to_string(),
        url,
    }
}

impl Default for HarvestConfig {
    fn default() -> Self {
        let gh = |name: &str, path: &str| text_source(name, format!("{GITHUB_RAW}/{path}"));

        Self {
            text_sources: vec![
                gh("TheSpeedX", "TheSpeedX/PROXY-List/master/http.txt"),
                gh("clarketm", "clarketm/proxy-list/master/proxy-list-raw.txt"),
                gh("jetkai_http", "jetkai/proxy-list/main/online-proxies/txt/proxies-http.txt"),
                gh("jetkai_https", "jetkai/proxy-list/main/online-proxies/txt/proxies-https.txt"),
                gh("jetkai_socks5", "jetkai/proxy-list/main/online-proxies/txt/proxies-socks5.txt"),
                gh("monosans_http", "monosans/proxy-list/main/proxies/http.txt"),
                gh("monosans_socks5", "monosans/proxy-list/main/proxies/socks5.txt"),
                gh("ErcinDedeoglu_http", "ErcinDedeoglu/proxies/main/proxies/http.txt"),
                gh("ErcinDedeoglu_https", "ErcinDedeoglu/proxies/main/proxies/https.txt"),
                text_source(
                    "vakhov_http",
                    String::from("https://vakhov.github.io/fresh-proxy-list/http.txt"),
                ),
                gh("Proxifly_http", "Proxifly/free-proxy-list/main/proxies/http/data.txt"),
            ],
            api_sources: vec![
                String::from("https://api.proxyscrape.com/v2/?request=displayproxies&protocol=http&timeout=10000&country=all&ssl=all&anonymity=all"),
                String::from("https://www.proxy-list.download/api/v1/get?type=https"),
                String::from("https://proxylist.geonode.com/api/proxy-list?limit=500&page=1&sort_by=lastChecked&sort_type=desc"),
            ],
            harvest_workers: 50,
            fetch_timeout_secs: 15,
            probe_url: String::from("http://httpbin.org/ip"),
            target_url: String::from("https://x.com"),
            validate_workers: 100,
            probes_per_second: 50,
            basic_timeout_secs: 10,
            target_timeout_secs: 15,
            target_markers: vec![
                String::from("x.com"),
                String::from("twitter"),
                String::from("login"),
            ],
            include_socks: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from `STICKY_*` environment variables over defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a TOML file; missing keys take defaults
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// File (when given) then environment, validated
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `STICKY_*` environment variables that are set
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("STICKY_PROXIES_FILE") {
            self.pool.proxies_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STICKY_ON_EXHAUSTED") {
            match v.to_lowercase().as_str() {
                "abort" => self.pool.on_exhausted = ExhaustionPolicy::Abort,
                "direct" => self.pool.on_exhausted = ExhaustionPolicy::Direct,
                other => tracing::warn!(value = other, "Ignoring unknown STICKY_ON_EXHAUSTED"),
            }
        }
        if let Some(v) = env_parse("STICKY_SHUFFLE_SEED") {
            self.pool.shuffle_seed = Some(v);
        }
        if let Some(v) = env_parse("STICKY_CONCURRENCY") {
            self.scheduler.concurrency_limit = v;
        }
        if let Some(v) = env_parse("STICKY_ITEMS_PER_SESSION") {
            self.session.items_per_session = v;
        }
        if let Some(v) = env_parse("STICKY_MAX_WORK_UNITS") {
            self.session.max_work_units_per_session = v;
        }
        if let Some(v) = env_parse("STICKY_STAGGER_MAX_SECS") {
            self.session.stagger_max_secs = v;
        }
        if let Ok(v) = std::env::var("STICKY_OUTPUT_DIR") {
            self.paths.output_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STICKY_COOKIES_FILE") {
            self.paths.cookies_file = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("STICKY_BASE_URL") {
            self.http.base_url = v;
        }
        if let Ok(v) = std::env::var("STICKY_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Ok(v) = std::env::var("STICKY_LOG_FORMAT") {
            self.logging.format = v;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.concurrency_limit == 0 {
            anyhow::bail!("concurrency_limit must be greater than 0");
        }

        let s = &self.session;
        if s.items_per_session == 0 {
            anyhow::bail!("items_per_session must be greater than 0");
        }
        if s.max_work_units_per_session == 0 {
            anyhow::bail!("max_work_units_per_session must be greater than 0");
        }
        if s.max_consecutive_failures == 0 {
            anyhow::bail!("max_consecutive_failures must be greater than 0");
        }
        for (name, min, max) in [
            ("work_pause", s.work_pause_min_secs, s.work_pause_max_secs),
            ("stagger", s.stagger_min_secs, s.stagger_max_secs),
        ] {
            if min < 0.0 || max < min {
                anyhow::bail!("{name} range must satisfy 0 <= min <= max (got {min}..{max})");
            }
        }

        url::Url::parse(&self.http.base_url)
            .with_context(|| format!("Invalid http.base_url: {}", self.http.base_url))?;

        if self.harvest.harvest_workers == 0 || self.harvest.validate_workers == 0 {
            anyhow::bail!("harvest worker counts must be greater than 0");
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            anyhow::bail!("logging.format must be 'text' or 'json'");
        }

        Ok(())
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.http.request_timeout_secs)
    }

    /// Full path of the session log
    #[must_use]
    pub fn session_log_path(&self) -> PathBuf {
        self.paths.output_dir.join(&self.paths.session_log)
    }
}

impl SessionConfig {
    /// No stagger, no pauses. Used by tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            work_pause_min_secs: 0.0,
            work_pause_max_secs: 0.0,
            stagger_min_secs: 0.0,
            stagger_max_secs: 0.0,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_concurrency() {
        let mut config = Config::default();
        config.scheduler.concurrency_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_inverted_stagger_rejected() {
        let mut config = Config::default();
        config.session.stagger_min_secs = 10.0;
        config.session.stagger_max_secs = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let config: Config = toml::from_str(
            r#"
            [scheduler]
            concurrency_limit = 2

            [pool]
            on_exhausted = "direct"
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.concurrency_limit, 2);
        assert_eq!(config.pool.on_exhausted, ExhaustionPolicy::Direct);
        assert_eq!(config.session.items_per_session, 50);
        assert_eq!(config.http.base_url, "https://x.com");
    }

    #[test]
    fn test_request_timeout_conversion() {
        let config = Config::default();
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(
            config.session_log_path(),
            PathBuf::from("scrape_data/sessions.jsonl")
        );
    }
}
