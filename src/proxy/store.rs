//! Proxy list file
//!
//! The list is a JSON array written by `proxies validate`, fastest first:
//!
//! ```json
//! [{"proxy": "http://1.2.3.4:8080", "source": "monosans_http", "speed": 0.84, "status": "success"}]
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::ProxyEndpoint;
use crate::utils::error::ProxyListError;

/// One entry of the list file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub proxy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Latency in seconds of the target-site probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(default)]
    pub working: bool,
    /// Validation status string (`success`, `redirect_ok`, ...)
    #[serde(default, alias = "twitter_status", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tested_at: Option<DateTime<Utc>>,
}

impl ProxyRecord {
    pub fn new(proxy: impl Into<String>) -> Self {
        Self {
            proxy: proxy.into(),
            source: None,
            speed: None,
            working: false,
            status: None,
            tested_at: None,
        }
    }

    /// Parse into an endpoint carrying the record's latency and source
    pub fn to_endpoint(&self) -> Result<ProxyEndpoint, String> {
        let mut endpoint = ProxyEndpoint::parse(&self.proxy)?;
        endpoint.latency_secs = self.speed;
        endpoint.source = self.source.clone();
        Ok(endpoint)
    }
}

impl From<&ProxyEndpoint> for ProxyRecord {
    fn from(endpoint: &ProxyEndpoint) -> Self {
        Self {
            proxy: endpoint.url.clone(),
            source: endpoint.source.clone(),
            speed: endpoint.latency_secs,
            working: endpoint.latency_secs.is_some(),
            status: None,
            tested_at: None,
        }
    }
}

/// Read the raw records of a list file
pub fn read_records(path: &Path) -> Result<Vec<ProxyRecord>, ProxyListError> {
    if !path.exists() {
        return Err(ProxyListError::NotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Load the endpoints of a list file in file order
///
/// Entries that do not parse as a proxy URL are skipped with a warning.
pub fn load_endpoints(path: &Path) -> Result<Vec<ProxyEndpoint>, ProxyListError> {
    let records = read_records(path)?;
    let total = records.len();

    let endpoints: Vec<ProxyEndpoint> = records
        .iter()
        .filter_map(|record| match record.to_endpoint() {
            Ok(endpoint) => Some(endpoint),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed proxy entry");
                None
            }
        })
        .collect();

    tracing::info!(
        path = %path.display(),
        loaded = endpoints.len(),
        skipped = total - endpoints.len(),
        "Loaded proxy list"
    );
    Ok(endpoints)
}

/// Serialize records to JSON text (pretty, two-space indent)
pub fn to_json(records: &[ProxyRecord]) -> Result<String, ProxyListError> {
    Ok(serde_json::to_string_pretty(records)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_skips_bad_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("proxies.json");
        std::fs::write(
            &path,
            r#"[
                {"proxy": "http://1.2.3.4:8080", "speed": 0.4, "source": "a"},
                {"proxy": "not a proxy at all"},
                {"proxy": "socks5://5.6.7.8:1080", "twitter_status": "success"}
            ]"#,
        )
        .unwrap();

        let endpoints = load_endpoints(&path).unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].latency_secs, Some(0.4));
        assert_eq!(endpoints[0].source.as_deref(), Some("a"));
        assert!(endpoints[1].protocol.is_socks());
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = load_endpoints(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, ProxyListError::NotFound(_)));
    }

    #[test]
    fn test_status_alias_and_output_name() {
        let record: ProxyRecord =
            serde_json::from_str(r#"{"proxy": "http://1.1.1.1:80", "twitter_status": "forbidden"}"#)
                .unwrap();
        assert_eq!(record.status.as_deref(), Some("forbidden"));

        let json = to_json(&[record]).unwrap();
        assert!(json.contains("\"status\": \"forbidden\""));
    }
}
