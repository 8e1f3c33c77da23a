//! Cookie credentials shared by every session
//!
//! The cookie file is a JSON array of browser cookie objects, as exported by
//! a login step:
//!
//! ```json
//! [{"name": "auth_token", "value": "…", "domain": ".x.com", "path": "/", "httpOnly": true, "secure": true}]
//! ```
//!
//! Sessions read it at start. When the remote hands out fresh cookies, only
//! those are merged into the current file contents, under the file's lock,
//! so concurrent sessions never undo each other's refreshes.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use super::guard::{resource_key, write_atomic, GuardError, SharedFileGuard};

/// Credential store failures
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error(transparent)]
    Guard(#[from] GuardError),

    #[error("Malformed cookie file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One browser cookie
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Unix timestamp; -1 or absent for session cookies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<f64>,
    #[serde(default, rename = "httpOnly")]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default, rename = "sameSite", skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    String::from("/")
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: default_path(),
            expires: None,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }

    /// Parse a `Set-Cookie` header value
    pub fn parse_set_cookie(header: &str) -> Option<Self> {
        let mut parts = header.split(';').map(str::trim);
        let (name, value) = parts.next()?.split_once('=')?;
        if name.is_empty() {
            return None;
        }

        let mut cookie = Self::new(name, value);
        for attr in parts {
            let (key, val) = attr.split_once('=').unwrap_or((attr, ""));
            match key.to_ascii_lowercase().as_str() {
                "domain" => cookie.domain = val.to_string(),
                "path" => cookie.path = val.to_string(),
                "secure" => cookie.secure = true,
                "httponly" => cookie.http_only = true,
                "samesite" => cookie.same_site = Some(val.to_string()),
                "max-age" => {
                    if let Ok(secs) = val.parse::<i64>() {
                        let now = chrono::Utc::now().timestamp();
                        cookie.expires = Some((now + secs) as f64);
                    }
                }
                _ => {}
            }
        }
        Some(cookie)
    }
}

/// The cookie jar a session presents to the remote
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials {
    pub cookies: Vec<Cookie>,
}

impl Credentials {
    pub fn new(cookies: Vec<Cookie>) -> Self {
        Self { cookies }
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.as_str())
    }

    /// `Cookie` request header value
    pub fn header_value(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Insert or replace a cookie (same name and domain). Returns whether
    /// anything changed.
    pub fn upsert(&mut self, cookie: Cookie) -> bool {
        match self
            .cookies
            .iter_mut()
            .find(|c| c.name == cookie.name && (cookie.domain.is_empty() || c.domain == cookie.domain))
        {
            Some(existing) if existing.value == cookie.value => false,
            Some(existing) => {
                existing.value = cookie.value;
                if cookie.expires.is_some() {
                    existing.expires = cookie.expires;
                }
                true
            }
            None => {
                self.cookies.push(cookie);
                true
            }
        }
    }
}

/// Reads and refreshes the shared cookie file
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    guard: Arc<SharedFileGuard>,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>, guard: Arc<SharedFileGuard>) -> Self {
        Self {
            path: path.into(),
            guard,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current credentials; `None` when the file does not exist
    pub fn load(&self) -> Result<Option<Credentials>, CredentialError> {
        match self.guard.read_file(&self.path)? {
            Some(content) => Ok(Some(serde_json::from_str(&content)?)),
            None => Ok(None),
        }
    }

    /// Replace the cookie file
    pub fn save(&self, credentials: &Credentials) -> Result<(), CredentialError> {
        let json = serde_json::to_vec_pretty(credentials)?;
        self.guard.write_file(&self.path, &json)?;
        Ok(())
    }

    /// Merge `changed` into the file as it is now
    ///
    /// The read, the upserts and the write happen under one hold of the
    /// file's lock. A missing file starts from an empty jar.
    pub fn refresh(&self, changed: &[Cookie]) -> Result<(), CredentialError> {
        if changed.is_empty() {
            return Ok(());
        }

        let merged = self
            .guard
            .with_exclusive_access(&resource_key(&self.path), || {
                let mut current = match fs::read_to_string(&self.path) {
                    Ok(content) => match serde_json::from_str::<Credentials>(&content) {
                        Ok(current) => current,
                        Err(e) => return Ok(Err(e)),
                    },
                    Err(e) if e.kind() == io::ErrorKind::NotFound => Credentials::default(),
                    Err(e) => return Err(e),
                };

                let mut updated = 0usize;
                for cookie in changed {
                    if current.upsert(cookie.clone()) {
                        updated += 1;
                    }
                }
                if updated > 0 {
                    let json = serde_json::to_vec_pretty(&current).map_err(io::Error::other)?;
                    write_atomic(&self.path, &json)?;
                }
                Ok(Ok(updated))
            })?;

        let updated = merged?;
        tracing::debug!(path = %self.path.display(), updated, "Credentials refreshed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_browser_export() {
        let json = r#"[
            {"name": "auth_token", "value": "abc", "domain": ".x.com", "path": "/",
             "expires": 1767225600.5, "httpOnly": true, "secure": true, "sameSite": "None"},
            {"name": "ct0", "value": "csrf"}
        ]"#;
        let creds: Credentials = serde_json::from_str(json).unwrap();

        assert_eq!(creds.cookies.len(), 2);
        assert!(creds.cookies[0].http_only);
        assert_eq!(creds.cookies[1].path, "/");
        assert_eq!(creds.get("ct0"), Some("csrf"));
        assert_eq!(creds.header_value(), "auth_token=abc; ct0=csrf");
    }

    #[test]
    fn test_set_cookie_parsing() {
        let cookie =
            Cookie::parse_set_cookie("ct0=new; Max-Age=3600; Path=/; Domain=.x.com; Secure")
                .unwrap();
        assert_eq!(cookie.name, "ct0");
        assert_eq!(cookie.value, "new");
        assert_eq!(cookie.domain, ".x.com");
        assert!(cookie.secure);
        assert!(cookie.expires.is_some());

        assert!(Cookie::parse_set_cookie("garbage").is_none());
    }

    #[test]
    fn test_upsert_reports_changes() {
        let mut creds = Credentials::new(vec![Cookie::new("ct0", "old")]);
        assert!(!creds.upsert(Cookie::new("ct0", "old")));
        assert!(creds.upsert(Cookie::new("ct0", "new")));
        assert!(creds.upsert(Cookie::new("guest_id", "g")));
        assert_eq!(creds.get("ct0"), Some("new"));
        assert_eq!(creds.cookies.len(), 2);
    }

    #[test]
    fn test_store_round_trip_through_guard() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(
            dir.path().join("cookies.json"),
            Arc::new(SharedFileGuard::new()),
        );

        assert!(store.load().unwrap().is_none());

        let creds = Credentials::new(vec![Cookie::new("auth_token", "t")]);
        store.save(&creds).unwrap();
        assert_eq!(store.load().unwrap(), Some(creds));
    }

    fn seeded_store(dir: &TempDir, guard: Arc<SharedFileGuard>) -> CredentialStore {
        let store = CredentialStore::new(dir.path().join("cookies.json"), guard);
        store
            .save(&Credentials::new(vec![
                Cookie::new("auth_token", "t"),
                Cookie::new("ct0", "old"),
            ]))
            .unwrap();
        store
    }

    #[test]
    fn test_interleaved_refreshes_keep_both() {
        let dir = TempDir::new().unwrap();
        let guard = Arc::new(SharedFileGuard::new());
        let a = seeded_store(&dir, Arc::clone(&guard));
        let b = CredentialStore::new(dir.path().join("cookies.json"), guard);

        // Both sessions loaded the same jar before either wrote back
        let seen_by_a = a.load().unwrap().unwrap();
        let seen_by_b = b.load().unwrap().unwrap();
        assert_eq!(seen_by_a, seen_by_b);

        a.refresh(&[Cookie::new("ct0", "fresh")]).unwrap();
        b.refresh(&[Cookie::new("guest_id", "g")]).unwrap();

        let merged = a.load().unwrap().unwrap();
        assert_eq!(merged.get("auth_token"), Some("t"));
        assert_eq!(merged.get("ct0"), Some("fresh"));
        assert_eq!(merged.get("guest_id"), Some("g"));
        assert_eq!(merged.cookies.len(), 3);
    }

    #[test]
    fn test_concurrent_refreshes_lose_nothing() {
        let dir = TempDir::new().unwrap();
        let guard = Arc::new(SharedFileGuard::new());
        let store = seeded_store(&dir, guard);

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .refresh(&[Cookie::new(format!("c{n}"), format!("v{n}"))])
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let merged = store.load().unwrap().unwrap();
        assert_eq!(merged.cookies.len(), 10);
        for n in 0..8 {
            assert_eq!(merged.get(&format!("c{n}")), Some(format!("v{n}").as_str()));
        }
    }

    #[test]
    fn test_refresh_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::new(
            dir.path().join("cookies.json"),
            Arc::new(SharedFileGuard::new()),
        );
        store.refresh(&[Cookie::new("ct0", "x")]).unwrap();
        assert_eq!(store.load().unwrap().unwrap().get("ct0"), Some("x"));
    }

    #[test]
    fn test_refresh_keeps_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = CredentialStore::new(&path, Arc::new(SharedFileGuard::new()));
        assert!(matches!(
            store.refresh(&[Cookie::new("ct0", "x")]),
            Err(CredentialError::Parse(_))
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{not json");
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cookies.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = CredentialStore::new(path, Arc::new(SharedFileGuard::new()));
        assert!(matches!(store.load(), Err(CredentialError::Parse(_))));
    }
}
