//! Common test utilities

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

use stickyscrape::breaker::RateLimitBreaker;
use stickyscrape::config::SessionConfig;
use stickyscrape::extractor::TimelineExtractor;
use stickyscrape::models::{JobTarget, ProxyEndpoint, SessionJob};
use stickyscrape::proxy::ProxyPool;
use stickyscrape::session::{DriverFailure, RawResponse, RemoteDriver, RemoteSession, SessionContext};
use stickyscrape::storage::Credentials;

pub const BASE_URL: &str = "https://x.com";

/// One timeline tweet as the remote nests it
pub fn tweet_node(id: u64, screen_name: &str) -> Value {
    json!({
        "rest_id": id.to_string(),
        "core": {"user_results": {"result": {"legacy": {
            "screen_name": screen_name,
            "name": screen_name.to_uppercase(),
            "followers_count": 10
        }}}},
        "legacy": {
            "full_text": format!("tweet number {id} &amp; more"),
            "created_at": "Wed Oct 10 20:19:24 +0000 2018",
            "favorite_count": 1
        }
    })
}

/// A page holding the given tweet ids
pub fn timeline_page(ids: &[u64]) -> RawResponse {
    let entries: Vec<Value> = ids
        .iter()
        .map(|id| json!({"content": {"itemContent": {"tweet_results": {"result": tweet_node(*id, "alice")}}}}))
        .collect();
    RawResponse {
        status: 200,
        url: format!("{BASE_URL}/search"),
        body: json!({"data": {"instructions": [{"entries": entries}]}}).to_string(),
        set_cookies: Vec::new(),
    }
}

pub fn endpoints(n: usize) -> Vec<ProxyEndpoint> {
    (0..n)
        .map(|i| ProxyEndpoint::parse(&format!("http://10.0.0.{}:8080", i + 1)).unwrap())
        .collect()
}

pub fn search_jobs(n: usize) -> Vec<SessionJob> {
    let target = JobTarget::Search {
        query: "rust".into(),
        sort: Default::default(),
    };
    SessionJob::fan_out(&target, n)
}

type StepFn = dyn Fn(u64, u32) -> Result<RawResponse, DriverFailure> + Send + Sync;

/// Driver whose every step is answered by a closure of (session number, unit)
///
/// Tracks how many sessions are open at once.
pub struct MockDriver {
    step: Arc<StepFn>,
    delay: Duration,
    barrier: Option<(Arc<Barrier>, u32)>,
    opens: AtomicU64,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl MockDriver {
    pub fn new<F>(step: F) -> Self
    where
        F: Fn(u64, u32) -> Result<RawResponse, DriverFailure> + Send + Sync + 'static,
    {
        Self {
            step: Arc::new(step),
            delay: Duration::ZERO,
            barrier: None,
            opens: AtomicU64::new(0),
            active: Arc::new(AtomicUsize::new(0)),
            max_active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Sleep this long inside every step
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Every session waits on `barrier` before performing `unit`
    pub fn with_barrier(mut self, barrier: Arc<Barrier>, unit: u32) -> Self {
        self.barrier = Some((barrier, unit));
        self
    }

    pub fn opens(&self) -> u64 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

struct MockSession {
    number: u64,
    step: Arc<StepFn>,
    delay: Duration,
    barrier: Option<(Arc<Barrier>, u32)>,
    active: Arc<AtomicUsize>,
}

#[async_trait]
impl RemoteDriver for MockDriver {
    async fn open(
        &self,
        _proxy: Option<&ProxyEndpoint>,
        _credentials: Option<&Credentials>,
    ) -> Result<Box<dyn RemoteSession>, DriverFailure> {
        let number = self.opens.fetch_add(1, Ordering::SeqCst) + 1;
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(MockSession {
            number,
            step: Arc::clone(&self.step),
            delay: self.delay,
            barrier: self.barrier.clone(),
            active: Arc::clone(&self.active),
        }))
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn step(&mut self, _target: &JobTarget, unit: u32) -> Result<RawResponse, DriverFailure> {
        if let Some((barrier, at)) = &self.barrier {
            if *at == unit {
                barrier.wait().await;
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.step)(self.number, unit)
    }

    async fn close(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory context: no cookie file, no result files
pub fn context(pool: ProxyPool, driver: Arc<MockDriver>, config: SessionConfig) -> Arc<SessionContext> {
    Arc::new(SessionContext {
        pool: Arc::new(pool),
        breaker: Arc::new(RateLimitBreaker::new()),
        driver,
        extractor: Arc::new(TimelineExtractor::new(BASE_URL)),
        credentials: None,
        writer: None,
        config,
    })
}
