//! Sticky proxy pool with auto-refill
//!
//! Endpoints move between four places:
//!
//! ```text
//!            acquire()               release(reusable = true)
//!   ready ─────────────▶ in_use ─────────────────────────────▶ recycled
//!     ▲                    │                                      │
//!     │                    │ release(reusable = false)            │
//!     │                    ▼                                      │
//!     │                discarded                                  │
//!     └──────────── refill (shuffle) when ready is empty ◀────────┘
//! ```
//!
//! `ready + recycled + in_use + discarded` always equals the number of
//! distinct endpoints loaded. An endpoint is in exactly one place, so it can
//! never be handed to two sessions at once.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::models::ProxyEndpoint;

/// What the scheduler does when the pool has nothing to hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExhaustionPolicy {
    /// Stop starting sessions (an empty pool at start is a `ProxyExhausted` error)
    #[default]
    Abort,
    /// Start sessions without a proxy
    Direct,
}

/// Per-endpoint usage, summarised in the run report
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyUsage {
    pub sessions: u32,
    pub successes: u32,
    pub items: u64,
    pub elapsed_secs: f64,
    /// Latency from the validation pass, if any
    pub latency_secs: Option<f64>,
}

/// Point-in-time counts, consistent with each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub total_loaded: usize,
    pub ready: usize,
    pub recycled: usize,
    pub in_use: usize,
    pub discarded: usize,
    pub refills: u64,
}

impl PoolSnapshot {
    /// Endpoints not in use and not discarded
    pub fn available(&self) -> usize {
        self.ready + self.recycled
    }

    /// `ready + recycled + in_use + discarded == total_loaded`
    pub fn is_consistent(&self) -> bool {
        self.ready + self.recycled + self.in_use + self.discarded == self.total_loaded
    }
}

struct PoolState {
    ready: VecDeque<ProxyEndpoint>,
    recycled: Vec<ProxyEndpoint>,
    in_use: HashSet<String>,
    discarded: HashSet<String>,
    usage: HashMap<String, ProxyUsage>,
    refills: u64,
    rng: ChaCha8Rng,
}

/// Shared pool of proxy endpoints. Share it as `Arc<ProxyPool>`.
pub struct ProxyPool {
    state: Mutex<PoolState>,
    total_loaded: usize,
}

impl ProxyPool {
    /// Build a pool from endpoints. Duplicate URLs are dropped.
    ///
    /// The first cycle hands endpoints out in the given order, which for a
    /// stored list is latency order, fastest first. Only refills are
    /// shuffled; the latency order is not kept after the first cycle.
    pub fn new(endpoints: Vec<ProxyEndpoint>) -> Self {
        Self::build(endpoints, ChaCha8Rng::from_entropy())
    }

    /// Same as [`ProxyPool::new`] with a deterministic refill shuffle
    pub fn with_seed(endpoints: Vec<ProxyEndpoint>, seed: u64) -> Self {
        Self::build(endpoints, ChaCha8Rng::seed_from_u64(seed))
    }

    fn build(endpoints: Vec<ProxyEndpoint>, rng: ChaCha8Rng) -> Self {
        let mut seen = HashSet::new();
        let mut ready = VecDeque::with_capacity(endpoints.len());
        let mut usage = HashMap::new();

        for endpoint in endpoints {
            if !seen.insert(endpoint.url.clone()) {
                continue;
            }
            usage.insert(
                endpoint.url.clone(),
                ProxyUsage {
                    latency_secs: endpoint.latency_secs,
                    ..Default::default()
                },
            );
            ready.push_back(endpoint);
        }

        let total_loaded = ready.len();
        tracing::info!(total = total_loaded, "Proxy pool loaded");

        Self {
            state: Mutex::new(PoolState {
                ready,
                recycled: Vec::new(),
                in_use: HashSet::new(),
                discarded: HashSet::new(),
                usage,
                refills: 0,
                rng,
            }),
            total_loaded,
        }
    }

    /// An empty pool: every `acquire()` returns `None`
    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    // A panic while holding the lock leaves the state consistent (every
    // mutation is a single move between collections), so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take one endpoint for the exclusive use of a session
    ///
    /// When the ready queue is empty, every recycled endpoint is shuffled
    /// into a new cycle first. `None` means nothing is available: either the
    /// pool was loaded empty, or every endpoint is in use or discarded.
    pub fn acquire(&self) -> Option<ProxyEndpoint> {
        let mut state = self.lock();

        if state.ready.is_empty() && !state.recycled.is_empty() {
            let PoolState {
                recycled, rng, ready, ..
            } = &mut *state;
            recycled.shuffle(rng);
            ready.extend(recycled.drain(..));
            state.refills += 1;

            tracing::debug!(
                refills = state.refills,
                ready = state.ready.len(),
                "Proxy pool refilled"
            );
            crate::metrics::record_pool_refill();
        }

        let endpoint = state.ready.pop_front()?;
        state.in_use.insert(endpoint.url.clone());
        Some(endpoint)
    }

    /// Return an endpoint taken with [`ProxyPool::acquire`]
    ///
    /// Reusable endpoints go to the back of the pool and come round again in
    /// the next cycle; the rest are discarded for the lifetime of the pool.
    /// Releasing an endpoint that is not currently held is ignored.
    pub fn release(&self, endpoint: ProxyEndpoint, reusable: bool) {
        let mut state = self.lock();

        if !state.in_use.remove(&endpoint.url) {
            tracing::warn!(proxy = %endpoint, "Ignoring release of a proxy that is not held");
            return;
        }

        if reusable {
            state.recycled.push(endpoint);
        } else {
            tracing::info!(proxy = %endpoint, "Discarding proxy");
            state.discarded.insert(endpoint.url);
            crate::metrics::record_proxy_discarded();
        }
    }

    /// Record how a session went on an endpoint
    pub fn record(&self, endpoint: &ProxyEndpoint, success: bool, items: usize, elapsed: Duration) {
        let mut state = self.lock();
        if let Some(usage) = state.usage.get_mut(&endpoint.url) {
            usage.sessions += 1;
            if success {
                usage.successes += 1;
            }
            usage.items += items as u64;
            usage.elapsed_secs += elapsed.as_secs_f64();
        }
    }

    pub fn total_loaded(&self) -> usize {
        self.total_loaded
    }

    /// Endpoints that are neither in use nor discarded
    pub fn available(&self) -> usize {
        self.snapshot().available()
    }

    pub fn refills(&self) -> u64 {
        self.lock().refills
    }

    pub fn is_discarded(&self, endpoint: &ProxyEndpoint) -> bool {
        self.lock().discarded.contains(&endpoint.url)
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.lock();
        PoolSnapshot {
            total_loaded: self.total_loaded,
            ready: state.ready.len(),
            recycled: state.recycled.len(),
            in_use: state.in_use.len(),
            discarded: state.discarded.len(),
            refills: state.refills,
        }
    }

    /// Usage per endpoint URL
    pub fn usage(&self) -> HashMap<String, ProxyUsage> {
        self.lock().usage.clone()
    }

    /// One-line summary: `N proxies | ok/used sessions ok | items raw items`
    pub fn summary(&self) -> String {
        let state = self.lock();
        let used: Vec<&ProxyUsage> = state.usage.values().filter(|u| u.sessions > 0).collect();
        let ok = used.iter().filter(|u| u.successes > 0).count();
        let items: u64 = used.iter().map(|u| u.items).sum();

        format!(
            "{} proxies | {}/{} sessions ok | {} raw items | {} discarded | {} refills",
            self.total_loaded,
            ok,
            used.len(),
            items,
            state.discarded.len(),
            state.refills
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(n: usize) -> Vec<ProxyEndpoint> {
        (0..n)
            .map(|i| ProxyEndpoint::parse(&format!("http://10.0.0.{i}:8080")).unwrap())
            .collect()
    }

    #[test]
    fn test_empty_pool_always_none() {
        let pool = ProxyPool::empty();
        assert!(pool.acquire().is_none());
        assert!(pool.acquire().is_none());
        assert_eq!(pool.refills(), 0);
    }

    #[test]
    fn test_first_cycle_keeps_load_order() {
        let eps = endpoints(3);
        let pool = ProxyPool::with_seed(eps.clone(), 7);
        assert_eq!(pool.acquire().unwrap(), eps[0]);
        assert_eq!(pool.acquire().unwrap(), eps[1]);
        assert_eq!(pool.acquire().unwrap(), eps[2]);
        assert!(pool.acquire().is_none());
    }

    #[test]
    fn test_duplicates_dropped() {
        let mut eps = endpoints(2);
        eps.push(eps[0].clone());
        let pool = ProxyPool::new(eps);
        assert_eq!(pool.total_loaded(), 2);
    }

    #[test]
    fn test_refill_only_when_ready_empty() {
        let pool = ProxyPool::with_seed(endpoints(2), 1);
        let a = pool.acquire().unwrap();
        pool.release(a, true);
        assert_eq!(pool.refills(), 0);

        // ready still holds the second endpoint, no refill yet
        let b = pool.acquire().unwrap();
        assert_eq!(pool.refills(), 0);
        pool.release(b, true);

        // ready is empty now, recycled has both
        let _c = pool.acquire().unwrap();
        assert_eq!(pool.refills(), 1);
        let snap = pool.snapshot();
        assert_eq!(snap.ready, 1);
        assert_eq!(snap.in_use, 1);
        assert!(snap.is_consistent());
    }

    #[test]
    fn test_refill_excludes_discarded_and_in_use() {
        let pool = ProxyPool::with_seed(endpoints(4), 3);
        let held: Vec<_> = (0..4).map(|_| pool.acquire().unwrap()).collect();
        let mut held = held.into_iter();

        pool.release(held.next().unwrap(), false);
        pool.release(held.next().unwrap(), true);
        pool.release(held.next().unwrap(), true);
        let still_held = held.next().unwrap();

        let got = pool.acquire().unwrap();
        assert_ne!(got, still_held);
        let snap = pool.snapshot();
        assert_eq!(snap.refills, 1);
        // after refill: total - discarded - in_use (before this acquire) == 2
        assert_eq!(snap.ready + 1, 4 - 1 - 1);
        assert!(snap.is_consistent());
    }

    #[test]
    fn test_all_discarded_returns_none() {
        let pool = ProxyPool::new(endpoints(2));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        pool.release(a.clone(), false);
        pool.release(b, false);

        assert!(pool.acquire().is_none());
        assert!(pool.is_discarded(&a));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_release_unknown_is_ignored() {
        let pool = ProxyPool::new(endpoints(1));
        let stranger = ProxyEndpoint::parse("http://192.168.0.1:3128").unwrap();
        pool.release(stranger, true);
        assert!(pool.snapshot().is_consistent());

        let a = pool.acquire().unwrap();
        pool.release(a.clone(), true);
        // double release must not duplicate the endpoint
        pool.release(a, true);
        assert_eq!(pool.snapshot().recycled, 1);
    }

    #[test]
    fn test_usage_summary() {
        let pool = ProxyPool::new(endpoints(2));
        let a = pool.acquire().unwrap();
        pool.record(&a, true, 12, Duration::from_secs(3));
        pool.release(a, true);

        let summary = pool.summary();
        assert!(summary.starts_with("2 proxies | 1/1 sessions ok | 12 raw items"));
    }
}
