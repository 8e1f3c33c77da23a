//! stickyscrape - sticky-session scrape orchestrator
//!
//! Runs many scrape sessions in parallel, each bound to one proxy for its
//! whole life, over a self-refilling proxy pool. A process-wide breaker stops
//! everything the moment the remote starts throttling, and every file more
//! than one session writes goes through a named lock.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and settings
//! - [`models`] - Proxy endpoints, jobs, targets and session results
//! - [`proxy`] - Sticky proxy pool, list file, harvest and validation
//! - [`breaker`] - Process-wide rate-limit breaker
//! - [`storage`] - Shared file guard, credential store, result files
//! - [`session`] - Session state machine and remote drivers
//! - [`extractor`] - Raw responses to items
//! - [`scheduler`] - Concurrency ceiling, run report, result merging
//! - [`metrics`] - Prometheus metrics
//! - [`utils`] - Common utilities and helpers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stickyscrape::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let guard = Arc::new(SharedFileGuard::new());
//!     let ctx = Arc::new(SessionContext {
//!         pool: Arc::new(ProxyPool::from_config(&config.pool)?),
//!         breaker: Arc::new(RateLimitBreaker::new()),
//!         driver: Arc::new(HttpDriver::new(config.http.clone())),
//!         extractor: Arc::new(TimelineExtractor::new(config.http.base_url.clone())),
//!         credentials: Some(CredentialStore::new(&config.paths.cookies_file, Arc::clone(&guard))),
//!         writer: Some(ResultWriter::new(&config.paths.output_dir, &config.paths.session_log, guard)),
//!         config: config.session.clone(),
//!     });
//!
//!     let target = JobTarget::Search { query: "rust".into(), sort: SearchSort::Latest };
//!     let report = Scheduler::new(ctx)
//!         .run(SessionJob::fan_out(&target, 5), config.scheduler.concurrency_limit)
//!         .await?;
//!     println!("{report}");
//!     Ok(())
//! }
//! ```

pub mod breaker;
pub mod config;
pub mod error;
pub mod extractor;
pub mod metrics;
pub mod models;
pub mod proxy;
pub mod scheduler;
pub mod session;
pub mod storage;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::breaker::{RateLimitBreaker, TripReason};
    pub use crate::config::Config;
    pub use crate::error::{Error, ErrorCategory, Result, StickyErrorTrait};
    pub use crate::extractor::{Extractor, TimelineExtractor};
    pub use crate::models::{
        JobTarget, ProxyEndpoint, SearchSort, SessionJob, SessionOutcome, SessionResult,
    };
    pub use crate::proxy::{ExhaustionPolicy, ProxyPool};
    pub use crate::scheduler::{RunReport, Scheduler};
    pub use crate::session::{HttpDriver, SessionContext, SessionRunner};
    pub use crate::storage::{CredentialStore, ResultWriter, SharedFileGuard};
}

// Direct re-exports for convenience
pub use error::{Error, Result};
pub use models::{JobTarget, SessionJob, SessionOutcome, SessionResult};
