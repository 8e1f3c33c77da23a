//! One sticky session, start to finish
//!
//! A [`SessionRunner`] owns one proxy for its whole life and walks the
//! [`SessionState`] machine:
//!
//! 1. **Starting**: load the shared credentials (through the guard)
//! 2. **Staggering**: random delay before first contact; the breaker is
//!    checked before and after
//! 3. **Active**: up to `max_work_units_per_session` units, each preceded by
//!    a breaker check and followed by a random pause
//! 4. **Draining**: persist items, merge refreshed cookies into the shared
//!    file, release the proxy, record usage
//! 5. **Finalized**: the [`SessionResult`] is produced
//!
//! [`SessionRunner::run`] never fails. Every path, including a panic in the
//! driver or extractor, ends in a `SessionResult` and a released proxy. The
//! tally lives outside the unwinding future, so items gathered before a
//! panic are still persisted and logged.

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use super::driver::{DriverFailure, RemoteDriver, RemoteSession};
use super::state::{DrainReason, SessionState};
use crate::breaker::RateLimitBreaker;
use crate::config::SessionConfig;
use crate::extractor::Extractor;
use crate::metrics;
use crate::models::{Item, ProxyEndpoint, SessionJob, SessionOutcome, SessionResult};
use crate::proxy::ProxyPool;
use crate::storage::{Cookie, CredentialStore, Credentials, ResultWriter};
use crate::utils::random_between;

/// Everything sessions share. Built once per run, handed out as `Arc`.
pub struct SessionContext {
    pub pool: Arc<ProxyPool>,
    pub breaker: Arc<RateLimitBreaker>,
    pub driver: Arc<dyn RemoteDriver>,
    pub extractor: Arc<dyn Extractor>,
    /// Shared cookie file; `None` runs anonymously
    pub credentials: Option<CredentialStore>,
    /// Result files and session log; `None` keeps results in memory only
    pub writer: Option<ResultWriter>,
    pub config: SessionConfig,
}

/// Returns the proxy to the pool exactly once
///
/// If the runner unwinds before releasing, the drop releases the proxy as
/// not reusable.
struct ProxyLease {
    pool: Arc<ProxyPool>,
    endpoint: Option<ProxyEndpoint>,
}

impl ProxyLease {
    fn release(&mut self, reusable: bool) {
        if let Some(endpoint) = self.endpoint.take() {
            self.pool.release(endpoint, reusable);
        }
    }
}

impl Drop for ProxyLease {
    fn drop(&mut self) {
        if let Some(endpoint) = self.endpoint.take() {
            tracing::warn!(proxy = %endpoint, "Session ended abnormally, discarding proxy");
            self.pool.release(endpoint, false);
        }
    }
}

/// What the session gathered so far
#[derive(Default)]
struct Tally {
    items: Vec<Item>,
    profile: Option<Item>,
    work_units: u32,
    failed_units: u32,
    consecutive_failures: u32,
    extraction_failures: u32,
    last_error: Option<String>,
    /// Set once draining has written the items
    persisted: bool,
}

impl Tally {
    fn keep_profile(&mut self, profile: Item) {
        let followers = |p: &Item| p.get("followers").and_then(|v| v.as_u64()).unwrap_or(0);
        let better = self
            .profile
            .as_ref()
            .map_or(true, |current| followers(&profile) >= followers(current));
        if better {
            self.profile = Some(profile);
        }
    }
}

/// Runs one job through one proxy
pub struct SessionRunner {
    id: u64,
    job: SessionJob,
    proxy: Option<ProxyEndpoint>,
    ctx: Arc<SessionContext>,
    state: SessionState,
}

impl SessionRunner {
    /// `proxy` must already be acquired from `ctx.pool`; `None` runs direct
    pub fn new(
        id: u64,
        job: SessionJob,
        proxy: Option<ProxyEndpoint>,
        ctx: Arc<SessionContext>,
    ) -> Self {
        Self {
            id,
            job,
            proxy,
            ctx,
            state: SessionState::Pending,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn enter(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal session transition {} -> {}",
            self.state,
            next
        );
        tracing::debug!(session = self.id, from = %self.state, to = %next, "Session state");
        self.state = next;
    }

    /// Run to completion and produce the result
    ///
    /// A panic anywhere inside is caught and reported as `stopped_error`.
    pub async fn run(self) -> SessionResult {
        let id = self.id;
        let job = self.job.clone();
        let ctx = Arc::clone(&self.ctx);
        let proxy = self.proxy.as_ref().map(ProxyEndpoint::redacted);
        let started = Instant::now();
        let mut tally = Tally::default();

        let finished = AssertUnwindSafe(self.run_inner(started, &mut tally))
            .catch_unwind()
            .await;
        let panic = match finished {
            Ok(result) => return result,
            Err(panic) => panic,
        };

        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(
            session = id,
            error = %message,
            items = tally.items.len(),
            "Session panicked"
        );

        let persisted_to = if tally.persisted {
            None
        } else {
            persist(&ctx, id, &job, &tally)
        };
        let elapsed = started.elapsed();
        let result = SessionResult {
            session_id: id,
            job,
            proxy,
            outcome: SessionOutcome::StoppedError,
            items: std::mem::take(&mut tally.items),
            work_units: tally.work_units,
            extraction_failures: tally.extraction_failures,
            profile: tally.profile.take(),
            error: Some(format!("panic: {message}")),
            elapsed,
            finished_at: Utc::now(),
            persisted_to,
        };
        append_log(&ctx, &result);
        metrics::record_session_finished(
            result.outcome.as_str(),
            result.item_count(),
            result.extraction_failures,
            elapsed.as_secs_f64(),
        );
        result
    }

    async fn run_inner(mut self, started: Instant, tally: &mut Tally) -> SessionResult {
        metrics::record_session_started();
        let ctx = Arc::clone(&self.ctx);
        let mut lease = ProxyLease {
            pool: Arc::clone(&ctx.pool),
            endpoint: self.proxy.clone(),
        };
        let proxy_label = self
            .proxy
            .as_ref()
            .map(ProxyEndpoint::redacted)
            .unwrap_or_else(|| "direct".to_string());

        tracing::info!(
            session = self.id,
            job = %self.job.id,
            proxy = %proxy_label,
            "Session starting"
        );

        // Starting
        self.enter(SessionState::Starting);
        let credentials = self.load_credentials();

        let mut remote: Option<Box<dyn RemoteSession>> = None;

        // Staggering
        self.enter(SessionState::Staggering);
        let reason = match self.stagger().await {
            Some(reason) => reason,
            None => match ctx.driver.open(self.proxy.as_ref(), credentials.as_ref()).await {
                Ok(session) => {
                    self.enter(SessionState::Active);
                    let session = remote.insert(session);
                    self.work(session.as_mut(), tally).await
                }
                Err(failure) => {
                    tracing::warn!(session = self.id, error = %failure, "Could not open remote session");
                    let reason = self.drain_reason_for(&failure);
                    tally.last_error = Some(failure.to_string());
                    match reason {
                        DrainReason::RateLimited | DrainReason::ProxyFailure => reason,
                        _ => DrainReason::OpenFailed,
                    }
                }
            },
        };

        // Draining
        self.enter(SessionState::Draining);
        let outcome = outcome_for(&reason, tally);
        let refreshed = match remote.as_mut() {
            Some(session) => {
                let refreshed = session.refreshed_cookies();
                session.close().await;
                refreshed
            }
            None => Vec::new(),
        };

        let persisted_to = persist(&ctx, self.id, &self.job, tally);
        tally.persisted = true;
        self.refresh_credentials(&refreshed);

        let elapsed = started.elapsed();
        if let Some(endpoint) = &self.proxy {
            ctx.pool.record(
                endpoint,
                outcome == SessionOutcome::Completed,
                tally.items.len(),
                elapsed,
            );
        }
        lease.release(outcome.proxy_reusable());

        // Finalized
        self.enter(SessionState::Finalized);
        let result = SessionResult {
            session_id: self.id,
            job: self.job.clone(),
            proxy: self.proxy.as_ref().map(ProxyEndpoint::redacted),
            outcome,
            work_units: tally.work_units,
            extraction_failures: tally.extraction_failures,
            profile: tally.profile.take(),
            error: tally.last_error.take(),
            items: std::mem::take(&mut tally.items),
            elapsed,
            finished_at: Utc::now(),
            persisted_to,
        };
        append_log(&ctx, &result);

        metrics::record_session_finished(
            outcome.as_str(),
            result.item_count(),
            result.extraction_failures,
            elapsed.as_secs_f64(),
        );
        tracing::info!(
            session = self.id,
            job = %self.job.id,
            proxy = %proxy_label,
            outcome = %outcome,
            reason = reason.as_str(),
            items = result.item_count(),
            units = result.work_units,
            elapsed_secs = elapsed.as_secs_f64(),
            "Session finished"
        );

        result
    }

    fn load_credentials(&self) -> Option<Credentials> {
        let store = self.ctx.credentials.as_ref()?;
        match store.load() {
            Ok(Some(credentials)) => Some(credentials),
            Ok(None) => {
                tracing::warn!(
                    session = self.id,
                    path = %store.path().display(),
                    "No credentials file, running anonymously"
                );
                None
            }
            Err(e) => {
                tracing::warn!(session = self.id, error = %e, "Could not load credentials");
                None
            }
        }
    }

    /// Merge only the cookies this session saw change
    fn refresh_credentials(&self, changed: &[Cookie]) {
        if changed.is_empty() {
            return;
        }
        if let Some(store) = &self.ctx.credentials {
            if let Err(e) = store.refresh(changed) {
                tracing::error!(session = self.id, error = %e, "Failed to refresh credentials");
            }
        }
    }

    /// `Some(reason)` if the session must drain instead of starting work
    async fn stagger(&self) -> Option<DrainReason> {
        if self.ctx.breaker.is_tripped() {
            return Some(DrainReason::RateLimited);
        }

        let delay = random_between(self.ctx.config.stagger_min_secs, self.ctx.config.stagger_max_secs);
        if !delay.is_zero() {
            tracing::debug!(session = self.id, delay_secs = delay.as_secs_f64(), "Staggering");
            tokio::time::sleep(delay).await;
        }

        self.ctx
            .breaker
            .is_tripped()
            .then_some(DrainReason::RateLimited)
    }

    async fn work(&self, session: &mut dyn RemoteSession, tally: &mut Tally) -> DrainReason {
        let config = &self.ctx.config;

        for unit in 0..config.max_work_units_per_session {
            if self.ctx.breaker.is_tripped() {
                return DrainReason::RateLimited;
            }
            if tally.items.len() >= config.items_per_session {
                return DrainReason::ItemCap;
            }
            if !session.has_more() {
                return DrainReason::WorkDone;
            }

            tally.work_units += 1;
            match session.step(&self.job.target, unit).await {
                Ok(raw) => {
                    tally.consecutive_failures = 0;
                    let extraction = self.ctx.extractor.extract(&raw);
                    tally.extraction_failures += extraction.failure_count();
                    for failure in &extraction.failures {
                        tracing::debug!(session = self.id, unit, error = %failure, "Extraction failure");
                    }
                    if let Some(profile) = extraction.profile {
                        tally.keep_profile(profile);
                    }
                    tracing::debug!(
                        session = self.id,
                        unit,
                        items = extraction.items.len(),
                        "Work unit done"
                    );
                    tally.items.extend(extraction.items);
                }
                Err(failure) => {
                    tally.failed_units += 1;
                    tally.consecutive_failures += 1;
                    tally.last_error = Some(failure.to_string());
                    tracing::warn!(session = self.id, unit, error = %failure, "Work unit failed");

                    match self.drain_reason_for(&failure) {
                        DrainReason::WorkDone => {}
                        reason => return reason,
                    }
                    if tally.consecutive_failures >= config.max_consecutive_failures.max(1) {
                        return DrainReason::TooManyFailures(tally.consecutive_failures);
                    }
                }
            }

            let last_unit = unit + 1 >= config.max_work_units_per_session;
            if !last_unit && tally.items.len() < config.items_per_session {
                self.pause().await;
            }
        }

        DrainReason::WorkDone
    }

    /// Side effects of a failure; `WorkDone` means "keep going"
    fn drain_reason_for(&self, failure: &DriverFailure) -> DrainReason {
        match failure {
            DriverFailure::Throttled(reason) => {
                self.ctx.breaker.trip(reason.clone());
                DrainReason::RateLimited
            }
            f if f.is_proxy_fatal() => DrainReason::ProxyFailure,
            _ => DrainReason::WorkDone,
        }
    }

    async fn pause(&self) {
        let config = &self.ctx.config;
        let pause = random_between(config.work_pause_min_secs, config.work_pause_max_secs);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
}

/// Write the profile and the items; the items' path when they were written
fn persist(ctx: &SessionContext, session: u64, job: &SessionJob, tally: &Tally) -> Option<PathBuf> {
    let writer = ctx.writer.as_ref()?;

    if let Some(profile) = &tally.profile {
        let username = profile
            .get("username")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        if let Err(e) = writer.persist_profile(username, profile) {
            tracing::error!(session, error = %e, "Failed to save profile");
        }
    }

    if tally.items.is_empty() {
        return None;
    }
    match writer.persist_items(job, &tally.items) {
        Ok(path) => Some(path),
        Err(e) => {
            tracing::error!(session, error = %e, "Failed to persist items");
            None
        }
    }
}

fn append_log(ctx: &SessionContext, result: &SessionResult) {
    if let Some(writer) = &ctx.writer {
        if let Err(e) = writer.append_session_log(result) {
            tracing::error!(session = result.session_id, error = %e, "Failed to append session log");
        }
    }
}

/// Map how the session drained to its reported outcome
fn outcome_for(reason: &DrainReason, tally: &Tally) -> SessionOutcome {
    match reason {
        DrainReason::ProxyFailure => SessionOutcome::ProxyFailed,
        DrainReason::RateLimited => SessionOutcome::StoppedRateLimited,
        DrainReason::TooManyFailures(_) | DrainReason::OpenFailed => SessionOutcome::StoppedError,
        DrainReason::WorkDone | DrainReason::ItemCap => {
            if tally.work_units > 0 && tally.failed_units == tally.work_units {
                SessionOutcome::StoppedError
            } else {
                SessionOutcome::Completed
            }
        }
    }
}
