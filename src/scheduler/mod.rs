//! Session scheduling
//!
//! The [`Scheduler`] turns a list of [`SessionJob`]s into sticky sessions,
//! keeping a fixed number in flight and handing each new one a fresh proxy.
//!
//! # Architecture
//!
//! ```text
//!   pending jobs ──► ┌─────────────┐  acquire   ┌───────────┐
//!                    │  Scheduler  │ ─────────► │ ProxyPool │
//!                    │  (JoinSet,  │ ◄───────── │           │
//!                    │   ceiling)  │  release   └───────────┘
//!                    └──────┬──────┘                 ▲
//!              spawn        │  join_next             │ release
//!          ┌────────────────┼────────────────┐       │
//!          ▼                ▼                ▼       │
//!   ┌─────────────┐  ┌─────────────┐  ┌─────────────┐│
//!   │SessionRunner│  │SessionRunner│  │SessionRunner├┘
//!   └──────┬──────┘  └──────┬──────┘  └──────┬──────┘
//!          └──── RateLimitBreaker / SharedFileGuard ───┘
//! ```
//!
//! # Stopping
//!
//! The scheduler only ever stops *starting* sessions; it never cancels one.
//! New starts stop when:
//!
//! - the breaker has tripped (remaining jobs are reported as skipped)
//! - the pool has nothing left and the policy is `abort`
//! - shutdown was requested (Ctrl-C from the CLI)
//!
//! In every case the sessions already running drain to `Finalized` and
//! their results are part of the report. A session whose task dies without
//! producing a result is reported as `stopped_error`.
//!
//! # Modules
//!
//! - [`error`] - scheduler errors
//! - [`merge`] - merging fanned-out results
//! - [`report`] - the run report

pub mod error;
pub mod merge;
pub mod report;

pub use error::{SchedulerError, SchedulerResult};
pub use merge::{best_profile, merge_items, merge_results};
pub use report::RunReport;

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::metrics;
use crate::models::{ProxyEndpoint, SessionJob, SessionOutcome, SessionResult};
use crate::proxy::ExhaustionPolicy;
use crate::session::{SessionContext, SessionRunner};

/// Runs jobs as sticky sessions under a concurrency ceiling
pub struct Scheduler {
    ctx: Arc<SessionContext>,
    policy: ExhaustionPolicy,
    results_tx: Option<mpsc::UnboundedSender<SessionResult>>,
}

impl Scheduler {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            ctx,
            policy: ExhaustionPolicy::default(),
            results_tx: None,
        }
    }

    /// What to do when the pool has nothing to hand out
    pub fn with_policy(mut self, policy: ExhaustionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Stream each result as its session finalizes
    pub fn with_result_sender(mut self, tx: mpsc::UnboundedSender<SessionResult>) -> Self {
        self.results_tx = Some(tx);
        self
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    /// Run every job, at most `concurrency_limit` at a time
    pub async fn run(
        &self,
        jobs: Vec<SessionJob>,
        concurrency_limit: usize,
    ) -> SchedulerResult<RunReport> {
        self.run_until(jobs, concurrency_limit, std::future::pending())
            .await
    }

    /// Like [`run`](Self::run), draining early on Ctrl-C
    pub async fn run_until_ctrl_c(
        &self,
        jobs: Vec<SessionJob>,
        concurrency_limit: usize,
    ) -> SchedulerResult<RunReport> {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };
        self.run_until(jobs, concurrency_limit, ctrl_c).await
    }

    /// Run every job; when `shutdown` completes, stop starting new sessions
    /// and drain the running ones
    ///
    /// # Errors
    ///
    /// - `InvalidConcurrency` if `concurrency_limit` is 0
    /// - `ProxyExhausted` if the pool is empty at start under the `abort`
    ///   policy
    pub async fn run_until<F>(
        &self,
        jobs: Vec<SessionJob>,
        concurrency_limit: usize,
        shutdown: F,
    ) -> SchedulerResult<RunReport>
    where
        F: Future<Output = ()>,
    {
        if concurrency_limit == 0 {
            return Err(SchedulerError::InvalidConcurrency {
                limit: concurrency_limit,
            });
        }

        let pool = &self.ctx.pool;
        let breaker = &self.ctx.breaker;
        let started = Instant::now();
        let mut report = RunReport::new();
        let mut pending: VecDeque<SessionJob> = jobs.into();

        let pool_ceiling = match self.policy {
            ExhaustionPolicy::Abort => {
                let available = pool.available();
                if available == 0 && !pending.is_empty() {
                    tracing::error!(jobs = pending.len(), "No proxies available");
                    return Err(SchedulerError::proxy_exhausted(pending.len()));
                }
                available
            }
            ExhaustionPolicy::Direct => concurrency_limit,
        };
        let ceiling = concurrency_limit.min(pool_ceiling).min(pending.len());

        tracing::info!(
            run_id = %report.run_id,
            jobs = pending.len(),
            ceiling,
            proxies = pool.total_loaded(),
            policy = ?self.policy,
            "Run starting"
        );

        let mut active: JoinSet<SessionResult> = JoinSet::new();
        let mut in_flight = InFlight::default();
        let mut next_id: u64 = 0;
        let mut stop_starting = false;
        let mut interrupted = false;
        tokio::pin!(shutdown);

        loop {
            while !stop_starting && active.len() < ceiling && !pending.is_empty() {
                if breaker.is_tripped() {
                    tracing::warn!(
                        remaining = pending.len(),
                        "Breaker tripped, no new sessions will start"
                    );
                    stop_starting = true;
                    break;
                }

                let proxy = match pool.acquire() {
                    Some(endpoint) => Some(endpoint),
                    None => match self.policy {
                        ExhaustionPolicy::Direct => {
                            tracing::debug!("Pool empty, starting session without proxy");
                            None
                        }
                        ExhaustionPolicy::Abort => {
                            // A running session may still hand its proxy back
                            if active.is_empty() {
                                tracing::warn!(
                                    remaining = pending.len(),
                                    "Proxy pool exhausted, no new sessions will start"
                                );
                                report.exhausted = true;
                                stop_starting = true;
                            }
                            break;
                        }
                    },
                };

                let Some(job) = pending.pop_front() else {
                    if let Some(endpoint) = proxy {
                        pool.release(endpoint, true);
                    }
                    break;
                };

                next_id += 1;
                let span = tracing::info_span!("session", id = next_id, job = %job.id);
                in_flight.started(next_id, &job, proxy.as_ref());
                let runner = SessionRunner::new(next_id, job, proxy, Arc::clone(&self.ctx));
                active.spawn(runner.run().instrument(span));
                report.max_active = report.max_active.max(active.len());
            }

            if active.is_empty() {
                break;
            }

            tokio::select! {
                _ = &mut shutdown, if !interrupted => {
                    tracing::warn!(active = active.len(), "Shutdown requested, draining active sessions");
                    interrupted = true;
                    stop_starting = true;
                }
                joined = active.join_next() => match joined {
                    Some(joined) => {
                        if let Some(result) = in_flight.joined(joined) {
                            self.publish(&mut report, result);
                        }
                    }
                    None => break,
                },
            }
        }

        // Every join has happened; what is left never produced a result
        for result in in_flight.into_lost() {
            self.publish(&mut report, result);
        }

        report.skipped = pending.into_iter().collect();
        report.rate_limited = breaker.is_tripped();
        report.interrupted = interrupted;
        report.refills = pool.refills();
        report.pool_summary = pool.summary();
        report.wall_time_secs = started.elapsed().as_secs_f64();

        tracing::info!(
            run_id = %report.run_id,
            sessions = report.sessions_run(),
            ok = report.sessions_ok(),
            items = report.total_items(),
            skipped = report.skipped.len(),
            rate_limited = report.rate_limited,
            exhausted = report.exhausted,
            "Run finished"
        );

        Ok(report)
    }

    fn publish(&self, report: &mut RunReport, result: SessionResult) {
        if let Some(tx) = &self.results_tx {
            let _ = tx.send(result.clone());
        }
        report.results.push(result);
    }
}

/// Spawned sessions that have not reported yet
#[derive(Default)]
struct InFlight {
    sessions: HashMap<u64, Started>,
    failure: Option<String>,
}

struct Started {
    job: SessionJob,
    proxy: Option<String>,
    at: Instant,
}

impl InFlight {
    fn started(&mut self, id: u64, job: &SessionJob, proxy: Option<&ProxyEndpoint>) {
        self.sessions.insert(
            id,
            Started {
                job: job.clone(),
                proxy: proxy.map(ProxyEndpoint::redacted),
                at: Instant::now(),
            },
        );
    }

    /// The result to report for one joined task, if it produced one
    fn joined(&mut self, joined: Result<SessionResult, JoinError>) -> Option<SessionResult> {
        match joined {
            Ok(result) => {
                self.sessions.remove(&result.session_id);
                Some(result)
            }
            Err(e) => {
                tracing::error!(error = %e, "Session task failed to join");
                self.failure = Some(e.to_string());
                None
            }
        }
    }

    /// `stopped_error` results for sessions that never reported, by id
    fn into_lost(self) -> Vec<SessionResult> {
        let cause = self.failure.unwrap_or_else(|| "no result".to_string());
        let mut lost: Vec<(u64, Started)> = self.sessions.into_iter().collect();
        lost.sort_by_key(|(id, _)| *id);

        lost.into_iter()
            .map(|(id, started)| {
                let elapsed = started.at.elapsed();
                tracing::error!(session = id, job = %started.job.id, "Session ended without a result");
                metrics::record_session_finished(
                    SessionOutcome::StoppedError.as_str(),
                    0,
                    0,
                    elapsed.as_secs_f64(),
                );
                SessionResult {
                    session_id: id,
                    job: started.job,
                    proxy: started.proxy,
                    outcome: SessionOutcome::StoppedError,
                    items: Vec::new(),
                    work_units: 0,
                    extraction_failures: 0,
                    profile: None,
                    error: Some(format!("session task failed: {cause}")),
                    elapsed,
                    finished_at: Utc::now(),
                    persisted_to: None,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobTarget;
    use std::time::Duration;

    fn job(id: &str) -> SessionJob {
        SessionJob::new(
            id,
            JobTarget::Search {
                query: "rust".into(),
                sort: Default::default(),
            },
        )
    }

    fn finished(id: u64, job: SessionJob) -> SessionResult {
        SessionResult {
            session_id: id,
            job,
            proxy: None,
            outcome: SessionOutcome::Completed,
            items: vec![serde_json::json!({"id": "1"})],
            work_units: 1,
            extraction_failures: 0,
            profile: None,
            error: None,
            elapsed: Duration::from_millis(5),
            finished_at: Utc::now(),
            persisted_to: None,
        }
    }

    #[tokio::test]
    async fn test_failed_task_is_reported_as_stopped_error() {
        let proxy = ProxyEndpoint::parse("http://10.0.0.1:8080").unwrap();
        let mut in_flight = InFlight::default();
        let mut active: JoinSet<SessionResult> = JoinSet::new();

        in_flight.started(1, &job("ok"), None);
        active.spawn(async { finished(1, job("ok")) });
        in_flight.started(2, &job("lost"), Some(&proxy));
        active.spawn(async {
            if true {
                panic!("task died");
            }
            finished(2, job("lost"))
        });

        let mut reported = Vec::new();
        while let Some(joined) = active.join_next().await {
            reported.extend(in_flight.joined(joined));
        }
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].session_id, 1);

        let lost = in_flight.into_lost();
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].session_id, 2);
        assert_eq!(lost[0].job.id.0, "lost");
        assert_eq!(lost[0].outcome, SessionOutcome::StoppedError);
        assert_eq!(lost[0].proxy.as_deref(), Some("http://10.0.0.1:8080"));
        assert!(lost[0].error.as_deref().unwrap().starts_with("session task failed"));
        assert!(lost[0].items.is_empty());
    }

    #[test]
    fn test_nothing_lost_when_all_report() {
        let mut in_flight = InFlight::default();
        in_flight.started(3, &job("a"), None);
        in_flight.started(4, &job("b"), None);
        assert!(in_flight.joined(Ok(finished(4, job("b")))).is_some());
        assert!(in_flight.joined(Ok(finished(3, job("a")))).is_some());
        assert!(in_flight.into_lost().is_empty());
    }
}
