//! Run report
//!
//! One [`RunReport`] per [`Scheduler::run`](super::Scheduler::run): every
//! result in completion order plus what never started and why.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::models::{Item, SessionJob, SessionOutcome, SessionResult};

/// Complete accounting of one scheduler run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub wall_time_secs: f64,

    /// Completion order
    pub results: Vec<SessionResult>,

    /// Jobs that never started
    pub skipped: Vec<SessionJob>,

    /// The pool ran dry under the `abort` policy
    pub exhausted: bool,

    /// The breaker tripped during the run
    pub rate_limited: bool,

    /// Shutdown was requested
    pub interrupted: bool,

    /// Most sessions observed running at once
    pub max_active: usize,

    pub refills: u64,
    pub pool_summary: String,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            wall_time_secs: 0.0,
            results: Vec::new(),
            skipped: Vec::new(),
            exhausted: false,
            rate_limited: false,
            interrupted: false,
            max_active: 0,
            refills: 0,
            pool_summary: String::new(),
        }
    }

    pub fn wall_time(&self) -> Duration {
        Duration::from_secs_f64(self.wall_time_secs.max(0.0))
    }

    pub fn sessions_run(&self) -> usize {
        self.results.len()
    }

    pub fn sessions_ok(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Percentage of sessions that completed
    pub fn success_rate(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.sessions_ok() as f64 / self.results.len() as f64 * 100.0
    }

    pub fn avg_session_secs(&self) -> f64 {
        if self.results.is_empty() {
            return 0.0;
        }
        let total: f64 = self.results.iter().map(|r| r.elapsed.as_secs_f64()).sum();
        total / self.results.len() as f64
    }

    /// Raw items across all sessions, duplicates included
    pub fn total_items(&self) -> usize {
        self.results.iter().map(SessionResult::item_count).sum()
    }

    pub fn items_per_hour(&self) -> f64 {
        let hours = (self.wall_time_secs / 3600.0).max(0.01);
        self.total_items() as f64 / hours
    }

    pub fn outcome_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for result in &self.results {
            *counts.entry(result.outcome.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn count(&self, outcome: SessionOutcome) -> usize {
        self.results.iter().filter(|r| r.outcome == outcome).count()
    }

    /// Every collected item, partial sessions included
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.results.iter().flat_map(|r| r.items.iter())
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(60);
        writeln!(f, "{rule}")?;
        writeln!(f, "  RUN REPORT {}", self.run_id)?;
        writeln!(f, "{rule}")?;
        if self.results.is_empty() {
            writeln!(f, "  No sessions completed.")?;
        } else {
            writeln!(
                f,
                "  Sessions:    {} run | {} ok ({:.0}%)",
                self.sessions_run(),
                self.sessions_ok(),
                self.success_rate()
            )?;
            let outcomes = self
                .outcome_counts()
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(f, "  Outcomes:    {outcomes}")?;
            writeln!(f, "  Avg/session: {:.1}s", self.avg_session_secs())?;
            writeln!(
                f,
                "  Items raw:   {} ({:.0}/hr)",
                self.total_items(),
                self.items_per_hour()
            )?;
        }
        writeln!(f, "  Wall time:   {:.0}s", self.wall_time_secs)?;
        if !self.pool_summary.is_empty() {
            writeln!(f, "  Proxies:     {}", self.pool_summary)?;
        }
        if !self.skipped.is_empty() {
            writeln!(f, "  Skipped:     {} job(s)", self.skipped.len())?;
        }
        let mut flags = Vec::new();
        if self.rate_limited {
            flags.push("rate limited");
        }
        if self.exhausted {
            flags.push("proxies exhausted");
        }
        if self.interrupted {
            flags.push("interrupted");
        }
        if !flags.is_empty() {
            writeln!(f, "  Stopped:     {}", flags.join(", "))?;
        }
        write!(f, "{rule}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobTarget;
    use serde_json::json;

    fn result(outcome: SessionOutcome, items: usize, secs: u64) -> SessionResult {
        SessionResult {
            session_id: 0,
            job: SessionJob::for_target(JobTarget::Search {
                query: "q".into(),
                sort: Default::default(),
            }),
            proxy: None,
            outcome,
            items: (0..items).map(|i| json!({"id": i.to_string()})).collect(),
            work_units: 1,
            extraction_failures: 0,
            profile: None,
            error: None,
            elapsed: Duration::from_secs(secs),
            finished_at: Utc::now(),
            persisted_to: None,
        }
    }

    #[test]
    fn test_empty_report() {
        let report = RunReport::new();
        assert_eq!(report.success_rate(), 0.0);
        assert_eq!(report.avg_session_secs(), 0.0);
        assert!(report.to_string().contains("No sessions completed"));
    }

    #[test]
    fn test_stats() {
        let mut report = RunReport::new();
        report.wall_time_secs = 3600.0;
        report.results = vec![
            result(SessionOutcome::Completed, 30, 10),
            result(SessionOutcome::ProxyFailed, 5, 20),
            result(SessionOutcome::Completed, 15, 30),
            result(SessionOutcome::StoppedRateLimited, 0, 40),
        ];

        assert_eq!(report.sessions_run(), 4);
        assert_eq!(report.sessions_ok(), 2);
        assert_eq!(report.success_rate(), 50.0);
        assert_eq!(report.avg_session_secs(), 25.0);
        assert_eq!(report.total_items(), 50);
        assert_eq!(report.items_per_hour(), 50.0);
        assert_eq!(report.count(SessionOutcome::Completed), 2);
        assert_eq!(report.outcome_counts()["proxy_failed"], 1);

        let text = report.to_string();
        assert!(text.contains("4 run | 2 ok (50%)"), "{text}");
        assert!(text.contains("Items raw:   50"), "{text}");
    }
}
