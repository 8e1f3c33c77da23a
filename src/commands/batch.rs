//! `batch`: run several targets in one scheduler run
//!
//! Job file format:
//!
//! ```toml
//! [[jobs]]
//! sessions = 3
//! limit = 300
//! target = { kind = "search", query = "rust lang", sort = "top" }
//!
//! [[jobs]]
//! id = "alice-likes"
//! target = { kind = "likes", username = "alice" }
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use stickyscrape::config::Config;
use stickyscrape::error::Error;
use stickyscrape::models::{JobTarget, SessionJob};
use stickyscrape::scheduler::{merge_results, Scheduler, SchedulerError};

fn default_sessions() -> usize {
    1
}

fn default_limit() -> usize {
    500
}

/// One entry of the job file
#[derive(Debug, Clone, Deserialize)]
pub struct BatchEntry {
    /// Output identity; defaults to the target label
    pub id: Option<String>,
    pub target: JobTarget,
    #[serde(default = "default_sessions")]
    pub sessions: usize,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl BatchEntry {
    fn label(&self) -> String {
        self.id.clone().unwrap_or_else(|| self.target.label())
    }

    /// Session jobs for this entry
    pub fn session_jobs(&self) -> Vec<SessionJob> {
        match (&self.id, self.sessions) {
            (Some(id), n) if n <= 1 => vec![SessionJob::new(id.clone(), self.target.clone())],
            (Some(id), n) => (1..=n)
                .map(|i| SessionJob::new(format!("{id}#{i}"), self.target.clone()))
                .collect(),
            (None, n) => SessionJob::fan_out(&self.target, n),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BatchFile {
    pub jobs: Vec<BatchEntry>,
}

impl BatchFile {
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn load(path: &Path) -> Result<Self, SchedulerError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| SchedulerError::job_file(path.display().to_string(), e.to_string()))?;
        Self::parse(&content)
            .map_err(|e| SchedulerError::job_file(path.display().to_string(), e.to_string()))
    }
}

pub async fn batch(config: Config, jobs_file: &Path, anonymous: bool) -> Result<()> {
    let file = BatchFile::load(jobs_file).map_err(Error::from)?;
    if file.jobs.is_empty() {
        println!("No jobs in {}", jobs_file.display());
        return Ok(());
    }

    // Session job id -> batch entry
    let mut owner: HashMap<String, usize> = HashMap::new();
    let mut jobs = Vec::new();
    for (index, entry) in file.jobs.iter().enumerate() {
        for job in entry.session_jobs() {
            owner.insert(job.id.0.clone(), index);
            jobs.push(job);
        }
    }

    println!("Batch: {} target(s), {} session(s)", file.jobs.len(), jobs.len());

    let ctx = super::build_context(&config, anonymous)?;
    let scheduler = Scheduler::new(ctx.clone()).with_policy(config.pool.on_exhausted);
    let report = scheduler
        .run_until_ctrl_c(jobs, config.scheduler.concurrency_limit)
        .await
        .map_err(Error::from)?;

    for (index, entry) in file.jobs.iter().enumerate() {
        let results = report
            .results
            .iter()
            .filter(|r| owner.get(&r.job.id.0) == Some(&index));
        let merged = merge_results(results, entry.limit);
        println!("  {:<40} {} items", entry.label(), merged.len());

        if let (Some(writer), false) = (&ctx.writer, merged.is_empty()) {
            writer
                .persist_merged(entry.target.kind(), &entry.label(), &merged)
                .map_err(Error::from)
                .with_context(|| format!("Failed to save results for {}", entry.label()))?;
        }
    }

    if !report.skipped.is_empty() {
        println!("Skipped:");
        for job in &report.skipped {
            println!("  {}", job.id);
        }
    }
    println!("{report}");
    Ok(())
}
