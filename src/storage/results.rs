//! Result persistence
//!
//! Each finished session writes its items to its own file,
//! `<kind>_<job slug>_<YYYYmmdd_HHMMSS>.json`, and appends one summary line
//! to the shared session log. Result files never overwrite each other: the
//! name is chosen and written under the output directory's lock, and a
//! taken name gets a `_2`, `_3`, ... suffix.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::guard::{resource_key, write_atomic, GuardError, SharedFileGuard};
use crate::models::{Item, SessionJob, SessionOutcome, SessionResult};
use crate::utils::slugify;

const SLUG_MAX_LEN: usize = 40;

/// One line of the session log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLogEntry {
    pub session_id: u64,
    pub job_id: String,
    pub kind: String,
    pub proxy: Option<String>,
    pub outcome: SessionOutcome,
    pub items: usize,
    pub work_units: u32,
    pub extraction_failures: u32,
    pub error: Option<String>,
    pub elapsed_secs: f64,
    pub finished_at: DateTime<Utc>,
    pub persisted_to: Option<PathBuf>,
}

impl From<&SessionResult> for SessionLogEntry {
    fn from(result: &SessionResult) -> Self {
        Self {
            session_id: result.session_id,
            job_id: result.job.id.to_string(),
            kind: result.job.target.kind().to_string(),
            proxy: result.proxy.clone(),
            outcome: result.outcome,
            items: result.item_count(),
            work_units: result.work_units,
            extraction_failures: result.extraction_failures,
            error: result.error.clone(),
            elapsed_secs: result.elapsed.as_secs_f64(),
            finished_at: result.finished_at,
            persisted_to: result.persisted_to.clone(),
        }
    }
}

/// Writes per-job result files and the shared session log
#[derive(Debug, Clone)]
pub struct ResultWriter {
    output_dir: PathBuf,
    session_log: PathBuf,
    guard: Arc<SharedFileGuard>,
}

impl ResultWriter {
    pub fn new(output_dir: impl Into<PathBuf>, session_log: &str, guard: Arc<SharedFileGuard>) -> Self {
        let output_dir = output_dir.into();
        Self {
            session_log: output_dir.join(session_log),
            output_dir,
            guard,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn session_log_path(&self) -> &Path {
        &self.session_log
    }

    /// `<kind>_<slug>_<YYYYmmdd_HHMMSS>.json`
    pub fn file_name(kind: &str, label: &str, at: DateTime<Local>) -> String {
        format!("{kind}_{}_{}.json", slug_for(label), at.format("%Y%m%d_%H%M%S"))
    }

    /// Write a job's items to its own file
    pub fn persist_items(&self, job: &SessionJob, items: &[Item]) -> Result<PathBuf, GuardError> {
        let name = Self::file_name(job.target.kind(), &job.id.0, Local::now());
        self.write_new_json(&name, items)
    }

    /// Write merged items for a whole target
    pub fn persist_merged(&self, kind: &str, label: &str, items: &[Item]) -> Result<PathBuf, GuardError> {
        let name = Self::file_name(kind, label, Local::now());
        self.write_new_json(&name, items)
    }

    /// Write a captured user profile as `profile_<username>.json`
    ///
    /// The profile is a snapshot, so a later capture replaces it.
    pub fn persist_profile(&self, username: &str, profile: &Item) -> Result<PathBuf, GuardError> {
        let name = format!("profile_{}.json", slugify(username.trim_start_matches('@'), SLUG_MAX_LEN));
        let path = self.output_dir.join(name);
        let json = to_json(&path, profile)?;
        self.guard.write_file(&path, &json)?;
        tracing::info!(path = %path.display(), "Saved profile");
        Ok(path)
    }

    /// Write under a name no other file has; returns the name used
    fn write_new_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf, GuardError> {
        let json = to_json(&self.output_dir.join(name), value)?;
        let path = self
            .guard
            .with_exclusive_access(&resource_key(&self.output_dir), || {
                let path = free_path(&self.output_dir, name);
                write_atomic(&path, &json)?;
                Ok(path)
            })?;
        tracing::info!(path = %path.display(), "Saved results");
        Ok(path)
    }

    /// Append a session summary line to the shared log
    pub fn append_session_log(&self, result: &SessionResult) -> Result<(), GuardError> {
        let entry = SessionLogEntry::from(result);
        let line = serde_json::to_string(&entry).map_err(|e| GuardError::SharedWriteFailure {
            resource: self.session_log.display().to_string(),
            source: std::io::Error::other(e),
        })?;
        self.guard.append_line(&self.session_log, &line)
    }
}

/// Slug for a job label, keeping a trailing `#n` fan-out suffix intact
/// when the rest has to be cut
fn slug_for(label: &str) -> String {
    match label.rsplit_once('#') {
        Some((base, n)) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => {
            let keep = SLUG_MAX_LEN.saturating_sub(n.len() + 1);
            format!("{}_{n}", slugify(base, keep))
        }
        _ => slugify(label, SLUG_MAX_LEN),
    }
}

/// `dir/name`, or the first `dir/<stem>_<k>.json` (k = 2, 3, ...) not yet taken
fn free_path(dir: &Path, name: &str) -> PathBuf {
    let first = dir.join(name);
    if !first.exists() {
        return first;
    }
    let stem = name.strip_suffix(".json").unwrap_or(name);
    (2u32..)
        .map(|k| dir.join(format!("{stem}_{k}.json")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(first)
}

fn to_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<Vec<u8>, GuardError> {
    serde_json::to_vec_pretty(value).map_err(|e| GuardError::SharedWriteFailure {
        resource: path.display().to_string(),
        source: std::io::Error::other(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobTarget;
    use chrono::TimeZone;
    use std::time::Duration;
    use tempfile::TempDir;

    fn result_for(job: SessionJob, items: Vec<Item>) -> SessionResult {
        SessionResult {
            session_id: 3,
            job,
            proxy: Some("http://1.2.3.4:8080".into()),
            outcome: SessionOutcome::Completed,
            items,
            work_units: 2,
            extraction_failures: 0,
            profile: None,
            error: None,
            elapsed: Duration::from_millis(1500),
            finished_at: Utc::now(),
            persisted_to: None,
        }
    }

    #[test]
    fn test_file_name_format() {
        let at = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(
            ResultWriter::file_name("search", "#rust lang", at),
            "search__rust_lang_20260304_050607.json"
        );
    }

    #[test]
    fn test_persist_items_and_log() {
        let dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(dir.path(), "sessions.jsonl", Arc::new(SharedFileGuard::new()));

        let job = SessionJob::for_target(JobTarget::Hashtag {
            tag: "rust".into(),
            sort: Default::default(),
        });
        let items = vec![serde_json::json!({"id": "1"}), serde_json::json!({"id": "2"})];
        let path = writer.persist_items(&job, &items).unwrap();

        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("hashtag__rust_"), "{name}");
        let saved: Vec<Item> = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(saved, items);

        let result = result_for(job, items);
        writer.append_session_log(&result).unwrap();
        writer.append_session_log(&result).unwrap();

        let log = std::fs::read_to_string(writer.session_log_path()).unwrap();
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 2);
        let entry: SessionLogEntry = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(entry.items, 2);
        assert_eq!(entry.kind, "hashtag");
        assert_eq!(entry.outcome, SessionOutcome::Completed);
    }

    #[test]
    fn test_fan_out_labels_keep_distinct_slugs() {
        let at = Local.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        let target = JobTarget::Search {
            query: "rust async runtime performance comparison 2026".into(),
            sort: Default::default(),
        };
        let names: Vec<String> = SessionJob::fan_out(&target, 12)
            .iter()
            .map(|job| ResultWriter::file_name("search", &job.id.0, at))
            .collect();

        assert!(names[0].starts_with("search_rust_async_runtime_performance_compari_1_"), "{}", names[0]);
        assert!(names[11].contains("_compar_12_"), "{}", names[11]);
        let unique: std::collections::HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn test_long_fan_out_jobs_persist_separately() {
        let dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(dir.path(), "sessions.jsonl", Arc::new(SharedFileGuard::new()));
        let target = JobTarget::Search {
            query: "rust async runtime performance comparison 2026".into(),
            sort: Default::default(),
        };
        let jobs = SessionJob::fan_out(&target, 2);

        let first = vec![serde_json::json!({"id": "1"})];
        let second = vec![serde_json::json!({"id": "2"})];
        let a = writer.persist_items(&jobs[0], &first).unwrap();
        let b = writer.persist_items(&jobs[1], &second).unwrap();

        assert_ne!(a, b);
        let saved_a: Vec<Item> = serde_json::from_slice(&std::fs::read(&a).unwrap()).unwrap();
        let saved_b: Vec<Item> = serde_json::from_slice(&std::fs::read(&b).unwrap()).unwrap();
        assert_eq!(saved_a, first);
        assert_eq!(saved_b, second);
    }

    #[test]
    fn test_same_name_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(dir.path(), "sessions.jsonl", Arc::new(SharedFileGuard::new()));

        let a = writer.persist_merged("search", "rust", &[serde_json::json!({"id": "1"})]).unwrap();
        let b = writer.persist_merged("search", "rust", &[serde_json::json!({"id": "2"})]).unwrap();
        let c = writer.persist_merged("search", "rust", &[serde_json::json!({"id": "3"})]).unwrap();

        let names: std::collections::HashSet<PathBuf> = [a.clone(), b, c].into_iter().collect();
        assert_eq!(names.len(), 3);
        let saved: Vec<Item> = serde_json::from_slice(&std::fs::read(&a).unwrap()).unwrap();
        assert_eq!(saved, vec![serde_json::json!({"id": "1"})]);
    }

    #[test]
    fn test_free_path_counts_up() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("x.json"), "[]").unwrap();
        std::fs::write(dir.path().join("x_2.json"), "[]").unwrap();
        assert_eq!(free_path(dir.path(), "x.json"), dir.path().join("x_3.json"));
        assert_eq!(free_path(dir.path(), "y.json"), dir.path().join("y.json"));
    }

    #[test]
    fn test_profile_file_name() {
        let dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(dir.path(), "sessions.jsonl", Arc::new(SharedFileGuard::new()));
        let path = writer
            .persist_profile("@alice", &serde_json::json!({"username": "alice"}))
            .unwrap();
        assert!(path.ends_with("profile_alice.json"));
    }
}
