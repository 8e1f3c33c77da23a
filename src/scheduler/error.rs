//! Error types for the scheduler module

use std::fmt;

/// Result type for scheduler operations
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Scheduler-specific errors
///
/// Per-session failures are never errors here; they are outcomes inside the
/// run report. Only conditions that prevent a run from starting are.
#[derive(Debug)]
pub enum SchedulerError {
    /// No proxy to hand out and the policy forbids running direct
    ProxyExhausted {
        pending_jobs: usize,
    },

    /// Concurrency limit must be at least 1
    InvalidConcurrency {
        limit: usize,
    },

    /// Job file could not be read or parsed
    JobFile {
        path: String,
        reason: String,
    },

    /// Serialization/deserialization error
    SerializationError {
        reason: String,
    },

    /// IO error
    IoError {
        operation: String,
        reason: String,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ProxyExhausted { pending_jobs } => {
                write!(
                    f,
                    "Proxy pool exhausted with {} job(s) pending and policy 'abort'",
                    pending_jobs
                )
            }
            Self::InvalidConcurrency { limit } => {
                write!(f, "Invalid concurrency limit '{}'. Must be at least 1", limit)
            }
            Self::JobFile { path, reason } => {
                write!(f, "Invalid job file '{}': {}", path, reason)
            }
            Self::SerializationError { reason } => {
                write!(f, "Serialization error: {}", reason)
            }
            Self::IoError { operation, reason } => {
                write!(f, "IO error during '{}': {}", operation, reason)
            }
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError {
            reason: err.to_string(),
        }
    }
}

impl From<std::io::Error> for SchedulerError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            operation: "unknown".to_string(),
            reason: err.to_string(),
        }
    }
}

impl SchedulerError {
    /// Create a proxy exhausted error
    pub fn proxy_exhausted(pending_jobs: usize) -> Self {
        Self::ProxyExhausted { pending_jobs }
    }

    /// Create a job file error
    pub fn job_file(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::JobFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an IO error with context
    pub fn io_error(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IoError {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Whether waiting (for a fresh proxy list, say) and retrying can help
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ProxyExhausted { .. } | Self::IoError { .. })
    }
}
