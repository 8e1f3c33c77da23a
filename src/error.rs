//! Unified error handling for the stickyscrape crate
//!
//! Each module keeps its own error type; [`Error`] wraps them all so the CLI
//! and library callers can use one `Result` across module boundaries.
//!
//! # Architecture
//!
//! - [`StickyErrorTrait`] - Common interface implemented by all error types
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use stickyscrape::error::{Error, StickyErrorTrait};
//!
//! fn handle_error(err: Error) {
//!     if err.is_recoverable() {
//!         println!("Retry later: {}", err);
//!     } else {
//!         eprintln!("Fatal error [{}]: {}", err.category(), err);
//!     }
//! }
//! ```

use std::fmt;
use thiserror::Error;

pub use crate::scheduler::error::SchedulerError;
pub use crate::session::driver::DriverFailure;
pub use crate::storage::{CredentialError, GuardError};
pub use crate::utils::error::{FetchError, ProxyListError};

/// Common trait for all stickyscrape error types
pub trait StickyErrorTrait: std::error::Error {
    /// Check if this error is recoverable (a later retry may succeed)
    fn is_recoverable(&self) -> bool;

    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network-related errors (HTTP, timeout, proxy)
    Network,
    /// Remote throttling
    RateLimit,
    /// Parsing and data extraction errors
    Parsing,
    /// Storage and I/O errors
    Storage,
    /// Configuration and validation errors
    Config,
    /// Scheduler errors
    Scheduler,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::RateLimit => "rate_limit",
            Self::Parsing => "parsing",
            Self::Storage => "storage",
            Self::Config => "config",
            Self::Scheduler => "scheduler",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the stickyscrape crate
#[derive(Error, Debug)]
pub enum Error {
    /// Fetch errors (harvest, validation)
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Remote driver failures
    #[error("Driver error: {0}")]
    Driver(#[from] DriverFailure),

    /// Proxy list file errors
    #[error("Proxy list error: {0}")]
    ProxyList(#[from] ProxyListError),

    /// Shared file guard errors
    #[error("Guard error: {0}")]
    Guard(#[from] GuardError),

    /// Credential store errors
    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    /// Scheduler errors
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),
}

impl StickyErrorTrait for Error {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_transient(),
            Self::Driver(e) => !e.is_proxy_fatal(),
            Self::ProxyList(_) => false,
            Self::Guard(GuardError::Reentrant(_)) => false,
            Self::Guard(GuardError::SharedWriteFailure { .. }) => true,
            Self::Credential(CredentialError::Guard(_)) => true,
            Self::Credential(CredentialError::Parse(_)) => false,
            Self::Scheduler(e) => e.is_recoverable(),
            Self::Config(_) => false,
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Fetch(FetchError::RateLimit) => ErrorCategory::RateLimit,
            Self::Fetch(_) => ErrorCategory::Network,
            Self::Driver(DriverFailure::Throttled(_)) => ErrorCategory::RateLimit,
            Self::Driver(_) => ErrorCategory::Network,
            Self::ProxyList(ProxyListError::Json(_)) => ErrorCategory::Parsing,
            Self::ProxyList(_) => ErrorCategory::Config,
            Self::Guard(_) => ErrorCategory::Storage,
            Self::Credential(CredentialError::Parse(_)) => ErrorCategory::Parsing,
            Self::Credential(_) => ErrorCategory::Storage,
            Self::Scheduler(_) => ErrorCategory::Scheduler,
            Self::Config(_) => ErrorCategory::Config,
        }
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
