//! Persisted state shared across sessions
//!
//! - `guard`: named exclusive access to shared files
//! - `credentials`: the cookie file every session reads and refreshes
//! - `results`: per-job result files and the append-only session log

pub mod credentials;
pub mod guard;
pub mod results;

pub use credentials::{Cookie, CredentialError, CredentialStore, Credentials};
pub use guard::{GuardError, SharedFileGuard};
pub use results::{ResultWriter, SessionLogEntry};
