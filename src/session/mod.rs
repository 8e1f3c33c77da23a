//! Sticky sessions
//!
//! - [`state`] - lifecycle states and drain reasons
//! - [`driver`] - remote driver traits and the HTTP implementation
//! - [`runner`] - the per-session state machine

pub mod driver;
pub mod runner;
pub mod state;

pub use driver::{DriverFailure, HttpDriver, RawResponse, RemoteDriver, RemoteSession};
pub use runner::{SessionContext, SessionRunner};
pub use state::{DrainReason, SessionState};
