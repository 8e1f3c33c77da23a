//! Process-wide rate-limit breaker
//!
//! A one-way flag: once any session sees the remote throttling us, every
//! session stops issuing requests at its next check, and the scheduler stops
//! starting new ones. Nothing resets it within a run; resuming requires a
//! fresh process (or a fresh breaker) after an external backoff.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Why the breaker tripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TripReason {
    /// HTTP 429 from the remote
    TooManyRequests,
    /// Application-level throttle code in an otherwise successful response
    InBand(i64),
    /// Tripped by an operator or a test
    Manual(String),
}

impl std::fmt::Display for TripReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooManyRequests => write!(f, "HTTP 429"),
            Self::InBand(code) => write!(f, "in-band throttle code {code}"),
            Self::Manual(why) => write!(f, "manual: {why}"),
        }
    }
}

/// Shared rate-limit signal. Hand it to runners as `Arc<RateLimitBreaker>`.
#[derive(Debug, Default)]
pub struct RateLimitBreaker {
    tripped: AtomicBool,
    /// First trip only; written once by the caller that won the transition
    first_trip: Mutex<Option<(TripReason, DateTime<Utc>)>>,
}

impl RateLimitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns `true` only for the single call that performed
    /// the `false -> true` transition; later calls are no-ops.
    pub fn trip(&self, reason: TripReason) -> bool {
        let won = self
            .tripped
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if won {
            tracing::warn!(reason = %reason, "Rate limit detected, breaker tripped");
            crate::metrics::record_breaker_trip();
            let mut slot = self
                .first_trip
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *slot = Some((reason, Utc::now()));
        }

        won
    }

    /// Non-blocking read, cheap enough to call before every unit of work
    #[inline]
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Reason and time of the trip, if tripped
    pub fn trip_info(&self) -> Option<(TripReason, DateTime<Utc>)> {
        self.first_trip
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
