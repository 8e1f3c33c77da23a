//! Session lifecycle states

use std::fmt;

/// Where a session is in its life
///
/// ```text
/// Pending -> Starting -> Staggering -> Active -> Draining -> Finalized
///                 \            \____________________^
///                  \_________________________________^
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Created, nothing assigned yet
    Pending,
    /// Job and proxy assigned, credentials being loaded
    Starting,
    /// Waiting out the start delay
    Staggering,
    /// Performing work units
    Active,
    /// Persisting, refreshing credentials, releasing the proxy
    Draining,
    /// Result produced; terminal
    Finalized,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Staggering => "staggering",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Finalized => "finalized",
        }
    }

    /// Whether `self -> next` is a legal step
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Pending, Starting)
                | (Starting, Staggering)
                | (Starting, Draining)
                | (Staggering, Active)
                | (Staggering, Draining)
                | (Active, Draining)
                | (Draining, Finalized)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finalized)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session left `Active` (or never reached it)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainReason {
    /// All work units done, or the remote has nothing more
    WorkDone,
    /// Item cap reached
    ItemCap,
    /// Breaker observed tripped, or this session tripped it
    RateLimited,
    /// Proxy unreachable or blocked
    ProxyFailure,
    /// Too many consecutive unit failures
    TooManyFailures(u32),
    /// Could not open a remote session
    OpenFailed,
}

impl DrainReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkDone => "work_done",
            Self::ItemCap => "item_cap",
            Self::RateLimited => "rate_limited",
            Self::ProxyFailure => "proxy_failure",
            Self::TooManyFailures(_) => "too_many_failures",
            Self::OpenFailed => "open_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_is_legal() {
        let path = [
            SessionState::Pending,
            SessionState::Starting,
            SessionState::Staggering,
            SessionState::Active,
            SessionState::Draining,
            SessionState::Finalized,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_early_drain_paths() {
        assert!(SessionState::Staggering.can_transition_to(SessionState::Draining));
        assert!(SessionState::Starting.can_transition_to(SessionState::Draining));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!SessionState::Pending.can_transition_to(SessionState::Active));
        assert!(!SessionState::Active.can_transition_to(SessionState::Staggering));
        assert!(!SessionState::Finalized.can_transition_to(SessionState::Draining));
        assert!(!SessionState::Draining.can_transition_to(SessionState::Active));
        assert!(SessionState::Finalized.is_terminal());
    }
}
