use parley_core::signal::RefreshReason;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    /// Nothing requested since start
    Idle,
    /// A refresh fires at `deadline` unless pushed back by another request
    Pending {
        deadline: Instant,
        reason: RefreshReason,
    },
    /// The last burst was delivered
    Fired,
}

/// Collapses bursts of refresh requests into one refresh.
///
/// Every request while idle or pending moves the deadline to
/// `now + window`; the refresh fires once the window passes with no new
/// request. Time is passed in, so the machine itself never sleeps.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    state: DebounceState,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: DebounceState::Idle,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Records a request. The most recent reason wins.
    pub fn request(&mut self, now: Instant, reason: RefreshReason) {
        self.state = DebounceState::Pending {
            deadline: now + self.window,
            reason,
        };
    }

    /// When the pending refresh is due, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Pending { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    /// Fires the pending refresh if its deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Option<RefreshReason> {
        match self.state {
            DebounceState::Pending { deadline, reason } if now >= deadline => {
                self.state = DebounceState::Fired;
                Some(reason)
            }
            _ => None,
        }
    }
}
