//! Trailing-edge debounce for local edits.
//!
//! ```text
//!   Idle ──local change──▶ Pending{deadline}
//!    ▲                        │  ▲
//!    │                        │  └── local change: deadline reset
//!    └──────── fire ──────────┘
//! ```
//!
//! The debouncer only tracks *when* to broadcast. What gets broadcast is
//! whatever the document holds at fire time, so intermediate states are
//! never queued.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending { deadline: Instant },
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    delay: Duration,
    state: DebounceState,
}

impl Debouncer {
    /// Idle debouncer that fires `delay` after the last change.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            state: DebounceState::Idle,
        }
    }

    /// Record a local change at `now`, (re)arming the timer.
    pub fn touch(&mut self, now: Instant) {
        self.state = DebounceState::Pending {
            deadline: now + self.delay,
        };
    }

    /// When the pending timer fires, if one is armed.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Idle => None,
            DebounceState::Pending { deadline } => Some(deadline),
        }
    }

    /// Returns `true` exactly once per quiet period, when `now` has reached
    /// the deadline. The debouncer is idle afterwards.
    pub fn fire(&mut self, now: Instant) -> bool {
        match self.state {
            DebounceState::Pending { deadline } if now >= deadline => {
                self.state = DebounceState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Drop any pending timer without firing.
    pub fn cancel(&mut self) {
        self.state = DebounceState::Idle;
    }

    /// Whether a change is waiting for its quiet period.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, DebounceState::Pending { .. })
    }

    /// Current timer state.
    pub fn state(&self) -> DebounceState {
        self.state
    }

    /// Quiet period required before firing.
    pub fn delay(&self) -> Duration {
        self.delay
    }
}
