//! One-way state machines for a child process and for the session.
//!
//! A child starts `Running`. Timeout, bailout and exit race to move it out of
//! `Running`; only the first transition is honored. A timed-out child still
//! resolves through its exit, so `TimedOut -> Completed` is the one
//! non-`Running` transition allowed.

use std::time::{Duration, Instant};

/// Lifecycle of one spawned child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Running,
    TimedOut,
    BailedOut,
    Completed { timed_out: bool },
}

/// Guarded holder for a [`ChildState`].
#[derive(Debug)]
pub struct ChildLifecycle {
    state: ChildState,
}

impl Default for ChildLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ChildLifecycle {
    pub fn new() -> Self {
        Self {
            state: ChildState::Running,
        }
    }

    pub fn state(&self) -> ChildState {
        self.state
    }

    /// Timer fired. Returns true if the caller should kill the child.
    pub fn time_out(&mut self) -> bool {
        if self.state != ChildState::Running {
            return false;
        }
        self.state = ChildState::TimedOut;
        true
    }

    /// Fatal directive observed. Returns true if the caller should flush and kill.
    pub fn bail_out(&mut self) -> bool {
        if self.state != ChildState::Running {
            return false;
        }
        self.state = ChildState::BailedOut;
        true
    }

    /// Child closed. Returns `Some(timed_out)` if this exit resolves the file,
    /// `None` if a bailout or an earlier exit already did.
    pub fn complete(&mut self) -> Option<bool> {
        let timed_out = match self.state {
            ChildState::Running => false,
            ChildState::TimedOut => true,
            ChildState::BailedOut | ChildState::Completed { .. } => return None,
        };
        self.state = ChildState::Completed { timed_out };
        Some(timed_out)
    }
}

/// Single-shot deadline owned by one child.
#[derive(Debug)]
pub struct Timer {
    deadline: Option<Instant>,
}

impl Timer {
    pub fn start(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    /// Time until the deadline; `None` once cancelled or fired.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns true exactly once, when the deadline has passed. Firing clears it.
    pub fn fire_if_due(&mut self) -> bool {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

/// Session-wide flags. Each is set at most once and never cleared.
#[derive(Debug, Default)]
pub struct SessionState {
    bailed_out: bool,
    finalized: bool,
}

impl SessionState {
    pub fn bailed_out(&self) -> bool {
        self.bailed_out
    }

    pub fn mark_bailed_out(&mut self) {
        self.bailed_out = true;
    }

    /// Returns true the first time only.
    pub fn finalize(&mut self) -> bool {
        if self.finalized {
            return false;
        }
        self.finalized = true;
        true
    }
}
