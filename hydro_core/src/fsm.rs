//! Table-driven state machine shared by the device, pump, sensing and
//! calibration machines.
//!
//! Each state enum declares its escape states (reachable from anywhere) and
//! its ordinary successors. Escapes are checked first, so an inconsistent
//! prior state can never block an emergency override.

use std::fmt;

use crate::error::TransitionRejected;

pub trait MachineState: Copy + Eq + fmt::Debug + 'static {
    /// Name used in logs and rejections.
    const MACHINE: &'static str;

    fn label(self) -> &'static str;

    /// Reachable from every state, including itself.
    fn is_escape(self) -> bool;

    /// Ordinary permitted successors of `self`.
    fn successors(self) -> &'static [Self];

    fn permits(self, to: Self) -> bool {
        to.is_escape() || self.successors().contains(&to)
    }
}

/// Current state plus the clock reading at which it was entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Machine<S> {
    state: S,
    entered_ms: u64,
}

impl<S: MachineState> Machine<S> {
    pub fn new(initial: S, now_ms: u64) -> Self {
        Self {
            state: initial,
            entered_ms: now_ms,
        }
    }

    #[inline]
    pub fn state(&self) -> S {
        self.state
    }

    #[inline]
    pub fn entered_ms(&self) -> u64 {
        self.entered_ms
    }

    #[inline]
    pub fn elapsed(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.entered_ms)
    }

    /// Move to `to` if the table permits it. Returns the previous state.
    ///
    /// A rejected request leaves both the state and its entry time untouched.
    pub fn transition(&mut self, to: S, now_ms: u64) -> Result<S, TransitionRejected> {
        if !self.state.permits(to) {
            return Err(TransitionRejected {
                machine: S::MACHINE,
                from: self.state.label(),
                to: to.label(),
            });
        }
        Ok(self.force(to, now_ms))
    }

    /// Set the state without consulting the table. Returns the previous state.
    pub fn force(&mut self, to: S, now_ms: u64) -> S {
        let prev = self.state;
        self.state = to;
        self.entered_ms = now_ms;
        prev
    }
}
