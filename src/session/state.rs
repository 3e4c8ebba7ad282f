//! Session and output lifecycles
//!
//! ```text
//! Session:  Opening ──► Active ──► Closed
//! Output:              Open   ──► Closed
//! ```
//!
//! Both `Closed` states are terminal. A session is `Opening` only while it
//! is being built; it becomes `Active` once the registry has handed out its
//! handle.

use std::sync::atomic::{AtomicU8, Ordering};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionPhase {
    /// Being opened, not reachable through the registry yet
    Opening = 0,
    /// Input bound, outputs may come and go
    Active = 1,
    /// Input closed, handle retired
    Closed = 2,
}

impl SessionPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => SessionPhase::Opening,
            1 => SessionPhase::Active,
            _ => SessionPhase::Closed,
        }
    }
}

/// Output sub-channel lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputState {
    /// Accepting writes and seeks
    Open,
    /// Closed; the fd is never reused
    Closed,
}

/// Atomically updated [`SessionPhase`]
#[derive(Debug)]
pub(crate) struct PhaseCell(AtomicU8);

impl PhaseCell {
    pub(crate) fn new(phase: SessionPhase) -> Self {
        Self(AtomicU8::new(phase as u8))
    }

    pub(crate) fn get(&self) -> SessionPhase {
        SessionPhase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`, returning false if the phase was different
    pub(crate) fn transition(&self, from: SessionPhase, to: SessionPhase) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        let phase = PhaseCell::new(SessionPhase::Opening);
        assert_eq!(phase.get(), SessionPhase::Opening);

        assert!(phase.transition(SessionPhase::Opening, SessionPhase::Active));
        assert_eq!(phase.get(), SessionPhase::Active);

        assert!(phase.transition(SessionPhase::Active, SessionPhase::Closed));
        assert!(!phase.transition(SessionPhase::Active, SessionPhase::Closed));
        assert_eq!(phase.get(), SessionPhase::Closed);
    }

    #[test]
    fn test_closed_is_terminal() {
        let phase = PhaseCell::new(SessionPhase::Closed);
        assert!(!phase.transition(SessionPhase::Opening, SessionPhase::Active));
        assert!(!phase.transition(SessionPhase::Active, SessionPhase::Closed));
        assert_eq!(phase.get(), SessionPhase::Closed);
    }
}
