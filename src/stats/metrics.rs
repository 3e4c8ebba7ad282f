//! I/O counters for sessions and the bridge

use std::sync::atomic::{AtomicU64, Ordering};

/// Session-level counters, updated lock-free from any engine thread
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    outputs_opened: AtomicU64,
    outputs_closed: AtomicU64,
}

impl SessionCounters {
    pub(crate) fn add_read(&self, n: usize) {
        self.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_written(&self, n: usize) {
        self.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn output_opened(&self) {
        self.outputs_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn output_closed(&self) {
        self.outputs_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SessionStats {
        let opened = self.outputs_opened.load(Ordering::Relaxed);
        let closed = self.outputs_closed.load(Ordering::Relaxed);
        SessionStats {
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            outputs_opened: opened,
            outputs_open: opened.saturating_sub(closed),
        }
    }
}

/// Session-level statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes delivered to the engine from the input
    pub bytes_read: u64,
    /// Bytes accepted by output handlers, across all sub-channels
    pub bytes_written: u64,
    /// Output sub-channels opened over the session's lifetime
    pub outputs_opened: u64,
    /// Output sub-channels currently open
    pub outputs_open: u64,
}

/// Bridge-wide statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Sessions currently live in the registry
    pub live_sessions: usize,
    /// Handles ever allocated
    pub sessions_opened: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_stats_new() {
        let stats = SessionCounters::default().snapshot();
        assert_eq!(stats, SessionStats::default());
    }

    #[test]
    fn test_session_counters() {
        let counters = SessionCounters::default();
        counters.add_read(4096);
        counters.add_read(100);
        counters.add_written(65536);
        counters.output_opened();
        counters.output_opened();
        counters.output_closed();

        let stats = counters.snapshot();
        assert_eq!(stats.bytes_read, 4196);
        assert_eq!(stats.bytes_written, 65536);
        assert_eq!(stats.outputs_opened, 2);
        assert_eq!(stats.outputs_open, 1);
    }
}
