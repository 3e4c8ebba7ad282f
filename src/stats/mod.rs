//! Stat channel payloads and I/O counters
//!
//! [`StatEvent`] is what the engine reports (bytes moved, frames read,
//! timestamps). The bridge forwards each event to the owning handler and
//! keeps nothing. [`SessionStats`] and [`BridgeStats`] are the bridge's own
//! I/O counters and are unrelated to the stat channel.

pub mod event;
pub mod metrics;

pub use event::{EncodingFrameStats, StatEvent, StatKind};
pub use metrics::{BridgeStats, SessionStats};
