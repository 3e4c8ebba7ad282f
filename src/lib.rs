//! Callback I/O bridge for native media engines
//!
//! A multi-threaded native engine (demuxer, transcoder, segmenter) performs
//! no I/O of its own. Every open, read, write, seek, close and stat report
//! is routed through this crate to handlers the host supplies.
//!
//! # Architecture
//!
//! ```text
//!   native engine threads
//!   ─────────────────────────────────────────────────────────────
//!        │ avio_bridge_*(bridge, handle, fd, ...)      (ffi)
//!        ▼
//!   ┌─────────────┐  raw ints in, sentinel ints out
//!   │  dispatch   │  (-1 on any failure, 0 = EOF on read)
//!   └──────┬──────┘
//!          ▼
//!   ┌─────────────┐   HandleRegistry<Session>
//!   │   Bridge    │── handle ──► Session ── Mutex<InputHandler>
//!   └──────┬──────┘                 │
//!          │                        └── OutputTable: fd ──► Mutex<OutputHandler>
//!          ▼
//!   InputOpener / OutputOpener    (host code)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use avio_bridge::handler::{MemoryInputOpener, MemoryOutputOpener};
//! use avio_bridge::{AvType, Bridge};
//!
//! let inputs = MemoryInputOpener::new().with_source("mem://clip", vec![0u8; 4096]);
//! let bridge = Bridge::new(inputs, MemoryOutputOpener::new());
//!
//! let (handle, size) = bridge.open_session("mem://clip")?;
//! let fd = bridge.open_output(handle, 0, 1, 0, AvType::VideoSegment)?;
//!
//! let mut buf = vec![0u8; size as usize];
//! let n = bridge.read(handle, &mut buf)?;
//! bridge.write(handle, fd, &buf[..n])?;
//!
//! bridge.close_output(handle, fd)?;
//! bridge.close_session(handle)?;
//! # Ok::<(), avio_bridge::BridgeError>(())
//! ```

pub mod bridge;
pub mod error;
pub mod ffi;
pub mod handler;
pub mod registry;
pub mod session;
pub mod stats;

pub use bridge::dispatch::{STATUS_ERROR, STATUS_OK};
pub use bridge::{Bridge, BridgeConfig};
pub use error::{BridgeError, OpenError, Result};
pub use handler::{
    AvType, InputHandler, InputOpener, OutputHandler, OutputOpener, OutputRequest, Whence,
};
pub use registry::{Fd, Handle};
pub use session::{Session, SessionPhase};
pub use stats::{BridgeStats, EncodingFrameStats, SessionStats, StatEvent, StatKind};
