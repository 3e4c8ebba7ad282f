//! Handler capability interfaces
//!
//! The host implements these four traits; the bridge calls them on behalf
//! of the native engine. Openers are shared by every session and must be
//! `Sync`. Handlers are owned by exactly one session (or one output
//! sub-channel) and are only ever called by one thread at a time, so they
//! take `&mut self`.
//!
//! # Contracts
//!
//! - `InputHandler::read` signals a clean end of stream with `Ok(0)`, never
//!   with an error. Returning fewer bytes than requested is fine.
//! - `OutputHandler::write` may accept fewer bytes than offered; the count
//!   is passed back to the engine untouched.
//! - `stat` is called once per engine event, potentially per frame. It
//!   should be cheap; the default implementation discards the event.

pub mod memory;
pub mod types;

use std::io::{self, SeekFrom};

use crate::error::OpenError;
use crate::stats::StatEvent;

pub use memory::{MemoryArtifact, MemoryInput, MemoryInputOpener, MemoryOutput, MemoryOutputOpener};
pub use types::{AvType, OutputRequest, Whence, SEEK_FORCE, SEEK_SIZE};

/// Factory for session inputs
pub trait InputOpener: Send + Sync {
    /// Open the input behind `url`
    fn open(&self, url: &str) -> Result<Box<dyn InputHandler>, OpenError>;
}

/// Input side of a session
pub trait InputHandler: Send {
    /// Read into `buf`, returning `Ok(0)` at end of stream
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Move the read position, returning the new absolute position
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Release the input
    fn close(&mut self) -> io::Result<()>;

    /// Total size in bytes, or -1 if unknown
    fn size(&self) -> i64;

    /// Engine progress event for this input
    fn stat(&mut self, event: &StatEvent) -> io::Result<()> {
        let _ = event;
        Ok(())
    }
}

/// Factory for output artifacts
pub trait OutputOpener: Send + Sync {
    /// Open a handler for the artifact described by `request`
    fn open(&self, request: &OutputRequest) -> Result<Box<dyn OutputHandler>, OpenError>;
}

/// One output artifact
pub trait OutputHandler: Send {
    /// Write `buf`, returning how many bytes were accepted
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Move the write position, returning the new absolute position
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64>;

    /// Finish the artifact
    fn close(&mut self) -> io::Result<()>;

    /// Engine progress event for this artifact
    fn stat(&mut self, av_type: AvType, event: &StatEvent) -> io::Result<()> {
        let _ = (av_type, event);
        Ok(())
    }
}

impl<F> InputOpener for F
where
    F: Fn(&str) -> Result<Box<dyn InputHandler>, OpenError> + Send + Sync,
{
    fn open(&self, url: &str) -> Result<Box<dyn InputHandler>, OpenError> {
        self(url)
    }
}

impl<F> OutputOpener for F
where
    F: Fn(&OutputRequest) -> Result<Box<dyn OutputHandler>, OpenError> + Send + Sync,
{
    fn open(&self, request: &OutputRequest) -> Result<Box<dyn OutputHandler>, OpenError> {
        self(request)
    }
}
