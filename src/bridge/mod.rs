//! The bridge
//!
//! [`Bridge`] owns a [`HandleRegistry`] of sessions and the two openers
//! that produce handlers. It is constructed explicitly and torn down with
//! [`Bridge::shutdown`] (or on drop), so several independent bridges can
//! live in one process.
//!
//! The typed methods here return [`Result`]. The [`dispatch`] module wraps
//! them into the integer-sentinel form the native engine expects.

pub mod config;
pub mod dispatch;

use std::sync::Arc;

use crate::error::{BridgeError, Result};
use crate::handler::{AvType, InputOpener, OutputOpener, Whence};
use crate::registry::{Fd, Handle, HandleRegistry};
use crate::session::Session;
use crate::stats::{BridgeStats, StatEvent};

pub use config::BridgeConfig;

/// Session registry plus the openers that feed it
pub struct Bridge {
    config: BridgeConfig,
    registry: HandleRegistry<Session>,
    input_opener: Arc<dyn InputOpener>,
    output_opener: Arc<dyn OutputOpener>,
}

impl Bridge {
    /// Create a bridge with default configuration
    pub fn new<I, O>(input_opener: I, output_opener: O) -> Self
    where
        I: InputOpener + 'static,
        O: OutputOpener + 'static,
    {
        Self::with_config(BridgeConfig::default(), input_opener, output_opener)
    }

    /// Create a bridge with custom configuration
    pub fn with_config<I, O>(config: BridgeConfig, input_opener: I, output_opener: O) -> Self
    where
        I: InputOpener + 'static,
        O: OutputOpener + 'static,
    {
        Self::from_shared(config, Arc::new(input_opener), Arc::new(output_opener))
    }

    /// Create a bridge around openers the caller keeps a reference to
    pub fn from_shared(
        config: BridgeConfig,
        input_opener: Arc<dyn InputOpener>,
        output_opener: Arc<dyn OutputOpener>,
    ) -> Self {
        Self {
            registry: HandleRegistry::with_limit(config.max_sessions),
            config,
            input_opener,
            output_opener,
        }
    }

    /// Get the bridge configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Open a session over `url`, returning its handle and the input size
    ///
    /// The input opener runs before anything is registered; if it fails no
    /// handle is allocated.
    pub fn open_session(&self, url: &str) -> Result<(Handle, i64)> {
        let mut input = self.input_opener.open(url).map_err(|e| {
            tracing::debug!(url = %url, error = %e, "Input opener failed");
            e
        })?;

        let reservation = match self.registry.reserve() {
            Ok(reservation) => reservation,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Session rejected");
                if let Err(close_err) = input.close() {
                    tracing::debug!(url = %url, error = %close_err, "Input close failed");
                }
                return Err(e);
            }
        };

        let handle = reservation.handle();
        let session = reservation
            .commit(Session::new(
                handle,
                url.to_string(),
                input,
                Arc::clone(&self.output_opener),
                self.config.max_outputs_per_session,
                self.config.lenient_eof,
            ))
            .or_else(|session| {
                tracing::warn!(url = %url, "Bridge shut down while session was opening");
                session.close_input()?;
                Err(BridgeError::Closed("bridge"))
            })?;
        session.activate();

        tracing::debug!(handle = %handle, url = %url, size = session.size(), "Session opened");
        Ok((handle, session.size()))
    }

    /// Resolve a live session
    pub fn session(&self, handle: Handle) -> Result<Arc<Session>> {
        self.registry.lookup(handle)
    }

    /// Read from a session's input
    pub fn read(&self, handle: Handle, buf: &mut [u8]) -> Result<usize> {
        self.session(handle)?.read_input(buf)
    }

    /// Seek a session's input
    pub fn seek(&self, handle: Handle, offset: i64, whence: Whence) -> Result<u64> {
        self.session(handle)?.seek_input(offset, whence)
    }

    /// Close a session's input and retire its handle
    ///
    /// The handle is released before the handler is closed, so a second
    /// close reports `HandleNotFound` and never reaches the handler.
    pub fn close_session(&self, handle: Handle) -> Result<()> {
        let session = self.registry.release(handle)?;
        session.close_input()
    }

    /// Open an output sub-channel for a session
    pub fn open_output(
        &self,
        handle: Handle,
        stream_index: i32,
        seg_index: i32,
        pts: i64,
        av_type: AvType,
    ) -> Result<Fd> {
        self.session(handle)?
            .open_output(stream_index, seg_index, pts, av_type)
    }

    /// Write to an output sub-channel
    pub fn write(&self, handle: Handle, fd: Fd, buf: &[u8]) -> Result<usize> {
        self.session(handle)?.write_output(fd, buf)
    }

    /// Seek an output sub-channel
    pub fn seek_output(&self, handle: Handle, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        self.session(handle)?.seek_output(fd, offset, whence)
    }

    /// Close an output sub-channel
    pub fn close_output(&self, handle: Handle, fd: Fd) -> Result<()> {
        self.session(handle)?.close_output(fd)
    }

    /// Forward a stat event to a session input or output
    pub fn stat(&self, handle: Handle, fd: Option<Fd>, event: &StatEvent) -> Result<()> {
        self.session(handle)?.report_stat(fd, event)
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Bridge-wide counters
    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            live_sessions: self.registry.len(),
            sessions_opened: self.registry.allocated(),
        }
    }

    /// Close every live session, returning how many were closed
    ///
    /// The bridge accepts no new sessions afterwards. A session whose open
    /// was still in flight is closed by that call instead of being published.
    pub fn shutdown(&self) -> usize {
        let sessions = self.registry.drain();
        let count = sessions.len();

        for (handle, session) in sessions {
            if let Err(e) = session.close_input() {
                tracing::debug!(handle = %handle, error = %e, "Session close during shutdown failed");
            }
        }

        if count > 0 {
            tracing::info!(sessions = count, "Bridge shut down");
        }
        count
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}
