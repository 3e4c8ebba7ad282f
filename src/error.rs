//! Error types
//!
//! Two layers of errors exist:
//!
//! - [`OpenError`] is returned by the host-side openers when they cannot
//!   produce a handler for a URL or an output artifact.
//! - [`BridgeError`] is what the bridge itself reports. At the native
//!   boundary every variant collapses into the single `-1` sentinel, so the
//!   richer detail is only visible to Rust callers and to the logs.

use std::io;

use crate::registry::{Fd, Handle};

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure reported by an [`InputOpener`](crate::handler::InputOpener) or
/// [`OutputOpener`](crate::handler::OutputOpener)
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    /// Nothing exists at the requested location
    #[error("not found: {0}")]
    NotFound(String),

    /// The URL could not be interpreted by the opener
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// The opener refused the request
    #[error("rejected: {0}")]
    Rejected(String),

    /// Underlying I/O failure while opening
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Error type for bridge operations
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The handle does not resolve to a live session
    #[error("session handle not found: {0}")]
    HandleNotFound(Handle),

    /// The fd does not resolve to an open output of the session
    #[error("output {fd} not found in session {handle}")]
    FdNotFound { handle: Handle, fd: Fd },

    /// An opener failed to produce a handler
    #[error("open failed: {0}")]
    Open(#[from] OpenError),

    /// A handler read/write/seek/close failed
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The input or output was already closed by a concurrent caller
    #[error("{0} is closed")]
    Closed(&'static str),

    /// A raw boundary argument could not be decoded
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A configured limit was hit
    #[error("limit reached: {0}")]
    LimitReached(&'static str),
}

impl BridgeError {
    /// True for the "does not resolve" family (unknown handle or fd)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            BridgeError::HandleNotFound(_) | BridgeError::FdNotFound { .. }
        )
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        BridgeError::InvalidArgument(msg.into())
    }
}
