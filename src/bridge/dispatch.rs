//! Sentinel-returning entry points
//!
//! These are the functions a native engine thread ends up in. Each takes
//! raw integers, resolves them, runs the typed [`Bridge`] operation and
//! folds the outcome into a single integer:
//!
//! - success: the non-negative handle, fd, byte count or position
//! - failure: [`STATUS_ERROR`], whatever the cause
//!
//! A zero-length read is success with value `0`, which the engine treats as
//! end of stream. Detail about failures only goes to the log.

use super::Bridge;
use crate::error::{BridgeError, Result};
use crate::handler::{AvType, Whence};
use crate::registry::{Fd, Handle};
use crate::stats::StatEvent;

/// Success status for operations without a value
pub const STATUS_OK: i32 = 0;

/// The one failure sentinel
pub const STATUS_ERROR: i32 = -1;

fn handle(raw: i64) -> Result<Handle> {
    Handle::from_raw(raw).ok_or_else(|| BridgeError::invalid(format!("invalid handle {}", raw)))
}

fn fd(raw: i32) -> Result<Fd> {
    Fd::from_raw(raw).ok_or_else(|| BridgeError::invalid(format!("invalid fd {}", raw)))
}

/// Fold a typed outcome into the boundary integer type
fn to_status<T, S>(op: &'static str, result: Result<T>) -> S
where
    S: TryFrom<T> + From<i32>,
{
    match result {
        Ok(value) => S::try_from(value).unwrap_or_else(|_| {
            tracing::warn!(op = op, "Result does not fit the status range");
            S::from(STATUS_ERROR)
        }),
        Err(e) if e.is_not_found() => {
            tracing::debug!(op = op, error = %e, "Unresolved handle or fd");
            S::from(STATUS_ERROR)
        }
        Err(e) => {
            tracing::debug!(op = op, error = %e, "Dispatch failed");
            S::from(STATUS_ERROR)
        }
    }
}

/// Open a session; returns `(handle, size)` or `(-1, -1)`
pub fn open_input(bridge: &Bridge, url: &str) -> (i64, i64) {
    match bridge.open_session(url) {
        Ok((handle, size)) => (handle.as_raw(), size),
        Err(e) => {
            tracing::debug!(op = "open_input", url = %url, error = %e, "Dispatch failed");
            (STATUS_ERROR as i64, -1)
        }
    }
}

/// Read from a session input; `0` is end of stream
pub fn read_input(bridge: &Bridge, raw_handle: i64, buf: &mut [u8]) -> i32 {
    let result = handle(raw_handle).and_then(|h| bridge.read(h, buf));
    to_status("read_input", result)
}

/// Seek a session input; returns the new position
pub fn seek_input(bridge: &Bridge, raw_handle: i64, offset: i64, whence: i32) -> i64 {
    let result = handle(raw_handle).and_then(|h| {
        let whence = Whence::from_raw(whence)?;
        bridge.seek(h, offset, whence)
    });
    to_status("seek_input", result)
}

/// Close a session input and retire the handle
pub fn close_input(bridge: &Bridge, raw_handle: i64) -> i32 {
    let result = handle(raw_handle).and_then(|h| bridge.close_session(h));
    to_status("close_input", result.map(|()| STATUS_OK))
}

/// Open an output sub-channel; returns its fd
pub fn open_output(
    bridge: &Bridge,
    raw_handle: i64,
    stream_index: i32,
    seg_index: i32,
    pts: i64,
    av_type: i32,
) -> i32 {
    let result = handle(raw_handle).and_then(|h| {
        let av_type = AvType::try_from(av_type)?;
        bridge.open_output(h, stream_index, seg_index, pts, av_type)
    });
    to_status("open_output", result.map(Fd::as_raw))
}

/// Write to an output sub-channel; returns the accepted byte count
pub fn write_output(bridge: &Bridge, raw_handle: i64, raw_fd: i32, buf: &[u8]) -> i32 {
    let result = handle(raw_handle).and_then(|h| bridge.write(h, fd(raw_fd)?, buf));
    to_status("write_output", result)
}

/// Seek an output sub-channel; returns the new position
pub fn seek_output(bridge: &Bridge, raw_handle: i64, raw_fd: i32, offset: i64, whence: i32) -> i64 {
    let result = handle(raw_handle).and_then(|h| {
        let whence = Whence::from_raw(whence)?;
        bridge.seek_output(h, fd(raw_fd)?, offset, whence)
    });
    to_status("seek_output", result)
}

/// Close an output sub-channel
pub fn close_output(bridge: &Bridge, raw_handle: i64, raw_fd: i32) -> i32 {
    let result = handle(raw_handle).and_then(|h| bridge.close_output(h, fd(raw_fd)?));
    to_status("close_output", result.map(|()| STATUS_OK))
}

/// Forward a stat event to a session input (`raw_fd < 0`) or output
///
/// Fire-and-forget: failures are logged and dropped.
pub fn stat(bridge: &Bridge, raw_handle: i64, raw_fd: i32, event: StatEvent) {
    let result = handle(raw_handle).and_then(|h| {
        let target = if raw_fd < 0 { None } else { Some(fd(raw_fd)?) };
        bridge.stat(h, target, &event)
    });

    if let Err(e) = result {
        tracing::debug!(op = "stat", kind = ?event.kind(), error = %e, "Stat not delivered");
    }
}
