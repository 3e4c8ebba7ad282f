//! C ABI surface
//!
//! The native engine is handed an opaque `*const Bridge` (see [`into_raw`])
//! together with the function pointers below. Every entry point:
//!
//! - returns the [`dispatch`] sentinel on a null bridge or bad pointer
//!   arguments,
//! - catches panics raised by handler code instead of unwinding into the
//!   engine.
//!
//! Buffers are borrowed for the duration of the call only.

use std::ffi::{c_char, c_int, c_void, CStr};
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::Arc;

use crate::bridge::dispatch::{self, STATUS_ERROR};
use crate::bridge::Bridge;
use crate::stats::StatEvent;

/// Hand a bridge to native code
///
/// The pointer stays valid until passed to [`release_raw`].
pub fn into_raw(bridge: Arc<Bridge>) -> *const Bridge {
    Arc::into_raw(bridge)
}

/// Take back a bridge handed out by [`into_raw`]
///
/// # Safety
///
/// `ptr` must come from [`into_raw`] and must not be used by native code
/// afterwards.
pub unsafe fn release_raw(ptr: *const Bridge) -> Arc<Bridge> {
    // SAFETY: caller guarantees `ptr` came from `Arc::into_raw`
    unsafe { Arc::from_raw(ptr) }
}

fn guard<R>(op: &'static str, fallback: R, f: impl FnOnce() -> R) -> R {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        tracing::error!(op = op, "Panic in bridge call");
        fallback
    })
}

/// Open a session for `url`; writes the input size to `size`
///
/// # Safety
///
/// `bridge` must be null or valid; `url` must be null or a NUL-terminated
/// string; `size` must be null or writable.
#[no_mangle]
pub unsafe extern "C" fn avio_bridge_open_input(
    bridge: *const Bridge,
    url: *const c_char,
    size: *mut i64,
) -> i64 {
    guard("open_input", STATUS_ERROR as i64, || {
        // SAFETY: see function contract
        let Some(bridge) = (unsafe { bridge.as_ref() }) else {
            return STATUS_ERROR as i64;
        };
        if url.is_null() {
            return STATUS_ERROR as i64;
        }
        // SAFETY: non-null and NUL-terminated per contract
        let Ok(url) = (unsafe { CStr::from_ptr(url) }).to_str() else {
            tracing::debug!("Input url is not valid UTF-8");
            return STATUS_ERROR as i64;
        };

        let (handle, input_size) = dispatch::open_input(bridge, url);
        // SAFETY: see function contract
        if let Some(size) = unsafe { size.as_mut() } {
            *size = input_size;
        }
        handle
    })
}

/// Read up to `sz` bytes into `buf`; `0` is end of stream
///
/// # Safety
///
/// `bridge` must be null or valid; `buf` must be null or writable for `sz`
/// bytes.
#[no_mangle]
pub unsafe extern "C" fn avio_bridge_read_input(
    bridge: *const Bridge,
    handle: i64,
    buf: *mut u8,
    sz: c_int,
) -> c_int {
    guard("read_input", STATUS_ERROR, || {
        // SAFETY: see function contract
        let Some(bridge) = (unsafe { bridge.as_ref() }) else {
            return STATUS_ERROR;
        };
        let Ok(len) = usize::try_from(sz) else {
            return STATUS_ERROR;
        };
        if buf.is_null() {
            return if len == 0 { 0 } else { STATUS_ERROR };
        }
        // SAFETY: non-null and writable for `len` bytes per contract
        let buf = unsafe { slice::from_raw_parts_mut(buf, len) };
        dispatch::read_input(bridge, handle, buf)
    })
}

/// Seek a session input
///
/// # Safety
///
/// `bridge` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn avio_bridge_seek_input(
    bridge: *const Bridge,
    handle: i64,
    offset: i64,
    whence: c_int,
) -> i64 {
    guard("seek_input", STATUS_ERROR as i64, || {
        // SAFETY: see function contract
        match unsafe { bridge.as_ref() } {
            Some(bridge) => dispatch::seek_input(bridge, handle, offset, whence),
            None => STATUS_ERROR as i64,
        }
    })
}

/// Close a session input and retire the handle
///
/// # Safety
///
/// `bridge` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn avio_bridge_close_input(bridge: *const Bridge, handle: i64) -> c_int {
    guard("close_input", STATUS_ERROR, || {
        // SAFETY: see function contract
        match unsafe { bridge.as_ref() } {
            Some(bridge) => dispatch::close_input(bridge, handle),
            None => STATUS_ERROR,
        }
    })
}

/// Open an output sub-channel; returns its fd
///
/// # Safety
///
/// `bridge` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn avio_bridge_open_output(
    bridge: *const Bridge,
    handle: i64,
    stream_index: c_int,
    seg_index: c_int,
    pts: i64,
    av_type: c_int,
) -> c_int {
    guard("open_output", STATUS_ERROR, || {
        // SAFETY: see function contract
        match unsafe { bridge.as_ref() } {
            Some(bridge) => {
                dispatch::open_output(bridge, handle, stream_index, seg_index, pts, av_type)
            }
            None => STATUS_ERROR,
        }
    })
}

/// Write `sz` bytes from `buf` to an output
///
/// # Safety
///
/// `bridge` must be null or valid; `buf` must be null or readable for `sz`
/// bytes.
#[no_mangle]
pub unsafe extern "C" fn avio_bridge_write_output(
    bridge: *const Bridge,
    handle: i64,
    fd: c_int,
    buf: *const u8,
    sz: c_int,
) -> c_int {
    guard("write_output", STATUS_ERROR, || {
        // SAFETY: see function contract
        let Some(bridge) = (unsafe { bridge.as_ref() }) else {
            return STATUS_ERROR;
        };
        let Ok(len) = usize::try_from(sz) else {
            return STATUS_ERROR;
        };
        let buf: &[u8] = if buf.is_null() {
            if len > 0 {
                return STATUS_ERROR;
            }
            &[]
        } else {
            // SAFETY: non-null and readable for `len` bytes per contract
            unsafe { slice::from_raw_parts(buf, len) }
        };
        dispatch::write_output(bridge, handle, fd, buf)
    })
}

/// Seek an output sub-channel
///
/// # Safety
///
/// `bridge` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn avio_bridge_seek_output(
    bridge: *const Bridge,
    handle: i64,
    fd: c_int,
    offset: i64,
    whence: c_int,
) -> i64 {
    guard("seek_output", STATUS_ERROR as i64, || {
        // SAFETY: see function contract
        match unsafe { bridge.as_ref() } {
            Some(bridge) => dispatch::seek_output(bridge, handle, fd, offset, whence),
            None => STATUS_ERROR as i64,
        }
    })
}

/// Close an output sub-channel
///
/// # Safety
///
/// `bridge` must be null or valid.
#[no_mangle]
pub unsafe extern "C" fn avio_bridge_close_output(
    bridge: *const Bridge,
    handle: i64,
    fd: c_int,
) -> c_int {
    guard("close_output", STATUS_ERROR, || {
        // SAFETY: see function contract
        match unsafe { bridge.as_ref() } {
            Some(bridge) => dispatch::close_output(bridge, handle, fd),
            None => STATUS_ERROR,
        }
    })
}

unsafe fn forward_stat(
    bridge: *const Bridge,
    handle: i64,
    fd: c_int,
    kind: c_int,
    payload: *const c_void,
) {
    guard("stat", (), || {
        // SAFETY: forwarded from the exported contracts
        let Some(bridge) = (unsafe { bridge.as_ref() }) else {
            return;
        };
        // SAFETY: forwarded from the exported contracts
        match unsafe { StatEvent::from_raw(kind, payload) } {
            Ok(event) => dispatch::stat(bridge, handle, fd, event),
            Err(e) => tracing::debug!(kind = kind, error = %e, "Undecodable stat event"),
        }
    })
}

/// Report a stat event against a session input
///
/// # Safety
///
/// `bridge` must be null or valid; `payload` must satisfy
/// [`StatEvent::from_raw`].
#[no_mangle]
pub unsafe extern "C" fn avio_bridge_input_stat(
    bridge: *const Bridge,
    handle: i64,
    kind: c_int,
    payload: *const c_void,
) {
    // SAFETY: same contract
    unsafe { forward_stat(bridge, handle, -1, kind, payload) }
}

/// Report a stat event against an output sub-channel
///
/// # Safety
///
/// `bridge` must be null or valid; `payload` must satisfy
/// [`StatEvent::from_raw`].
#[no_mangle]
pub unsafe extern "C" fn avio_bridge_output_stat(
    bridge: *const Bridge,
    handle: i64,
    fd: c_int,
    kind: c_int,
    payload: *const c_void,
) {
    if fd < 0 {
        return;
    }
    // SAFETY: same contract
    unsafe { forward_stat(bridge, handle, fd, kind, payload) }
}

#[cfg(test)]
mod tests {
    use std::ffi::CString;
    use std::io::{self, SeekFrom};
    use std::ptr;

    use super::*;
    use crate::bridge::BridgeConfig;
    use crate::error::OpenError;
    use crate::handler::{
        AvType, InputHandler, MemoryInputOpener, MemoryOutputOpener, OutputHandler, OutputRequest,
    };
    use crate::stats::{EncodingFrameStats, StatKind};

    struct PanickingOutput;

    impl OutputHandler for PanickingOutput {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            panic!("handler bug");
        }

        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn memory_bridge() -> (*const Bridge, Arc<MemoryOutputOpener>) {
        let inputs = MemoryInputOpener::new().with_source("mem://in", vec![5u8; 300]);
        let outputs = Arc::new(MemoryOutputOpener::new());
        let bridge = Bridge::from_shared(BridgeConfig::default(), Arc::new(inputs), outputs.clone());
        (into_raw(Arc::new(bridge)), outputs)
    }

    #[test]
    fn test_raw_session_flow() {
        let (raw, outputs) = memory_bridge();
        let url = CString::new("mem://in").unwrap();

        unsafe {
            let mut size = 0i64;
            let h = avio_bridge_open_input(raw, url.as_ptr(), &mut size);
            assert!(h > 0);
            assert_eq!(size, 300);

            let mut buf = [0u8; 256];
            assert_eq!(avio_bridge_read_input(raw, h, buf.as_mut_ptr(), 256), 256);
            assert_eq!(avio_bridge_read_input(raw, h, buf.as_mut_ptr(), 256), 44);
            assert_eq!(avio_bridge_read_input(raw, h, buf.as_mut_ptr(), 256), 0);
            assert_eq!(avio_bridge_seek_input(raw, h, 0, 0), 0);

            let fd = avio_bridge_open_output(raw, h, 0, 1, 0, AvType::Manifest.as_raw());
            assert_eq!(fd, 0);
            let data = b"<MPD/>";
            assert_eq!(avio_bridge_write_output(raw, h, fd, data.as_ptr(), 6), 6);
            assert_eq!(avio_bridge_seek_output(raw, h, fd, 0, 2), 6);

            let stats = EncodingFrameStats {
                total_frames_written: 10,
                frames_written: 10,
            };
            avio_bridge_output_stat(
                raw,
                h,
                fd,
                StatKind::OutFrameWritten.as_raw(),
                &stats as *const EncodingFrameStats as *const c_void,
            );

            assert_eq!(avio_bridge_close_output(raw, h, fd), 0);
            assert_eq!(avio_bridge_close_input(raw, h), 0);
            assert_eq!(avio_bridge_close_input(raw, h), -1);

            let bridge = release_raw(raw);
            assert_eq!(bridge.session_count(), 0);
        }

        let artifacts = outputs.artifacts();
        assert_eq!(&artifacts[0].data[..], b"<MPD/>");
        assert_eq!(artifacts[0].events.len(), 1);
    }

    #[test]
    fn test_null_arguments() {
        let (raw, _) = memory_bridge();
        let url = CString::new("mem://in").unwrap();

        unsafe {
            assert_eq!(
                avio_bridge_open_input(ptr::null(), url.as_ptr(), ptr::null_mut()),
                -1
            );
            assert_eq!(avio_bridge_open_input(raw, ptr::null(), ptr::null_mut()), -1);

            let h = avio_bridge_open_input(raw, url.as_ptr(), ptr::null_mut());
            assert!(h > 0);
            assert_eq!(avio_bridge_read_input(raw, h, ptr::null_mut(), 16), -1);
            assert_eq!(avio_bridge_read_input(raw, h, ptr::null_mut(), 0), 0);
            assert_eq!(avio_bridge_read_input(raw, h, ptr::null_mut(), -3), -1);
            assert_eq!(avio_bridge_close_input(ptr::null(), h), -1);
            avio_bridge_input_stat(raw, h, StatKind::InBytesRead.as_raw(), ptr::null());

            drop(release_raw(raw));
        }
    }

    #[test]
    fn test_handler_panic_does_not_unwind() {
        let inputs = |_: &str| -> Result<Box<dyn InputHandler>, OpenError> {
            Ok(Box::new(crate::handler::MemoryInput::new(vec![0u8; 4])))
        };
        let outputs = |_: &OutputRequest| -> Result<Box<dyn OutputHandler>, OpenError> {
            Ok(Box::new(PanickingOutput))
        };
        let raw = into_raw(Arc::new(Bridge::new(inputs, outputs)));
        let url = CString::new("anything").unwrap();

        unsafe {
            let h = avio_bridge_open_input(raw, url.as_ptr(), ptr::null_mut());
            let fd = avio_bridge_open_output(raw, h, 0, 1, 0, AvType::VideoSegment.as_raw());
            assert!(fd >= 0);

            let data = [0u8; 8];
            assert_eq!(avio_bridge_write_output(raw, h, fd, data.as_ptr(), 8), -1);
            // parking_lot locks do not poison
            assert_eq!(avio_bridge_close_output(raw, h, fd), 0);
            assert_eq!(avio_bridge_close_input(raw, h), 0);

            drop(release_raw(raw));
        }
    }
}
