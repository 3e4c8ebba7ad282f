//! Stat events reported by the engine

use std::ffi::c_void;

use crate::error::{BridgeError, Result};

/// Encoder frame counters carried by [`StatEvent::FrameWritten`]
///
/// Layout matches what the engine passes by pointer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodingFrameStats {
    /// Frames written since the job started
    pub total_frames_written: u64,
    /// Frames written into the current artifact
    pub frames_written: u64,
}

/// Stat kind codes as used at the native boundary
///
/// Input kinds live in `1..=5`, output kinds in `11..=14`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum StatKind {
    InBytesRead = 1,
    InAudioFramesRead = 2,
    InVideoFramesRead = 3,
    InAudioDecodingStartPts = 4,
    InVideoDecodingStartPts = 5,
    OutBytesWritten = 11,
    OutDecodingStartPts = 12,
    OutEncodingEndPts = 13,
    OutFrameWritten = 14,
}

impl StatKind {
    const ALL: [StatKind; 9] = [
        StatKind::InBytesRead,
        StatKind::InAudioFramesRead,
        StatKind::InVideoFramesRead,
        StatKind::InAudioDecodingStartPts,
        StatKind::InVideoDecodingStartPts,
        StatKind::OutBytesWritten,
        StatKind::OutDecodingStartPts,
        StatKind::OutEncodingEndPts,
        StatKind::OutFrameWritten,
    ];

    /// Raw code
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Whether the kind is reported against a session input
    pub fn is_input(self) -> bool {
        (self as i32) < 10
    }
}

impl TryFrom<i32> for StatKind {
    type Error = BridgeError;

    fn try_from(raw: i32) -> Result<Self> {
        StatKind::ALL
            .into_iter()
            .find(|k| k.as_raw() == raw)
            .ok_or_else(|| BridgeError::invalid(format!("unknown stat kind {}", raw)))
    }
}

/// One engine progress event; the payload type follows from the variant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatEvent {
    /// Input read offset
    BytesRead(u64),
    /// Audio frames demuxed so far
    AudioFramesRead(u64),
    /// Video frames demuxed so far
    VideoFramesRead(u64),
    /// First decoded audio pts
    AudioDecodingStartPts(u64),
    /// First decoded video pts
    VideoDecodingStartPts(u64),
    /// Output write offset
    BytesWritten(u64),
    /// First pts decoded for the artifact
    DecodingStartPts(u64),
    /// Last pts encoded into the artifact
    EncodingEndPts(u64),
    /// Encoder frame counters
    FrameWritten(EncodingFrameStats),
}

impl StatEvent {
    /// Kind tag of this event
    pub fn kind(&self) -> StatKind {
        match self {
            StatEvent::BytesRead(_) => StatKind::InBytesRead,
            StatEvent::AudioFramesRead(_) => StatKind::InAudioFramesRead,
            StatEvent::VideoFramesRead(_) => StatKind::InVideoFramesRead,
            StatEvent::AudioDecodingStartPts(_) => StatKind::InAudioDecodingStartPts,
            StatEvent::VideoDecodingStartPts(_) => StatKind::InVideoDecodingStartPts,
            StatEvent::BytesWritten(_) => StatKind::OutBytesWritten,
            StatEvent::DecodingStartPts(_) => StatKind::OutDecodingStartPts,
            StatEvent::EncodingEndPts(_) => StatKind::OutEncodingEndPts,
            StatEvent::FrameWritten(_) => StatKind::OutFrameWritten,
        }
    }

    /// Build an event from a kind and a scalar value
    ///
    /// Fails for [`StatKind::OutFrameWritten`], whose payload is a struct.
    pub fn from_value(kind: StatKind, value: u64) -> Result<Self> {
        Ok(match kind {
            StatKind::InBytesRead => StatEvent::BytesRead(value),
            StatKind::InAudioFramesRead => StatEvent::AudioFramesRead(value),
            StatKind::InVideoFramesRead => StatEvent::VideoFramesRead(value),
            StatKind::InAudioDecodingStartPts => StatEvent::AudioDecodingStartPts(value),
            StatKind::InVideoDecodingStartPts => StatEvent::VideoDecodingStartPts(value),
            StatKind::OutBytesWritten => StatEvent::BytesWritten(value),
            StatKind::OutDecodingStartPts => StatEvent::DecodingStartPts(value),
            StatKind::OutEncodingEndPts => StatEvent::EncodingEndPts(value),
            StatKind::OutFrameWritten => {
                return Err(BridgeError::invalid("frame-written stat needs frame counters"))
            }
        })
    }

    /// Decode an event passed by pointer from the engine
    ///
    /// # Safety
    ///
    /// `payload` must be null or point to a readable `u64`, or to an
    /// [`EncodingFrameStats`] when `kind` is the frame-written code.
    pub unsafe fn from_raw(kind: i32, payload: *const c_void) -> Result<Self> {
        let kind = StatKind::try_from(kind)?;
        if payload.is_null() {
            return Err(BridgeError::invalid("null stat payload"));
        }

        match kind {
            StatKind::OutFrameWritten => {
                // SAFETY: caller guarantees the pointer targets frame counters
                let stats = unsafe { (payload as *const EncodingFrameStats).read_unaligned() };
                Ok(StatEvent::FrameWritten(stats))
            }
            _ => {
                // SAFETY: caller guarantees the pointer targets a u64
                let value = unsafe { (payload as *const u64).read_unaligned() };
                Self::from_value(kind, value)
            }
        }
    }
}
