//! Routing types shared by the bridge and the openers
//!
//! [`AvType`] and [`OutputRequest`] describe what an output artifact is and
//! where it belongs. The bridge only carries them from the engine to the
//! [`OutputOpener`](super::OutputOpener); it never branches on them.

use std::fmt;
use std::io::SeekFrom;

use crate::error::{BridgeError, Result};
use crate::registry::{Fd, Handle};

/// Whence value asking for the stream size instead of moving
pub const SEEK_SIZE: i32 = 0x10000;

/// Whence flag that may be OR-ed onto any origin; ignored
pub const SEEK_FORCE: i32 = 0x20000;

/// Semantic class of an output artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum AvType {
    /// DASH manifest (`.mpd`)
    Manifest = 1,
    /// Video initialization segment
    VideoInit = 2,
    /// Video media segment
    VideoSegment = 3,
    /// Audio initialization segment
    AudioInit = 4,
    /// Audio media segment
    AudioSegment = 5,
    /// HLS master playlist
    MasterPlaylist = 6,
    /// HLS video media playlist
    VideoPlaylist = 7,
    /// HLS audio media playlist
    AudioPlaylist = 8,
    /// AES-128 key material
    KeyMaterial = 9,
    /// Single unfragmented container stream
    RawContainer = 10,
    /// Single fragmented container stream
    FragmentedContainer = 11,
    /// Standalone container segment file
    Mp4Segment = 12,
    /// Fragmented video segment file
    FragmentedVideoSegment = 13,
    /// Fragmented audio segment file
    FragmentedAudioSegment = 14,
    /// Image extracted from a single frame
    FrameImage = 15,
}

impl AvType {
    /// Every variant, in code order
    pub const ALL: [AvType; 15] = [
        AvType::Manifest,
        AvType::VideoInit,
        AvType::VideoSegment,
        AvType::AudioInit,
        AvType::AudioSegment,
        AvType::MasterPlaylist,
        AvType::VideoPlaylist,
        AvType::AudioPlaylist,
        AvType::KeyMaterial,
        AvType::RawContainer,
        AvType::FragmentedContainer,
        AvType::Mp4Segment,
        AvType::FragmentedVideoSegment,
        AvType::FragmentedAudioSegment,
        AvType::FrameImage,
    ];

    /// Raw code as used at the native boundary
    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Short name for logs
    pub fn as_str(self) -> &'static str {
        match self {
            AvType::Manifest => "manifest",
            AvType::VideoInit => "video-init",
            AvType::VideoSegment => "video-segment",
            AvType::AudioInit => "audio-init",
            AvType::AudioSegment => "audio-segment",
            AvType::MasterPlaylist => "master-playlist",
            AvType::VideoPlaylist => "video-playlist",
            AvType::AudioPlaylist => "audio-playlist",
            AvType::KeyMaterial => "key-material",
            AvType::RawContainer => "raw-container",
            AvType::FragmentedContainer => "fragmented-container",
            AvType::Mp4Segment => "segment",
            AvType::FragmentedVideoSegment => "fragmented-video-segment",
            AvType::FragmentedAudioSegment => "fragmented-audio-segment",
            AvType::FrameImage => "frame-image",
        }
    }
}

impl TryFrom<i32> for AvType {
    type Error = BridgeError;

    fn try_from(raw: i32) -> Result<Self> {
        AvType::ALL
            .into_iter()
            .find(|t| t.as_raw() == raw)
            .ok_or_else(|| BridgeError::invalid(format!("unknown output type {}", raw)))
    }
}

impl fmt::Display for AvType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seek origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Offset is absolute
    Start,
    /// Offset is relative to the current position
    Current,
    /// Offset is relative to the end of the stream
    End,
    /// Report the stream size without moving
    Size,
}

impl Whence {
    /// Decode a raw whence value, ignoring the force flag
    pub fn from_raw(raw: i32) -> Result<Self> {
        match raw & !SEEK_FORCE {
            0 => Ok(Whence::Start),
            1 => Ok(Whence::Current),
            2 => Ok(Whence::End),
            SEEK_SIZE => Ok(Whence::Size),
            other => Err(BridgeError::invalid(format!("unknown whence {}", other))),
        }
    }

    /// Combine with an offset into a std seek position
    ///
    /// Returns `None` for [`Whence::Size`], which is not a movement.
    pub fn seek_from(self, offset: i64) -> Result<Option<SeekFrom>> {
        match self {
            Whence::Start => u64::try_from(offset)
                .map(|pos| Some(SeekFrom::Start(pos)))
                .map_err(|_| BridgeError::invalid(format!("negative absolute offset {}", offset))),
            Whence::Current => Ok(Some(SeekFrom::Current(offset))),
            Whence::End => Ok(Some(SeekFrom::End(offset))),
            Whence::Size => Ok(None),
        }
    }
}

/// Everything an [`OutputOpener`](super::OutputOpener) needs to route a
/// new artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRequest {
    /// Session the artifact belongs to
    pub handle: Handle,
    /// Sub-channel id assigned by the bridge
    pub fd: Fd,
    /// Engine stream index
    pub stream_index: i32,
    /// Engine segment index
    pub seg_index: i32,
    /// Presentation timestamp, used to name frame images
    pub pts: i64,
    /// Artifact class
    pub av_type: AvType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_av_type_codes_round_trip() {
        for t in AvType::ALL {
            assert_eq!(AvType::try_from(t.as_raw()).unwrap(), t);
        }
    }

    #[test]
    fn test_av_type_unknown_code() {
        assert!(matches!(
            AvType::try_from(0),
            Err(BridgeError::InvalidArgument(_))
        ));
        assert!(AvType::try_from(99).is_err());
    }

    #[test]
    fn test_whence_decode() {
        assert_eq!(Whence::from_raw(0).unwrap(), Whence::Start);
        assert_eq!(Whence::from_raw(1).unwrap(), Whence::Current);
        assert_eq!(Whence::from_raw(2).unwrap(), Whence::End);
        assert_eq!(Whence::from_raw(SEEK_SIZE).unwrap(), Whence::Size);
        assert_eq!(Whence::from_raw(SEEK_FORCE | 1).unwrap(), Whence::Current);
        assert!(Whence::from_raw(3).is_err());
    }

    #[test]
    fn test_seek_from() {
        assert_eq!(
            Whence::Start.seek_from(10).unwrap(),
            Some(SeekFrom::Start(10))
        );
        assert_eq!(
            Whence::End.seek_from(-4).unwrap(),
            Some(SeekFrom::End(-4))
        );
        assert_eq!(Whence::Size.seek_from(0).unwrap(), None);
        assert!(Whence::Start.seek_from(-1).is_err());
    }
}
