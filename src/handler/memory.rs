//! In-memory handlers
//!
//! Inputs serve a shared `Bytes` buffer, optionally capped per read to mimic
//! a network source. Outputs collect into `BytesMut` and stay inspectable
//! through the opener after the bridge has dropped them.

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use super::{AvType, InputHandler, InputOpener, OutputHandler, OutputOpener, OutputRequest};
use crate::error::OpenError;
use crate::registry::Handle;
use crate::stats::StatEvent;

type EventLog = Arc<Mutex<Vec<(String, StatEvent)>>>;

fn seek_position(current: u64, len: u64, pos: SeekFrom) -> io::Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
        SeekFrom::End(delta) => len.checked_add_signed(delta),
    };

    target.ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "seek before start of stream")
    })
}

/// Input served from memory
pub struct MemoryInput {
    data: Bytes,
    pos: u64,
    /// Largest read served at once (0 = whatever fits)
    chunk: usize,
    url: String,
    events: Option<EventLog>,
}

impl MemoryInput {
    /// Create an input over `data`
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
            chunk: 0,
            url: String::new(),
            events: None,
        }
    }

    /// Serve at most `chunk` bytes per read
    pub fn chunked(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    /// Current read position
    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl InputHandler for MemoryInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.data.len() as u64;
        if self.pos >= len {
            return Ok(0);
        }

        let start = self.pos as usize;
        let mut n = buf.len().min(self.data.len() - start);
        if self.chunk > 0 {
            n = n.min(self.chunk);
        }

        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.pos += n as u64;
        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = seek_position(self.pos, self.data.len() as u64, pos)?;
        Ok(self.pos)
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn size(&self) -> i64 {
        self.data.len() as i64
    }

    fn stat(&mut self, event: &StatEvent) -> io::Result<()> {
        tracing::trace!(url = %self.url, event = ?event, "Input stat");
        if let Some(ref events) = self.events {
            events.lock().push((self.url.clone(), *event));
        }
        Ok(())
    }
}

/// Opener serving registered in-memory sources by URL
#[derive(Default)]
pub struct MemoryInputOpener {
    sources: Mutex<HashMap<String, Bytes>>,
    chunk: usize,
    events: EventLog,
}

impl MemoryInputOpener {
    /// Create an opener with no sources
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve at most `chunk` bytes per read from every input opened
    pub fn chunked(mut self, chunk: usize) -> Self {
        self.chunk = chunk;
        self
    }

    /// Register a source under `url`
    pub fn insert(&self, url: impl Into<String>, data: impl Into<Bytes>) {
        self.sources.lock().insert(url.into(), data.into());
    }

    /// Register a source and return self, for chaining
    pub fn with_source(self, url: impl Into<String>, data: impl Into<Bytes>) -> Self {
        self.insert(url, data);
        self
    }

    /// Stat events received by every input this opener produced
    pub fn events(&self) -> Vec<(String, StatEvent)> {
        self.events.lock().clone()
    }
}

impl InputOpener for MemoryInputOpener {
    fn open(&self, url: &str) -> Result<Box<dyn InputHandler>, OpenError> {
        let data = self
            .sources
            .lock()
            .get(url)
            .cloned()
            .ok_or_else(|| OpenError::NotFound(url.to_string()))?;

        let mut input = MemoryInput::new(data).chunked(self.chunk);
        input.url = url.to_string();
        input.events = Some(Arc::clone(&self.events));

        Ok(Box::new(input))
    }
}

#[derive(Debug)]
struct ArtifactState {
    request: OutputRequest,
    data: BytesMut,
    pos: usize,
    closed: bool,
    events: Vec<StatEvent>,
}

/// Output collecting into memory
pub struct MemoryOutput {
    state: Arc<Mutex<ArtifactState>>,
    /// Largest write accepted at once (0 = unlimited)
    write_limit: usize,
}

impl OutputHandler for MemoryOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(io::Error::other("artifact already closed"));
        }

        let n = if self.write_limit > 0 {
            buf.len().min(self.write_limit)
        } else {
            buf.len()
        };

        let pos = state.pos;
        let end = pos + n;
        if state.data.len() < end {
            state.data.resize(end, 0);
        }
        state.data[pos..end].copy_from_slice(&buf[..n]);
        state.pos = end;

        Ok(n)
    }

    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let mut state = self.state.lock();
        let target = seek_position(state.pos as u64, state.data.len() as u64, pos)?;
        state.pos = usize::try_from(target)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "seek out of range"))?;
        Ok(target)
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().closed = true;
        Ok(())
    }

    fn stat(&mut self, av_type: AvType, event: &StatEvent) -> io::Result<()> {
        tracing::trace!(av_type = %av_type, event = ?event, "Output stat");
        self.state.lock().events.push(*event);
        Ok(())
    }
}

/// Snapshot of one artifact produced through a [`MemoryOutputOpener`]
#[derive(Debug, Clone)]
pub struct MemoryArtifact {
    /// Routing parameters the artifact was opened with
    pub request: OutputRequest,
    /// Bytes written so far
    pub data: Bytes,
    /// Whether the bridge closed the artifact
    pub closed: bool,
    /// Stat events delivered to the artifact
    pub events: Vec<StatEvent>,
}

/// Opener that keeps every artifact in memory
#[derive(Default)]
pub struct MemoryOutputOpener {
    artifacts: Mutex<Vec<Arc<Mutex<ArtifactState>>>>,
    write_limit: usize,
}

impl MemoryOutputOpener {
    /// Create an empty opener
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept at most `limit` bytes per write on every artifact
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = limit;
        self
    }

    /// Snapshot of every artifact, in open order
    pub fn artifacts(&self) -> Vec<MemoryArtifact> {
        self.artifacts
            .lock()
            .iter()
            .map(|state| {
                let state = state.lock();
                MemoryArtifact {
                    request: state.request,
                    data: Bytes::copy_from_slice(&state.data),
                    closed: state.closed,
                    events: state.events.clone(),
                }
            })
            .collect()
    }

    /// Snapshot of the artifacts belonging to one session
    pub fn artifacts_for(&self, handle: Handle) -> Vec<MemoryArtifact> {
        self.artifacts()
            .into_iter()
            .filter(|a| a.request.handle == handle)
            .collect()
    }
}

impl OutputOpener for MemoryOutputOpener {
    fn open(&self, request: &OutputRequest) -> Result<Box<dyn OutputHandler>, OpenError> {
        let state = Arc::new(Mutex::new(ArtifactState {
            request: *request,
            data: BytesMut::new(),
            pos: 0,
            closed: false,
            events: Vec::new(),
        }));
        self.artifacts.lock().push(Arc::clone(&state));

        Ok(Box::new(MemoryOutput {
            state,
            write_limit: self.write_limit,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Fd;

    fn request(av_type: AvType) -> OutputRequest {
        OutputRequest {
            handle: Handle::from_raw(1).unwrap(),
            fd: Fd::from_raw(0).unwrap(),
            stream_index: 0,
            seg_index: 1,
            pts: 0,
            av_type,
        }
    }

    #[test]
    fn test_chunked_reads_then_eof() {
        let mut input = MemoryInput::new(vec![7u8; 10]).chunked(4);
        let mut buf = [0u8; 8];

        assert_eq!(input.read(&mut buf).unwrap(), 4);
        assert_eq!(input.read(&mut buf).unwrap(), 4);
        assert_eq!(input.read(&mut buf).unwrap(), 2);
        assert_eq!(input.read(&mut buf).unwrap(), 0);
        assert_eq!(input.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_input_seek() {
        let mut input = MemoryInput::new(Bytes::from_static(b"0123456789"));
        assert_eq!(input.seek(SeekFrom::End(-3)).unwrap(), 7);

        let mut buf = [0u8; 8];
        let n = input.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"789");

        assert!(input.seek(SeekFrom::Current(-20)).is_err());
        assert_eq!(input.position(), 10);
    }

    #[test]
    fn test_opener_unknown_url() {
        let opener = MemoryInputOpener::new().with_source("mem://a", vec![1u8]);
        assert!(opener.open("mem://a").is_ok());
        assert!(matches!(
            opener.open("mem://missing"),
            Err(OpenError::NotFound(_))
        ));
    }

    #[test]
    fn test_output_overwrite_after_seek() {
        let opener = MemoryOutputOpener::new();
        let mut out = opener.open(&request(AvType::RawContainer)).unwrap();

        out.write(b"hello world").unwrap();
        out.seek(SeekFrom::Start(0)).unwrap();
        out.write(b"HELLO").unwrap();
        out.close().unwrap();

        let artifacts = opener.artifacts();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(&artifacts[0].data[..], b"HELLO world");
        assert!(artifacts[0].closed);
    }

    #[test]
    fn test_output_write_limit() {
        let opener = MemoryOutputOpener::new().with_write_limit(3);
        let mut out = opener.open(&request(AvType::VideoSegment)).unwrap();

        assert_eq!(out.write(b"abcdef").unwrap(), 3);
        assert_eq!(&opener.artifacts()[0].data[..], b"abc");
    }

    #[test]
    fn test_output_write_after_close_fails() {
        let opener = MemoryOutputOpener::new();
        let mut out = opener.open(&request(AvType::Manifest)).unwrap();
        out.close().unwrap();
        assert!(out.write(b"x").is_err());
    }
}
