//! Session entry
//!
//! A session binds exactly one input handler for its whole life and a
//! changing set of output sub-channels. Every operation here runs on the
//! calling engine thread and returns once the handler call returns.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::output::{OutputSlot, OutputTable};
use super::state::{PhaseCell, SessionPhase};
use crate::error::{BridgeError, Result};
use crate::handler::{AvType, InputHandler, OutputOpener, OutputRequest, Whence};
use crate::registry::{Fd, Handle};
use crate::stats::metrics::SessionCounters;
use crate::stats::{SessionStats, StatEvent};

/// State of one bridged session
pub struct Session {
    handle: Handle,
    url: String,
    size: i64,
    phase: PhaseCell,
    input: Mutex<Box<dyn InputHandler>>,
    /// Input stat events that arrived while the input was busy
    queued_stats: Mutex<VecDeque<StatEvent>>,
    /// Set under the input lock once the handler's `close` ran
    input_closed: AtomicBool,
    outputs: OutputTable,
    output_opener: Arc<dyn OutputOpener>,
    counters: SessionCounters,
    lenient_eof: bool,
}

impl Session {
    pub(crate) fn new(
        handle: Handle,
        url: String,
        input: Box<dyn InputHandler>,
        output_opener: Arc<dyn OutputOpener>,
        max_outputs: usize,
        lenient_eof: bool,
    ) -> Self {
        let size = input.size();
        Self {
            handle,
            url,
            size,
            phase: PhaseCell::new(SessionPhase::Opening),
            input: Mutex::new(input),
            queued_stats: Mutex::new(VecDeque::new()),
            input_closed: AtomicBool::new(false),
            outputs: OutputTable::new(handle, max_outputs),
            output_opener,
            counters: SessionCounters::default(),
            lenient_eof,
        }
    }

    /// Mark the session reachable; called once its handle is published
    pub(crate) fn activate(&self) {
        self.phase
            .transition(SessionPhase::Opening, SessionPhase::Active);
    }

    /// Session handle
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// URL the input was opened from
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Input size as reported at open time, -1 if unknown
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Current lifecycle phase
    pub fn phase(&self) -> SessionPhase {
        self.phase.get()
    }

    /// I/O counters
    pub fn stats(&self) -> SessionStats {
        self.counters.snapshot()
    }

    /// Currently open output fds, ascending
    pub fn open_fds(&self) -> Vec<Fd> {
        self.outputs.open_fds()
    }

    fn ensure_active(&self) -> Result<()> {
        match self.phase.get() {
            SessionPhase::Active => Ok(()),
            _ => Err(BridgeError::Closed("session")),
        }
    }

    /// Read from the input
    ///
    /// `Ok(0)` is end of stream and stays `Ok(0)` on every later call.
    pub fn read_input(&self, buf: &mut [u8]) -> Result<usize> {
        let mut input = self.input.lock();
        let result = self.ensure_active().and_then(|()| match input.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if self.lenient_eof && e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::warn!(
                    handle = %self.handle,
                    error = %e,
                    "Input reported EOF as an error, treating as end of stream"
                );
                Ok(0)
            }
            Err(e) => Err(e.into()),
        });
        self.release_input(input);
        let n = result?;

        self.counters.add_read(n);
        tracing::trace!(handle = %self.handle, requested = buf.len(), n = n, "Input read");
        Ok(n)
    }

    /// Seek the input, or report its size for [`Whence::Size`]
    pub fn seek_input(&self, offset: i64, whence: Whence) -> Result<u64> {
        let target = whence.seek_from(offset)?;

        let mut input = self.input.lock();
        let result = self.ensure_active().and_then(|()| match target {
            Some(pos) => Ok(input.seek(pos)?),
            None => u64::try_from(input.size())
                .map_err(|_| BridgeError::invalid("input size is unknown")),
        });
        self.release_input(input);
        let pos = result?;

        tracing::trace!(handle = %self.handle, offset = offset, whence = ?whence, pos = pos, "Input seek");
        Ok(pos)
    }

    /// Close the session input
    ///
    /// Outputs still open are closed first. Only the first call reaches the
    /// input handler; later calls fail with [`BridgeError::Closed`].
    pub fn close_input(&self) -> Result<()> {
        let closed = self
            .phase
            .transition(SessionPhase::Active, SessionPhase::Closed)
            || self
                .phase
                .transition(SessionPhase::Opening, SessionPhase::Closed);
        if !closed {
            return Err(BridgeError::Closed("session"));
        }

        let leftover = self.outputs.drain();
        if !leftover.is_empty() {
            tracing::warn!(
                handle = %self.handle,
                outputs = leftover.len(),
                "Closing session with outputs still open"
            );
        }
        for (fd, slot) in leftover {
            if let Err(e) = slot.lock().close() {
                tracing::debug!(handle = %self.handle, fd = %fd, error = %e, "Output close failed");
            }
            self.counters.output_closed();
        }

        let mut input = self.input.lock();
        self.deliver_queued(&mut **input);
        let result = input.close();
        self.input_closed.store(true, Ordering::Release);
        drop(input);

        tracing::debug!(
            handle = %self.handle,
            url = %self.url,
            ok = result.is_ok(),
            "Session input closed"
        );
        Ok(result?)
    }

    /// Open an output sub-channel through the output opener
    pub fn open_output(
        &self,
        stream_index: i32,
        seg_index: i32,
        pts: i64,
        av_type: AvType,
    ) -> Result<Fd> {
        self.ensure_active()?;

        let reservation = self.outputs.reserve()?;
        let request = OutputRequest {
            handle: self.handle,
            fd: reservation.fd(),
            stream_index,
            seg_index,
            pts,
            av_type,
        };

        let handler = self.output_opener.open(&request).map_err(|e| {
            tracing::debug!(
                handle = %self.handle,
                av_type = %av_type,
                error = %e,
                "Output opener failed"
            );
            e
        })?;

        let fd = reservation.fd();
        if let Err(mut slot) = reservation.commit(OutputSlot::new(handler, request)) {
            tracing::debug!(handle = %self.handle, fd = %fd, "Session closed while output was opening");
            if let Err(e) = slot.close() {
                tracing::debug!(handle = %self.handle, fd = %fd, error = %e, "Output close failed");
            }
            return Err(BridgeError::Closed("session"));
        }
        self.counters.output_opened();

        tracing::debug!(
            handle = %self.handle,
            fd = %fd,
            stream_index = stream_index,
            seg_index = seg_index,
            av_type = %av_type,
            "Output opened"
        );
        Ok(fd)
    }

    /// Write to an open output; partial counts are returned as-is
    pub fn write_output(&self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let slot = self.outputs.get(fd)?;
        let n = slot.lock().write(buf)?;

        self.counters.add_written(n);
        tracing::trace!(handle = %self.handle, fd = %fd, offered = buf.len(), n = n, "Output write");
        Ok(n)
    }

    /// Seek an open output
    pub fn seek_output(&self, fd: Fd, offset: i64, whence: Whence) -> Result<u64> {
        let pos = whence
            .seek_from(offset)?
            .ok_or_else(|| BridgeError::invalid("size query is not supported on outputs"))?;

        let slot = self.outputs.get(fd)?;
        let pos = slot.lock().seek(pos)?;

        tracing::trace!(handle = %self.handle, fd = %fd, pos = pos, "Output seek");
        Ok(pos)
    }

    /// Close an output and drop it from the table
    pub fn close_output(&self, fd: Fd) -> Result<()> {
        let slot = self.outputs.remove(fd)?;
        let mut slot = slot.lock();
        let result = slot.close();
        self.counters.output_closed();

        tracing::debug!(
            handle = %self.handle,
            fd = %fd,
            av_type = %slot.request().av_type,
            ok = result.is_ok(),
            "Output closed"
        );
        result
    }

    /// Forward a stat event to the input (`fd == None`) or to one output
    ///
    /// Never waits on an in-flight input read or seek: the event is queued
    /// and delivered by whichever call releases the input next, in order.
    pub fn report_stat(&self, fd: Option<Fd>, event: &StatEvent) -> Result<()> {
        let Some(fd) = fd else {
            self.ensure_active()?;
            return match self.input.try_lock() {
                Some(mut input) => {
                    if self.input_closed.load(Ordering::Acquire) {
                        return Err(BridgeError::Closed("session"));
                    }
                    self.deliver_queued(&mut **input);
                    let result = input.stat(event);
                    self.release_input(input);
                    Ok(result?)
                }
                None => {
                    self.queued_stats.lock().push_back(*event);
                    // the holder may have let go before the push
                    if let Some(input) = self.input.try_lock() {
                        self.release_input(input);
                    }
                    Ok(())
                }
            };
        };
        self.outputs.get(fd)?.lock().stat(event)
    }

    /// Unlock the input, delivering stat events queued while it was held
    fn release_input(&self, mut input: MutexGuard<'_, Box<dyn InputHandler>>) {
        self.deliver_queued(&mut **input);
        drop(input);

        while !self.queued_stats.lock().is_empty() {
            match self.input.try_lock() {
                Some(mut input) => self.deliver_queued(&mut **input),
                None => break,
            }
        }
    }

    fn deliver_queued(&self, input: &mut dyn InputHandler) {
        loop {
            let Some(event) = self.queued_stats.lock().pop_front() else {
                return;
            };
            if self.input_closed.load(Ordering::Acquire) {
                continue;
            }
            if let Err(e) = input.stat(&event) {
                tracing::debug!(handle = %self.handle, kind = ?event.kind(), error = %e, "Input stat failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::SeekFrom;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::error::OpenError;
    use crate::handler::{MemoryInput, MemoryOutputOpener, OutputHandler};

    /// Input whose reads block until the test opens the gate
    struct GatedInput {
        started: mpsc::Sender<()>,
        gate: mpsc::Receiver<()>,
        events: Arc<Mutex<Vec<StatEvent>>>,
    }

    impl InputHandler for GatedInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            let _ = self.started.send(());
            let _ = self.gate.recv();
            Ok(0)
        }

        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn size(&self) -> i64 {
            -1
        }

        fn stat(&mut self, event: &StatEvent) -> io::Result<()> {
            self.events.lock().push(*event);
            Ok(())
        }
    }

    /// Opener that blocks until the test opens the gate
    struct GatedOpener {
        started: Mutex<mpsc::Sender<()>>,
        gate: Mutex<mpsc::Receiver<()>>,
        closed: Arc<AtomicBool>,
    }

    impl OutputOpener for GatedOpener {
        fn open(
            &self,
            _request: &OutputRequest,
        ) -> std::result::Result<Box<dyn OutputHandler>, OpenError> {
            let _ = self.started.lock().send(());
            let _ = self.gate.lock().recv();
            Ok(Box::new(FlaggedOutput(Arc::clone(&self.closed))))
        }
    }

    struct FlaggedOutput(Arc<AtomicBool>);

    impl OutputHandler for FlaggedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }

        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }

        fn close(&mut self) -> io::Result<()> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingInput;

    impl InputHandler for FailingInput {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::UnexpectedEof))
        }

        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Err(io::Error::other("not seekable"))
        }

        fn close(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn size(&self) -> i64 {
            -1
        }
    }

    fn session(input: Box<dyn InputHandler>, opener: Arc<MemoryOutputOpener>) -> Session {
        let session = Session::new(
            Handle::from_raw(1).unwrap(),
            "mem://test".to_string(),
            input,
            opener,
            0,
            true,
        );
        session.activate();
        session
    }

    #[test]
    fn test_read_until_eof() {
        let opener = Arc::new(MemoryOutputOpener::new());
        let session = session(Box::new(MemoryInput::new(vec![1u8; 10_000]).chunked(4096)), opener);

        let mut buf = vec![0u8; 8192];
        let mut reads = Vec::new();
        loop {
            let n = session.read_input(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            reads.push(n);
        }

        assert_eq!(reads, vec![4096, 4096, 1808]);
        assert_eq!(reads.iter().sum::<usize>(), 10_000);
        assert_eq!(session.read_input(&mut buf).unwrap(), 0);
        assert_eq!(session.stats().bytes_read, 10_000);
    }

    #[test]
    fn test_lenient_eof() {
        let opener = Arc::new(MemoryOutputOpener::new());
        let session = session(Box::new(FailingInput), opener);

        let mut buf = [0u8; 16];
        assert_eq!(session.read_input(&mut buf).unwrap(), 0);
        assert!(matches!(
            session.seek_input(0, Whence::Start),
            Err(BridgeError::Io(_))
        ));
        assert!(matches!(
            session.seek_input(0, Whence::Size),
            Err(BridgeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_seek_and_size_query() {
        let opener = Arc::new(MemoryOutputOpener::new());
        let session = session(Box::new(MemoryInput::new(vec![0u8; 500])), opener);

        assert_eq!(session.size(), 500);
        assert_eq!(session.seek_input(100, Whence::Start).unwrap(), 100);
        assert_eq!(session.seek_input(-50, Whence::End).unwrap(), 450);
        assert_eq!(session.seek_input(0, Whence::Size).unwrap(), 500);
        assert_eq!(session.seek_input(0, Whence::Current).unwrap(), 450);
    }

    #[test]
    fn test_output_lifecycle() {
        let opener = Arc::new(MemoryOutputOpener::new());
        let session = session(Box::new(MemoryInput::new(vec![0u8; 1])), Arc::clone(&opener));

        let fd = session.open_output(0, 1, 0, AvType::VideoSegment).unwrap();
        assert_eq!(session.write_output(fd, b"abcd").unwrap(), 4);
        assert_eq!(session.seek_output(fd, 0, Whence::Start).unwrap(), 0);
        assert!(session.seek_output(fd, 0, Whence::Size).is_err());
        session.close_output(fd).unwrap();

        assert!(session.write_output(fd, b"x").unwrap_err().is_not_found());
        assert!(session.seek_output(fd, 0, Whence::Start).unwrap_err().is_not_found());
        assert!(session.close_output(fd).unwrap_err().is_not_found());

        let artifacts = opener.artifacts();
        assert_eq!(&artifacts[0].data[..], b"abcd");
        assert!(artifacts[0].closed);
        assert_eq!(artifacts[0].request.fd, fd);
    }

    #[test]
    fn test_fds_unique_across_three_streams() {
        let opener = Arc::new(MemoryOutputOpener::new());
        let session = session(Box::new(MemoryInput::new(vec![0u8; 1])), opener);

        let mut fds = Vec::new();
        for seg in 1..=3 {
            for stream in 0..3 {
                fds.push(session.open_output(stream, seg, 0, AvType::VideoSegment).unwrap());
            }
        }

        let mut sorted = fds.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 9);
        assert_eq!(session.open_fds(), sorted);
    }

    #[test]
    fn test_close_input_closes_outputs_and_is_terminal() {
        let opener = Arc::new(MemoryOutputOpener::new());
        let session = session(Box::new(MemoryInput::new(vec![0u8; 1])), Arc::clone(&opener));

        session.open_output(0, 1, 0, AvType::AudioSegment).unwrap();
        session.open_output(1, 1, 0, AvType::VideoSegment).unwrap();

        session.close_input().unwrap();
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(session.open_fds().is_empty());
        assert!(opener.artifacts().iter().all(|a| a.closed));
        assert_eq!(session.stats().outputs_open, 0);

        assert!(matches!(session.close_input(), Err(BridgeError::Closed(_))));
        let mut buf = [0u8; 4];
        assert!(matches!(
            session.read_input(&mut buf),
            Err(BridgeError::Closed(_))
        ));
        assert!(session.open_output(0, 2, 0, AvType::AudioSegment).is_err());
    }

    #[test]
    fn test_stat_routing() {
        let opener = Arc::new(MemoryOutputOpener::new());
        let session = session(Box::new(MemoryInput::new(vec![0u8; 1])), Arc::clone(&opener));

        session.report_stat(None, &StatEvent::BytesRead(10)).unwrap();

        let fd = session.open_output(0, 1, 0, AvType::FragmentedVideoSegment).unwrap();
        session
            .report_stat(Some(fd), &StatEvent::EncodingEndPts(9000))
            .unwrap();
        assert_eq!(
            opener.artifacts()[0].events,
            vec![StatEvent::EncodingEndPts(9000)]
        );

        let unknown = Fd::from_raw(42).unwrap();
        assert!(session
            .report_stat(Some(unknown), &StatEvent::BytesWritten(1))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_output_opened_during_close_is_closed() {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let closed = Arc::new(AtomicBool::new(false));
        let opener = GatedOpener {
            started: Mutex::new(started_tx),
            gate: Mutex::new(gate_rx),
            closed: Arc::clone(&closed),
        };

        let session = Arc::new(Session::new(
            Handle::from_raw(1).unwrap(),
            "mem://test".to_string(),
            Box::new(MemoryInput::new(vec![0u8; 1])),
            Arc::new(opener),
            0,
            true,
        ));
        session.activate();

        let opening = {
            let session = Arc::clone(&session);
            thread::spawn(move || session.open_output(0, 1, 0, AvType::VideoSegment))
        };
        started_rx.recv().unwrap();

        session.close_input().unwrap();
        gate_tx.send(()).unwrap();

        let result = opening.join().unwrap();
        assert!(matches!(result, Err(BridgeError::Closed(_))));
        assert!(closed.load(Ordering::SeqCst));
        assert!(session.open_fds().is_empty());
        assert_eq!(session.stats().outputs_open, 0);
    }

    #[test]
    fn test_input_stat_does_not_wait_for_read() {
        let (started_tx, started_rx) = mpsc::channel();
        let (gate_tx, gate_rx) = mpsc::channel();
        let events = Arc::new(Mutex::new(Vec::new()));
        let input = GatedInput {
            started: started_tx,
            gate: gate_rx,
            events: Arc::clone(&events),
        };

        let session = Arc::new(Session::new(
            Handle::from_raw(1).unwrap(),
            "mem://test".to_string(),
            Box::new(input),
            Arc::new(MemoryOutputOpener::new()),
            0,
            true,
        ));
        session.activate();

        let reader = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let mut buf = [0u8; 16];
                session.read_input(&mut buf)
            })
        };
        started_rx.recv().unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let reporter = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                session.report_stat(None, &StatEvent::BytesRead(1)).unwrap();
                session.report_stat(None, &StatEvent::BytesRead(2)).unwrap();
                done_tx.send(()).unwrap();
            })
        };

        assert!(done_rx.recv_timeout(Duration::from_secs(5)).is_ok());
        assert!(events.lock().is_empty());

        gate_tx.send(()).unwrap();
        assert_eq!(reader.join().unwrap().unwrap(), 0);
        reporter.join().unwrap();

        assert_eq!(
            *events.lock(),
            vec![StatEvent::BytesRead(1), StatEvent::BytesRead(2)]
        );
    }

    #[test]
    fn test_queued_stats_dropped_after_close() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (started_tx, _started_rx) = mpsc::channel();
        let (_gate_tx, gate_rx) = mpsc::channel();
        let session = Session::new(
            Handle::from_raw(1).unwrap(),
            "mem://test".to_string(),
            Box::new(GatedInput {
                started: started_tx,
                gate: gate_rx,
                events: Arc::clone(&events),
            }),
            Arc::new(MemoryOutputOpener::new()),
            0,
            true,
        );
        session.activate();

        session.report_stat(None, &StatEvent::VideoFramesRead(3)).unwrap();
        session.close_input().unwrap();
        assert!(matches!(
            session.report_stat(None, &StatEvent::VideoFramesRead(4)),
            Err(BridgeError::Closed(_))
        ));
        assert_eq!(*events.lock(), vec![StatEvent::VideoFramesRead(3)]);
    }
}
