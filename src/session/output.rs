//! Per-session table of open output sub-channels
//!
//! The table lock covers map access and fd assignment only. Each
//! sub-channel carries its own mutex, held for the duration of that fd's
//! handler call, so two writes to the same fd never overlap while writes to
//! different fds proceed in parallel.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::Arc;

use parking_lot::Mutex;

use super::state::OutputState;
use crate::error::{BridgeError, Result};
use crate::handler::{OutputHandler, OutputRequest};
use crate::registry::{Fd, Handle};
use crate::stats::StatEvent;

/// One open output artifact
pub(crate) struct OutputSlot {
    handler: Box<dyn OutputHandler>,
    request: OutputRequest,
    state: OutputState,
}

impl OutputSlot {
    pub(crate) fn new(handler: Box<dyn OutputHandler>, request: OutputRequest) -> Self {
        Self {
            handler,
            request,
            state: OutputState::Open,
        }
    }

    pub(crate) fn request(&self) -> &OutputRequest {
        &self.request
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            OutputState::Open => Ok(()),
            OutputState::Closed => Err(BridgeError::Closed("output")),
        }
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.handler.write(buf)?)
    }

    pub(crate) fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.handler.seek(pos)?)
    }

    pub(crate) fn stat(&mut self, event: &StatEvent) -> Result<()> {
        self.ensure_open()?;
        Ok(self.handler.stat(self.request.av_type, event)?)
    }

    /// Close the handler; the slot is terminal afterwards even if closing fails
    pub(crate) fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.state = OutputState::Closed;
        Ok(self.handler.close()?)
    }
}

pub(crate) type SharedSlot = Arc<Mutex<OutputSlot>>;

struct TableInner {
    next_fd: i32,
    /// fds handed out whose opener call is still running
    pending: usize,
    open: HashMap<Fd, SharedSlot>,
    /// Set once the owning session has drained the table
    sealed: bool,
}

/// Open output sub-channels of one session
pub(crate) struct OutputTable {
    handle: Handle,
    inner: Mutex<TableInner>,
    /// Maximum concurrently open outputs (0 = unlimited)
    max_open: usize,
}

impl OutputTable {
    pub(crate) fn new(handle: Handle, max_open: usize) -> Self {
        Self {
            handle,
            inner: Mutex::new(TableInner {
                next_fd: 0,
                pending: 0,
                open: HashMap::new(),
                sealed: false,
            }),
            max_open,
        }
    }

    /// Claim the next fd ahead of calling the opener
    ///
    /// fds come from a per-session counter and are never reused, whatever
    /// the stream or segment index.
    pub(crate) fn reserve(&self) -> Result<FdReservation<'_>> {
        let mut inner = self.inner.lock();

        if inner.sealed {
            return Err(BridgeError::Closed("session"));
        }
        if self.max_open > 0 && inner.open.len() + inner.pending >= self.max_open {
            return Err(BridgeError::LimitReached("outputs per session"));
        }

        let fd = Fd::from_raw(inner.next_fd).ok_or(BridgeError::LimitReached("fds"))?;
        inner.next_fd = inner.next_fd.checked_add(1).unwrap_or(-1);
        inner.pending += 1;

        Ok(FdReservation {
            table: self,
            fd,
            committed: false,
        })
    }

    pub(crate) fn get(&self, fd: Fd) -> Result<SharedSlot> {
        self.inner
            .lock()
            .open
            .get(&fd)
            .cloned()
            .ok_or(BridgeError::FdNotFound {
                handle: self.handle,
                fd,
            })
    }

    pub(crate) fn remove(&self, fd: Fd) -> Result<SharedSlot> {
        self.inner
            .lock()
            .open
            .remove(&fd)
            .ok_or(BridgeError::FdNotFound {
                handle: self.handle,
                fd,
            })
    }

    /// Remove every open slot, in fd order, and refuse any further commit
    ///
    /// A reservation still waiting on its opener fails to commit afterwards.
    pub(crate) fn drain(&self) -> Vec<(Fd, SharedSlot)> {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        let mut drained: Vec<_> = inner.open.drain().collect();
        drop(inner);
        drained.sort_by_key(|(fd, _)| *fd);
        drained
    }

    pub(crate) fn open_fds(&self) -> Vec<Fd> {
        let mut fds: Vec<_> = self.inner.lock().open.keys().copied().collect();
        fds.sort();
        fds
    }
}

/// An fd claimed from an [`OutputTable`]
///
/// Dropping it without [`commit`](FdReservation::commit) gives the slot
/// capacity back; the fd number itself stays burned.
pub(crate) struct FdReservation<'a> {
    table: &'a OutputTable,
    fd: Fd,
    committed: bool,
}

impl FdReservation<'_> {
    pub(crate) fn fd(&self) -> Fd {
        self.fd
    }

    /// Publish `slot` under the reserved fd
    ///
    /// Hands the slot back if the table was drained in the meantime.
    pub(crate) fn commit(mut self, slot: OutputSlot) -> std::result::Result<(), OutputSlot> {
        let mut inner = self.table.inner.lock();
        inner.pending -= 1;
        self.committed = true;
        if inner.sealed {
            return Err(slot);
        }
        inner.open.insert(self.fd, Arc::new(Mutex::new(slot)));
        Ok(())
    }
}

impl Drop for FdReservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.table.inner.lock().pending -= 1;
        }
    }
}
