//! Handle registry implementation

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::handle::Handle;
use crate::error::{BridgeError, Result};

struct Inner<T> {
    /// Last handle handed out; the next one is `last + 1`
    last: i64,
    /// Handles reserved but not yet committed
    pending: usize,
    entries: HashMap<Handle, Arc<T>>,
    /// Set by `drain`; no reservation succeeds or commits afterwards
    sealed: bool,
}

/// Concurrency-safe map from handles to shared entries
///
/// Handles come from a counter that only moves forward under the same lock
/// that guards the map, so a released handle is never handed out again.
pub struct HandleRegistry<T> {
    inner: Mutex<Inner<T>>,

    /// Maximum live entries (0 = unlimited)
    max_entries: usize,
}

impl<T> HandleRegistry<T> {
    /// Create an unlimited registry
    pub fn new() -> Self {
        Self::with_limit(0)
    }

    /// Create a registry that holds at most `max_entries` live entries
    pub fn with_limit(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                last: 0,
                pending: 0,
                entries: HashMap::new(),
                sealed: false,
            }),
            max_entries,
        }
    }

    /// Claim the next handle so an entry can be built around it
    ///
    /// Fails only when a limit is configured and reached. The handle stays
    /// unresolvable until [`HandleReservation::commit`].
    pub fn reserve(&self) -> Result<HandleReservation<'_, T>> {
        let mut inner = self.inner.lock();

        if inner.sealed {
            return Err(BridgeError::Closed("registry"));
        }
        if self.max_entries > 0 && inner.entries.len() + inner.pending >= self.max_entries {
            return Err(BridgeError::LimitReached("sessions"));
        }

        let raw = inner
            .last
            .checked_add(1)
            .ok_or(BridgeError::LimitReached("handles"))?;
        let handle = Handle::from_raw(raw).ok_or(BridgeError::LimitReached("handles"))?;
        inner.last = raw;
        inner.pending += 1;

        Ok(HandleReservation {
            registry: self,
            handle,
            committed: false,
        })
    }

    /// Insert an entry and return its new handle
    pub fn allocate(&self, value: T) -> Result<Handle> {
        let reservation = self.reserve()?;
        let handle = reservation.handle();
        reservation
            .commit(value)
            .map_err(|_| BridgeError::Closed("registry"))?;
        Ok(handle)
    }

    /// Resolve a handle
    pub fn lookup(&self, handle: Handle) -> Result<Arc<T>> {
        self.inner
            .lock()
            .entries
            .get(&handle)
            .cloned()
            .ok_or(BridgeError::HandleNotFound(handle))
    }

    /// Remove a handle, returning its entry
    ///
    /// Releasing an unknown or already released handle is reported as
    /// `HandleNotFound` and has no other effect.
    pub fn release(&self, handle: Handle) -> Result<Arc<T>> {
        self.inner
            .lock()
            .entries
            .remove(&handle)
            .ok_or(BridgeError::HandleNotFound(handle))
    }

    /// Check whether a handle is live
    pub fn contains(&self, handle: Handle) -> bool {
        self.inner.lock().entries.contains_key(&handle)
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// True when no entry is live
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total handles ever allocated
    pub fn allocated(&self) -> u64 {
        self.inner.lock().last as u64
    }

    /// Remove every entry, returning them in handle order
    ///
    /// The registry is sealed afterwards: new reservations fail and
    /// reservations still outstanding cannot commit.
    pub fn drain(&self) -> Vec<(Handle, Arc<T>)> {
        let mut inner = self.inner.lock();
        inner.sealed = true;
        let mut drained: Vec<_> = inner.entries.drain().collect();
        drop(inner);
        drained.sort_by_key(|(handle, _)| *handle);
        drained
    }
}

/// A handle claimed from a [`HandleRegistry`]
///
/// Dropping it without committing frees the capacity; the handle number is
/// never handed out again.
pub struct HandleReservation<'a, T> {
    registry: &'a HandleRegistry<T>,
    handle: Handle,
    committed: bool,
}

impl<T> HandleReservation<'_, T> {
    /// The reserved handle
    pub fn handle(&self) -> Handle {
        self.handle
    }

    /// Publish `value` under the reserved handle
    ///
    /// Hands `value` back if the registry was drained in the meantime.
    pub fn commit(mut self, value: T) -> std::result::Result<Arc<T>, T> {
        let mut inner = self.registry.inner.lock();
        inner.pending -= 1;
        self.committed = true;
        if inner.sealed {
            return Err(value);
        }
        let entry = Arc::new(value);
        inner.entries.insert(self.handle, Arc::clone(&entry));
        Ok(entry)
    }
}

impl<T> Drop for HandleReservation<'_, T> {
    fn drop(&mut self) {
        if !self.committed {
            self.registry.inner.lock().pending -= 1;
        }
    }
}

impl<T> Default for HandleRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
