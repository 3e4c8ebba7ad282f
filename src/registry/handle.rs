//! Handle and fd identifiers
//!
//! Both cross the native boundary as plain integers. Values that cannot be
//! valid (`<= 0` for handles, `< 0` for fds) never become a [`Handle`] or
//! [`Fd`], so the "no handle" case is always an explicit `None`.

use std::fmt;

/// Opaque session handle handed to the native engine
///
/// Positive, process-unique within one registry, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(i64);

impl Handle {
    /// Decode a raw handle, rejecting the `<= 0` "no handle" range
    pub fn from_raw(raw: i64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    /// Raw value as passed across the boundary
    pub fn as_raw(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Output sub-channel id, scoped to one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(i32);

impl Fd {
    /// Decode a raw fd, rejecting negative values
    pub fn from_raw(raw: i32) -> Option<Self> {
        (raw >= 0).then_some(Self(raw))
    }

    /// Raw value as passed across the boundary
    pub fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
