//! Handle registry
//!
//! Maps opaque session handles to session state. The registry is the single
//! source of truth for whether a handle is live: a lookup either yields the
//! entry or an explicit not-found error, never a dangling value.
//!
//! # Locking
//!
//! ```text
//!            HandleRegistry<T>
//!     ┌──────────────────────────────┐
//!     │ Mutex<{ last, pending,       │
//!     │         entries: HashMap<    │
//!     │           Handle, Arc<T>> }> │
//!     └──────────────┬───────────────┘
//!                    │ lookup() clones the Arc,
//!                    │ lock is dropped before any I/O
//!          ┌─────────┼─────────┐
//!          ▼         ▼         ▼
//!      [thread]  [thread]  [thread]  ── handler.read()/write()
//! ```
//!
//! The lock only ever guards the map itself, so a slow handler on one
//! session never stalls allocation or lookup for another.

pub mod handle;
pub mod store;

pub use handle::{Fd, Handle};
pub use store::{HandleRegistry, HandleReservation};
