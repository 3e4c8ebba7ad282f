//! Bridged sessions
//!
//! A [`Session`] is what a handle resolves to: one input binding plus the
//! table of output sub-channels the engine has opened against it.

pub mod entry;
pub(crate) mod output;
pub mod state;

pub use entry::Session;
pub use state::{OutputState, SessionPhase};
