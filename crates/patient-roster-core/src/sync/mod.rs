//! Live roster synchronization.
//!
//! [`RosterSync`] is the pure state machine: one full fetch on start, a
//! STOMP subscription to the patients topic, a re-fetch after every
//! handshake, and wholesale replacement of the roster on every update.
//! [`SyncSession`] drives it on tokio and exposes a [`SyncHandle`].

mod event;
mod machine;
mod session;
mod state;

pub use event::*;
pub use machine::*;
pub use session::*;
pub use state::*;
