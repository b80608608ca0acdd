//! Events ingested by the synchronizer and the actions it requests.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::api::RequestError;
use crate::models::Roster;
use crate::stomp::TransportEvent;

/// Why a full-roster fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Initial fetch on start.
    Snapshot,
    /// Fetch after a handshake, closing the gap before the subscription.
    Resync,
    /// Explicit refresh.
    Manual,
}

/// Where the visible roster came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateSource {
    Fetch(FetchKind),
    Stream,
}

/// Time and origin of the last roster replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterUpdate {
    pub at: DateTime<Utc>,
    pub source: UpdateSource,
}

/// Errors reported to the log sink. None of them ends the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Discarded malformed roster message: {0}")]
    MessageParse(String),

    #[error("Roster fetch failed: {0}")]
    Request(#[from] RequestError),
}

/// Everything the synchronizer reacts to, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    Start,
    Refresh,
    FetchCompleted {
        kind: FetchKind,
        result: Result<Roster, RequestError>,
    },
    Transport(TransportEvent),
    Stop,
}

impl From<TransportEvent> for SyncEvent {
    fn from(event: TransportEvent) -> Self {
        SyncEvent::Transport(event)
    }
}

/// Side effects requested by the synchronizer, executed by its driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    FetchRoster(FetchKind),
    Activate,
    Subscribe { id: String, topic: String },
    Unsubscribe { id: String },
    Deactivate,
    Report(SyncError),
}
