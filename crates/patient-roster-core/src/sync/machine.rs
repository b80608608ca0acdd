//! The roster synchronization state machine.
//!
//! Pure: no I/O, no clock other than `Utc::now()` for update stamps. Every
//! input goes through [`RosterSync::ingest`], which returns the side effects
//! for the driver to perform.
//!
//! Both the fetch path and the stream path replace the roster wholesale, so
//! whichever completes last wins.

use chrono::Utc;
use tracing::debug;

use super::{
    ConnectionState, FetchKind, RosterUpdate, SyncAction, SyncError, SyncEvent, UpdateSource,
};
use crate::models::Roster;
use crate::stomp::TransportEvent;

/// Default broadcast topic for roster replacements.
pub const PATIENTS_TOPIC: &str = "/topic/patients";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopped,
}

/// Snapshot of the synchronizer published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct RosterView {
    pub roster: Roster,
    pub connection: ConnectionState,
    pub last_update: Option<RosterUpdate>,
    pub error_count: u64,
    pub last_error: Option<String>,
    /// Bumped on every visible change
    pub revision: u64,
    pub stopped: bool,
}

/// Snapshot-then-stream roster synchronizer.
#[derive(Debug)]
pub struct RosterSync {
    topic: String,
    phase: Phase,
    connection: ConnectionState,
    roster: Roster,
    last_update: Option<RosterUpdate>,
    subscription: Option<String>,
    next_subscription: u64,
    error_count: u64,
    last_error: Option<SyncError>,
    revision: u64,
}

impl Default for RosterSync {
    fn default() -> Self {
        Self::new(PATIENTS_TOPIC)
    }
}

impl RosterSync {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            phase: Phase::Idle,
            connection: ConnectionState::Disconnected,
            roster: Roster::empty(),
            last_update: None,
            subscription: None,
            next_subscription: 0,
            error_count: 0,
            last_error: None,
            revision: 0,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn last_update(&self) -> Option<RosterUpdate> {
        self.last_update
    }

    /// Live subscription id, if subscribed on the current connection.
    pub fn subscription(&self) -> Option<&str> {
        self.subscription.as_deref()
    }

    pub fn error_count(&self) -> u64 {
        self.error_count
    }

    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Stopped
    }

    pub fn view(&self) -> RosterView {
        RosterView {
            roster: self.roster.clone(),
            connection: self.connection,
            last_update: self.last_update,
            error_count: self.error_count,
            last_error: self.last_error.as_ref().map(ToString::to_string),
            revision: self.revision,
            stopped: self.is_stopped(),
        }
    }

    /// Apply one event. After stop, every event is ignored.
    pub fn ingest(&mut self, event: SyncEvent) -> Vec<SyncAction> {
        match (self.phase, event) {
            (Phase::Stopped, event) => {
                debug!(?event, "Ignoring event after stop");
                Vec::new()
            }
            (_, SyncEvent::Stop) => self.stop(),
            (Phase::Idle, SyncEvent::Start) => {
                self.phase = Phase::Running;
                self.set_connection(ConnectionState::Connecting);
                vec![SyncAction::FetchRoster(FetchKind::Snapshot), SyncAction::Activate]
            }
            (Phase::Idle, event) => {
                debug!(?event, "Ignoring event before start");
                Vec::new()
            }
            (Phase::Running, SyncEvent::Start) => Vec::new(),
            (Phase::Running, SyncEvent::Refresh) => vec![SyncAction::FetchRoster(FetchKind::Manual)],
            (Phase::Running, SyncEvent::FetchCompleted { kind, result }) => match result {
                Ok(roster) => {
                    self.replace(roster, UpdateSource::Fetch(kind));
                    Vec::new()
                }
                Err(e) => self.report(SyncError::Request(e)),
            },
            (Phase::Running, SyncEvent::Transport(event)) => self.on_transport(event),
        }
    }

    fn on_transport(&mut self, event: TransportEvent) -> Vec<SyncAction> {
        match event {
            TransportEvent::Connecting => {
                if self.connection == ConnectionState::Disconnected {
                    self.set_connection(ConnectionState::Connecting);
                }
                Vec::new()
            }
            TransportEvent::Connected => {
                self.set_connection(ConnectionState::Connected);
                let id = format!("sub-{}", self.next_subscription);
                self.next_subscription += 1;
                self.subscription = Some(id.clone());
                vec![
                    SyncAction::FetchRoster(FetchKind::Resync),
                    SyncAction::Subscribe {
                        id,
                        topic: self.topic.clone(),
                    },
                ]
            }
            TransportEvent::Message { subscription, body } => {
                if self.subscription.as_deref() != Some(subscription.as_str()) {
                    debug!(%subscription, "Dropping message for inactive subscription");
                    return Vec::new();
                }
                match Roster::from_json(&body) {
                    Ok(roster) => {
                        self.replace(roster, UpdateSource::Stream);
                        Vec::new()
                    }
                    Err(e) => self.report(SyncError::MessageParse(e.to_string())),
                }
            }
            TransportEvent::Error(message) => {
                self.drop_connection();
                self.report(SyncError::Transport(message))
            }
            TransportEvent::Closed => {
                self.drop_connection();
                Vec::new()
            }
        }
    }

    fn stop(&mut self) -> Vec<SyncAction> {
        let was_running = self.phase == Phase::Running;
        self.phase = Phase::Stopped;
        self.set_connection(ConnectionState::Disconnected);
        self.revision += 1;

        let mut actions = Vec::new();
        if let Some(id) = self.subscription.take() {
            actions.push(SyncAction::Unsubscribe { id });
        }
        if was_running {
            actions.push(SyncAction::Deactivate);
        }
        actions
    }

    /// The broker forgets subscriptions with the connection.
    fn drop_connection(&mut self) {
        self.subscription = None;
        self.set_connection(ConnectionState::Disconnected);
    }

    fn replace(&mut self, roster: Roster, source: UpdateSource) {
        debug!(patients = roster.len(), ?source, "Roster replaced");
        self.roster = roster;
        self.last_update = Some(RosterUpdate {
            at: Utc::now(),
            source,
        });
        self.revision += 1;
    }

    fn report(&mut self, error: SyncError) -> Vec<SyncAction> {
        self.error_count += 1;
        self.last_error = Some(error.clone());
        self.revision += 1;
        vec![SyncAction::Report(error)]
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.connection != state {
            debug!(from = %self.connection, to = %state, "Connection state changed");
            self.connection = state;
            self.revision += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RequestError;

    const ONE: &str = r#"[{"id":1,"firstName":"Anna","lastName":"Ivanova","dateOfBirth":"1990-05-17"}]"#;
    const TWO: &str = r#"[{"id":1,"firstName":"Anna","lastName":"Ivanova","dateOfBirth":"1990-05-17"},
                         {"id":2,"firstName":"Petr","lastName":"Sidorov","dateOfBirth":"1975-03-09"}]"#;

    fn fetched(payload: &str) -> SyncEvent {
        SyncEvent::FetchCompleted {
            kind: FetchKind::Snapshot,
            result: Ok(Roster::from_json(payload).unwrap()),
        }
    }

    fn message(subscription: &str, body: &str) -> SyncEvent {
        SyncEvent::Transport(TransportEvent::Message {
            subscription: subscription.into(),
            body: body.into(),
        })
    }

    fn connected() -> SyncEvent {
        SyncEvent::Transport(TransportEvent::Connected)
    }

    fn running() -> RosterSync {
        let mut sync = RosterSync::default();
        sync.ingest(SyncEvent::Start);
        sync
    }

    #[test]
    fn test_start_fetches_and_activates_concurrently() {
        let mut sync = RosterSync::default();
        assert_eq!(sync.connection(), ConnectionState::Disconnected);

        let actions = sync.ingest(SyncEvent::Start);
        assert_eq!(
            actions,
            vec![SyncAction::FetchRoster(FetchKind::Snapshot), SyncAction::Activate]
        );
        assert_eq!(sync.connection(), ConnectionState::Connecting);

        // A second start is a no-op
        assert!(sync.ingest(SyncEvent::Start).is_empty());
    }

    #[test]
    fn test_handshake_resyncs_then_subscribes() {
        let mut sync = running();
        let actions = sync.ingest(connected());
        assert_eq!(
            actions,
            vec![
                SyncAction::FetchRoster(FetchKind::Resync),
                SyncAction::Subscribe {
                    id: "sub-0".into(),
                    topic: PATIENTS_TOPIC.into()
                },
            ]
        );
        assert_eq!(sync.connection(), ConnectionState::Connected);
        assert_eq!(sync.subscription(), Some("sub-0"));
    }

    #[test]
    fn test_snapshot_then_stream_scenario() {
        let mut sync = running();
        sync.ingest(fetched(ONE));
        assert_eq!(sync.roster().ids(), vec![1]);

        sync.ingest(connected());
        sync.ingest(message("sub-0", TWO));

        assert_eq!(sync.roster().len(), 2);
        assert_eq!(sync.roster().ids(), vec![1, 2]);
        assert_eq!(sync.last_update().unwrap().source, UpdateSource::Stream);
    }

    #[test]
    fn test_malformed_message_reported_once_roster_kept() {
        let mut sync = running();
        sync.ingest(fetched(ONE));
        sync.ingest(connected());

        let actions = sync.ingest(message("sub-0", "not json"));
        assert_eq!(actions.len(), 1);
        assert!(matches!(actions[0], SyncAction::Report(SyncError::MessageParse(_))));
        assert_eq!(sync.error_count(), 1);
        assert_eq!(sync.roster().ids(), vec![1]);
        assert_eq!(sync.connection(), ConnectionState::Connected);
    }

    #[test]
    fn test_failed_fetch_keeps_previous_roster() {
        let mut sync = running();
        sync.ingest(fetched(TWO));
        let before = sync.last_update();

        let actions = sync.ingest(SyncEvent::FetchCompleted {
            kind: FetchKind::Resync,
            result: Err(RequestError::Network("connection refused".into())),
        });
        assert!(matches!(actions.as_slice(), [SyncAction::Report(SyncError::Request(_))]));
        assert_eq!(sync.roster().len(), 2);
        assert_eq!(sync.last_update(), before);
    }

    #[test]
    fn test_stale_fetch_overwrites_stream_last_write_wins() {
        let mut sync = running();
        sync.ingest(connected());
        sync.ingest(message("sub-0", TWO));
        sync.ingest(fetched(ONE));
        assert_eq!(sync.roster().ids(), vec![1]);
    }

    #[test]
    fn test_transport_error_disconnects_and_drops_subscription() {
        let mut sync = running();
        sync.ingest(connected());

        let actions = sync.ingest(SyncEvent::Transport(TransportEvent::Error("reset".into())));
        assert_eq!(actions, vec![SyncAction::Report(SyncError::Transport("reset".into()))]);
        assert_eq!(sync.connection(), ConnectionState::Disconnected);
        assert_eq!(sync.subscription(), None);

        // Reconnect attempt, then a fresh subscription id
        sync.ingest(SyncEvent::Transport(TransportEvent::Connecting));
        assert_eq!(sync.connection(), ConnectionState::Connecting);
        sync.ingest(connected());
        assert_eq!(sync.subscription(), Some("sub-1"));
    }

    #[test]
    fn test_close_is_not_an_error() {
        let mut sync = running();
        sync.ingest(connected());
        let actions = sync.ingest(SyncEvent::Transport(TransportEvent::Closed));
        assert!(actions.is_empty());
        assert_eq!(sync.connection(), ConnectionState::Disconnected);
        assert_eq!(sync.error_count(), 0);
    }

    #[test]
    fn test_message_for_old_subscription_ignored() {
        let mut sync = running();
        sync.ingest(connected());
        sync.ingest(SyncEvent::Transport(TransportEvent::Closed));
        sync.ingest(connected());

        let before = sync.revision();
        assert!(sync.ingest(message("sub-0", TWO)).is_empty());
        assert!(sync.roster().is_empty());
        assert_eq!(sync.revision(), before);

        sync.ingest(message("sub-1", TWO));
        assert_eq!(sync.roster().len(), 2);
    }

    #[test]
    fn test_stop_unsubscribes_and_deactivates() {
        let mut sync = running();
        sync.ingest(connected());

        let actions = sync.ingest(SyncEvent::Stop);
        assert_eq!(
            actions,
            vec![
                SyncAction::Unsubscribe { id: "sub-0".into() },
                SyncAction::Deactivate
            ]
        );
        assert!(sync.is_stopped());
        assert_eq!(sync.connection(), ConnectionState::Disconnected);

        // Idempotent
        assert!(sync.ingest(SyncEvent::Stop).is_empty());
    }

    #[test]
    fn test_stop_without_subscription() {
        let mut sync = running();
        assert_eq!(sync.ingest(SyncEvent::Stop), vec![SyncAction::Deactivate]);
    }

    #[test]
    fn test_no_writes_after_stop() {
        let mut sync = running();
        sync.ingest(fetched(ONE));
        sync.ingest(connected());
        sync.ingest(SyncEvent::Stop);
        let frozen = sync.view();

        sync.ingest(fetched(TWO));
        sync.ingest(message("sub-0", TWO));
        sync.ingest(connected());
        sync.ingest(SyncEvent::Transport(TransportEvent::Error("late".into())));

        assert_eq!(sync.view(), frozen);
    }

    #[test]
    fn test_events_before_start_ignored() {
        let mut sync = RosterSync::default();
        assert!(sync.ingest(fetched(ONE)).is_empty());
        assert!(sync.ingest(connected()).is_empty());
        assert!(sync.roster().is_empty());
        assert_eq!(sync.connection(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_refresh_requests_manual_fetch() {
        let mut sync = running();
        assert_eq!(
            sync.ingest(SyncEvent::Refresh),
            vec![SyncAction::FetchRoster(FetchKind::Manual)]
        );
    }

    #[test]
    fn test_custom_topic() {
        let mut sync = RosterSync::new("/topic/ward-3");
        sync.ingest(SyncEvent::Start);
        let actions = sync.ingest(connected());
        assert!(actions.contains(&SyncAction::Subscribe {
            id: "sub-0".into(),
            topic: "/topic/ward-3".into()
        }));
    }
}
