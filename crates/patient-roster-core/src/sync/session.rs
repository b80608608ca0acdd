//! Async driver for [`RosterSync`].
//!
//! ```text
//! fetch tasks ──┐
//!               ├─► events (mpsc) ─► RosterSync::ingest ─► actions ─► fetch / transport / log
//! transport ────┘                          │
//! stop (watch) ── checked first            └─► view (watch) ─► observers
//! ```
//!
//! Fetch results and transport callbacks share one queue, so the machine
//! sees them in arrival order. Stop travels on its own channel and wins over
//! anything already queued; whatever is still in flight is discarded.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{RosterSync, RosterView, SyncAction, SyncEvent};
use crate::api::{ApiResult, PatientApi};
use crate::models::Roster;
use crate::stomp::{StompClient, StompConfig};

/// Queue feeding the synchronizer.
pub type EventSender = mpsc::UnboundedSender<SyncEvent>;

/// Where full rosters come from.
#[async_trait]
pub trait RosterSource: Send + Sync + 'static {
    async fn fetch_roster(&self) -> ApiResult<Roster>;
}

/// [`RosterSource`] backed by the patient API.
#[derive(Debug)]
pub struct ApiRosterSource<A> {
    api: Arc<A>,
    bearer: Option<String>,
}

impl<A> ApiRosterSource<A> {
    pub fn new(api: Arc<A>, bearer: Option<String>) -> Self {
        Self { api, bearer }
    }
}

#[async_trait]
impl<A: PatientApi + 'static> RosterSource for ApiRosterSource<A> {
    async fn fetch_roster(&self) -> ApiResult<Roster> {
        self.api.list_patients(self.bearer.as_deref()).await
    }
}

/// Publish/subscribe connection driven by the synchronizer.
///
/// Lifecycle changes and messages go to the [`EventSender`] given on
/// activation.
pub trait Transport: Send + 'static {
    fn activate(&mut self, events: EventSender);

    fn subscribe(&mut self, id: &str, topic: &str);

    fn unsubscribe(&mut self, id: &str);

    fn deactivate(&mut self);
}

/// [`Transport`] over STOMP.
#[derive(Debug)]
pub struct StompTransport {
    config: StompConfig,
    client: Option<StompClient>,
}

impl StompTransport {
    pub fn new(config: StompConfig) -> Self {
        Self { config, client: None }
    }
}

impl Transport for StompTransport {
    fn activate(&mut self, events: EventSender) {
        if self.client.is_some() {
            debug!("STOMP transport already active");
            return;
        }
        let client = StompClient::activate(self.config.clone(), move |event| {
            events.send(SyncEvent::Transport(event)).is_ok()
        });
        self.client = Some(client);
    }

    fn subscribe(&mut self, id: &str, topic: &str) {
        if let Some(client) = &self.client {
            client.subscribe(id, topic);
        }
    }

    fn unsubscribe(&mut self, id: &str) {
        if let Some(client) = &self.client {
            client.unsubscribe(id);
        }
    }

    fn deactivate(&mut self) {
        if let Some(client) = self.client.take() {
            client.deactivate();
        }
    }
}

/// A synchronizer bound to its roster source and transport, ready to start.
pub struct SyncSession<R, T> {
    sync: RosterSync,
    source: R,
    transport: T,
}

impl<R: RosterSource, T: Transport> SyncSession<R, T> {
    pub fn new(source: R, transport: T) -> Self {
        Self {
            sync: RosterSync::default(),
            source,
            transport,
        }
    }

    /// Subscribe to `topic` instead of the default patients topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.sync = RosterSync::new(topic);
        self
    }

    /// Spawn the driver on the current tokio runtime and start syncing.
    pub fn start(self) -> SyncHandle {
        let id = Uuid::new_v4();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (view_tx, view_rx) = watch::channel(self.sync.view());

        let driver = Driver {
            sync: self.sync,
            source: Arc::new(self.source),
            transport: self.transport,
            events_tx: events_tx.clone(),
            fetches: JoinSet::new(),
            view: view_tx,
        };
        let task = tokio::spawn(
            driver
                .run(events_rx, stop_rx)
                .instrument(info_span!("roster_sync", session = %id)),
        );

        SyncHandle {
            id,
            events: events_tx,
            stop: stop_tx,
            view: view_rx,
            task: Some(task),
        }
    }
}

/// Handle to a running sync session. Dropping it stops the session.
#[derive(Debug)]
pub struct SyncHandle {
    id: Uuid,
    events: EventSender,
    stop: watch::Sender<bool>,
    view: watch::Receiver<RosterView>,
    task: Option<JoinHandle<()>>,
}

impl SyncHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Latest published view.
    pub fn view(&self) -> RosterView {
        self.view.borrow().clone()
    }

    /// A receiver notified on every published change.
    pub fn subscribe_view(&self) -> watch::Receiver<RosterView> {
        self.view.clone()
    }

    /// Wait until a published view satisfies `predicate`. Returns the last
    /// view if the session ends first.
    pub async fn wait_for(&self, mut predicate: impl FnMut(&RosterView) -> bool) -> RosterView {
        let mut view = self.view.clone();
        let result = view.wait_for(|v| predicate(v)).await.map(|v| v.clone());
        match result {
            Ok(found) => found,
            Err(_) => view.borrow().clone(),
        }
    }

    /// Request a manual re-fetch of the full roster.
    pub fn refresh(&self) {
        if self.events.send(SyncEvent::Refresh).is_err() {
            debug!(session = %self.id, "Refresh after session ended");
        }
    }

    /// Stop synchronizing. Idempotent; nothing is written to the view
    /// afterwards.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }

    /// Stop and wait for the driver to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(session = %self.id, "Sync driver ended abnormally: {e}");
            }
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Driver<R, T> {
    sync: RosterSync,
    source: Arc<R>,
    transport: T,
    events_tx: EventSender,
    fetches: JoinSet<()>,
    view: watch::Sender<RosterView>,
}

impl<R: RosterSource, T: Transport> Driver<R, T> {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SyncEvent>, mut stop: watch::Receiver<bool>) {
        info!(topic = %self.sync.topic(), "Roster sync started");
        self.apply(SyncEvent::Start);

        loop {
            let event = tokio::select! {
                biased;
                // A dropped stop sender also ends the session
                _ = stop_requested(&mut stop) => SyncEvent::Stop,
                Some(event) = events.recv() => event,
                Some(joined) = self.fetches.join_next(), if !self.fetches.is_empty() => {
                    if let Err(e) = joined {
                        warn!("Roster fetch task failed: {e}");
                    }
                    continue;
                }
            };

            self.apply(event);
            if self.sync.is_stopped() {
                break;
            }
        }

        // In-flight fetches finish against a closed queue
        self.fetches.detach_all();
        info!("Roster sync stopped");
    }

    fn apply(&mut self, event: SyncEvent) {
        let before = self.sync.revision();
        for action in self.sync.ingest(event) {
            self.perform(action);
        }
        if self.sync.revision() != before {
            self.view.send_replace(self.sync.view());
        }
    }

    fn perform(&mut self, action: SyncAction) {
        match action {
            SyncAction::FetchRoster(kind) => {
                debug!(?kind, "Fetching roster");
                let source = Arc::clone(&self.source);
                let events = self.events_tx.clone();
                self.fetches.spawn(
                    async move {
                        let result = source.fetch_roster().await;
                        if events.send(SyncEvent::FetchCompleted { kind, result }).is_err() {
                            debug!(?kind, "Fetch finished after session ended");
                        }
                    }
                    .in_current_span(),
                );
            }
            SyncAction::Activate => self.transport.activate(self.events_tx.clone()),
            SyncAction::Subscribe { id, topic } => {
                info!(%id, %topic, "Subscribing to roster updates");
                self.transport.subscribe(&id, &topic);
            }
            SyncAction::Unsubscribe { id } => self.transport.unsubscribe(&id),
            SyncAction::Deactivate => self.transport.deactivate(),
            SyncAction::Report(error) => warn!("{error}"),
        }
    }
}

/// Resolves once stop is requested or the handle is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    if stop.wait_for(|stopped| *stopped).await.is_err() {
        debug!("Sync handle dropped");
    }
}
