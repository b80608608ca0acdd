//! Patient Roster Core Library
//!
//! Live patient roster for a hospital information system: reception
//! registers and removes patients, the chief's dashboard follows the roster
//! as it changes.
//!
//! # Architecture
//!
//! ```text
//!   Reception desk                        Chief dashboard
//!        │                                       │
//!  POST/DELETE /api/patients             ┌───────▼────────┐
//!        │                               │  SyncSession   │
//!        ▼                               │  (driver task) │
//!   ┌─────────┐   /topic/patients        └───┬────────┬───┘
//!   │ backend │ ───── STOMP/WS ────────────► │        │ GET /api/patients
//!   └─────────┘ ◄──────────────────────────────────────┘ (start, every handshake)
//!                                            │
//!                                   RosterSync::ingest
//!                                            │
//!                                     RosterView (watch)
//! ```
//!
//! # Core Principle
//!
//! **Every update is the whole roster.** Fetches and stream messages replace
//! it wholesale; whichever lands last is what the user sees.
//!
//! # Modules
//!
//! - [`api`]: backend HTTP API (patients, authentication)
//! - [`config`]: client configuration with environment overrides
//! - [`db`]: SQLite client state
//! - [`desk`]: reception desk controller
//! - [`models`]: domain types (Patient, Roster, AuthSession)
//! - [`stomp`]: STOMP 1.2 over WebSocket
//! - [`store`]: session credential storage
//! - [`sync`]: live roster synchronization

pub mod api;
pub mod config;
pub mod db;
pub mod desk;
pub mod models;
pub mod stomp;
pub mod store;
pub mod sync;

// Re-export commonly used types
pub use api::{AuthApi, AuthError, HttpApi, PatientApi, RequestError};
pub use config::{ClientConfig, ConfigError};
pub use db::Database;
pub use desk::{DeskError, ReceptionDesk};
pub use models::{AuthSession, Credentials, NewPatient, Patient, Registration, Roster};
pub use store::{MemorySessionStore, SessionKey, SessionStore, SqliteSessionStore};
pub use sync::{
    ApiRosterSource, ConnectionState, RosterSync, RosterView, StompTransport, SyncHandle, SyncSession,
};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use tokio::runtime::Runtime;

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum PatientRosterError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not logged in")]
    NotAuthenticated,

    #[error("{0}")]
    AuthFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

impl From<DeskError> for PatientRosterError {
    fn from(e: DeskError) -> Self {
        match e {
            DeskError::Validation(field) => PatientRosterError::InvalidInput(format!("{field} must not be empty")),
            DeskError::Auth(AuthError::Request(e)) | DeskError::Request(e) => e.into(),
            DeskError::Auth(e) => PatientRosterError::AuthFailed(e.to_string()),
            DeskError::Store(e) => e.into(),
            DeskError::NotAuthenticated => PatientRosterError::NotAuthenticated,
        }
    }
}

impl From<RequestError> for PatientRosterError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::Unauthorized(_) => PatientRosterError::NotAuthenticated,
            other => PatientRosterError::RequestFailed(other.to_string()),
        }
    }
}

impl From<store::StoreError> for PatientRosterError {
    fn from(e: store::StoreError) -> Self {
        PatientRosterError::StorageError(e.to_string())
    }
}

impl From<ConfigError> for PatientRosterError {
    fn from(e: ConfigError) -> Self {
        PatientRosterError::ConfigError(e.to_string())
    }
}

impl From<std::io::Error> for PatientRosterError {
    fn from(e: std::io::Error) -> Self {
        PatientRosterError::RuntimeError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for PatientRosterError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        PatientRosterError::RuntimeError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Configuration with the default endpoints and environment overrides.
#[uniffi::export]
pub fn default_client_config() -> Result<FfiClientConfig, PatientRosterError> {
    let mut config = ClientConfig::default();
    config.apply_env()?;
    Ok(config.into())
}

/// Create a client. Sessions persist in the SQLite file at
/// `session_db_path`, or only in memory when it is `None`.
#[uniffi::export]
pub fn open_client(
    config: FfiClientConfig,
    session_db_path: Option<String>,
) -> Result<Arc<PatientRosterCore>, PatientRosterError> {
    let config: ClientConfig = config.into();
    config.validate()?;

    let store: Arc<dyn SessionStore> = match session_db_path {
        Some(path) => Arc::new(SqliteSessionStore::open(&path)?),
        None => Arc::new(MemorySessionStore::new()),
    };
    let api = Arc::new(config.http_api()?);
    let desk = ReceptionDesk::new(api, store).with_require_auth(config.require_auth);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("patient-roster")
        .enable_all()
        .build()?;

    Ok(Arc::new(PatientRosterCore {
        runtime,
        config,
        desk: Mutex::new(desk),
        live: Mutex::new(None),
    }))
}

// =========================================================================
// Main API Object
// =========================================================================

type Desk = ReceptionDesk<HttpApi, Arc<dyn SessionStore>>;

/// Thread-safe client wrapper for FFI.
#[derive(uniffi::Object)]
pub struct PatientRosterCore {
    runtime: Runtime,
    config: ClientConfig,
    desk: Mutex<Desk>,
    live: Mutex<Option<SyncHandle>>,
}

#[uniffi::export]
impl PatientRosterCore {
    // =========================================================================
    // Session Operations
    // =========================================================================

    /// Restore the session saved by an earlier run, if still valid.
    pub fn restore(&self) -> Result<Option<FfiSession>, PatientRosterError> {
        let mut desk = self.desk.lock()?;
        let user = self.runtime.block_on(desk.restore())?;
        Ok(user.map(FfiSession::from))
    }

    pub fn login(&self, username: String, password: String) -> Result<FfiSession, PatientRosterError> {
        let mut desk = self.desk.lock()?;
        let user = self.runtime.block_on(desk.login(&username, &password))?;
        Ok(user.into())
    }

    pub fn register(
        &self,
        username: String,
        password: String,
        full_name: String,
    ) -> Result<FfiSession, PatientRosterError> {
        let mut desk = self.desk.lock()?;
        let user = self.runtime.block_on(desk.register(&username, &password, &full_name))?;
        Ok(user.into())
    }

    /// Forget the user and stop the live session.
    pub fn logout(&self) -> Result<(), PatientRosterError> {
        self.stop_live()?;
        let mut desk = self.desk.lock()?;
        Ok(self.runtime.block_on(desk.logout())?)
    }

    pub fn current_user(&self) -> Result<Option<FfiSession>, PatientRosterError> {
        let desk = self.desk.lock()?;
        Ok(desk.current_user().map(FfiSession::from))
    }

    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Re-fetch and return the roster.
    pub fn refresh(&self) -> Result<Vec<FfiPatient>, PatientRosterError> {
        let mut desk = self.desk.lock()?;
        let roster = self.runtime.block_on(desk.refresh())?;
        Ok(roster.iter().map(FfiPatient::from).collect())
    }

    /// Last fetched roster, without a request.
    pub fn roster(&self) -> Result<Vec<FfiPatient>, PatientRosterError> {
        let desk = self.desk.lock()?;
        Ok(desk.roster().iter().map(FfiPatient::from).collect())
    }

    /// Register a patient. `date_of_birth` is `YYYY-MM-DD`.
    pub fn add_patient(
        &self,
        first_name: String,
        last_name: String,
        date_of_birth: String,
    ) -> Result<FfiPatient, PatientRosterError> {
        let date_of_birth = NaiveDate::parse_from_str(date_of_birth.trim(), "%Y-%m-%d")
            .map_err(|e| PatientRosterError::InvalidInput(format!("dateOfBirth {date_of_birth:?}: {e}")))?;

        let mut desk = self.desk.lock()?;
        let created = self
            .runtime
            .block_on(desk.add_patient(NewPatient::new(first_name, last_name, date_of_birth)))?;
        Ok((&created).into())
    }

    pub fn delete_patient(&self, id: i64) -> Result<(), PatientRosterError> {
        let mut desk = self.desk.lock()?;
        Ok(self.runtime.block_on(desk.delete_patient(id))?)
    }

    // =========================================================================
    // Live Roster
    // =========================================================================

    /// Start following the roster. Restarts a running session.
    pub fn start_live(&self) -> Result<(), PatientRosterError> {
        self.stop_live()?;

        let (source, bearer) = {
            let desk = self.desk.lock()?;
            (desk.roster_source()?, desk.bearer()?)
        };
        let stomp = self.config.stomp_config()?.with_bearer(bearer.as_deref());
        let transport = StompTransport::new(stomp);

        let _guard = self.runtime.enter();
        let handle = SyncSession::new(source, transport)
            .with_topic(self.config.topic.clone())
            .start();
        *self.live.lock()? = Some(handle);
        Ok(())
    }

    /// Stop following the roster. No-op when not running.
    pub fn stop_live(&self) -> Result<(), PatientRosterError> {
        let handle = self.live.lock()?.take();
        if let Some(handle) = handle {
            self.runtime.block_on(handle.shutdown());
        }
        Ok(())
    }

    /// Request a re-fetch in the live session.
    pub fn refresh_live(&self) -> Result<(), PatientRosterError> {
        if let Some(handle) = self.live.lock()?.as_ref() {
            handle.refresh();
        }
        Ok(())
    }

    /// Latest live view, if a session is running.
    pub fn live_view(&self) -> Result<Option<FfiRosterView>, PatientRosterError> {
        let live = self.live.lock()?;
        Ok(live.as_ref().map(|handle| handle.view().into()))
    }

    pub fn connection_state(&self) -> Result<FfiConnectionState, PatientRosterError> {
        let live = self.live.lock()?;
        Ok(live
            .as_ref()
            .map(|handle| handle.view().connection)
            .unwrap_or_default()
            .into())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe client configuration.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiClientConfig {
    pub api_url: String,
    pub broker_url: String,
    pub topic: String,
    pub reconnect_delay_ms: u64,
    pub heartbeat_ms: u32,
    pub request_timeout_ms: u64,
    pub require_auth: bool,
}

impl From<ClientConfig> for FfiClientConfig {
    fn from(config: ClientConfig) -> Self {
        Self {
            api_url: config.api_url,
            broker_url: config.broker_url,
            topic: config.topic,
            reconnect_delay_ms: config.reconnect_delay_ms,
            heartbeat_ms: config.heartbeat_outgoing_ms,
            request_timeout_ms: config.request_timeout_ms,
            require_auth: config.require_auth,
        }
    }
}

impl From<FfiClientConfig> for ClientConfig {
    fn from(config: FfiClientConfig) -> Self {
        ClientConfig {
            api_url: config.api_url,
            broker_url: config.broker_url,
            topic: config.topic,
            reconnect_delay_ms: config.reconnect_delay_ms,
            heartbeat_outgoing_ms: config.heartbeat_ms,
            heartbeat_incoming_ms: config.heartbeat_ms,
            request_timeout_ms: config.request_timeout_ms,
            require_auth: config.require_auth,
        }
    }
}

/// FFI-safe patient.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatient {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    /// `YYYY-MM-DD`
    pub date_of_birth: String,
    pub created_at: Option<String>,
}

impl From<&Patient> for FfiPatient {
    fn from(patient: &Patient) -> Self {
        Self {
            id: patient.id,
            first_name: patient.first_name.clone(),
            last_name: patient.last_name.clone(),
            date_of_birth: patient.date_of_birth.format("%Y-%m-%d").to_string(),
            created_at: patient
                .created_at
                .map(|t| t.format("%Y-%m-%dT%H:%M:%S").to_string()),
        }
    }
}

/// FFI-safe logged-in user. The token stays in the session store.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSession {
    pub username: String,
    pub full_name: String,
    pub role: Option<String>,
}

impl From<&AuthSession> for FfiSession {
    fn from(session: &AuthSession) -> Self {
        Self {
            username: session.username.clone(),
            full_name: session.full_name.clone(),
            role: session.role.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, uniffi::Enum)]
pub enum FfiConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl From<ConnectionState> for FfiConnectionState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Disconnected => FfiConnectionState::Disconnected,
            ConnectionState::Connecting => FfiConnectionState::Connecting,
            ConnectionState::Connected => FfiConnectionState::Connected,
        }
    }
}

/// FFI-safe live roster snapshot.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiRosterView {
    pub patients: Vec<FfiPatient>,
    pub connection: FfiConnectionState,
    /// RFC 3339 time of the last roster replacement
    pub last_update: Option<String>,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub revision: u64,
    pub stopped: bool,
}

impl From<RosterView> for FfiRosterView {
    fn from(view: RosterView) -> Self {
        Self {
            patients: view.roster.iter().map(FfiPatient::from).collect(),
            connection: view.connection.into(),
            last_update: view.last_update.map(|u| u.at.to_rfc3339()),
            error_count: view.error_count,
            last_error: view.last_error,
            revision: view.revision,
            stopped: view.stopped,
        }
    }
}
