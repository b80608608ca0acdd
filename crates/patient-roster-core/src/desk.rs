//! Reception desk: patient registration and removal for a logged-in user.
//!
//! The desk owns the displayed roster and the user identity. Tokens live in
//! the injected [`SessionStore`] and are read back for every request.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::api::{AuthApi, AuthError, PatientApi, RequestError};
use crate::models::{AuthSession, Credentials, NewPatient, Patient, Registration, Roster};
use crate::store::{SessionStore, StoreError};
use crate::sync::ApiRosterSource;

#[derive(Error, Debug)]
pub enum DeskError {
    #[error("{0} must not be empty")]
    Validation(&'static str),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("Session store error: {0}")]
    Store(#[from] StoreError),

    #[error("Not logged in")]
    NotAuthenticated,
}

pub type DeskResult<T> = Result<T, DeskError>;

/// Controller over the backend API and the session store.
pub struct ReceptionDesk<A, S> {
    api: Arc<A>,
    store: S,
    require_auth: bool,
    roster: Roster,
    user: Option<AuthSession>,
}

impl<A, S> ReceptionDesk<A, S>
where
    A: PatientApi + AuthApi + 'static,
    S: SessionStore,
{
    pub fn new(api: Arc<A>, store: S) -> Self {
        Self {
            api,
            store,
            require_auth: false,
            roster: Roster::empty(),
            user: None,
        }
    }

    /// Reject patient operations unless a token is stored.
    pub fn with_require_auth(mut self, require_auth: bool) -> Self {
        self.require_auth = require_auth;
        self
    }

    pub fn api(&self) -> &Arc<A> {
        &self.api
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Currently displayed roster.
    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn current_user(&self) -> Option<&AuthSession> {
        self.user.as_ref()
    }

    /// Pick up a session saved by an earlier run. A token the server rejects
    /// is cleared; an unreachable server keeps it.
    pub async fn restore(&mut self) -> DeskResult<Option<&AuthSession>> {
        let Some(session) = self.store.load()? else {
            return Ok(None);
        };

        match self.api.validate_token(&session.token).await {
            Ok(true) => {
                info!(username = %session.username, "Restored session");
                self.user = Some(session);
            }
            Ok(false) => {
                info!(username = %session.username, "Stored token expired");
                self.store.clear()?;
                self.user = None;
            }
            Err(e) => {
                warn!("Could not validate stored token, keeping it: {e}");
                self.user = Some(session);
            }
        }
        Ok(self.user.as_ref())
    }

    pub async fn login(&mut self, username: &str, password: &str) -> DeskResult<&AuthSession> {
        let username = non_empty(username, "username")?;
        if password.is_empty() {
            return Err(DeskError::Validation("password"));
        }

        let session = self.api.login(&Credentials::new(username, password)).await?;
        self.store.save(&session)?;
        Ok(self.user.insert(session))
    }

    pub async fn register(&mut self, username: &str, password: &str, full_name: &str) -> DeskResult<&AuthSession> {
        let registration = Registration {
            username: non_empty(username, "username")?.to_string(),
            password: password.to_string(),
            full_name: non_empty(full_name, "fullName")?.to_string(),
        };
        if registration.password.is_empty() {
            return Err(DeskError::Validation("password"));
        }

        let session = self.api.register(&registration).await?;
        self.store.save(&session)?;
        Ok(self.user.insert(session))
    }

    /// Forget the user. The roster is emptied before the store is touched,
    /// so it is empty even if clearing the store fails.
    pub async fn logout(&mut self) -> DeskResult<()> {
        self.roster = Roster::empty();
        if let Some(user) = self.user.take() {
            info!(username = %user.username, "Logged out");
        }
        self.store.clear()?;
        Ok(())
    }

    /// Re-fetch the full roster.
    pub async fn refresh(&mut self) -> DeskResult<&Roster> {
        let bearer = self.bearer()?;
        self.roster = self.api.list_patients(bearer.as_deref()).await?;
        Ok(&self.roster)
    }

    /// Validate and register a patient, then re-fetch the roster.
    pub async fn add_patient(&mut self, patient: NewPatient) -> DeskResult<Patient> {
        let patient = patient.validated().map_err(DeskError::Validation)?;
        let bearer = self.bearer()?;
        let created = self.api.create_patient(&patient, bearer.as_deref()).await?;
        self.refresh_after_change().await;
        Ok(created)
    }

    pub async fn delete_patient(&mut self, id: i64) -> DeskResult<()> {
        let bearer = self.bearer()?;
        self.api.delete_patient(id, bearer.as_deref()).await?;
        self.refresh_after_change().await;
        Ok(())
    }

    /// Roster source for a live session carrying the current token.
    pub fn roster_source(&self) -> DeskResult<ApiRosterSource<A>> {
        Ok(ApiRosterSource::new(Arc::clone(&self.api), self.bearer()?))
    }

    /// Stored token, or `NotAuthenticated` when one is required and missing.
    pub fn bearer(&self) -> DeskResult<Option<String>> {
        let token = self.store.token()?;
        if self.require_auth && token.is_none() {
            return Err(DeskError::NotAuthenticated);
        }
        Ok(token)
    }

    /// The change itself succeeded; a failed re-fetch only leaves the old roster.
    async fn refresh_after_change(&mut self) {
        if let Err(e) = self.refresh().await {
            warn!("Roster refresh after change failed: {e}");
        }
    }
}

fn non_empty<'a>(value: &'a str, field: &'static str) -> DeskResult<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        Err(DeskError::Validation(field))
    } else {
        Ok(value)
    }
}
