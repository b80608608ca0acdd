//! Backend API seams.
//!
//! Endpoints:
//! - `GET /api/patients` → full roster
//! - `POST /api/patients` → created patient
//! - `DELETE /api/patients/{id}`
//! - `POST /api/auth/login`, `POST /api/auth/register` → [`AuthSession`]
//! - `GET /api/auth/validate`
//!
//! Credentials are always passed per call; implementations hold no token.

mod http;

pub use http::*;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{AuthSession, Credentials, NewPatient, Patient, Registration, Roster};

/// HTTP request errors. Never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Connection error: {0}")]
    Network(String),

    #[error("Server returned {status}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Status { status: u16, message: Option<String> },

    #[error("Not authorized{}", .0.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Unauthorized(Option<String>),

    #[error("Invalid response body: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

pub type ApiResult<T> = Result<T, RequestError>;

/// Authentication errors, surfaced inline to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("{0}")]
    InvalidCredentials(String),

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Request(#[from] RequestError),
}

/// Patient endpoints.
#[async_trait]
pub trait PatientApi: Send + Sync {
    async fn list_patients(&self, bearer: Option<&str>) -> ApiResult<Roster>;

    async fn create_patient(&self, patient: &NewPatient, bearer: Option<&str>) -> ApiResult<Patient>;

    async fn delete_patient(&self, id: i64, bearer: Option<&str>) -> ApiResult<()>;
}

/// Authentication endpoints.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<AuthSession, AuthError>;

    async fn register(&self, registration: &Registration) -> Result<AuthSession, AuthError>;

    /// `Ok(false)` when the server rejects the token.
    async fn validate_token(&self, token: &str) -> ApiResult<bool>;
}
