//! reqwest implementation of the backend API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use super::{ApiResult, AuthApi, AuthError, PatientApi, RequestError};
use crate::models::{AuthSession, Credentials, NewPatient, Patient, Registration, Roster};

const PATIENTS_PATH: &str = "api/patients";
const LOGIN_PATH: &str = "api/auth/login";
const REGISTER_PATH: &str = "api/auth/register";
const VALIDATE_PATH: &str = "api/auth/validate";

impl From<reqwest::Error> for RequestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RequestError::Decode(e.to_string())
        } else {
            RequestError::Network(e.to_string())
        }
    }
}

trait WithBearer {
    fn with_bearer(self, token: Option<&str>) -> Self;
}

impl WithBearer for RequestBuilder {
    fn with_bearer(self, token: Option<&str>) -> Self {
        match token {
            Some(token) => self.bearer_auth(token),
            None => self,
        }
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Pull a human-readable message out of an error response.
async fn error_message(response: Response) -> Option<String> {
    let text = response.text().await.ok()?;
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => body.error.or(body.message),
        Err(_) => Some(text.to_string()),
    }
}

async fn check(response: Response) -> ApiResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = error_message(response).await;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RequestError::Unauthorized(message)),
        _ => Err(RequestError::Status {
            status: status.as_u16(),
            message,
        }),
    }
}

/// Backend client over HTTP.
#[derive(Debug, Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base: Url,
}

impl HttpApi {
    /// Create a client rooted at `base` (e.g. `http://localhost:8081`).
    pub fn new(base: Url, timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: normalize_base(base),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Resolve an API path against the base URL.
    pub fn endpoint(&self, path: &str) -> ApiResult<Url> {
        self.base
            .join(path)
            .map_err(|e| RequestError::InvalidUrl(format!("{path}: {e}")))
    }

    async fn authenticate(&self, path: &str, body: &impl serde::Serialize) -> Result<AuthSession, AuthError> {
        let response = self
            .client
            .post(self.endpoint(path)?)
            .json(body)
            .send()
            .await
            .map_err(RequestError::from)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<AuthSession>().await.map_err(RequestError::from)?);
        }

        let message = error_message(response).await;
        if status == StatusCode::UNAUTHORIZED {
            Err(AuthError::InvalidCredentials(
                message.unwrap_or_else(|| "Invalid username or password".to_string()),
            ))
        } else if status.is_client_error() {
            Err(AuthError::Rejected(
                message.unwrap_or_else(|| format!("Request rejected ({})", status.as_u16())),
            ))
        } else {
            Err(RequestError::Status {
                status: status.as_u16(),
                message,
            }
            .into())
        }
    }
}

/// Make sure relative joins append to the base path instead of replacing its
/// last segment.
fn normalize_base(mut base: Url) -> Url {
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base
}

#[async_trait]
impl PatientApi for HttpApi {
    async fn list_patients(&self, bearer: Option<&str>) -> ApiResult<Roster> {
        let url = self.endpoint(PATIENTS_PATH)?;
        debug!(%url, "Fetching patient roster");

        let response = self.client.get(url).with_bearer(bearer).send().await?;
        let patients: Vec<Patient> = check(response).await?.json().await?;
        let roster = Roster::new(patients).map_err(|e| RequestError::Decode(e.to_string()))?;

        debug!(patients = roster.len(), "Fetched patient roster");
        Ok(roster)
    }

    async fn create_patient(&self, patient: &NewPatient, bearer: Option<&str>) -> ApiResult<Patient> {
        let response = self
            .client
            .post(self.endpoint(PATIENTS_PATH)?)
            .with_bearer(bearer)
            .json(patient)
            .send()
            .await?;
        let created: Patient = check(response).await?.json().await?;

        info!(id = created.id, "Patient added: {}", created.full_name());
        Ok(created)
    }

    async fn delete_patient(&self, id: i64, bearer: Option<&str>) -> ApiResult<()> {
        let url = self.endpoint(&format!("{PATIENTS_PATH}/{id}"))?;
        let response = self.client.delete(url).with_bearer(bearer).send().await?;
        check(response).await?;

        info!(id, "Patient deleted");
        Ok(())
    }
}

#[async_trait]
impl AuthApi for HttpApi {
    async fn login(&self, credentials: &Credentials) -> Result<AuthSession, AuthError> {
        let session = self.authenticate(LOGIN_PATH, credentials).await?;
        info!(username = %session.username, "Logged in");
        Ok(session)
    }

    async fn register(&self, registration: &Registration) -> Result<AuthSession, AuthError> {
        let session = self.authenticate(REGISTER_PATH, registration).await?;
        info!(username = %session.username, "Registered new user");
        Ok(session)
    }

    async fn validate_token(&self, token: &str) -> ApiResult<bool> {
        let response = self
            .client
            .get(self.endpoint(VALIDATE_PATH)?)
            .bearer_auth(token)
            .send()
            .await?;
        match check(response).await {
            Ok(_) => Ok(true),
            Err(RequestError::Unauthorized(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api(base: &str) -> HttpApi {
        HttpApi::new(Url::parse(base).unwrap(), Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_endpoint_from_host_root() {
        let api = api("http://localhost:8081");
        assert_eq!(
            api.endpoint(PATIENTS_PATH).unwrap().as_str(),
            "http://localhost:8081/api/patients"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let api = api("https://example.org/his");
        assert_eq!(api.base_url().as_str(), "https://example.org/his/");
        assert_eq!(
            api.endpoint(&format!("{PATIENTS_PATH}/42")).unwrap().as_str(),
            "https://example.org/his/api/patients/42"
        );
    }
}
