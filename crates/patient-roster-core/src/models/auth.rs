//! Authentication models.

use serde::{Deserialize, Serialize};

/// Login request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

/// Registration request body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub username: String,
    pub password: String,
    pub full_name: String,
}

/// Session issued by login or registration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    /// Bearer token for authenticated requests
    pub token: String,
    pub username: String,
    pub full_name: String,
    /// Role granted by the server (e.g. "ROLE_RECEPTIONIST")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}
