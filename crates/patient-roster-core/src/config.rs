//! Client configuration: defaults, JSON file, environment overrides.

use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::api::{HttpApi, RequestError};
use crate::stomp::{HeartBeat, StompConfig};

pub const ENV_API_URL: &str = "PATIENT_ROSTER_API_URL";
pub const ENV_BROKER_URL: &str = "PATIENT_ROSTER_BROKER_URL";
pub const ENV_TOPIC: &str = "PATIENT_ROSTER_TOPIC";
pub const ENV_RECONNECT_DELAY_MS: &str = "PATIENT_ROSTER_RECONNECT_DELAY_MS";
pub const ENV_HEARTBEAT_MS: &str = "PATIENT_ROSTER_HEARTBEAT_MS";
pub const ENV_REQUIRE_AUTH: &str = "PATIENT_ROSTER_REQUIRE_AUTH";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] RequestError),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Endpoints and timings for one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    pub api_url: String,
    pub broker_url: String,
    pub topic: String,
    pub reconnect_delay_ms: u64,
    pub heartbeat_outgoing_ms: u32,
    pub heartbeat_incoming_ms: u32,
    pub request_timeout_ms: u64,
    /// Patient operations need a stored token
    pub require_auth: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:8081".to_string(),
            broker_url: "ws://localhost:8081/ws".to_string(),
            topic: "/topic/patients".to_string(),
            reconnect_delay_ms: 5000,
            heartbeat_outgoing_ms: 4000,
            heartbeat_incoming_ms: 4000,
            request_timeout_ms: 10_000,
            require_auth: false,
        }
    }
}

impl ClientConfig {
    /// Read a camelCase JSON file. Missing fields keep their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config = serde_json::from_str(&text)?;
        info!(path = %path.as_ref().display(), "Loaded client config");
        Ok(config)
    }

    /// Apply `PATIENT_ROSTER_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<()> {
        if let Some(value) = lookup(ENV_API_URL) {
            info!("{ENV_API_URL} set, using {value}");
            self.api_url = value;
        }
        if let Some(value) = lookup(ENV_BROKER_URL) {
            info!("{ENV_BROKER_URL} set, using {value}");
            self.broker_url = value;
        }
        if let Some(value) = lookup(ENV_TOPIC) {
            info!("{ENV_TOPIC} set, using {value}");
            self.topic = value;
        }
        if let Some(value) = lookup(ENV_RECONNECT_DELAY_MS) {
            self.reconnect_delay_ms = parse_env(ENV_RECONNECT_DELAY_MS, "reconnectDelayMs", &value)?;
        }
        if let Some(value) = lookup(ENV_HEARTBEAT_MS) {
            let ms = parse_env(ENV_HEARTBEAT_MS, "heartbeatMs", &value)?;
            self.heartbeat_outgoing_ms = ms;
            self.heartbeat_incoming_ms = ms;
        }
        if let Some(value) = lookup(ENV_REQUIRE_AUTH) {
            self.require_auth = parse_flag(&value).ok_or_else(|| {
                warn!("Invalid {ENV_REQUIRE_AUTH} value: {value}");
                ConfigError::Invalid {
                    field: "requireAuth",
                    reason: format!("expected true/false, got {value:?}"),
                }
            })?;
            info!("{ENV_REQUIRE_AUTH} set, using {}", self.require_auth);
        }
        Ok(())
    }

    /// Check URLs and the topic name.
    pub fn validate(&self) -> ConfigResult<()> {
        let api = self.api_url()?;
        if !matches!(api.scheme(), "http" | "https") {
            return Err(invalid("apiUrl", format!("unsupported scheme {:?}", api.scheme())));
        }
        let broker = self.broker_url()?;
        if !matches!(broker.scheme(), "ws" | "wss") {
            return Err(invalid("brokerUrl", format!("unsupported scheme {:?}", broker.scheme())));
        }
        if !self.topic.starts_with('/') {
            return Err(invalid("topic", format!("{:?} must start with '/'", self.topic)));
        }
        Ok(())
    }

    pub fn api_url(&self) -> ConfigResult<Url> {
        Url::parse(&self.api_url).map_err(|e| invalid("apiUrl", format!("{}: {e}", self.api_url)))
    }

    pub fn broker_url(&self) -> ConfigResult<Url> {
        Url::parse(&self.broker_url).map_err(|e| invalid("brokerUrl", format!("{}: {e}", self.broker_url)))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// STOMP settings for the live session.
    pub fn stomp_config(&self) -> ConfigResult<StompConfig> {
        let mut stomp = StompConfig::new(self.broker_url()?);
        stomp.reconnect_delay = Duration::from_millis(self.reconnect_delay_ms);
        stomp.heart_beat = HeartBeat::new(self.heartbeat_outgoing_ms, self.heartbeat_incoming_ms);
        Ok(stomp)
    }

    /// HTTP client for the backend API.
    pub fn http_api(&self) -> ConfigResult<HttpApi> {
        Ok(HttpApi::new(self.api_url()?, self.request_timeout())?)
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

fn parse_env<T: FromStr>(key: &str, field: &'static str, value: &str) -> ConfigResult<T>
where
    T::Err: Display,
{
    let parsed = value.trim().parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        invalid(field, format!("{value:?}: {e}"))
    })?;
    info!("{key} set, using {value}");
    Ok(parsed)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
