//! Client configuration.

use common::types::ParticipantId;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default polling interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Smallest accepted polling interval in milliseconds.
pub const MIN_POLL_INTERVAL_MS: u64 = 50;

/// Largest accepted polling interval in milliseconds.
pub const MAX_POLL_INTERVAL_MS: u64 = 60_000;

/// Default ICE server list.
pub const DEFAULT_ICE_SERVERS: &str = "stun:stun.l.google.com:19302";

/// Default timeout for a single call service request.
pub const DEFAULT_RPC_TIMEOUT_SECONDS: u64 = 10;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the call service (e.g. "http://localhost:8080").
    pub service_url: String,

    /// Identity presented to the call service.
    pub participant_id: ParticipantId,

    /// Interval between session polls.
    pub poll_interval: Duration,

    /// ICE server URLs handed to the peer connection.
    pub ice_servers: Vec<String>,

    /// Timeout for a single call service request.
    pub rpc_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum ClientConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid call service URL: {0}")]
    InvalidServiceUrl(String),

    #[error("Invalid participant id: {0}")]
    InvalidParticipantId(String),

    #[error("Invalid poll interval configuration: {0}")]
    InvalidPollInterval(String),

    #[error("Invalid ICE server configuration: {0}")]
    InvalidIceServers(String),

    #[error("Invalid RPC timeout configuration: {0}")]
    InvalidRpcTimeout(String),
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ClientConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ClientConfigError> {
        let service_url = vars
            .get("CALL_SERVICE_URL")
            .ok_or_else(|| ClientConfigError::MissingEnvVar("CALL_SERVICE_URL".to_string()))?
            .trim_end_matches('/')
            .to_string();

        if !(service_url.starts_with("http://") || service_url.starts_with("https://")) {
            return Err(ClientConfigError::InvalidServiceUrl(format!(
                "CALL_SERVICE_URL must start with http:// or https://, got '{}'",
                service_url
            )));
        }

        let raw_participant = vars
            .get("PARTICIPANT_ID")
            .ok_or_else(|| ClientConfigError::MissingEnvVar("PARTICIPANT_ID".to_string()))?;
        let participant_id = ParticipantId::parse(raw_participant)
            .map_err(|e| ClientConfigError::InvalidParticipantId(e.to_string()))?;

        let poll_interval_ms = if let Some(value_str) = vars.get("POLL_INTERVAL_MS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ClientConfigError::InvalidPollInterval(format!(
                    "POLL_INTERVAL_MS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if !(MIN_POLL_INTERVAL_MS..=MAX_POLL_INTERVAL_MS).contains(&value) {
                return Err(ClientConfigError::InvalidPollInterval(format!(
                    "POLL_INTERVAL_MS must be between {} and {}, got {}",
                    MIN_POLL_INTERVAL_MS, MAX_POLL_INTERVAL_MS, value
                )));
            }

            value
        } else {
            DEFAULT_POLL_INTERVAL_MS
        };

        let ice_servers: Vec<String> = vars
            .get("ICE_SERVERS")
            .map(String::as_str)
            .unwrap_or(DEFAULT_ICE_SERVERS)
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        if ice_servers.is_empty() {
            return Err(ClientConfigError::InvalidIceServers(
                "ICE_SERVERS must list at least one server".to_string(),
            ));
        }
        if let Some(bad) = ice_servers
            .iter()
            .find(|s| !(s.starts_with("stun:") || s.starts_with("turn:") || s.starts_with("turns:")))
        {
            return Err(ClientConfigError::InvalidIceServers(format!(
                "ICE server must use a stun:, turn: or turns: URL, got '{}'",
                bad
            )));
        }

        let rpc_timeout_seconds = if let Some(value_str) = vars.get("RPC_TIMEOUT_SECONDS") {
            let value: u64 = value_str.parse().map_err(|e| {
                ClientConfigError::InvalidRpcTimeout(format!(
                    "RPC_TIMEOUT_SECONDS must be a valid positive integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value == 0 {
                return Err(ClientConfigError::InvalidRpcTimeout(
                    "RPC_TIMEOUT_SECONDS must be greater than 0".to_string(),
                ));
            }

            value
        } else {
            DEFAULT_RPC_TIMEOUT_SECONDS
        };

        Ok(ClientConfig {
            service_url,
            participant_id,
            poll_interval: Duration::from_millis(poll_interval_ms),
            ice_servers,
            rpc_timeout: Duration::from_secs(rpc_timeout_seconds),
        })
    }
}
