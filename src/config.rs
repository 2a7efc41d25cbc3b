use std::{str::FromStr, time::Duration};

use thiserror::Error;
use url::Url;

use crate::{
    channel::{MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY},
    pairing::PAIRING_TTL_SECONDS,
};

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the Evolution-style gateway REST API.
    pub gateway_base_url: String,
    /// API key sent with every gateway call and channel open.
    pub gateway_api_key: String,
    /// Websocket endpoint of the gateway event channel.
    pub gateway_ws_url: String,
    /// Base URL of the key-filtered persistence API.
    pub store_base_url: String,
    /// Persistence API key.
    pub store_api_key: String,
    /// Interval between pairing artifact refreshes.
    pub pairing_refresh: Duration,
    /// Fixed delay between channel reconnect attempts.
    pub reconnect_delay: Duration,
    /// Consecutive channel failures tolerated before giving up.
    pub max_reconnect_attempts: u32,
}

impl Config {
    /// Loads runtime configuration using environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let gateway_base_url =
            std::env::var("EVOLUTION_BASE_URL").map_err(|_| ConfigError::MissingGatewayUrl)?;
        let gateway_api_key =
            std::env::var("EVOLUTION_API_KEY").map_err(|_| ConfigError::MissingGatewayApiKey)?;
        let gateway_ws_url = match std::env::var("EVOLUTION_WS_URL") {
            Ok(raw) => raw,
            Err(_) => derive_ws_url(&gateway_base_url)?,
        };
        let store_base_url =
            std::env::var("STORE_BASE_URL").map_err(|_| ConfigError::MissingStoreUrl)?;
        let store_api_key = std::env::var("STORE_API_KEY").unwrap_or_default();

        let pairing_refresh =
            Duration::from_secs(env_secs("PAIRING_REFRESH_SECS", u64::from(PAIRING_TTL_SECONDS))?);
        let reconnect_delay =
            Duration::from_secs(env_secs("RECONNECT_DELAY_SECS", RECONNECT_DELAY.as_secs())?);
        let max_reconnect_attempts =
            env_secs("MAX_RECONNECT_ATTEMPTS", u64::from(MAX_RECONNECT_ATTEMPTS))? as u32;

        Ok(Self {
            gateway_base_url,
            gateway_api_key,
            gateway_ws_url,
            store_base_url,
            store_api_key,
            pairing_refresh,
            reconnect_delay,
            max_reconnect_attempts,
        })
    }
}

/// Rewrites an http(s) gateway URL into its ws(s) counterpart.
pub fn derive_ws_url(gateway_base_url: &str) -> Result<String, ConfigError> {
    let mut parsed = Url::parse(gateway_base_url)
        .map_err(|_| ConfigError::InvalidGatewayUrl(gateway_base_url.to_owned()))?;

    let scheme = match parsed.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(parsed.to_string()),
        _ => return Err(ConfigError::InvalidGatewayUrl(gateway_base_url.to_owned())),
    };
    parsed
        .set_scheme(scheme)
        .map_err(|_| ConfigError::InvalidGatewayUrl(gateway_base_url.to_owned()))?;

    Ok(parsed.to_string())
}

fn env_secs(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => u64::from_str(raw.trim()).map_err(|_| ConfigError::InvalidNumber(name, raw)),
        Err(_) => Ok(default),
    }
}

/// Errors while loading runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing EVOLUTION_BASE_URL environment variable")]
    MissingGatewayUrl,
    #[error("missing EVOLUTION_API_KEY environment variable")]
    MissingGatewayApiKey,
    #[error("missing STORE_BASE_URL environment variable")]
    MissingStoreUrl,
    #[error("invalid gateway URL: {0}")]
    InvalidGatewayUrl(String),
    #[error("invalid {0} value: {1}")]
    InvalidNumber(&'static str, String),
}
