//! Application configuration.
//! Logging defaults on in debug builds and off in release builds.

use crate::error::{Error, Result};
use crate::peer::types::{IceServer, MediaConstraints, RtcSettings};
use crate::utils::add_ice_url_scheme;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

/// Env variable pointing at a JSON config file
pub const CONFIG_ENV: &str = "WEBCALL_CONFIG";

/// ICE server entry
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub enabled: bool,
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: "webcall_lib=debug,webcall=info,webrtc=warn".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub ice_servers: Vec<ServerConfig>,
    pub ice_candidate_pool_size: u8,
    /// Shortest call id accepted on manual entry
    pub min_call_id_length: usize,
    pub media: MediaConstraints,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ice_servers: default_ice_servers(),
            ice_candidate_pool_size: 10,
            min_call_id_length: 20,
            media: MediaConstraints::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_ice_servers() -> Vec<ServerConfig> {
    vec![
        ServerConfig {
            id: "default-stun-1".into(),
            r#type: "stun".into(),
            url: "stun:stun1.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
        ServerConfig {
            id: "default-stun-2".into(),
            r#type: "stun".into(),
            url: "stun:stun2.l.google.com:19302".into(),
            username: None,
            credential: None,
        },
    ]
}

impl AppConfig {
    /// Read and validate a JSON config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `WEBCALL_CONFIG` when set, defaults otherwise
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "ICE server '{}' has an empty URL",
                    server.id
                )));
            }

            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::InvalidConfig(format!(
                    "TURN server '{}' requires username and credential",
                    server.id
                )));
            }
        }

        if !self.media.video && !self.media.audio {
            return Err(Error::InvalidConfig(
                "at least one of video or audio must be requested".into(),
            ));
        }

        Ok(())
    }

    /// Whether a TURN server is configured
    pub fn has_relay(&self) -> bool {
        self.ice_servers.iter().any(|server| server.r#type == "turn")
    }

    /// Transport settings derived from the ICE server list
    pub fn rtc_settings(&self) -> RtcSettings {
        RtcSettings {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|config| IceServer {
                    urls: vec![add_ice_url_scheme(config)],
                    username: config.username.clone().unwrap_or_default(),
                    credential: config.credential.clone().unwrap_or_default(),
                })
                .collect(),
            ice_candidate_pool_size: self.ice_candidate_pool_size,
        }
    }
}
