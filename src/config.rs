use serde::{Deserialize, Serialize};

use crate::common::errors::{Error, Result};

/// Connection settings for a single remote audio node.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodeOptions {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_password")]
    pub password: String,
    /// Flat retry interval. Reconnects fire at this fixed delay, without
    /// backoff growth, until the link is destroyed.
    #[serde(default = "default_reconnect_interval")]
    pub reconnect_interval_ms: u64,
    #[serde(default)]
    pub secure: bool,
}

impl NodeOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            password: default_password(),
            reconnect_interval_ms: default_reconnect_interval(),
            secure: false,
        }
    }
}

/// Fleet-wide settings: bot identity and session-resume defaults.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ManagerOptions {
    /// The bot's own user id, sent in the node handshake and used to filter
    /// gateway voice-state packets.
    pub user_id: u64,
    #[serde(default = "default_shards")]
    pub shards: u64,
    /// Resume key presented to nodes. Defaults to the bot user id.
    #[serde(default)]
    pub resume_key: Option<String>,
    #[serde(default = "default_resume_timeout")]
    pub resume_timeout_secs: u64,
}

impl ManagerOptions {
    pub fn new(user_id: u64) -> Self {
        Self {
            user_id,
            shards: default_shards(),
            resume_key: None,
            resume_timeout_secs: default_resume_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub manager: ManagerOptions,
    #[serde(default)]
    pub nodes: Vec<NodeOptions>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&text).map_err(|e| Error::Config(e.to_string()))
    }
}

fn default_port() -> u16 {
    2333
}

fn default_password() -> String {
    "youshallnotpass".to_string()
}

fn default_reconnect_interval() -> u64 {
    5000
}

fn default_shards() -> u64 {
    1
}

fn default_resume_timeout() -> u64 {
    120
}
