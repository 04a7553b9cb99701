use thiserror::Error;

/// Failures surfaced by the fleet client.
///
/// Transport faults are contained at the node-link boundary and converted
/// into reconnect attempts plus observability events; command-level faults
/// are returned synchronously to the caller. Nothing here is allowed to
/// take the host process down.
#[derive(Debug, Error)]
pub enum Error {
    /// A command was attempted while the bound node link is disconnected.
    #[error("node link is not connected")]
    NotConnected,

    /// A join or migration referenced a node host that was never registered.
    #[error("no node registered under host {0:?}")]
    InvalidHost(String),

    /// The WebSocket transport failed.
    #[error("transport failure: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// A malformed or unexpected message, inbound or outbound.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A command was issued against a session while it is moving between
    /// nodes.
    #[error("player is migrating between nodes")]
    Migrating,

    /// The gateway bridge refused or failed to route a packet.
    #[error("gateway dispatch failed: {0}")]
    Gateway(String),

    /// A node REST request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
