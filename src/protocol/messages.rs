use serde::{Deserialize, Serialize};

use crate::common::types::GuildId;
use crate::gateway::VoiceServerUpdate;
use crate::protocol::stats::NodeStats;

/// Commands sent from this client to a node over WebSocket.
///
/// Every guild-scoped command shares the `{op, guildId, ...}` envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum OutgoingMessage {
    #[serde(rename_all = "camelCase")]
    Play {
        guild_id: GuildId,
        track: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        start_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        no_replace: Option<bool>,
    },
    #[serde(rename_all = "camelCase")]
    Stop { guild_id: GuildId },
    #[serde(rename_all = "camelCase")]
    Pause { guild_id: GuildId, pause: bool },
    #[serde(rename_all = "camelCase")]
    Volume { guild_id: GuildId, volume: u32 },
    #[serde(rename_all = "camelCase")]
    Seek { guild_id: GuildId, position: u64 },
    #[serde(rename_all = "camelCase")]
    Equalizer {
        guild_id: GuildId,
        bands: Vec<EqualizerBand>,
    },
    #[serde(rename_all = "camelCase")]
    Destroy { guild_id: GuildId },
    #[serde(rename_all = "camelCase")]
    VoiceUpdate {
        guild_id: GuildId,
        session_id: String,
        /// The raw voice-server grant, field names untouched.
        event: VoiceServerUpdate,
    },
    #[serde(rename_all = "camelCase")]
    ConfigureResuming { key: String, timeout: u64 },
}

/// Messages a node pushes to this client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum InboundMessage {
    Stats(NodeStats),
    #[serde(rename_all = "camelCase")]
    PlayerUpdate {
        guild_id: GuildId,
        state: PositionUpdate,
    },
    Event(RemoteEvent),
}

/// The node-authoritative playback clock carried by `playerUpdate`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionUpdate {
    #[serde(default)]
    pub time: u64,
    #[serde(default)]
    pub position: Option<u64>,
}

/// A playback lifecycle event. The `type` discriminator is kept as a string
/// so unrecognized kinds can be surfaced by name instead of torn down.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub guild_id: GuildId,
    #[serde(default)]
    pub track: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub threshold_ms: Option<u64>,
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub by_remote: Option<bool>,
}

/// One equalizer band: 0..=14, gain -0.25..=1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqualizerBand {
    pub band: u8,
    pub gain: f32,
}

/// The correlated voice handshake for a guild: the gateway session id joined
/// with the voice-server grant. Payload of the `voiceUpdate` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceSessionGrant {
    pub session_id: String,
    pub event: VoiceServerUpdate,
}
