//! Boundary with the bot's gateway client.
//!
//! Inbound, the application feeds raw `VOICE_SERVER_UPDATE` and
//! `VOICE_STATE_UPDATE` packets into
//! [`PlayerManager::handle_gateway_packet`](crate::manager::PlayerManager::handle_gateway_packet).
//! Outbound, the manager emits `{op: 4}` voice-state intents through a
//! [`GatewayBridge`] capability supplied at construction. The bridge owns
//! shard lookup and delivery; this crate never reaches into ambient client
//! state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::errors::Result;
use crate::common::types::{ChannelId, GuildId, UserId};

/// The token half of a guild's voice handshake, as delivered by the gateway.
/// Forwarded verbatim to the node inside the `voiceUpdate` command, so the
/// field names stay in gateway snake_case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceServerUpdate {
    pub token: String,
    pub guild_id: GuildId,
    pub endpoint: String,
}

/// The session half of a guild's voice handshake. A missing `channel_id`
/// means the bot left the voice channel.
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceStateUpdate {
    pub guild_id: GuildId,
    #[serde(default, deserialize_with = "snowflake::channel_id_opt")]
    pub channel_id: Option<ChannelId>,
    #[serde(deserialize_with = "snowflake::user_id")]
    pub user_id: UserId,
    pub session_id: String,
}

/// An `{op: 4, d: {...}}` voice-state intent for the bot gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GatewayPacket {
    pub op: u8,
    pub d: UpdateVoiceState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateVoiceState {
    pub guild_id: GuildId,
    /// Snowflake as a string, or null to disconnect.
    pub channel_id: Option<String>,
    pub self_mute: bool,
    pub self_deaf: bool,
}

impl GatewayPacket {
    pub fn join(
        guild_id: GuildId,
        channel_id: ChannelId,
        self_mute: bool,
        self_deaf: bool,
    ) -> Self {
        Self {
            op: 4,
            d: UpdateVoiceState {
                guild_id,
                channel_id: Some(channel_id.to_string()),
                self_mute,
                self_deaf,
            },
        }
    }

    pub fn leave(guild_id: GuildId) -> Self {
        Self {
            op: 4,
            d: UpdateVoiceState {
                guild_id,
                channel_id: None,
                self_mute: false,
                self_deaf: false,
            },
        }
    }
}

/// Capability for routing gateway packets to the shard owning a guild.
#[async_trait]
pub trait GatewayBridge: Send + Sync {
    async fn send_packet(&self, guild_id: &GuildId, packet: GatewayPacket) -> Result<()>;
}

/// Discord snowflakes arrive as JSON strings on gateway payloads; accept
/// either form.
mod snowflake {
    use serde::{Deserialize, Deserializer};

    use crate::common::types::{ChannelId, UserId};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    fn parse<E: serde::de::Error>(raw: Raw) -> Result<u64, E> {
        match raw {
            Raw::Number(n) => Ok(n),
            Raw::Text(s) => s
                .parse()
                .map_err(|_| E::custom(format!("invalid snowflake {s:?}"))),
        }
    }

    pub(super) fn user_id<'de, D: Deserializer<'de>>(d: D) -> Result<UserId, D::Error> {
        parse(Raw::deserialize(d)?).map(UserId)
    }

    pub(super) fn channel_id_opt<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<ChannelId>, D::Error> {
        Option::<Raw>::deserialize(d)?
            .map(|raw| parse(raw).map(ChannelId))
            .transpose()
    }
}
