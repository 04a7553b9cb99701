//! Client library for driving a fleet of Lavalink-protocol audio nodes.
//!
//! A [`PlayerManager`] owns any number of [`NodeLink`]s (one authenticated
//! WebSocket session per remote node) and one [`Player`] per guild. Voice
//! grants arriving from the bot gateway are buffered and correlated per
//! guild; once both halves are present the manager opens the voice session
//! on the node the guild's player is bound to. Players can be migrated
//! between nodes without losing playback position.

pub mod common;
pub mod config;
pub mod gateway;
pub mod manager;
pub mod node;
pub mod player;
pub mod protocol;
pub mod rest;

pub use common::errors::{Error, Result};
pub use common::types::{ChannelId, GuildId, UserId};
pub use config::{Config, ManagerOptions, NodeOptions};
pub use gateway::{GatewayBridge, GatewayPacket, VoiceServerUpdate, VoiceStateUpdate};
pub use manager::{JoinOptions, ManagerEvent, PlayerManager};
pub use node::NodeLink;
pub use player::{PlayOptions, Player, PlayerEvent};
pub use protocol::{EqualizerBand, NodeStats, VoiceSessionGrant};
pub use rest::RestClient;
