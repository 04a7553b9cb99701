//! Fleet coordination: node registry, guild sessions, voice-grant
//! correlation, load ranking, and cross-node migration.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tracing::{info, warn};

use crate::common::errors::{Error, Result};
use crate::common::events::EventSink;
use crate::common::types::{ChannelId, GuildId, UserId};
use crate::config::{ManagerOptions, NodeOptions};
use crate::gateway::{GatewayBridge, GatewayPacket, VoiceServerUpdate, VoiceStateUpdate};
use crate::node::NodeLink;
use crate::player::Player;
use crate::protocol::VoiceSessionGrant;

/// Forward offset applied when resuming playback after a migration, to
/// compensate for the handshake latency on the new node.
const MIGRATION_SKIP_MS: u64 = 2000;

/// Observability events emitted by the manager and its node links.
#[derive(Debug, Clone)]
pub enum ManagerEvent {
    NodeReady(Arc<NodeLink>),
    NodeDisconnect {
        node: Arc<NodeLink>,
        code: u16,
        reason: String,
    },
    NodeError {
        node: Arc<NodeLink>,
        message: String,
    },
    NodeReconnecting(Arc<NodeLink>),
    /// Every parsed inbound frame, with the link it arrived on.
    Raw {
        node: Arc<NodeLink>,
        payload: serde_json::Value,
    },
}

/// Join-time voice-state flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct JoinOptions {
    pub self_mute: bool,
    pub self_deaf: bool,
}

/// State shared between the manager and the node links it owns.
pub(crate) struct ManagerContext {
    pub(crate) players: DashMap<GuildId, Arc<Player>>,
    pub(crate) events: EventSink<ManagerEvent>,
    pub(crate) user_id: UserId,
    pub(crate) shards: u64,
    pub(crate) resume_key: Option<String>,
    pub(crate) resume_timeout: u64,
}

impl ManagerContext {
    pub(crate) fn new(
        user_id: UserId,
        shards: u64,
        resume_key: Option<String>,
        resume_timeout: u64,
    ) -> Self {
        Self {
            players: DashMap::new(),
            events: EventSink::new(),
            user_id,
            shards,
            resume_key,
            resume_timeout,
        }
    }
}

/// Owns the fleet's node links and guild sessions.
///
/// Voice-server and voice-state grants may arrive in either order; each is
/// buffered per guild and the session-open command is dispatched exactly
/// once per matching pair.
pub struct PlayerManager {
    ctx: Arc<ManagerContext>,
    bridge: Arc<dyn GatewayBridge>,
    nodes: DashMap<String, Arc<NodeLink>>,
    voice_servers: DashMap<GuildId, VoiceServerUpdate>,
    voice_states: DashMap<GuildId, VoiceStateUpdate>,
    next_ordinal: AtomicU64,
}

impl PlayerManager {
    pub fn new(bridge: Arc<dyn GatewayBridge>, options: ManagerOptions) -> Self {
        Self {
            ctx: Arc::new(ManagerContext::new(
                UserId(options.user_id),
                options.shards,
                options.resume_key,
                options.resume_timeout_secs,
            )),
            bridge,
            nodes: DashMap::new(),
            voice_servers: DashMap::new(),
            voice_states: DashMap::new(),
            next_ordinal: AtomicU64::new(0),
        }
    }

    /// Builds the manager and registers every configured node.
    pub fn with_nodes(
        bridge: Arc<dyn GatewayBridge>,
        options: ManagerOptions,
        nodes: Vec<NodeOptions>,
    ) -> Self {
        let manager = Self::new(bridge, options);
        for node in nodes {
            manager.create_node(node);
        }
        manager
    }

    pub fn subscribe(&self) -> flume::Receiver<ManagerEvent> {
        self.ctx.events.subscribe()
    }

    /// Registers a node and starts connecting to it in the background.
    pub fn create_node(&self, options: NodeOptions) -> Arc<NodeLink> {
        let ordinal = self.next_ordinal.fetch_add(1, Ordering::Relaxed);
        let link = NodeLink::new(options, ordinal, self.ctx.clone());
        self.nodes.insert(link.host().to_string(), link.clone());
        let spawned = link.clone();
        tokio::spawn(async move {
            if let Err(e) = spawned.open().await {
                warn!(host = %spawned.host(), error = %e, "initial node connection failed");
            }
        });
        link
    }

    /// Drops the registry entry. Sessions still bound to the node are left
    /// for the caller to migrate or release.
    pub fn remove_node(&self, host: &str) -> bool {
        self.nodes.remove(host).is_some()
    }

    pub fn node(&self, host: &str) -> Option<Arc<NodeLink>> {
        self.nodes.get(host).map(|entry| entry.value().clone())
    }

    pub fn player(&self, guild_id: &GuildId) -> Option<Arc<Player>> {
        self.ctx.players.get(guild_id).map(|entry| entry.value().clone())
    }

    /// Connected nodes, best candidate first: ascending normalized CPU
    /// load, ties broken by registration order. Recomputed on every call.
    pub fn ideal_nodes(&self) -> Vec<Arc<NodeLink>> {
        let mut nodes: Vec<Arc<NodeLink>> = self
            .nodes
            .iter()
            .filter(|entry| entry.value().connected())
            .map(|entry| entry.value().clone())
            .collect();
        nodes.sort_by(|a, b| {
            a.normalized_load()
                .partial_cmp(&b.normalized_load())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.ordinal().cmp(&b.ordinal()))
        });
        nodes
    }

    /// Asks the gateway to join `channel_id` and creates the guild's
    /// session on the node registered under `host`. Idempotent: an existing
    /// session is returned as-is, without a second gateway intent.
    pub async fn join(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        host: &str,
        options: JoinOptions,
    ) -> Result<Arc<Player>> {
        if let Some(existing) = self.player(&guild_id) {
            return Ok(existing);
        }
        let node = self
            .node(host)
            .ok_or_else(|| Error::InvalidHost(host.to_string()))?;

        self.bridge
            .send_packet(
                &guild_id,
                GatewayPacket::join(
                    guild_id.clone(),
                    channel_id,
                    options.self_mute,
                    options.self_deaf,
                ),
            )
            .await?;

        let player = Player::new(guild_id.clone(), channel_id, node);
        self.ctx.players.insert(guild_id, player.clone());
        Ok(player)
    }

    /// Asks the gateway to leave the guild's voice channel. The leave
    /// intent is emitted whether or not a session exists; returns `false`
    /// when there was none to release.
    pub async fn leave(&self, guild_id: &GuildId) -> Result<bool> {
        self.bridge
            .send_packet(guild_id, GatewayPacket::leave(guild_id.clone()))
            .await?;

        let Some((_, player)) = self.ctx.players.remove(guild_id) else {
            return Ok(false);
        };
        player.detach_listeners();
        if let Err(e) = player.destroy_remote().await {
            warn!(guild = %guild_id, error = %e, "destroy command failed during leave");
        }
        Ok(true)
    }

    /// Entry point for raw gateway packets. Routes voice-server and
    /// voice-state updates; anything else resolves `false`.
    pub async fn handle_gateway_packet(&self, packet: serde_json::Value) -> Result<bool> {
        let data = || packet.get("d").cloned().unwrap_or(serde_json::Value::Null);
        match packet.get("t").and_then(serde_json::Value::as_str) {
            Some("VOICE_SERVER_UPDATE") => {
                self.on_voice_server_update(serde_json::from_value(data())?)
                    .await
            }
            Some("VOICE_STATE_UPDATE") => {
                self.on_voice_state_update(serde_json::from_value(data())?)
                    .await
            }
            _ => Ok(false),
        }
    }

    /// Buffers the token half of the handshake and attempts correlation.
    pub async fn on_voice_server_update(&self, update: VoiceServerUpdate) -> Result<bool> {
        let guild_id = update.guild_id.clone();
        self.voice_servers.insert(guild_id.clone(), update);
        self.attempt_connection(&guild_id).await
    }

    /// Buffers the session half of the handshake and attempts correlation.
    /// Packets for other users are ignored; a state without a channel means
    /// the bot left, discarding both buffered grants for the guild.
    pub async fn on_voice_state_update(&self, update: VoiceStateUpdate) -> Result<bool> {
        if update.user_id != self.ctx.user_id {
            return Ok(false);
        }
        if update.channel_id.is_none() {
            self.voice_servers.remove(&update.guild_id);
            self.voice_states.remove(&update.guild_id);
            return Ok(false);
        }
        let guild_id = update.guild_id.clone();
        self.voice_states.insert(guild_id.clone(), update);
        self.attempt_connection(&guild_id).await
    }

    /// Dispatches the session-open command once both grants and a live
    /// session are present. The pair is consumed before dispatch, so a
    /// failed open is surfaced to the caller without being retried and
    /// retransmitted gateway packets cannot cause a duplicate open.
    async fn attempt_connection(&self, guild_id: &GuildId) -> Result<bool> {
        if !self.voice_servers.contains_key(guild_id) || !self.voice_states.contains_key(guild_id)
        {
            return Ok(false);
        }
        let Some(player) = self.player(guild_id) else {
            return Ok(false);
        };
        let Some((_, server)) = self.voice_servers.remove(guild_id) else {
            return Ok(false);
        };
        let Some((_, state)) = self.voice_states.remove(guild_id) else {
            return Ok(false);
        };

        player
            .open_voice_session(VoiceSessionGrant {
                session_id: state.session_id,
                event: server,
            })
            .await?;
        Ok(true)
    }

    /// Moves a session to `target` while preserving continuity: the remote
    /// player is destroyed on the old node, the session is rebound, the
    /// captured voice grant, volume and equalizer are reapplied, and
    /// playback resumes slightly ahead of the captured position to absorb
    /// the handshake latency. A failure part-way leaves the session in a
    /// degraded state and is surfaced to the caller; nothing retries it
    /// silently.
    pub async fn switch_node(&self, player: &Arc<Player>, target: &Arc<NodeLink>) -> Result<()> {
        player.begin_migration()?;
        let outcome = self.migrate(player, target).await;
        player.end_migration();
        outcome
    }

    async fn migrate(&self, player: &Arc<Player>, target: &Arc<NodeLink>) -> Result<()> {
        let snapshot = player.snapshot();
        let resume_at = snapshot
            .position
            .map_or(MIGRATION_SKIP_MS, |p| p + MIGRATION_SKIP_MS);

        player.destroy_remote().await?;
        player.rebind(target.clone());
        info!(
            guild = %player.guild_id(),
            target = %target.host(),
            "rebound session to new node"
        );

        match snapshot.grant {
            Some(grant) => {
                player.open_voice_session_inner(grant).await?;
            }
            None => {
                warn!(guild = %player.guild_id(), "no voice grant captured; skipping voice re-open");
            }
        }

        player.apply_volume(snapshot.volume).await?;
        player.apply_equalizer(snapshot.equalizer).await?;
        if let Some(track) = snapshot.track {
            player.resume_playback(&track, resume_at).await?;
        }
        Ok(())
    }
}
