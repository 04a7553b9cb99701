//! Per-guild playback session.

pub mod state;

pub use state::PlayerState;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::common::errors::{Error, Result};
use crate::common::events::EventSink;
use crate::common::types::{ChannelId, GuildId, unix_ms};
use crate::node::NodeLink;
use crate::protocol::{
    EqualizerBand, OutgoingMessage, PositionUpdate, RemoteEvent, VoiceSessionGrant,
};

/// Options for the play command.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayOptions {
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub no_replace: Option<bool>,
}

/// Events re-dispatched from the node to application listeners. When no
/// listener is subscribed the event is dropped silently.
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// Playback finished, was stopped, or the track got stuck.
    End(Arc<RemoteEvent>),
    /// The track errored or the node's upstream voice socket closed.
    Error(Arc<RemoteEvent>),
    /// The node sent an event kind this client does not know.
    Warn(String),
}

/// A guild's playback session, bound to one [`NodeLink`] at a time.
///
/// Commands resolve to whether the node accepted them; the local state
/// mirror is only updated on acceptance. While the session is being moved
/// between nodes every command is rejected with [`Error::Migrating`].
pub struct Player {
    guild_id: GuildId,
    channel_id: ChannelId,
    node: RwLock<Arc<NodeLink>>,
    state: Mutex<PlayerState>,
    playing: AtomicBool,
    paused: AtomicBool,
    track: Mutex<Option<String>>,
    play_timestamp: Mutex<Option<u64>>,
    voice_grant: Mutex<Option<VoiceSessionGrant>>,
    migrating: AtomicBool,
    events: EventSink<PlayerEvent>,
}

impl Player {
    pub(crate) fn new(guild_id: GuildId, channel_id: ChannelId, node: Arc<NodeLink>) -> Arc<Self> {
        Arc::new(Self {
            guild_id,
            channel_id,
            node: RwLock::new(node),
            state: Mutex::new(PlayerState::default()),
            playing: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            track: Mutex::new(None),
            play_timestamp: Mutex::new(None),
            voice_grant: Mutex::new(None),
            migrating: AtomicBool::new(false),
            events: EventSink::new(),
        })
    }

    pub fn guild_id(&self) -> &GuildId {
        &self.guild_id
    }

    pub fn channel_id(&self) -> ChannelId {
        self.channel_id
    }

    /// The node this session is currently bound to.
    pub fn node(&self) -> Arc<NodeLink> {
        self.node.read().clone()
    }

    pub fn playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn track(&self) -> Option<String> {
        self.track.lock().clone()
    }

    /// Epoch milliseconds of the last accepted play command.
    pub fn play_timestamp(&self) -> Option<u64> {
        self.play_timestamp.lock().clone()
    }

    pub fn state(&self) -> PlayerState {
        self.state.lock().clone()
    }

    /// Best-effort current position: the last node-reported position plus
    /// wall time elapsed since its receipt while playback is running.
    pub fn position(&self) -> Option<u64> {
        let state = self.state.lock();
        let position = state.position?;
        if self.playing() && !self.paused() {
            let elapsed = state
                .received_at
                .map(|at| at.elapsed().as_millis() as u64)
                .unwrap_or(0);
            Some(position + elapsed)
        } else {
            Some(position)
        }
    }

    pub fn subscribe(&self) -> flume::Receiver<PlayerEvent> {
        self.events.subscribe()
    }

    pub(crate) fn detach_listeners(&self) {
        self.events.clear();
    }

    pub async fn play(&self, track: &str, options: PlayOptions) -> Result<bool> {
        self.guard()?;
        self.play_inner(track, options).await
    }

    pub async fn stop(&self) -> Result<bool> {
        self.guard()?;
        let accepted = self
            .dispatch(OutgoingMessage::Stop {
                guild_id: self.guild_id.clone(),
            })
            .await?;
        if accepted {
            self.playing.store(false, Ordering::SeqCst);
            *self.play_timestamp.lock() = None;
        }
        Ok(accepted)
    }

    pub async fn pause(&self, pause: bool) -> Result<bool> {
        self.guard()?;
        let accepted = self
            .dispatch(OutgoingMessage::Pause {
                guild_id: self.guild_id.clone(),
                pause,
            })
            .await?;
        if accepted {
            self.paused.store(pause, Ordering::SeqCst);
        }
        Ok(accepted)
    }

    pub async fn resume(&self) -> Result<bool> {
        self.pause(false).await
    }

    pub async fn set_volume(&self, volume: u32) -> Result<bool> {
        self.guard()?;
        self.apply_volume(volume).await
    }

    /// Seeking does not touch the local mirror; the position stays
    /// node-authoritative and is corrected by the next `playerUpdate`.
    pub async fn seek(&self, position: u64) -> Result<bool> {
        self.guard()?;
        self.dispatch(OutgoingMessage::Seek {
            guild_id: self.guild_id.clone(),
            position,
        })
        .await
    }

    pub async fn set_equalizer(&self, bands: Vec<EqualizerBand>) -> Result<bool> {
        self.guard()?;
        self.apply_equalizer(bands).await
    }

    /// Tears down the remote player. The session object itself is released
    /// by [`PlayerManager::leave`](crate::manager::PlayerManager::leave).
    pub async fn destroy(&self) -> Result<bool> {
        self.guard()?;
        self.destroy_remote().await
    }

    /// Stores the correlated voice grant and opens the voice session on the
    /// bound node.
    pub async fn open_voice_session(&self, grant: VoiceSessionGrant) -> Result<bool> {
        self.guard()?;
        self.open_voice_session_inner(grant).await
    }

    pub(crate) fn voice_grant(&self) -> Option<VoiceSessionGrant> {
        self.voice_grant.lock().clone()
    }

    fn guard(&self) -> Result<()> {
        if self.migrating.load(Ordering::SeqCst) {
            return Err(Error::Migrating);
        }
        Ok(())
    }

    async fn dispatch(&self, message: OutgoingMessage) -> Result<bool> {
        let node = self.node();
        if !node.connected() {
            return Err(Error::NotConnected);
        }
        node.send(&message).await
    }

    async fn play_inner(&self, track: &str, options: PlayOptions) -> Result<bool> {
        let accepted = self
            .dispatch(OutgoingMessage::Play {
                guild_id: self.guild_id.clone(),
                track: track.to_string(),
                start_time: options.start_time,
                end_time: options.end_time,
                no_replace: options.no_replace,
            })
            .await?;
        if accepted {
            *self.track.lock() = Some(track.to_string());
            self.playing.store(true, Ordering::SeqCst);
            *self.play_timestamp.lock() = Some(unix_ms());
        }
        Ok(accepted)
    }

    pub(crate) async fn destroy_remote(&self) -> Result<bool> {
        self.dispatch(OutgoingMessage::Destroy {
            guild_id: self.guild_id.clone(),
        })
        .await
    }

    pub(crate) async fn open_voice_session_inner(&self, grant: VoiceSessionGrant) -> Result<bool> {
        *self.voice_grant.lock() = Some(grant.clone());
        self.dispatch(OutgoingMessage::VoiceUpdate {
            guild_id: self.guild_id.clone(),
            session_id: grant.session_id,
            event: grant.event,
        })
        .await
    }

    pub(crate) async fn apply_volume(&self, volume: u32) -> Result<bool> {
        let accepted = self
            .dispatch(OutgoingMessage::Volume {
                guild_id: self.guild_id.clone(),
                volume,
            })
            .await?;
        if accepted {
            self.state.lock().volume = volume;
        }
        Ok(accepted)
    }

    pub(crate) async fn apply_equalizer(&self, bands: Vec<EqualizerBand>) -> Result<bool> {
        let accepted = self
            .dispatch(OutgoingMessage::Equalizer {
                guild_id: self.guild_id.clone(),
                bands: bands.clone(),
            })
            .await?;
        if accepted {
            self.state.lock().equalizer = bands;
        }
        Ok(accepted)
    }

    pub(crate) async fn resume_playback(&self, track: &str, start_time: u64) -> Result<bool> {
        self.play_inner(
            track,
            PlayOptions {
                start_time: Some(start_time),
                ..PlayOptions::default()
            },
        )
        .await
    }

    /// Marks the session as mid-migration so concurrent commands are
    /// rejected rather than racing a half-updated node binding.
    pub(crate) fn begin_migration(&self) -> Result<()> {
        self.migrating
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map(|_| ())
            .map_err(|_| Error::Migrating)
    }

    pub(crate) fn end_migration(&self) {
        self.migrating.store(false, Ordering::SeqCst);
    }

    pub(crate) fn rebind(&self, node: Arc<NodeLink>) {
        *self.node.write() = node;
    }

    pub(crate) fn snapshot(&self) -> MigrationSnapshot {
        let state = self.state.lock();
        MigrationSnapshot {
            track: self.track.lock().clone(),
            volume: state.volume,
            equalizer: state.equalizer.clone(),
            position: state.position,
            grant: self.voice_grant.lock().clone(),
        }
    }

    /// Merges a node position sync into the mirror, preserving the locally
    /// known volume and equalizer.
    pub(crate) fn handle_position_update(&self, update: PositionUpdate) {
        let mut state = self.state.lock();
        state.time = Some(update.time);
        state.position = update.position;
        state.received_at = Some(std::time::Instant::now());
    }

    pub(crate) async fn handle_remote_event(&self, event: RemoteEvent) {
        match event.kind.as_str() {
            "TrackEndEvent" => {
                if event.reason.as_deref() != Some("REPLACED") {
                    self.playing.store(false, Ordering::SeqCst);
                    *self.track.lock() = None;
                    *self.play_timestamp.lock() = None;
                }
                self.events.emit(PlayerEvent::End(Arc::new(event)));
            }
            "TrackExceptionEvent" => {
                self.events.emit(PlayerEvent::Error(Arc::new(event)));
            }
            "TrackStuckEvent" => {
                if let Err(e) = self.stop().await {
                    warn!(guild = %self.guild_id, error = %e, "stop after stuck track failed");
                }
                self.events.emit(PlayerEvent::End(Arc::new(event)));
            }
            "WebSocketClosedEvent" => {
                self.events.emit(PlayerEvent::Error(Arc::new(event)));
            }
            other => {
                warn!(guild = %self.guild_id, kind = other, "unexpected player event type");
                self.events
                    .emit(PlayerEvent::Warn(format!("unexpected event type: {other}")));
            }
        }
    }
}

/// State captured from a session before moving it to another node.
pub(crate) struct MigrationSnapshot {
    pub track: Option<String>,
    pub volume: u32,
    pub equalizer: Vec<EqualizerBand>,
    pub position: Option<u64>,
    pub grant: Option<VoiceSessionGrant>,
}
